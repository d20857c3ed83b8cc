use std::collections::BTreeMap;
use std::rc::Rc;

use crate::ir::expression::{Expr, ExprRef, StateVariable};

/// Maps canonical state variables to the expression currently bound to
/// them. Cloning is O(1); the first write after a clone copies the map.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SymbolicEnv {
    map: Rc<BTreeMap<String, ExprRef>>,
}

impl SymbolicEnv {
    pub fn new() -> Self {
        SymbolicEnv::default()
    }

    /// Returns the bound expression, or the variable itself as a symbolic
    /// leaf when it is unbound.
    pub fn get(&self, var: &StateVariable) -> ExprRef {
        match self.map.get(&var.name) {
            Some(e) => Rc::clone(e),
            None => Expr::symbolic_var(&var.name, var.ty.clone()),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&ExprRef> {
        self.map.get(name)
    }

    pub fn exists(&self, var: &StateVariable) -> bool {
        self.map.contains_key(&var.name)
    }

    pub fn set(&mut self, var: &StateVariable, value: ExprRef) {
        Rc::make_mut(&mut self.map).insert(var.name.clone(), value);
    }

    /// A copy holding only the variables whose names start with `prefix`.
    pub fn restricted(&self, prefix: &str) -> SymbolicEnv {
        SymbolicEnv {
            map: Rc::new(
                self.map
                    .iter()
                    .filter(|(k, _)| k.starts_with(prefix))
                    .map(|(k, v)| (k.clone(), Rc::clone(v)))
                    .collect(),
            ),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ExprRef)> {
        self.map.iter()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
