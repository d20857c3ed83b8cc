use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use colored::Colorize;
use serde::Serialize;

use crate::bug;
use crate::executor::continuation::{Body, Command, ExceptionKind, Frame, FrameStack, PropertyValue};
use crate::executor::error::StepError;
use crate::executor::small_step::StepContext;
use crate::executor::symbolic_env::SymbolicEnv;
use crate::executor::symbolic_value::{has_taint, lookup_fmt};
use crate::executor::test_object::TestObject;
use crate::executor::utils::italic;
use crate::ir::expression::{Expr, ExprRef, StateVariable, VALID_FIELD};
use crate::ir::program::{ProgramInfo, VariableInit};
use crate::ir::types::Type;

/// Property set while the actions of a tainted constant table run.
pub const IN_UNDEFINED_STATE: &str = "inUndefinedState";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    Table,
    Extern,
    Parser,
    Packet,
    Exception,
    Generic,
}

impl fmt::Display for TraceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TraceKind::Table => "table",
            TraceKind::Extern => "extern",
            TraceKind::Parser => "parser",
            TraceKind::Packet => "packet",
            TraceKind::Exception => "exception",
            TraceKind::Generic => "generic",
        };
        write!(f, "{}", s)
    }
}

/// A diagnostic record of what a path did, in order.
#[derive(Clone, Debug, PartialEq)]
pub struct TraceEvent {
    pub kind: TraceKind,
    pub message: String,
    pub expr: Option<ExprRef>,
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.expr {
            Some(e) => write!(f, "[{}] {}: {}", self.kind, self.message, e),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

pub type TestObjectMap = BTreeMap<String, BTreeMap<String, Rc<TestObject>>>;

/// The forkable unit of interpretation.
///
/// Every component is reference counted, so `clone` is O(1) and a clone
/// only copies a component when it first mutates it.
#[derive(Clone, Debug, Default)]
pub struct ExecutionState {
    body: Body,
    stack: FrameStack,
    env: SymbolicEnv,
    test_objects: Rc<TestObjectMap>,
    properties: Rc<BTreeMap<String, PropertyValue>>,
    visited: Rc<BTreeSet<usize>>,
    namespaces: Rc<Vec<String>>,
    trace: Rc<Vec<TraceEvent>>,
    path_constraint: Rc<Vec<ExprRef>>,
    input_packet: Rc<Vec<(String, ExprRef)>>,
    output_packet: Rc<Vec<(String, ExprRef)>>,
    input_packet_bits: u64,
    var_counter: u64,
    placeholder_counter: u64,
    concolic_counter: u64,
    exception: Option<ExceptionKind>,
}

impl ExecutionState {
    /// Creates a new, empty `ExecutionState`.
    pub fn new() -> Self {
        ExecutionState::default()
    }

    /// Creates a state whose body holds `commands`.
    pub fn with_body(commands: Vec<Command>) -> Self {
        ExecutionState {
            body: Body::from_commands(commands),
            ..ExecutionState::default()
        }
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn top_command(&self) -> Option<&Command> {
        self.body.top()
    }

    pub fn stack(&self) -> &FrameStack {
        &self.stack
    }

    /// A path is finished once nothing remains to execute.
    pub fn is_terminated(&self) -> bool {
        self.body.is_empty() && self.stack.is_empty()
    }

    pub fn env(&self) -> &SymbolicEnv {
        &self.env
    }

    /// Retrieves the value of a variable, the variable itself if unbound.
    pub fn get(&self, var: &StateVariable) -> ExprRef {
        self.env.get(var)
    }

    /// Binds a variable to an expression.
    ///
    /// # Arguments
    ///
    /// * `var` - The canonical variable.
    /// * `value` - The expression to bind; must be symbolic.
    pub fn set(&mut self, var: &StateVariable, value: ExprRef) {
        self.env.set(var, value);
    }

    pub fn exists(&self, var: &StateVariable) -> bool {
        self.env.exists(var)
    }

    /// Replaces the command on top of the body with `commands`.
    pub fn replace_top_body(&mut self, commands: Vec<Command>) {
        self.body = self.body.tail().prepend(commands);
    }

    /// Consumes the command on top of the body.
    pub fn pop_body(&mut self) {
        self.body = self.body.tail();
    }

    pub fn replace_body(&mut self, body: Body) {
        self.body = body;
    }

    pub fn push_namespace(&mut self, namespace: &str) {
        Rc::make_mut(&mut self.namespaces).push(namespace.to_string());
    }

    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    pub fn namespaces_rc(&self) -> Rc<Vec<String>> {
        Rc::clone(&self.namespaces)
    }

    /// Suspends the rest of the current body in a frame.
    pub fn push_continuation(&mut self, frame: Frame) {
        self.stack.push(frame);
    }

    /// Resumes the innermost frame, substituting its parameter with `value`.
    /// With no frame left the path has finished.
    pub fn pop_continuation(&mut self, value: Option<ExprRef>) {
        match self.stack.pop() {
            Some(frame) => {
                let body = match (frame.parameter, value.as_ref()) {
                    (Some(id), Some(v)) => frame.body.substitute_top(id, v),
                    _ => frame.body.clone(),
                };
                self.body = body;
                self.namespaces = Rc::clone(&frame.namespaces);
            }
            None => self.body = Body::new(),
        }
    }

    /// Unwinds to the innermost frame with a handler for `kind` and runs the
    /// handler. Returns false, and terminates the path, when none exists.
    pub fn handle_exception(&mut self, kind: ExceptionKind) -> bool {
        while let Some(frame) = self.stack.pop() {
            if let Some(handler) = frame.handlers.get(&kind) {
                self.body = handler.clone();
                self.namespaces = Rc::clone(&frame.namespaces);
                return true;
            }
        }
        self.body = Body::new();
        self.exception = Some(kind);
        false
    }

    pub fn exception(&self) -> Option<ExceptionKind> {
        self.exception
    }

    /// Allocates a fresh symbolic variable named `<hint>_<n>`. The counter is
    /// carried in the state so naming is deterministic per path.
    pub fn create_symbolic_variable(&mut self, ty: Type, hint: &str) -> ExprRef {
        let name = format!("{}_{}", hint, self.var_counter);
        self.var_counter += 1;
        Expr::symbolic_var(&name, ty)
    }

    /// Binds every scalar leaf of `var` according to `init`. Stack indices
    /// always start at 0, and headers that are not symbolic inputs start
    /// invalid.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Supplies the program and the target's uninitialized values.
    /// * `var` - The declared variable.
    /// * `init` - How its leaves are initialized.
    pub fn declare_variable(
        &mut self,
        ctx: &StepContext<'_>,
        var: &StateVariable,
        init: &VariableInit,
    ) -> Result<(), StepError> {
        if let VariableInit::Constant { value } = init {
            if ctx.program.resolve_type(&var.ty).is_composite() {
                return Err(bug!("constant initializer {} for composite {}", value, var));
            }
            self.set(var, Rc::clone(value));
            return Ok(());
        }
        for leaf in flatten_variable(ctx.program, var) {
            let value = if leaf.name.ends_with(".nextIndex") {
                Expr::bits(32, 0)
            } else {
                match init {
                    VariableInit::Symbolic => self.create_symbolic_variable(leaf.ty.clone(), &leaf.name),
                    _ if leaf.name.ends_with(VALID_FIELD) => Expr::boolean(false),
                    VariableInit::Taint => Expr::taint(leaf.ty.clone()),
                    _ => ctx.uninitialized(&leaf.ty, false),
                }
            };
            self.set(&leaf, value);
        }
        Ok(())
    }

    /// Allocates a fresh continuation placeholder.
    pub fn create_placeholder(&mut self, ty: Type) -> (u64, ExprRef) {
        let id = self.placeholder_counter;
        self.placeholder_counter += 1;
        (id, Rc::new(Expr::Placeholder { id, ty }))
    }

    pub fn next_concolic_id(&mut self) -> u64 {
        let id = self.concolic_counter;
        self.concolic_counter += 1;
        id
    }

    pub fn add_test_object(&mut self, category: &str, name: &str, object: TestObject) {
        Rc::make_mut(&mut self.test_objects)
            .entry(category.to_string())
            .or_default()
            .insert(name.to_string(), Rc::new(object));
    }

    /// Looks up a test object.
    ///
    /// # Arguments
    ///
    /// * `category` - The object category, e.g. `tableconfigs`.
    /// * `name` - The object name within the category.
    /// * `required` - Whether absence is an internal error.
    ///
    /// # Returns
    ///
    /// The object if present, `Ok(None)` if absent and optional, and a BUG
    /// error if absent and required.
    pub fn get_test_object(
        &self,
        category: &str,
        name: &str,
        required: bool,
    ) -> Result<Option<Rc<TestObject>>, StepError> {
        let found = self
            .test_objects
            .get(category)
            .and_then(|objs| objs.get(name))
            .cloned();
        if found.is_none() && required {
            return Err(bug!("test object {}/{} does not exist", category, name));
        }
        Ok(found)
    }

    pub fn delete_test_object_category(&mut self, category: &str) {
        if self.test_objects.contains_key(category) {
            Rc::make_mut(&mut self.test_objects).remove(category);
        }
    }

    pub fn test_objects(&self) -> &TestObjectMap {
        &self.test_objects
    }

    pub fn get_property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn get_property_bool(&self, key: &str) -> bool {
        matches!(self.properties.get(key), Some(PropertyValue::Bool(true)))
    }

    pub fn get_property_uint(&self, key: &str) -> u64 {
        match self.properties.get(key) {
            Some(PropertyValue::UInt(v)) => *v,
            _ => 0,
        }
    }

    pub fn set_property(&mut self, key: &str, value: PropertyValue) {
        Rc::make_mut(&mut self.properties).insert(key.to_string(), value);
    }

    pub fn has_property(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    pub fn properties(&self) -> &BTreeMap<String, PropertyValue> {
        &self.properties
    }

    pub fn mark_visited(&mut self, node: usize) {
        if node != 0 && !self.visited.contains(&node) {
            Rc::make_mut(&mut self.visited).insert(node);
        }
    }

    pub fn visited(&self) -> &BTreeSet<usize> {
        &self.visited
    }

    pub fn add_trace_event(&mut self, kind: TraceKind, message: String, expr: Option<ExprRef>) {
        Rc::make_mut(&mut self.trace).push(TraceEvent {
            kind,
            message,
            expr,
        });
    }

    pub fn trace(&self) -> &[TraceEvent] {
        &self.trace
    }

    pub fn add_path_constraint(&mut self, constraint: ExprRef) {
        Rc::make_mut(&mut self.path_constraint).push(constraint);
    }

    pub fn path_constraint(&self) -> &[ExprRef] {
        &self.path_constraint
    }

    /// Appends a field to the input packet and returns the total number of
    /// input bits consumed so far.
    pub fn append_to_input_packet(&mut self, label: &str, value: ExprRef, width: u32) -> u64 {
        Rc::make_mut(&mut self.input_packet).push((label.to_string(), value));
        self.input_packet_bits += width as u64;
        self.input_packet_bits
    }

    pub fn input_packet_bits(&self) -> u64 {
        self.input_packet_bits
    }

    pub fn append_to_output_packet(&mut self, label: &str, value: ExprRef) {
        Rc::make_mut(&mut self.output_packet).push((label.to_string(), value));
    }

    pub fn input_packet(&self) -> &[(String, ExprRef)] {
        &self.input_packet
    }

    pub fn output_packet(&self) -> &[(String, ExprRef)] {
        &self.output_packet
    }

    pub fn has_taint(&self, expr: &Expr) -> bool {
        has_taint(expr)
    }

    /// Formats the state for debug logging.
    pub fn lookup_fmt(&self) -> String {
        let mut s = "".to_string();
        s += &format!("🛠️ {}", "ExecutionState [\n".cyan());
        s += &format!(
            "  {} {}\n",
            "🧭 namespaces:".cyan(),
            italic(&format!("{:?}", self.namespaces)).magenta()
        );
        s += &format!(
            "  {} {} pending, {} frames\n",
            "📏 body:".cyan(),
            self.body.len(),
            self.stack.len()
        );
        s += &format!("  📋 {}\n", "values:".cyan());
        for (k, v) in self.env.iter() {
            s += &format!("      {}: {}\n", k, lookup_fmt(v));
        }
        s += &format!("  🔐 {}\n", "path constraint:".cyan());
        for c in self.path_constraint.iter() {
            s += &format!("      {}\n", lookup_fmt(c));
        }
        s += &format!("  🏷️ {}\n", "properties:".cyan());
        for (k, v) in self.properties.iter() {
            s += &format!("      {}: {}\n", k, v);
        }
        s += &format!("  🧪 {}\n", "test objects:".cyan());
        for (cat, objs) in self.test_objects.iter() {
            for name in objs.keys() {
                s += &format!("      {}/{}\n", cat, name);
            }
        }
        s += &format!("{}\n", "]".cyan());
        s
    }
}

/// Expands a variable into its scalar leaves: bit-vectors, booleans and the
/// validity bit of every header. Stacks expand element-wise.
pub fn flatten_variable(program: &ProgramInfo, var: &StateVariable) -> Vec<StateVariable> {
    let mut out = Vec::new();
    flatten_into(program, var, &mut out);
    out
}

fn flatten_into(program: &ProgramInfo, var: &StateVariable, out: &mut Vec<StateVariable>) {
    let ty = program.resolve_type(&var.ty);
    match &ty {
        Type::Header { fields, .. } | Type::Struct { fields, .. } => {
            if ty.is_header() {
                out.push(var.validity());
            }
            for f in fields {
                flatten_into(program, &var.field(&f.name, f.ty.clone()), out);
            }
        }
        Type::Stack { element, size } => {
            for i in 0..*size {
                let elem = StateVariable::new(&format!("{}[{}]", var.name, i), (**element).clone());
                flatten_into(program, &elem, out);
            }
            out.push(var.field("nextIndex", Type::bits(32)));
        }
        _ => out.push(StateVariable::new(&var.name, ty.clone())),
    }
}
