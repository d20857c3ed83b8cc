use std::fs::File;
use std::io::BufReader;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::ir::expression::{Argument, Direction, ExprRef, Keyset};
use crate::ir::statement::{Statement, StmtRef};
use crate::ir::types::{Field, Type};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyElement {
    pub expr: ExprRef,
    pub match_kind: String,
    /// Control-plane name of the key.
    pub name: String,
}

/// An action listed in a table's `actions` property. `args` binds the
/// leading parameters at the table declaration; the remaining parameters
/// are supplied by the control plane.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRef {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Argument>,
    #[serde(default)]
    pub default_only: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCall {
    pub name: String,
    #[serde(default)]
    pub args: Vec<ExprRef>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    pub keys: Vec<Keyset>,
    pub action: ActionCall,
    #[serde(default)]
    pub priority: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct P4Table {
    pub name: String,
    #[serde(default)]
    pub keys: Vec<KeyElement>,
    pub actions: Vec<ActionRef>,
    pub default_action: ActionCall,
    #[serde(default)]
    pub default_is_const: bool,
    #[serde(default)]
    pub entries: Vec<TableEntry>,
    #[serde(default)]
    pub entries_are_const: bool,
    /// Name of the action profile or action selector instance, if any.
    #[serde(default)]
    pub implementation: Option<String>,
}

impl P4Table {
    pub fn action_index(&self, name: &str) -> Option<usize> {
        self.actions.iter().position(|a| a.name == name)
    }

    /// The enum type of `apply().action_run` for this table.
    pub fn action_enum_type(&self) -> Type {
        Type::Enum {
            name: format!("action_list({})", self.name),
            members: self.actions.iter().map(|a| a.name.clone()).collect(),
        }
    }

    pub fn has_key(&self) -> bool {
        !self.keys.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub direction: Direction,
    pub ty: Type,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct P4Action {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Parameter>,
    pub body: StmtRef,
}

impl P4Action {
    pub fn control_plane_params(&self) -> impl Iterator<Item = (usize, &Parameter)> {
        self.params
            .iter()
            .enumerate()
            .filter(|(_, p)| p.direction == Direction::None)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternInstance {
    pub name: String,
    pub type_name: String,
    #[serde(default)]
    pub args: Vec<ExprRef>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserState {
    pub name: String,
    #[serde(default)]
    pub components: Vec<StmtRef>,
    /// `None` only for `accept` and `reject`.
    #[serde(default)]
    pub transition: Option<StmtRef>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct P4Parser {
    pub name: String,
    pub states: Vec<ParserState>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct P4Control {
    pub name: String,
    pub body: StmtRef,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueSet {
    pub name: String,
    pub ty: Type,
    pub size: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Parser,
    Control,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineBlock {
    pub kind: BlockKind,
    pub name: String,
}

/// How a global variable is initialized in the root state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VariableInit {
    /// Unconstrained input, e.g. ingress metadata the test chooses.
    Symbolic,
    /// Value the target gives uninitialized storage.
    Uninitialized,
    Taint,
    Constant { value: ExprRef },
}

impl Default for VariableInit {
    fn default() -> Self {
        VariableInit::Uninitialized
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDecl {
    pub name: String,
    pub ty: Type,
    #[serde(default)]
    pub init: VariableInit,
}

/// The program under test together with lookup tables over its
/// declarations.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramInfo {
    pub name: String,
    pub variables: Vec<VariableDecl>,
    pub parsers: Vec<P4Parser>,
    pub controls: Vec<P4Control>,
    pub tables: Vec<P4Table>,
    pub actions: Vec<P4Action>,
    pub externs: Vec<ExternInstance>,
    pub value_sets: Vec<ValueSet>,
    pub typedefs: Vec<Field>,
    pub pipeline: Vec<PipelineBlock>,
    #[serde(skip)]
    statement_count: usize,
    #[serde(skip)]
    table_index: FxHashMap<String, usize>,
    #[serde(skip)]
    action_index: FxHashMap<String, usize>,
    #[serde(skip)]
    extern_index: FxHashMap<String, usize>,
}

impl ProgramInfo {
    /// Loads a program from its JSON encoding and prepares it for execution.
    ///
    /// # Arguments
    ///
    /// * `file_path` - Path to the JSON file.
    ///
    /// # Returns
    ///
    /// The finalized `ProgramInfo`, or the deserialization error.
    pub fn from_json_file(file_path: &str) -> Result<ProgramInfo, std::io::Error> {
        let file = File::open(file_path)?;
        let program: ProgramInfo = serde_json::from_reader(BufReader::new(file))?;
        Ok(program.finalize())
    }

    pub fn from_json_str(s: &str) -> Result<ProgramInfo, serde_json::Error> {
        let program: ProgramInfo = serde_json::from_str(s)?;
        Ok(program.finalize())
    }

    /// Numbers every statement and builds the name indices. Must be called
    /// once after construction; the loaders do it.
    pub fn finalize(mut self) -> Self {
        self.assign_node_ids();
        self.table_index = self
            .tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();
        self.action_index = self
            .actions
            .iter()
            .enumerate()
            .map(|(i, a)| (a.name.clone(), i))
            .collect();
        self.extern_index = self
            .externs
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.clone(), i))
            .collect();
        self
    }

    /// Assigns statement ids in declaration order: parsers, controls, then
    /// actions. Ids start at 1; 0 marks statements synthesized at run time.
    pub fn assign_node_ids(&mut self) {
        let mut next = 1;
        for parser in self.parsers.iter_mut() {
            for state in parser.states.iter_mut() {
                for stmt in state.components.iter_mut() {
                    next = Statement::number(stmt, next);
                }
                if let Some(t) = state.transition.as_mut() {
                    next = Statement::number(t, next);
                }
            }
        }
        for control in self.controls.iter_mut() {
            next = Statement::number(&mut control.body, next);
        }
        for action in self.actions.iter_mut() {
            next = Statement::number(&mut action.body, next);
        }
        self.statement_count = next - 1;
    }

    pub fn statement_count(&self) -> usize {
        self.statement_count
    }

    fn scoped_lookup(
        index: &FxHashMap<String, usize>,
        namespaces: &[String],
        name: &str,
    ) -> Option<usize> {
        for ns in namespaces.iter().rev() {
            if let Some(i) = index.get(&format!("{}.{}", ns, name)) {
                return Some(*i);
            }
        }
        index.get(name).copied()
    }

    /// Finds a table by name, trying the innermost namespace first.
    pub fn find_table(&self, namespaces: &[String], name: &str) -> Option<&P4Table> {
        Self::scoped_lookup(&self.table_index, namespaces, name).map(|i| &self.tables[i])
    }

    pub fn find_action(&self, namespaces: &[String], name: &str) -> Option<&P4Action> {
        Self::scoped_lookup(&self.action_index, namespaces, name).map(|i| &self.actions[i])
    }

    pub fn find_extern(&self, namespaces: &[String], name: &str) -> Option<&ExternInstance> {
        Self::scoped_lookup(&self.extern_index, namespaces, name).map(|i| &self.externs[i])
    }

    pub fn find_parser(&self, name: &str) -> Option<&P4Parser> {
        self.parsers.iter().find(|p| p.name == name)
    }

    pub fn find_control(&self, name: &str) -> Option<&P4Control> {
        self.controls.iter().find(|c| c.name == name)
    }

    pub fn find_value_set(&self, name: &str) -> Option<&ValueSet> {
        self.value_sets.iter().find(|v| v.name == name)
    }

    /// Resolves `Named` types through the program's typedefs, recursively
    /// for composite fields.
    pub fn resolve_type(&self, ty: &Type) -> Type {
        match ty {
            Type::Named { name } => match self.typedefs.iter().find(|t| &t.name == name) {
                Some(def) => self.resolve_type(&def.ty),
                None => ty.clone(),
            },
            Type::Header { name, fields } => Type::Header {
                name: name.clone(),
                fields: self.resolve_fields(fields),
            },
            Type::Struct { name, fields } => Type::Struct {
                name: name.clone(),
                fields: self.resolve_fields(fields),
            },
            Type::Stack { element, size } => Type::Stack {
                element: Box::new(self.resolve_type(element)),
                size: *size,
            },
            _ => ty.clone(),
        }
    }

    fn resolve_fields(&self, fields: &[Field]) -> Vec<Field> {
        fields
            .iter()
            .map(|f| Field {
                name: f.name.clone(),
                ty: self.resolve_type(&f.ty),
            })
            .collect()
    }

    /// All statements reachable from the program's declarations, used as the
    /// coverage denominator.
    pub fn all_statements(&self) -> Vec<StmtRef> {
        fn walk(stmt: &StmtRef, out: &mut Vec<StmtRef>) {
            if stmt.is_coverable() {
                out.push(Rc::clone(stmt));
            }
            for child in stmt.children() {
                walk(child, out);
            }
        }
        let mut out = Vec::new();
        for parser in &self.parsers {
            for state in &parser.states {
                for stmt in &state.components {
                    walk(stmt, &mut out);
                }
                if let Some(t) = &state.transition {
                    walk(t, &mut out);
                }
            }
        }
        for control in &self.controls {
            walk(&control.body, &mut out);
        }
        for action in &self.actions {
            walk(&action.body, &mut out);
        }
        out
    }
}
