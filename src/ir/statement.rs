use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::ir::expression::ExprRef;
use crate::ir::types::Type;

pub type StmtRef = Rc<Statement>;

/// Node metadata. `elem_id` is assigned by `ProgramInfo::assign_node_ids`
/// and is what coverage is counted over.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Meta {
    #[serde(default)]
    pub elem_id: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SwitchLabel {
    Default,
    Action { name: String },
    Value { value: ExprRef },
}

/// A switch case. A case without a body falls through to the next one.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SwitchCase {
    pub label: SwitchLabel,
    #[serde(default)]
    pub body: Option<StmtRef>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "stmt", rename_all = "snake_case")]
pub enum Statement {
    Assignment {
        #[serde(default)]
        meta: Meta,
        left: ExprRef,
        right: ExprRef,
    },
    MethodCall {
        #[serde(default)]
        meta: Meta,
        call: ExprRef,
    },
    If {
        #[serde(default)]
        meta: Meta,
        cond: ExprRef,
        if_true: StmtRef,
        #[serde(default)]
        if_false: Option<StmtRef>,
    },
    Block {
        #[serde(default)]
        meta: Meta,
        stmts: Vec<StmtRef>,
    },
    Switch {
        #[serde(default)]
        meta: Meta,
        expr: ExprRef,
        cases: Vec<SwitchCase>,
    },
    Return {
        #[serde(default)]
        meta: Meta,
        #[serde(default)]
        expr: Option<ExprRef>,
    },
    Exit {
        #[serde(default)]
        meta: Meta,
    },
    Empty {
        #[serde(default)]
        meta: Meta,
    },
    Declaration {
        #[serde(default)]
        meta: Meta,
        name: String,
        ty: Type,
        #[serde(default)]
        init: Option<ExprRef>,
    },
    Transition {
        #[serde(default)]
        meta: Meta,
        target: ExprRef,
    },
}

impl Statement {
    pub fn meta(&self) -> Meta {
        match self {
            Statement::Assignment { meta, .. }
            | Statement::MethodCall { meta, .. }
            | Statement::If { meta, .. }
            | Statement::Block { meta, .. }
            | Statement::Switch { meta, .. }
            | Statement::Return { meta, .. }
            | Statement::Exit { meta }
            | Statement::Empty { meta }
            | Statement::Declaration { meta, .. }
            | Statement::Transition { meta, .. } => *meta,
        }
    }

    fn meta_mut(&mut self) -> &mut Meta {
        match self {
            Statement::Assignment { meta, .. }
            | Statement::MethodCall { meta, .. }
            | Statement::If { meta, .. }
            | Statement::Block { meta, .. }
            | Statement::Switch { meta, .. }
            | Statement::Return { meta, .. }
            | Statement::Exit { meta }
            | Statement::Empty { meta }
            | Statement::Declaration { meta, .. }
            | Statement::Transition { meta, .. } => meta,
        }
    }

    /// Blocks only group other statements and are not counted for coverage.
    pub fn is_coverable(&self) -> bool {
        !matches!(self, Statement::Block { .. })
    }

    /// Children statements in source order.
    pub fn children(&self) -> Vec<&StmtRef> {
        match self {
            Statement::If {
                if_true, if_false, ..
            } => {
                let mut v = vec![if_true];
                if let Some(f) = if_false {
                    v.push(f);
                }
                v
            }
            Statement::Block { stmts, .. } => stmts.iter().collect(),
            Statement::Switch { cases, .. } => {
                cases.iter().filter_map(|c| c.body.as_ref()).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Assigns fresh ids to this statement and all nested statements,
    /// starting at `next`. Returns the next unused id.
    pub fn number(stmt: &mut StmtRef, mut next: usize) -> usize {
        let s = Rc::make_mut(stmt);
        if s.is_coverable() {
            s.meta_mut().elem_id = next;
            next += 1;
        }
        match s {
            Statement::If {
                if_true, if_false, ..
            } => {
                next = Statement::number(if_true, next);
                if let Some(f) = if_false {
                    next = Statement::number(f, next);
                }
            }
            Statement::Block { stmts, .. } => {
                for child in stmts.iter_mut() {
                    next = Statement::number(child, next);
                }
            }
            Statement::Switch { cases, .. } => {
                for case in cases.iter_mut() {
                    if let Some(body) = case.body.as_mut() {
                        next = Statement::number(body, next);
                    }
                }
            }
            _ => {}
        }
        next
    }

    pub fn block(stmts: Vec<StmtRef>) -> StmtRef {
        Rc::new(Statement::Block {
            meta: Meta::default(),
            stmts,
        })
    }

    pub fn method_call(call: ExprRef) -> StmtRef {
        Rc::new(Statement::MethodCall {
            meta: Meta::default(),
            call,
        })
    }

    pub fn assignment(left: ExprRef, right: ExprRef) -> StmtRef {
        Rc::new(Statement::Assignment {
            meta: Meta::default(),
            left,
            right,
        })
    }
}
