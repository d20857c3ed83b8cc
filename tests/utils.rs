#![allow(dead_code)]

use std::rc::Rc;

use p4testgen::executor::branch::Branch;
use p4testgen::executor::continuation::Command;
use p4testgen::executor::execution_state::ExecutionState;
use p4testgen::executor::small_step::SmallStepEvaluator;
use p4testgen::ir::expression::{Argument, BinOp, Direction, Expr, ExprRef};
use p4testgen::ir::program::{ActionCall, ActionRef, KeyElement, P4Action, P4Table, Parameter};
use p4testgen::ir::statement::{Statement, StmtRef};
use p4testgen::ir::types::{Field, Type};

pub fn header_type(name: &str, fields: &[(&str, u32)]) -> Type {
    Type::Header {
        name: name.to_string(),
        fields: fields
            .iter()
            .map(|(n, w)| Field {
                name: n.to_string(),
                ty: Type::bits(*w),
            })
            .collect(),
    }
}

pub fn struct_type(name: &str, fields: Vec<(&str, Type)>) -> Type {
    Type::Struct {
        name: name.to_string(),
        fields: fields
            .into_iter()
            .map(|(n, ty)| Field {
                name: n.to_string(),
                ty,
            })
            .collect(),
    }
}

pub fn binary(op: BinOp, left: ExprRef, right: ExprRef, ty: Type) -> ExprRef {
    Rc::new(Expr::Binary {
        op,
        left,
        right,
        ty,
    })
}

pub fn eq(left: ExprRef, right: ExprRef) -> ExprRef {
    binary(BinOp::Equ, left, right, Type::Bool)
}

pub fn arg(direction: Direction, expr: ExprRef) -> Argument {
    Argument { direction, expr }
}

/// `<receiver>.<method>(args)` as a statement.
pub fn call_stmt(receiver: ExprRef, method: &str, args: Vec<Argument>) -> StmtRef {
    Statement::method_call(Expr::method_call(
        Expr::member(receiver, method, Type::Void),
        args,
        Type::Void,
    ))
}

/// A free function call such as `hash(...)` as a statement.
pub fn function_stmt(name: &str, args: Vec<Argument>) -> StmtRef {
    Statement::method_call(Expr::method_call(Expr::path(name, Type::Void), args, Type::Void))
}

pub fn apply_stmt(table: &str) -> StmtRef {
    call_stmt(Expr::path(table, Type::Table), "apply", Vec::new())
}

pub fn extern_ref(instance: &str, type_name: &str) -> ExprRef {
    Expr::path(
        instance,
        Type::Extern {
            name: type_name.to_string(),
        },
    )
}

pub fn action(name: &str, params: &[(&str, u32)], body: Vec<StmtRef>) -> P4Action {
    P4Action {
        name: name.to_string(),
        params: params
            .iter()
            .map(|(n, w)| Parameter {
                name: n.to_string(),
                direction: Direction::None,
                ty: Type::bits(*w),
            })
            .collect(),
        body: Statement::block(body),
    }
}

pub fn action_ref(name: &str) -> ActionRef {
    ActionRef {
        name: name.to_string(),
        args: Vec::new(),
        default_only: false,
    }
}

pub fn key(expr: ExprRef, match_kind: &str, name: &str) -> KeyElement {
    KeyElement {
        expr,
        match_kind: match_kind.to_string(),
        name: name.to_string(),
    }
}

/// A mutable table with no entries and a non-constant default.
pub fn table(name: &str, keys: Vec<KeyElement>, actions: &[&str], default: &str) -> P4Table {
    P4Table {
        name: name.to_string(),
        keys,
        actions: actions.iter().map(|a| action_ref(a)).collect(),
        default_action: ActionCall {
            name: default.to_string(),
            args: Vec::new(),
        },
        default_is_const: false,
        entries: Vec::new(),
        entries_are_const: false,
        implementation: None,
    }
}

pub fn state_with(stmts: Vec<StmtRef>) -> ExecutionState {
    ExecutionState::with_body(stmts.into_iter().map(Command::Statement).collect())
}

/// Steps through single unconditional successors until the state forks,
/// takes a guarded branch, or finishes.
///
/// # Returns
///
/// The branches of the first step that did not have exactly one
/// unconditional successor, empty if the path finished first.
pub fn step_until_fork(evaluator: &SmallStepEvaluator<'_>, state: &ExecutionState) -> Vec<Branch> {
    let mut current = state.clone();
    for _ in 0..10_000 {
        let mut branches = evaluator.step(&current).unwrap();
        if branches.len() != 1 || branches[0].guard.is_some() {
            return branches;
        }
        current = branches.remove(0).next_state;
    }
    panic!("no fork within 10000 steps");
}

/// Runs a path that does not fork to completion and returns its last state.
pub fn run_to_end(evaluator: &SmallStepEvaluator<'_>, state: &ExecutionState) -> ExecutionState {
    let mut current = state.clone();
    for _ in 0..10_000 {
        if current.is_terminated() {
            return current;
        }
        let mut branches = evaluator.step(&current).unwrap();
        assert_eq!(branches.len(), 1, "unexpected fork at {:?}", current.top_command());
        current = branches.remove(0).next_state;
    }
    panic!("path did not finish within 10000 steps");
}

/// Whether `expr` contains a concolic call of `method`.
pub fn contains_concolic(expr: &Expr, method: &str) -> bool {
    match expr {
        Expr::Concolic { method: m, .. } => m == method,
        Expr::Binary { left, right, .. } => {
            contains_concolic(left, method) || contains_concolic(right, method)
        }
        Expr::Unary { expr, .. } | Expr::Cast { expr, .. } => contains_concolic(expr, method),
        _ => false,
    }
}
