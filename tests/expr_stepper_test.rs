mod utils;

use std::rc::Rc;

use p4testgen::executor::continuation::{Command, ExceptionKind};
use p4testgen::executor::small_step::SmallStepEvaluator;
use p4testgen::executor::symbolic_setting::TestgenSetting;
use p4testgen::executor::table_stepper::table_action_var;
use p4testgen::ir::expression::{BinOp, Expr, ExprRef, Keyset, SelectCase, StateVariable};
use p4testgen::ir::program::ProgramInfo;
use p4testgen::ir::statement::{Statement, SwitchCase, SwitchLabel};
use p4testgen::ir::types::Type;
use p4testgen::targets::Bmv2Target;

use utils::{action, binary, eq, key, run_to_end, state_with, step_until_fork, table};

fn mux_assignment(cond: ExprRef) -> Vec<p4testgen::ir::statement::StmtRef> {
    vec![Statement::assignment(
        Expr::path("y", Type::bits(8)),
        Rc::new(Expr::Mux {
            cond,
            if_true: Expr::bits(8, 1),
            if_false: Expr::bits(8, 2),
            ty: Type::bits(8),
        }),
    )]
}

fn transition_select(cases: Vec<SelectCase>) -> Vec<p4testgen::ir::statement::StmtRef> {
    vec![Rc::new(Statement::Transition {
        meta: Default::default(),
        target: Rc::new(Expr::Select {
            select: Expr::path("x", Type::bits(16)),
            cases,
        }),
    })]
}

/// Table `t` keyed exactly on `x`, with actions a1, a2(port) and NoAction.
fn table_program() -> ProgramInfo {
    let mut program = ProgramInfo::default();
    program.actions = vec![
        action("a1", &[], Vec::new()),
        action("a2", &[("port", 9)], Vec::new()),
        action("NoAction", &[], Vec::new()),
    ];
    let mut t = table(
        "t",
        vec![key(Expr::path("x", Type::bits(16)), "exact", "x")],
        &["a1", "a2", "NoAction"],
        "NoAction",
    );
    t.actions[2].default_only = true;
    program.tables = vec![t];
    program.finalize()
}

/// `t.apply().<member>`
fn apply_member(member: &str, ty: Type) -> ExprRef {
    Expr::member(
        Expr::method_call(
            Expr::member(Expr::path("t", Type::Table), "apply", Type::Void),
            Vec::new(),
            Type::Void,
        ),
        member,
        ty,
    )
}

fn case(keyset: Keyset, state: &str) -> SelectCase {
    SelectCase {
        keyset,
        state: state.to_string(),
    }
}

#[test]
fn test_mux_forks_on_symbolic_condition() {
    let program = ProgramInfo::default().finalize();
    let setting = TestgenSetting::default();
    let bmv2 = Bmv2Target::new();
    let evaluator = SmallStepEvaluator::new(&program, &bmv2, &setting);

    let x = StateVariable::new("x", Type::bits(8));
    let y = StateVariable::new("y", Type::bits(8));
    let mut state = state_with(mux_assignment(eq(
        Expr::path("x", Type::bits(8)),
        Expr::bits(8, 5),
    )));
    state.set(&x, Expr::symbolic_var("x_in", Type::bits(8)));

    let branches = step_until_fork(&evaluator, &state);
    assert_eq!(branches.len(), 2);
    assert!(branches.iter().all(|b| b.guard.is_some()));

    let taken = run_to_end(&evaluator, &branches[0].next_state);
    let not_taken = run_to_end(&evaluator, &branches[1].next_state);
    assert_eq!(taken.get(&y), Expr::bits(8, 1));
    assert_eq!(not_taken.get(&y), Expr::bits(8, 2));
}

#[test]
fn test_mux_on_constant_condition_does_not_fork() {
    let program = ProgramInfo::default().finalize();
    let setting = TestgenSetting::default();
    let bmv2 = Bmv2Target::new();
    let evaluator = SmallStepEvaluator::new(&program, &bmv2, &setting);

    let x = StateVariable::new("x", Type::bits(8));
    let mut state = state_with(mux_assignment(eq(
        Expr::path("x", Type::bits(8)),
        Expr::bits(8, 5),
    )));
    state.set(&x, Expr::bits(8, 4));

    let end = run_to_end(&evaluator, &state);
    assert_eq!(end.get(&StateVariable::new("y", Type::bits(8))), Expr::bits(8, 2));
}

#[test]
fn test_tainted_mux_condition_yields_taint() {
    let program = ProgramInfo::default().finalize();
    let setting = TestgenSetting::default();
    let bmv2 = Bmv2Target::new();
    let evaluator = SmallStepEvaluator::new(&program, &bmv2, &setting);

    let x = StateVariable::new("x", Type::bits(8));
    let mut state = state_with(mux_assignment(eq(
        Expr::path("x", Type::bits(8)),
        Expr::bits(8, 5),
    )));
    state.set(&x, Expr::taint(Type::bits(8)));

    assert!(step_until_fork(&evaluator, &state).is_empty());
    let end = run_to_end(&evaluator, &state);
    assert_eq!(
        end.get(&StateVariable::new("y", Type::bits(8))),
        Expr::taint(Type::bits(8))
    );
}

#[test]
fn test_select_with_default_has_no_nomatch() {
    let program = ProgramInfo::default().finalize();
    let setting = TestgenSetting::default();
    let bmv2 = Bmv2Target::new();
    let evaluator = SmallStepEvaluator::new(&program, &bmv2, &setting);

    let mut state = state_with(transition_select(vec![
        case(
            Keyset::Value {
                value: Expr::bits(16, 0x800),
            },
            "accept",
        ),
        case(Keyset::Default, "reject"),
    ]));
    state.set(
        &StateVariable::new("x", Type::bits(16)),
        Expr::symbolic_var("x_in", Type::bits(16)),
    );

    let branches = step_until_fork(&evaluator, &state);
    assert_eq!(branches.len(), 2);
    for (branch, target) in branches.iter().zip(["accept", "reject"]) {
        match branch.next_state.top_command() {
            Some(Command::Statement(s)) => match s.as_ref() {
                Statement::Transition { target: t, .. } => {
                    assert_eq!(*t, Expr::path(target, Type::State))
                }
                other => panic!("unexpected statement {:?}", other),
            },
            other => panic!("unexpected command {:?}", other),
        }
    }
}

#[test]
fn test_select_without_default_raises_nomatch() {
    let program = ProgramInfo::default().finalize();
    let setting = TestgenSetting::default();
    let bmv2 = Bmv2Target::new();
    let evaluator = SmallStepEvaluator::new(&program, &bmv2, &setting);

    let mut state = state_with(transition_select(vec![
        case(
            Keyset::Value {
                value: Expr::bits(16, 1),
            },
            "accept",
        ),
        case(
            Keyset::Value {
                value: Expr::bits(16, 2),
            },
            "reject",
        ),
    ]));
    state.set(
        &StateVariable::new("x", Type::bits(16)),
        Expr::symbolic_var("x_in", Type::bits(16)),
    );

    let branches = step_until_fork(&evaluator, &state);
    assert_eq!(branches.len(), 3);
    assert_eq!(
        branches[2].next_state.top_command(),
        Some(&Command::Exception(ExceptionKind::NoMatch))
    );
}

#[test]
fn test_select_on_taint_is_unimplemented() {
    let program = ProgramInfo::default().finalize();
    let setting = TestgenSetting::default();
    let bmv2 = Bmv2Target::new();
    let evaluator = SmallStepEvaluator::new(&program, &bmv2, &setting);

    let mut state = state_with(transition_select(vec![case(Keyset::Default, "accept")]));
    state.set(
        &StateVariable::new("x", Type::bits(16)),
        Expr::taint(Type::bits(16)),
    );

    let mut current = state;
    let err = loop {
        match evaluator.step(&current) {
            Ok(mut branches) => {
                assert_eq!(branches.len(), 1);
                current = branches.remove(0).next_state;
            }
            Err(e) => break e,
        }
    };
    assert!(err.to_string().contains("tainted"));
}

#[test]
fn test_stepping_is_deterministic() {
    let program = ProgramInfo::default().finalize();
    let setting = TestgenSetting::default();
    let bmv2 = Bmv2Target::new();
    let evaluator = SmallStepEvaluator::new(&program, &bmv2, &setting);

    let mut state = state_with(mux_assignment(eq(
        Expr::path("x", Type::bits(8)),
        Expr::bits(8, 5),
    )));
    state.set(
        &StateVariable::new("x", Type::bits(8)),
        Expr::symbolic_var("x_in", Type::bits(8)),
    );

    let first = step_until_fork(&evaluator, &state);
    let second = step_until_fork(&evaluator, &state);
    let guards = |bs: &[p4testgen::executor::branch::Branch]| {
        bs.iter().map(|b| format!("{:?}", b.guard)).collect::<Vec<_>>()
    };
    assert_eq!(guards(&first), guards(&second));
}

#[test]
fn test_apply_hit_reads_table_result() {
    let program = table_program();
    let setting = TestgenSetting::default();
    let bmv2 = Bmv2Target::new();
    let evaluator = SmallStepEvaluator::new(&program, &bmv2, &setting);

    let y = StateVariable::new("y", Type::Bool);
    let mut state = state_with(vec![Statement::assignment(
        Expr::path("y", Type::Bool),
        apply_member("hit", Type::Bool),
    )]);
    state.set(
        &StateVariable::new("x", Type::bits(16)),
        Expr::symbolic_var("x_in", Type::bits(16)),
    );

    let branches = step_until_fork(&evaluator, &state);
    assert_eq!(branches.len(), 3);
    let hits: Vec<ExprRef> = branches
        .iter()
        .map(|b| run_to_end(&evaluator, &b.next_state).get(&y))
        .collect();
    assert_eq!(
        hits,
        vec![Expr::boolean(true), Expr::boolean(true), Expr::boolean(false)]
    );
}

#[test]
fn test_switch_on_action_run() {
    let program = table_program();
    let setting = TestgenSetting::default();
    let bmv2 = Bmv2Target::new();
    let evaluator = SmallStepEvaluator::new(&program, &bmv2, &setting);

    let y = StateVariable::new("y", Type::bits(8));
    let assign_y = |v: u64| Some(Statement::assignment(Expr::path("y", Type::bits(8)), Expr::bits(8, v)));
    let action_run = table_action_var(&program.tables[0]);
    let mut state = state_with(vec![Rc::new(Statement::Switch {
        meta: Default::default(),
        expr: apply_member("action_run", action_run.ty.clone()),
        cases: vec![
            SwitchCase {
                label: SwitchLabel::Action {
                    name: "a1".to_string(),
                },
                body: assign_y(1),
            },
            SwitchCase {
                label: SwitchLabel::Action {
                    name: "a2".to_string(),
                },
                body: assign_y(2),
            },
        ],
    })]);
    state.set(
        &StateVariable::new("x", Type::bits(16)),
        Expr::symbolic_var("x_in", Type::bits(16)),
    );
    state.set(&y, Expr::bits(8, 0));

    let branches = step_until_fork(&evaluator, &state);
    assert_eq!(branches.len(), 3);
    let ys: Vec<ExprRef> = branches
        .iter()
        .map(|b| run_to_end(&evaluator, &b.next_state).get(&y))
        .collect();
    // the default action matches no case
    assert_eq!(ys, vec![Expr::bits(8, 1), Expr::bits(8, 2), Expr::bits(8, 0)]);
}

#[test]
fn test_saturating_add_clamps_on_overflow() {
    let program = ProgramInfo::default().finalize();
    let setting = TestgenSetting::default();
    let bmv2 = Bmv2Target::new();
    let evaluator = SmallStepEvaluator::new(&program, &bmv2, &setting);

    let y = StateVariable::new("y", Type::bits(8));
    let mut state = state_with(vec![Statement::assignment(
        Expr::path("y", Type::bits(8)),
        binary(
            BinOp::AddSat,
            Expr::path("x", Type::bits(8)),
            Expr::bits(8, 10),
            Type::bits(8),
        ),
    )]);
    state.set(
        &StateVariable::new("x", Type::bits(8)),
        Expr::symbolic_var("x_in", Type::bits(8)),
    );

    let branches = step_until_fork(&evaluator, &state);
    assert_eq!(branches.len(), 2);
    let clamped = run_to_end(&evaluator, &branches[0].next_state);
    let wrapped = run_to_end(&evaluator, &branches[1].next_state);
    assert_eq!(clamped.get(&y), Expr::bits(8, 255));
    assert!(!wrapped.get(&y).is_constant());
}

#[test]
fn test_reversed_slice_assignment_is_a_bug() {
    let program = ProgramInfo::default().finalize();
    let setting = TestgenSetting::default();
    let bmv2 = Bmv2Target::new();
    let evaluator = SmallStepEvaluator::new(&program, &bmv2, &setting);

    let slice = Rc::new(Expr::Slice {
        expr: Expr::path("x", Type::bits(8)),
        hi: Expr::bits(32, 1),
        lo: Expr::bits(32, 3),
        ty: Type::bits(8),
    });
    let mut state = state_with(vec![Statement::assignment(slice, Expr::bits(8, 1))]);
    state.set(&StateVariable::new("x", Type::bits(8)), Expr::bits(8, 0));

    let mut current = state;
    let err = loop {
        match evaluator.step(&current) {
            Ok(mut branches) => {
                assert_eq!(branches.len(), 1);
                current = branches.remove(0).next_state;
            }
            Err(e) => break e,
        }
    };
    assert!(err.to_string().starts_with("BUG"));
    assert!(err.to_string().contains("out of range"));
}
