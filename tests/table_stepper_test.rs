mod utils;

use std::collections::BTreeMap;

use num_bigint_dig::BigInt;

use p4testgen::executor::branch::Branch;
use p4testgen::executor::continuation::Command;
use p4testgen::executor::execution_state::ExecutionState;
use p4testgen::executor::small_step::StepContext;
use p4testgen::executor::symbolic_setting::{TestBackend, TestgenSetting};
use p4testgen::executor::table_stepper::{table_action_var, table_hit_var, TableStepper};
use p4testgen::executor::symbolic_value::{collect_symbolic_vars, evaluate, mk_constant, Model};
use p4testgen::executor::test_object::{
    TableMatch, TableRule, ACTION_PROFILES, ACTION_SELECTORS, TABLE_CONFIGS,
};
use p4testgen::ir::expression::{Expr, ExprRef, Keyset};
use p4testgen::ir::program::{ActionCall, ExternInstance, P4Table, ProgramInfo, TableEntry};
use p4testgen::ir::types::Type;
use p4testgen::solver::{BruteForceSolver, Solver, SolverResult};
use p4testgen::targets::Bmv2Target;

use utils::{action, key, table};

fn program_with(tables: Vec<P4Table>) -> ProgramInfo {
    let mut program = ProgramInfo::default();
    program.actions = vec![
        action("a1", &[], Vec::new()),
        action("a2", &[("port", 9)], Vec::new()),
        action("NoAction", &[], Vec::new()),
    ];
    program.tables = tables;
    program.externs = vec![
        ExternInstance {
            name: "ap".to_string(),
            type_name: "action_profile".to_string(),
            args: Vec::new(),
        },
        ExternInstance {
            name: "as".to_string(),
            type_name: "action_selector".to_string(),
            args: Vec::new(),
        },
    ];
    program.finalize()
}

/// `t` with one exact key `k` and actions a1, a2 and a default-only NoAction.
fn exact_table() -> P4Table {
    let mut t = table(
        "t",
        vec![key(Expr::path("k", Type::bits(16)), "exact", "k")],
        &["a1", "a2", "NoAction"],
        "NoAction",
    );
    t.actions[2].default_only = true;
    t
}

/// `t` with one key `k` of the given match kind and the same actions as
/// `exact_table`.
fn single_key_table(match_kind: &str) -> P4Table {
    let mut t = exact_table();
    t.keys = vec![key(Expr::path("k", Type::bits(16)), match_kind, "k")];
    t
}

fn apply(program: &ProgramInfo, setting: &TestgenSetting, keys: Vec<ExprRef>) -> Vec<Branch> {
    let bmv2 = Bmv2Target::new();
    let ctx = StepContext::new(program, &bmv2, setting);
    let state = ExecutionState::new();
    TableStepper::new(ctx, &state, &program.tables[0], keys)
        .unwrap()
        .eval()
        .unwrap()
}

#[test]
fn test_control_plane_entry_per_action() {
    let program = program_with(vec![exact_table()]);
    let setting = TestgenSetting::default();
    let branches = apply(
        &program,
        &setting,
        vec![Expr::symbolic_var("k_in", Type::bits(16))],
    );

    assert_eq!(branches.len(), 3);
    let hits: Vec<ExprRef> = branches
        .iter()
        .map(|b| b.next_state.get(&table_hit_var("t")))
        .collect();
    assert_eq!(
        hits,
        vec![Expr::boolean(true), Expr::boolean(true), Expr::boolean(false)]
    );
    assert!(branches.iter().all(|b| b.guard.is_some()));

    let action_var = table_action_var(&program.tables[0]);
    assert_eq!(
        branches[1].next_state.get(&action_var),
        Expr::constant(action_var.ty.clone(), BigInt::from(1))
    );

    for branch in &branches[..2] {
        let config = branch
            .next_state
            .get_test_object(TABLE_CONFIGS, "t", true)
            .unwrap()
            .unwrap();
        let config = config.as_table_config().unwrap();
        assert_eq!(config.rules.len(), 1);
        assert_eq!(config.rules[0].priority, 0);
    }
    let rule = branches[1]
        .next_state
        .get_test_object(TABLE_CONFIGS, "t", true)
        .unwrap()
        .unwrap()
        .as_table_config()
        .unwrap()
        .rules[0]
        .clone();
    assert_eq!(rule.action.name, "a2");
    assert_eq!(rule.action.args.len(), 1);
    assert_eq!(rule.action.args[0].0, "port");

    // the default branch configures nothing
    assert!(branches[2]
        .next_state
        .get_test_object(TABLE_CONFIGS, "t", false)
        .unwrap()
        .is_none());
    assert!(matches!(
        branches[2].next_state.top_command(),
        Some(Command::Statement(_))
    ));
}

#[test]
fn test_synthesized_rule_matches_solved_packet() {
    let program = program_with(vec![exact_table()]);
    let setting = TestgenSetting::default();
    let branches = apply(
        &program,
        &setting,
        vec![Expr::symbolic_var("k_in", Type::bits(16))],
    );

    let branch = &branches[1];
    let mut solver = BruteForceSolver::new(&setting);
    let model = match solver.solve(&[branch.guard.clone().unwrap()]) {
        SolverResult::Sat(model) => model,
        other => panic!("unexpected solver result {:?}", other),
    };
    let rule = branch
        .next_state
        .get_test_object(TABLE_CONFIGS, "t", true)
        .unwrap()
        .unwrap()
        .as_table_config()
        .unwrap()
        .rules[0]
        .evaluate(&model);
    let k = model.get("k_in").and_then(|v| v.as_bigint().cloned()).unwrap();

    let mut key_values = BTreeMap::new();
    key_values.insert("k".to_string(), k.clone());
    assert_eq!(rule.matches(&key_values), Some(true));

    key_values.insert("k".to_string(), k + BigInt::from(1));
    assert_eq!(rule.matches(&key_values), Some(false));
}

#[test]
fn test_lpm_entries_longest_prefix_first() {
    let mut t = table(
        "t",
        vec![key(Expr::path("k", Type::bits(16)), "lpm", "k")],
        &["a1", "a2", "NoAction"],
        "NoAction",
    );
    t.entries_are_const = true;
    t.entries = vec![
        TableEntry {
            keys: vec![Keyset::Mask {
                value: Expr::bits(16, 0x0a00),
                mask: Expr::bits(16, 0xff00),
            }],
            action: ActionCall {
                name: "a1".to_string(),
                args: Vec::new(),
            },
            priority: None,
        },
        TableEntry {
            keys: vec![Keyset::Mask {
                value: Expr::bits(16, 0x0a10),
                mask: Expr::bits(16, 0xfff0),
            }],
            action: ActionCall {
                name: "a2".to_string(),
                args: vec![Expr::bits(9, 1)],
            },
            priority: None,
        },
    ];
    let program = program_with(vec![t]);
    let setting = TestgenSetting::default();
    let branches = apply(
        &program,
        &setting,
        vec![Expr::symbolic_var("k_in", Type::bits(16))],
    );

    assert_eq!(branches.len(), 3);
    let last_event = |i: usize| branches[i].next_state.trace().last().unwrap().message.clone();
    assert_eq!(last_event(0), "t: entry hit, action a2");
    assert_eq!(last_event(1), "t: entry hit, action a1");
    assert_eq!(last_event(2), "t: miss, default action NoAction");
}

#[test]
fn test_tainted_key_on_mutable_table_runs_default() {
    let program = program_with(vec![exact_table()]);
    let setting = TestgenSetting::default();
    let branches = apply(&program, &setting, vec![Expr::taint(Type::bits(16))]);

    assert_eq!(branches.len(), 1);
    assert!(branches[0].guard.is_none());
    assert_eq!(
        branches[0].next_state.get(&table_hit_var("t")),
        Expr::boolean(false)
    );
}

#[test]
fn test_tainted_key_on_constant_table_taints_hit() {
    let mut t = exact_table();
    t.entries_are_const = true;
    t.entries = vec![TableEntry {
        keys: vec![Keyset::Value {
            value: Expr::bits(16, 7),
        }],
        action: ActionCall {
            name: "a1".to_string(),
            args: Vec::new(),
        },
        priority: None,
    }];
    let program = program_with(vec![t]);
    let setting = TestgenSetting::default();
    let branches = apply(&program, &setting, vec![Expr::taint(Type::bits(16))]);

    assert_eq!(branches.len(), 1);
    assert!(branches[0].guard.is_none());
    assert_eq!(
        branches[0].next_state.get(&table_hit_var("t")),
        Expr::taint(Type::Bool)
    );
    assert!(matches!(
        branches[0].next_state.top_command(),
        Some(Command::PropertyUpdate { .. })
    ));
}

#[test]
fn test_keyless_default_override_depends_on_backend() {
    let t = table("t", Vec::new(), &["a2", "NoAction"], "NoAction");
    let program = program_with(vec![t]);

    let ptf = TestgenSetting {
        backend: TestBackend::Ptf,
        ..TestgenSetting::default()
    };
    let branches = apply(&program, &ptf, Vec::new());
    assert_eq!(branches.len(), 2);
    assert!(branches.iter().all(|b| b.guard.is_none()));
    let config = branches[0]
        .next_state
        .get_test_object(TABLE_CONFIGS, "t", true)
        .unwrap()
        .unwrap();
    assert!(config
        .as_table_config()
        .unwrap()
        .properties
        .contains_key("overriden_default_action"));

    let stf = TestgenSetting::default();
    assert_eq!(apply(&program, &stf, Vec::new()).len(), 1);
}

#[test]
fn test_action_profile_members() {
    let mut t = exact_table();
    t.implementation = Some("ap".to_string());
    let program = program_with(vec![t]);
    let setting = TestgenSetting::default();
    let branches = apply(
        &program,
        &setting,
        vec![Expr::symbolic_var("k_in", Type::bits(16))],
    );

    assert_eq!(branches.len(), 3);
    let state = &branches[1].next_state;
    let config = state
        .get_test_object(TABLE_CONFIGS, "t", true)
        .unwrap()
        .unwrap();
    let config = config.as_table_config().unwrap();
    assert_eq!(config.rules[0].action.name, "ap[0]");
    assert!(config.properties.contains_key("action_profile"));
    assert!(matches!(
        config.rules[0].matches[0].1,
        TableMatch::Exact { .. }
    ));

    let profile = state
        .get_test_object(ACTION_PROFILES, "ap", true)
        .unwrap()
        .unwrap();
    let profile = profile.as_action_profile().unwrap();
    assert_eq!(profile.members.len(), 1);
    assert_eq!(profile.members[0].name, "a2");
}

fn first_rule(branch: &Branch) -> TableRule {
    branch
        .next_state
        .get_test_object(TABLE_CONFIGS, "t", true)
        .unwrap()
        .unwrap()
        .as_table_config()
        .unwrap()
        .rules[0]
        .clone()
}

fn last_trace(branch: &Branch) -> String {
    branch.next_state.trace().last().unwrap().message.clone()
}

/// Model binding every variable of `expr` to `value`.
fn uniform_model(expr: &ExprRef, value: u64) -> Model {
    let mut vars = BTreeMap::new();
    collect_symbolic_vars(expr, &mut vars);
    vars.into_iter()
        .map(|(name, ty)| (name, mk_constant(&ty, BigInt::from(value))))
        .collect()
}

/// Solves the guard of the first control-plane branch and checks that the
/// resolved rule matches the solved key.
fn assert_rule_matches_solution(match_kind: &str, setting: &TestgenSetting) -> TableMatch {
    let program = program_with(vec![single_key_table(match_kind)]);
    let branches = apply(
        &program,
        setting,
        vec![Expr::symbolic_var("k_in", Type::bits(16))],
    );
    assert_eq!(branches.len(), 3);
    let branch = &branches[0];
    let mut solver = BruteForceSolver::new(setting);
    let model = match solver.solve(&[branch.guard.clone().unwrap()]) {
        SolverResult::Sat(model) => model,
        other => panic!("unexpected solver result {:?}", other),
    };
    let rule = first_rule(branch).evaluate(&model);
    let k = model.get("k_in").and_then(|v| v.as_bigint().cloned()).unwrap();
    let mut key_values = BTreeMap::new();
    key_values.insert("k".to_string(), k);
    assert_eq!(rule.matches(&key_values), Some(true));
    rule.matches[0].1.clone()
}

#[test]
fn test_initial_entries_guard_control_plane_entries() {
    let mut t = exact_table();
    t.entries = vec![TableEntry {
        keys: vec![Keyset::Value {
            value: Expr::bits(16, 7),
        }],
        action: ActionCall {
            name: "a1".to_string(),
            args: Vec::new(),
        },
        priority: None,
    }];
    let program = program_with(vec![t]);
    let setting = TestgenSetting::default();
    let branches = apply(
        &program,
        &setting,
        vec![Expr::symbolic_var("k_in", Type::bits(16))],
    );

    assert_eq!(branches.len(), 4);
    assert_eq!(last_trace(&branches[0]), "t: entry hit, action a1");
    assert_eq!(last_trace(&branches[1]), "t: control-plane entry, action a1");
    assert_eq!(last_trace(&branches[2]), "t: control-plane entry, action a2");
    assert_eq!(last_trace(&branches[3]), "t: miss, default action NoAction");

    // packets hitting the initial entry never reach a synthesized one
    for branch in &branches[1..3] {
        let guard = branch.guard.clone().unwrap();
        assert_eq!(evaluate(&guard, &uniform_model(&guard, 7)), Expr::boolean(false));
        assert_eq!(evaluate(&guard, &uniform_model(&guard, 8)), Expr::boolean(true));
    }
}

#[test]
fn test_explicit_entry_priorities() {
    let mut t = single_key_table("ternary");
    t.entries_are_const = true;
    t.entries = vec![
        TableEntry {
            keys: vec![Keyset::Default],
            action: ActionCall {
                name: "a1".to_string(),
                args: Vec::new(),
            },
            priority: Some(1),
        },
        TableEntry {
            keys: vec![Keyset::Value {
                value: Expr::bits(16, 7),
            }],
            action: ActionCall {
                name: "a2".to_string(),
                args: vec![Expr::bits(9, 1)],
            },
            priority: Some(10),
        },
    ];
    let program = program_with(vec![t]);
    let setting = TestgenSetting::default();
    let branches = apply(
        &program,
        &setting,
        vec![Expr::symbolic_var("k_in", Type::bits(16))],
    );

    // the catch-all entry ranks lower, so it only sees packets other than 7
    assert_eq!(branches.len(), 2);
    assert_eq!(last_trace(&branches[0]), "t: entry hit, action a2");
    assert_eq!(last_trace(&branches[1]), "t: entry hit, action a1");
    let guard = branches[1].guard.clone().unwrap();
    assert_eq!(evaluate(&guard, &uniform_model(&guard, 7)), Expr::boolean(false));
}

#[test]
fn test_tainted_range_key_on_stf_runs_default() {
    let program = program_with(vec![single_key_table("range")]);
    let setting = TestgenSetting::default();
    let branches = apply(&program, &setting, vec![Expr::taint(Type::bits(16))]);

    assert_eq!(branches.len(), 1);
    assert!(branches[0].guard.is_none());
    assert_eq!(last_trace(&branches[0]), "t: miss, default action NoAction");
}

#[test]
fn test_tainted_range_key_on_ptf_matches_full_domain() {
    let program = program_with(vec![single_key_table("range")]);
    let ptf = TestgenSetting {
        backend: TestBackend::Ptf,
        ..TestgenSetting::default()
    };
    let branches = apply(&program, &ptf, vec![Expr::taint(Type::bits(16))]);

    assert_eq!(branches.len(), 2);
    assert!(branches.iter().all(|b| b.guard.is_none()));
    match &first_rule(&branches[0]).matches[0].1 {
        TableMatch::Range { low, high, .. } => {
            assert_eq!(*low, Expr::bits(16, 0));
            assert_eq!(*high, Expr::bits(16, 0xffff));
        }
        other => panic!("unexpected match {:?}", other),
    }
}

#[test]
fn test_wildcard_key_yields_entry_per_action() {
    let program = program_with(vec![single_key_table("ternary")]);
    let setting = TestgenSetting::default();
    let branches = apply(&program, &setting, vec![Expr::taint(Type::bits(16))]);

    // every action is reachable, and no packet is left for the default
    assert_eq!(branches.len(), 2);
    assert!(branches.iter().all(|b| b.guard.is_none()));
    assert_eq!(last_trace(&branches[0]), "t: control-plane entry, action a1");
    assert_eq!(last_trace(&branches[1]), "t: control-plane entry, action a2");
    for branch in &branches {
        match &first_rule(branch).matches[0].1 {
            TableMatch::Ternary { mask, .. } => assert_eq!(*mask, Expr::bits(16, 0)),
            other => panic!("unexpected match {:?}", other),
        }
    }
}

#[test]
fn test_ternary_synthesis() {
    let setting = TestgenSetting::default();
    assert!(matches!(
        assert_rule_matches_solution("ternary", &setting),
        TableMatch::Ternary { .. }
    ));
}

#[test]
fn test_lpm_synthesis() {
    let setting = TestgenSetting::default();
    match assert_rule_matches_solution("lpm", &setting) {
        TableMatch::Lpm { prefix_len, .. } => {
            let p = prefix_len.as_bigint().cloned().unwrap();
            assert!(p <= BigInt::from(16));
        }
        other => panic!("unexpected match {:?}", other),
    }
}

#[test]
fn test_range_synthesis() {
    let ptf = TestgenSetting {
        backend: TestBackend::Ptf,
        ..TestgenSetting::default()
    };
    match assert_rule_matches_solution("range", &ptf) {
        TableMatch::Range { low, high, .. } => {
            assert!(low.as_bigint().unwrap() <= high.as_bigint().unwrap());
        }
        other => panic!("unexpected match {:?}", other),
    }

    // STF has no range syntax
    let stf = TestgenSetting::default();
    assert!(matches!(
        assert_rule_matches_solution("range", &stf),
        TableMatch::Exact { .. }
    ));
}

#[test]
fn test_optional_synthesis() {
    let setting = TestgenSetting::default();
    match assert_rule_matches_solution("optional", &setting) {
        TableMatch::Optional { mask, .. } => {
            let m = mask.as_bigint().cloned().unwrap();
            assert!(m == BigInt::from(0) || m == BigInt::from(0xffff));
        }
        other => panic!("unexpected match {:?}", other),
    }
}

#[test]
fn test_action_selector_members() {
    let mut t = exact_table();
    t.keys.push(key(Expr::path("s", Type::bits(16)), "selector", "s"));
    t.implementation = Some("as".to_string());
    let program = program_with(vec![t]);
    let setting = TestgenSetting::default();
    let branches = apply(
        &program,
        &setting,
        vec![
            Expr::symbolic_var("k_in", Type::bits(16)),
            Expr::symbolic_var("s_in", Type::bits(16)),
        ],
    );

    assert_eq!(branches.len(), 3);
    let state = &branches[1].next_state;
    let config = state
        .get_test_object(TABLE_CONFIGS, "t", true)
        .unwrap()
        .unwrap();
    let config = config.as_table_config().unwrap();
    assert_eq!(config.rules[0].action.name, "as[0]");
    // selector keys only feed the member hash
    assert_eq!(config.rules[0].matches.len(), 1);
    assert!(config.properties.contains_key("action_selector"));

    let selector = state
        .get_test_object(ACTION_SELECTORS, "as", true)
        .unwrap()
        .unwrap();
    let selector = selector.as_action_selector().unwrap();
    assert_eq!(selector.selector_keys, vec![Expr::symbolic_var("s_in", Type::bits(16))]);
    assert_eq!(selector.profile.members.len(), 1);
    assert_eq!(selector.profile.members[0].name, "a2");
}
