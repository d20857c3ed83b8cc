mod utils;

use std::collections::BTreeSet;
use std::rc::Rc;

use p4testgen::executor::path_selection::{compute_potential_nodes, PathSelectionPolicy};
use p4testgen::executor::symbolic_executor::{AbstractTest, SymbolicExecutor};
use p4testgen::executor::symbolic_setting::TestgenSetting;
use p4testgen::executor::test_object::TableMatch;
use p4testgen::ir::expression::{Direction, Expr, Keyset, SelectCase};
use p4testgen::ir::program::{
    BlockKind, P4Control, P4Parser, ParserState, PipelineBlock, ProgramInfo, VariableDecl,
    VariableInit,
};
use p4testgen::ir::statement::Statement;
use p4testgen::ir::types::Type;
use p4testgen::solver::BruteForceSolver;
use p4testgen::targets::Bmv2Target;

use utils::{action, apply_stmt, arg, call_stmt, extern_ref, header_type, key, struct_type, table};

/// Parses an ethernet header, accepts ethertype 0x800 and rejects the rest,
/// then applies `t` keyed on the ethertype.
fn forwarding_program() -> ProgramInfo {
    let eth_ty = header_type("ethernet_t", &[("type", 16)]);
    let hdr_ty = struct_type("headers_t", vec![("eth", eth_ty.clone())]);
    let meta_ty = struct_type(
        "standard_metadata_t",
        vec![("egress_spec", Type::bits(9)), ("mcast_grp", Type::bits(16))],
    );
    let hdr = Expr::path("hdr", hdr_ty.clone());
    let eth = Expr::member(hdr, "eth", eth_ty);
    let ether_type = Expr::member(Rc::clone(&eth), "type", Type::bits(16));

    let mut program = ProgramInfo::default();
    program.name = "forwarding".to_string();
    program.variables = vec![
        VariableDecl {
            name: "hdr".to_string(),
            ty: hdr_ty,
            init: VariableInit::Uninitialized,
        },
        VariableDecl {
            name: "standard_metadata".to_string(),
            ty: meta_ty.clone(),
            init: VariableInit::Uninitialized,
        },
    ];
    program.parsers = vec![P4Parser {
        name: "prs".to_string(),
        states: vec![ParserState {
            name: "start".to_string(),
            components: vec![call_stmt(
                extern_ref("pkt", "packet_in"),
                "extract",
                vec![arg(Direction::Out, eth)],
            )],
            transition: Some(Rc::new(Statement::Transition {
                meta: Default::default(),
                target: Rc::new(Expr::Select {
                    select: Rc::clone(&ether_type),
                    cases: vec![
                        SelectCase {
                            keyset: Keyset::Value {
                                value: Expr::bits(16, 0x800),
                            },
                            state: "accept".to_string(),
                        },
                        SelectCase {
                            keyset: Keyset::Default,
                            state: "reject".to_string(),
                        },
                    ],
                }),
            })),
        }],
    }];
    program.controls = vec![P4Control {
        name: "ingress".to_string(),
        body: Statement::block(vec![apply_stmt("t")]),
    }];

    let egress_spec = Expr::member(
        Expr::path("standard_metadata", meta_ty),
        "egress_spec",
        Type::bits(9),
    );
    program.actions = vec![
        action(
            "forward",
            &[("port", 9)],
            vec![Statement::assignment(
                egress_spec,
                Expr::path("port", Type::bits(9)),
            )],
        ),
        action("NoAction", &[], Vec::new()),
    ];
    program.tables = vec![table(
        "t",
        vec![key(ether_type, "exact", "hdr.eth.type")],
        &["forward", "NoAction"],
        "NoAction",
    )];
    program.pipeline = vec![
        PipelineBlock {
            kind: BlockKind::Parser,
            name: "prs".to_string(),
        },
        PipelineBlock {
            kind: BlockKind::Control,
            name: "ingress".to_string(),
        },
    ];
    program.finalize()
}

fn generate(program: &ProgramInfo, setting: &TestgenSetting) -> Vec<AbstractTest> {
    let bmv2 = Bmv2Target::new();
    let mut executor = SymbolicExecutor::new(
        program,
        &bmv2,
        setting,
        Box::new(BruteForceSolver::new(setting)),
    );
    executor.run().unwrap().to_vec()
}

#[test]
fn test_every_parser_and_table_path_yields_a_test() {
    let program = forwarding_program();
    let setting = TestgenSetting::default();
    let tests = generate(&program, &setting);

    // two parser outcomes, each followed by two control-plane entries and a miss
    assert_eq!(tests.len(), 6);
    assert!(tests.iter().all(|t| t.exception.is_none()));
    assert!(tests.iter().all(|t| t.input_packet_bits == 16));
    for (i, test) in tests.iter().enumerate() {
        assert_eq!(test.id, i);
    }
}

#[test]
fn test_forward_rule_matches_input_packet() {
    let program = forwarding_program();
    let setting = TestgenSetting::default();
    let tests = generate(&program, &setting);

    let forwarded: Vec<&AbstractTest> = tests
        .iter()
        .filter(|t| {
            t.table_config("t")
                .map_or(false, |c| c.rules.iter().any(|r| r.action.name == "forward"))
        })
        .collect();
    assert_eq!(forwarded.len(), 2);

    for test in forwarded {
        let config = test.table_config("t").unwrap();
        let packet_type = &test.input_packet[0];
        assert_eq!(packet_type.label, "hdr.eth.type");
        match &config.rules[0].matches[0].1 {
            TableMatch::Exact { value, .. } => {
                assert!(value.is_constant());
                assert_eq!(value.to_string(), packet_type.value);
            }
            other => panic!("unexpected match {:?}", other),
        }
    }
}

#[test]
fn test_max_tests_stops_early() {
    let program = forwarding_program();
    let setting = TestgenSetting {
        max_tests: 2,
        ..TestgenSetting::default()
    };
    assert_eq!(generate(&program, &setting).len(), 2);
}

#[test]
fn test_coverage_and_stats() {
    let program = forwarding_program();
    let setting = TestgenSetting::default();
    let bmv2 = Bmv2Target::new();
    let mut executor = SymbolicExecutor::new(
        &program,
        &bmv2,
        &setting,
        Box::new(BruteForceSolver::new(&setting)),
    );
    let count = executor.run().unwrap().len();

    assert!(executor.coverage.statement_coverage() > 0.0);
    assert!(executor.coverage.coverage_count() >= 1);
    assert_eq!(executor.stats.finished_paths, count + executor.stats.unsolved_paths);
    assert!(executor.stats.steps > 0);
}

#[test]
fn test_runs_are_deterministic() {
    let program = forwarding_program();
    let setting = TestgenSetting::default();
    let first = serde_json::to_string(&generate(&program, &setting)).unwrap();
    let second = serde_json::to_string(&generate(&program, &setting)).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_empty_pipeline_is_rejected() {
    let program = ProgramInfo::default().finalize();
    let setting = TestgenSetting::default();
    let bmv2 = Bmv2Target::new();
    let mut executor = SymbolicExecutor::new(
        &program,
        &bmv2,
        &setting,
        Box::new(BruteForceSolver::new(&setting)),
    );
    assert!(executor.initial_state().is_err());
    assert!(executor.run().is_err());
}

#[test]
fn test_potential_nodes_of_initial_state() {
    let program = forwarding_program();
    let setting = TestgenSetting::default();
    let bmv2 = Bmv2Target::new();
    let executor = SymbolicExecutor::new(
        &program,
        &bmv2,
        &setting,
        Box::new(BruteForceSolver::new(&setting)),
    );
    let state = executor.initial_state().unwrap();

    // extract, transition and apply; table actions are not scanned
    let expected: BTreeSet<usize> = [1, 2, 3].into_iter().collect();
    assert_eq!(compute_potential_nodes(&program, &state), expected);
}

#[test]
fn test_coverage_policies_reach_every_statement() {
    let program = forwarding_program();
    for policy in [
        PathSelectionPolicy::GreedyStatementCoverage,
        PathSelectionPolicy::MaxStatementCoverage,
    ] {
        let setting = TestgenSetting {
            path_selection: policy,
            ..TestgenSetting::default()
        };
        let bmv2 = Bmv2Target::new();
        let mut executor = SymbolicExecutor::new(
            &program,
            &bmv2,
            &setting,
            Box::new(BruteForceSolver::new(&setting)),
        );
        assert_eq!(executor.run().unwrap().len(), 6);
        assert_eq!(executor.coverage.statement_coverage(), 1.0);
    }
}
