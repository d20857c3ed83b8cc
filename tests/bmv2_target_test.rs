mod utils;

use std::rc::Rc;

use num_bigint_dig::BigInt;

use p4testgen::executor::continuation::{Command, ExceptionKind};
use p4testgen::executor::small_step::SmallStepEvaluator;
use p4testgen::executor::symbolic_setting::{TestBackend, TestgenSetting};
use p4testgen::executor::test_object::{TestObject, METER_VALUES, REGISTER_VALUES};
use p4testgen::ir::expression::{Direction, Expr, StateVariable};
use p4testgen::ir::program::{ExternInstance, ProgramInfo};
use p4testgen::ir::types::Type;
use p4testgen::targets::bmv2::DROP_PORT;
use p4testgen::targets::Bmv2Target;

use utils::{
    arg, call_stmt, contains_concolic, eq, extern_ref, function_stmt, run_to_end, state_with,
    step_until_fork, struct_type,
};

fn program_with_externs(externs: &[(&str, &str)]) -> ProgramInfo {
    let mut program = ProgramInfo::default();
    program.externs = externs
        .iter()
        .map(|(name, type_name)| ExternInstance {
            name: name.to_string(),
            type_name: type_name.to_string(),
            args: Vec::new(),
        })
        .collect();
    program.finalize()
}

fn register_read(index: u64) -> p4testgen::ir::statement::StmtRef {
    call_stmt(
        extern_ref("reg", "register"),
        "read",
        vec![
            arg(Direction::Out, Expr::path("v", Type::bits(32))),
            arg(Direction::In, Expr::bits(32, index)),
        ],
    )
}

fn register_write(index: u64, value: u64) -> p4testgen::ir::statement::StmtRef {
    call_stmt(
        extern_ref("reg", "register"),
        "write",
        vec![
            arg(Direction::In, Expr::bits(32, index)),
            arg(Direction::In, Expr::bits(32, value)),
        ],
    )
}

#[test]
fn test_register_read_before_write_sees_zero() {
    let program = program_with_externs(&[("reg", "register")]);
    let setting = TestgenSetting::default();
    let bmv2 = Bmv2Target::new();
    let evaluator = SmallStepEvaluator::new(&program, &bmv2, &setting);

    let end = run_to_end(&evaluator, &state_with(vec![register_read(0)]));
    assert_eq!(
        end.get(&StateVariable::new("v", Type::bits(32))),
        Expr::bits(32, 0)
    );
    let register = end
        .get_test_object(REGISTER_VALUES, "reg", true)
        .unwrap()
        .unwrap();
    let register = register.as_register_value().unwrap();
    assert_eq!(register.initial_value, Expr::bits(32, 0));
    assert!(register.writes.is_empty());
}

#[test]
fn test_register_read_after_write() {
    let program = program_with_externs(&[("reg", "register")]);
    let setting = TestgenSetting::default();
    let bmv2 = Bmv2Target::new();
    let evaluator = SmallStepEvaluator::new(&program, &bmv2, &setting);
    let v = StateVariable::new("v", Type::bits(32));

    let end = run_to_end(
        &evaluator,
        &state_with(vec![register_write(3, 7), register_read(3)]),
    );
    assert_eq!(end.get(&v), Expr::bits(32, 7));

    let end = run_to_end(
        &evaluator,
        &state_with(vec![register_write(3, 7), register_read(4)]),
    );
    assert_eq!(end.get(&v), Expr::bits(32, 0));
    let register = end
        .get_test_object(REGISTER_VALUES, "reg", true)
        .unwrap()
        .unwrap();
    assert_eq!(register.as_register_value().unwrap().writes.len(), 1);
}

#[test]
fn test_hash_is_concolic() {
    let program = ProgramInfo::default().finalize();
    let setting = TestgenSetting::default();
    let bmv2 = Bmv2Target::new();
    let evaluator = SmallStepEvaluator::new(&program, &bmv2, &setting);

    let algorithm = Expr::constant(
        Type::Enum {
            name: "HashAlgorithm".to_string(),
            members: ["crc32", "crc32_custom", "crc16", "crc16_custom", "random", "identity"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
        },
        BigInt::from(2),
    );
    let data = Rc::new(Expr::List {
        components: vec![Expr::path("x", Type::bits(16))],
    });
    let stmt = function_stmt(
        "hash",
        vec![
            arg(Direction::Out, Expr::path("h", Type::bits(16))),
            arg(Direction::In, algorithm),
            arg(Direction::In, Expr::bits(16, 0)),
            arg(Direction::In, data),
            arg(Direction::In, Expr::bits(32, 1024)),
        ],
    );
    let mut state = state_with(vec![stmt]);
    state.set(
        &StateVariable::new("x", Type::bits(16)),
        Expr::symbolic_var("x_in", Type::bits(16)),
    );

    let end = run_to_end(&evaluator, &state);
    let h = end.get(&StateVariable::new("h", Type::bits(16)));
    assert!(contains_concolic(&h, "crc16"));
    assert!(end.trace().iter().any(|e| e.message.starts_with("hash crc16")));
}

#[test]
fn test_meter_depends_on_backend() {
    let program = program_with_externs(&[("m", "meter")]);
    let bmv2 = Bmv2Target::new();
    let color = StateVariable::new("color", Type::bits(2));
    let stmt = call_stmt(
        extern_ref("m", "meter"),
        "execute_meter",
        vec![
            arg(Direction::In, Expr::bits(32, 0)),
            arg(Direction::Out, Expr::path("color", Type::bits(2))),
        ],
    );

    let stf = TestgenSetting::default();
    let evaluator = SmallStepEvaluator::new(&program, &bmv2, &stf);
    let end = run_to_end(&evaluator, &state_with(vec![Rc::clone(&stmt)]));
    assert_eq!(end.get(&color), Expr::bits(2, 0));
    assert!(end.test_objects().get(METER_VALUES).is_none());

    let ptf = TestgenSetting {
        backend: TestBackend::Ptf,
        ..TestgenSetting::default()
    };
    let evaluator = SmallStepEvaluator::new(&program, &bmv2, &ptf);
    let end = run_to_end(&evaluator, &state_with(vec![stmt]));
    assert_eq!(
        end.get(&color),
        Expr::symbolic_var("m_color_0", Type::bits(2))
    );
    let meter = end
        .get_test_object(METER_VALUES, "m", true)
        .unwrap()
        .unwrap();
    match meter.as_ref() {
        TestObject::MeterValue(m) => {
            assert!(!m.is_direct);
            assert_eq!(m.results.len(), 1);
        }
        other => panic!("unexpected test object {:?}", other),
    }
}

#[test]
fn test_mark_to_drop_sets_drop_port() {
    let program = ProgramInfo::default().finalize();
    let setting = TestgenSetting::default();
    let bmv2 = Bmv2Target::new();
    let evaluator = SmallStepEvaluator::new(&program, &bmv2, &setting);

    let meta_ty = struct_type(
        "standard_metadata_t",
        vec![("egress_spec", Type::bits(9)), ("mcast_grp", Type::bits(16))],
    );
    let stmt = function_stmt(
        "mark_to_drop",
        vec![arg(
            Direction::InOut,
            Expr::path("standard_metadata", meta_ty),
        )],
    );
    let end = run_to_end(&evaluator, &state_with(vec![stmt]));
    assert_eq!(
        end.get(&StateVariable::new(
            "standard_metadata.egress_spec",
            Type::bits(9)
        )),
        Expr::bits(9, DROP_PORT)
    );
}

#[test]
fn test_failed_assert_aborts() {
    let program = ProgramInfo::default().finalize();
    let setting = TestgenSetting::default();
    let bmv2 = Bmv2Target::new();
    let evaluator = SmallStepEvaluator::new(&program, &bmv2, &setting);

    let check = eq(Expr::path("x", Type::bits(8)), Expr::bits(8, 1));
    let mut state = state_with(vec![function_stmt(
        "assert",
        vec![arg(Direction::In, check)],
    )]);
    state.set(
        &StateVariable::new("x", Type::bits(8)),
        Expr::symbolic_var("x_in", Type::bits(8)),
    );

    let branches = step_until_fork(&evaluator, &state);
    assert_eq!(branches.len(), 2);
    assert!(branches[0].next_state.body().is_empty());
    assert_eq!(
        branches[1].next_state.top_command(),
        Some(&Command::Exception(ExceptionKind::Abort))
    );
}
