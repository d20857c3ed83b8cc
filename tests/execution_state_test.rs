mod utils;

use std::rc::Rc;

use p4testgen::executor::continuation::{Command, ExceptionKind, Frame, PropertyValue};
use p4testgen::executor::execution_state::{ExecutionState, TraceKind};
use p4testgen::executor::small_step::StepContext;
use p4testgen::executor::symbolic_setting::TestgenSetting;
use p4testgen::executor::test_object::{RegisterValue, TestObject, REGISTER_VALUES};
use p4testgen::ir::expression::{Expr, StateVariable};
use p4testgen::ir::program::{ProgramInfo, VariableInit};
use p4testgen::ir::types::Type;
use p4testgen::targets::{Bmv2Target, CoreTarget};

use utils::{header_type, struct_type};

#[test]
fn test_clone_is_isolated() {
    let x = StateVariable::new("x", Type::bits(8));
    let mut original = ExecutionState::new();
    original.set(&x, Expr::bits(8, 1));
    original.set_property("flag", PropertyValue::Bool(true));

    let mut forked = original.clone();
    forked.set(&x, Expr::bits(8, 2));
    forked.set_property("flag", PropertyValue::Bool(false));
    forked.add_path_constraint(Expr::boolean(true));
    forked.mark_visited(3);

    assert_eq!(original.get(&x), Expr::bits(8, 1));
    assert_eq!(forked.get(&x), Expr::bits(8, 2));
    assert!(original.get_property_bool("flag"));
    assert!(!forked.get_property_bool("flag"));
    assert!(original.path_constraint().is_empty());
    assert!(original.visited().is_empty());
    assert!(forked.visited().contains(&3));
}

#[test]
fn test_unbound_variable_reads_as_itself() {
    let state = ExecutionState::new();
    let y = StateVariable::new("meta.y", Type::bits(16));
    assert_eq!(state.get(&y), Expr::symbolic_var("meta.y", Type::bits(16)));
    assert!(!state.exists(&y));
}

#[test]
fn test_symbolic_variable_names_are_deterministic() {
    let mut a = ExecutionState::new();
    let mut b = ExecutionState::new();
    let a0 = a.create_symbolic_variable(Type::bits(8), "t_key");
    let a1 = a.create_symbolic_variable(Type::bits(8), "t_key");
    let b0 = b.create_symbolic_variable(Type::bits(8), "t_key");
    assert_eq!(a0, b0);
    assert_ne!(a0, a1);
    assert_eq!(a0, Expr::symbolic_var("t_key_0", Type::bits(8)));
}

#[test]
fn test_declare_variable_per_initialization() {
    let program = ProgramInfo::default().finalize();
    let setting = TestgenSetting::default();
    let bmv2 = Bmv2Target::new();
    let ctx = StepContext::new(&program, &bmv2, &setting);

    let eth = header_type("ethernet_t", &[("dst", 48), ("type", 16)]);
    let hdr = StateVariable::new("hdr", struct_type("headers_t", vec![("eth", eth)]));

    let mut state = ExecutionState::new();
    state
        .declare_variable(&ctx, &hdr, &VariableInit::Uninitialized)
        .unwrap();
    let valid = StateVariable::new("hdr.eth.$valid", Type::Bool);
    let ty = StateVariable::new("hdr.eth.type", Type::bits(16));
    assert_eq!(state.get(&valid), Expr::boolean(false));
    // bmv2 zero-initializes storage
    assert_eq!(state.get(&ty), Expr::bits(16, 0));

    let mut symbolic = ExecutionState::new();
    symbolic
        .declare_variable(&ctx, &hdr, &VariableInit::Symbolic)
        .unwrap();
    assert!(matches!(
        symbolic.get(&ty).as_ref(),
        Expr::SymbolicVar { .. }
    ));

    let core = CoreTarget::new();
    let core_ctx = StepContext::new(&program, &core, &setting);
    let mut tainted = ExecutionState::new();
    tainted
        .declare_variable(&core_ctx, &hdr, &VariableInit::Uninitialized)
        .unwrap();
    assert_eq!(tainted.get(&ty), Expr::taint(Type::bits(16)));

    let port = StateVariable::new("port", Type::bits(9));
    let mut constant = ExecutionState::new();
    constant
        .declare_variable(
            &ctx,
            &port,
            &VariableInit::Constant {
                value: Expr::bits(9, 4),
            },
        )
        .unwrap();
    assert_eq!(constant.get(&port), Expr::bits(9, 4));

    let mut bad = ExecutionState::new();
    assert!(bad
        .declare_variable(
            &ctx,
            &hdr,
            &VariableInit::Constant {
                value: Expr::bits(9, 4),
            },
        )
        .is_err());
}

#[test]
fn test_test_objects() {
    let mut state = ExecutionState::new();
    assert!(state.get_test_object(REGISTER_VALUES, "reg", false).unwrap().is_none());
    assert!(state.get_test_object(REGISTER_VALUES, "reg", true).is_err());

    let forked = state.clone();
    state.add_test_object(
        REGISTER_VALUES,
        "reg",
        TestObject::RegisterValue(RegisterValue::new(Expr::bits(32, 0))),
    );
    let obj = state
        .get_test_object(REGISTER_VALUES, "reg", true)
        .unwrap()
        .unwrap();
    assert!(obj.as_register_value().is_some());
    assert!(forked.test_objects().is_empty());

    state.delete_test_object_category(REGISTER_VALUES);
    assert!(state.test_objects().is_empty());
}

#[test]
fn test_exception_unwinds_to_handler() {
    let mut state = ExecutionState::new();
    let handler = state.body().prepend(vec![Command::PropertyUpdate {
        key: "handled".to_string(),
        value: PropertyValue::Bool(true),
    }]);
    let frame = Frame::new(state.body().clone(), None, state.namespaces_rc())
        .with_handler(ExceptionKind::Reject, handler);
    state.push_continuation(frame);
    state.push_continuation(Frame::new(
        state.body().clone(),
        None,
        state.namespaces_rc(),
    ));

    assert!(state.handle_exception(ExceptionKind::Reject));
    assert_eq!(state.exception(), None);
    assert!(matches!(
        state.top_command(),
        Some(Command::PropertyUpdate { .. })
    ));

    let mut unhandled = ExecutionState::new();
    assert!(!unhandled.handle_exception(ExceptionKind::Exit));
    assert_eq!(unhandled.exception(), Some(ExceptionKind::Exit));
    assert!(unhandled.is_terminated());
}

#[test]
fn test_packets_and_trace() {
    let mut state = ExecutionState::new();
    let a = state.create_symbolic_variable(Type::bits(16), "pkt");
    state.append_to_input_packet("hdr.eth.type", Rc::clone(&a), 16);
    state.append_to_input_packet("hdr.eth.dst", Expr::bits(48, 0), 48);
    assert_eq!(state.input_packet_bits(), 64);
    assert_eq!(state.input_packet().len(), 2);

    state.append_to_output_packet("ethernet_t.type", a);
    assert_eq!(state.output_packet().len(), 1);

    state.add_trace_event(TraceKind::Table, "t: miss".to_string(), None);
    assert_eq!(state.trace().len(), 1);
    assert_eq!(state.trace()[0].to_string(), "[table] t: miss");
}
