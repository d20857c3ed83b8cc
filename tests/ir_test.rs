use p4testgen::ir::expression::Expr;
use p4testgen::ir::program::{BlockKind, ProgramInfo, VariableInit};
use p4testgen::ir::statement::Statement;
use p4testgen::ir::types::Type;

const PROGRAM: &str = r#"{
    "name": "counter",
    "variables": [
        {"name": "x", "ty": {"kind": "bits", "width": 8, "signed": false}, "init": {"kind": "symbolic"}}
    ],
    "controls": [{
        "name": "c",
        "body": {"stmt": "block", "stmts": [
            {"stmt": "assignment",
             "left": {"node": "path", "name": "x", "ty": {"kind": "bits", "width": 8, "signed": false}},
             "right": {"node": "constant", "ty": {"kind": "bits", "width": 8, "signed": false}, "value": "3"}},
            {"stmt": "exit"}
        ]}
    }],
    "pipeline": [{"kind": "control", "name": "c"}]
}"#;

#[test]
fn test_load_program_from_json() {
    let program = ProgramInfo::from_json_str(PROGRAM).unwrap();
    assert_eq!(program.name, "counter");
    assert_eq!(program.variables[0].init, VariableInit::Symbolic);
    assert_eq!(program.pipeline[0].kind, BlockKind::Control);
    assert!(program.find_control("c").is_some());

    let control = program.find_control("c").unwrap();
    match control.body.as_ref() {
        Statement::Block { stmts, .. } => {
            assert_eq!(stmts.len(), 2);
            match stmts[0].as_ref() {
                Statement::Assignment { right, .. } => {
                    assert_eq!(*right, Expr::bits(8, 3))
                }
                other => panic!("unexpected statement {:?}", other),
            }
        }
        other => panic!("unexpected body {:?}", other),
    }
}

#[test]
fn test_statements_are_numbered() {
    let program = ProgramInfo::from_json_str(PROGRAM).unwrap();
    // the block itself is not counted
    assert_eq!(program.statement_count(), 2);
    let ids: Vec<usize> = program
        .all_statements()
        .iter()
        .map(|s| s.meta().elem_id)
        .collect();
    assert_eq!(ids, vec![1, 2]);
}

#[test]
fn test_malformed_program_is_rejected() {
    assert!(ProgramInfo::from_json_str(r#"{"controls": [{"name": "c"}]}"#).is_err());
}

#[test]
fn test_named_types_resolve_through_typedefs() {
    let program = ProgramInfo::from_json_str(
        r#"{"typedefs": [{"name": "port_t", "ty": {"kind": "bits", "width": 9, "signed": false}}]}"#,
    )
    .unwrap();
    assert_eq!(
        program.resolve_type(&Type::Named {
            name: "port_t".to_string()
        }),
        Type::bits(9)
    );
}
