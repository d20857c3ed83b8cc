use std::rc::Rc;

use num_bigint_dig::BigInt;

use p4testgen::executor::symbolic_value::{
    evaluate, keyset_condition, mk_binary, mk_cast, mk_constant, mk_eq, mk_land, mk_lnot, mk_lor,
    mk_slice, simplify, Model,
};
use p4testgen::ir::expression::{BinOp, Expr, Keyset};
use p4testgen::ir::types::Type;

#[test]
fn test_arithmetic_wraps_to_width() {
    assert_eq!(
        mk_binary(BinOp::Add, Expr::bits(8, 250), Expr::bits(8, 10)),
        Expr::bits(8, 4)
    );
    assert_eq!(
        mk_binary(BinOp::Sub, Expr::bits(8, 1), Expr::bits(8, 2)),
        Expr::bits(8, 255)
    );
    assert_eq!(
        mk_binary(BinOp::Mul, Expr::bits(16, 300), Expr::bits(16, 300)),
        Expr::bits(16, 90000 % 65536)
    );
    assert_eq!(
        mk_binary(BinOp::Shl, Expr::bits(8, 0x81), Expr::bits(8, 1)),
        Expr::bits(8, 0x02)
    );
    assert_eq!(
        mk_constant(&Type::int(8), BigInt::from(200)),
        Expr::constant(Type::int(8), BigInt::from(-56))
    );
}

#[test]
fn test_saturating_and_concat() {
    assert_eq!(
        mk_binary(BinOp::AddSat, Expr::bits(8, 200), Expr::bits(8, 100)),
        Expr::bits(8, 255)
    );
    assert_eq!(
        mk_binary(BinOp::SubSat, Expr::bits(8, 3), Expr::bits(8, 5)),
        Expr::bits(8, 0)
    );
    assert_eq!(
        mk_binary(BinOp::Concat, Expr::bits(8, 0xab), Expr::bits(8, 0xcd)),
        Expr::bits(16, 0xabcd)
    );
    assert_eq!(mk_slice(Expr::bits(16, 0xabcd), 15, 8), Expr::bits(8, 0xab));
    assert_eq!(mk_cast(&Type::bits(4), Expr::bits(8, 0x1f)), Expr::bits(4, 0xf));
    assert_eq!(mk_cast(&Type::Bool, Expr::bits(1, 1)), Expr::boolean(true));
}

#[test]
fn test_comparisons_and_logic() {
    let x = Expr::symbolic_var("x", Type::bits(8));
    assert_eq!(mk_eq(Expr::bits(8, 3), Expr::bits(8, 3)), Expr::boolean(true));
    assert_eq!(
        mk_binary(BinOp::Lss, Expr::bits(8, 3), Expr::bits(8, 2)),
        Expr::boolean(false)
    );
    assert_eq!(mk_eq(Rc::clone(&x), Rc::clone(&x)), Expr::boolean(true));

    let cond = mk_eq(Rc::clone(&x), Expr::bits(8, 1));
    assert_eq!(mk_land(Expr::boolean(true), Rc::clone(&cond)), cond);
    assert_eq!(mk_land(Rc::clone(&cond), Expr::boolean(false)), Expr::boolean(false));
    assert_eq!(mk_lor(Rc::clone(&cond), Expr::boolean(true)), Expr::boolean(true));
    assert_eq!(mk_lnot(mk_lnot(Rc::clone(&cond))), cond);
}

#[test]
fn test_taint_dominates() {
    let t = Expr::taint(Type::bits(8));
    assert_eq!(
        mk_binary(BinOp::Add, Rc::clone(&t), Expr::bits(8, 1)),
        Expr::taint(Type::bits(8))
    );
    assert_eq!(
        mk_eq(Rc::clone(&t), Expr::bits(8, 1)),
        Expr::taint(Type::Bool)
    );
    // a zero mask removes the taint
    assert_eq!(
        mk_binary(BinOp::BAnd, Rc::clone(&t), Expr::bits(8, 0)),
        Expr::bits(8, 0)
    );
    assert_eq!(
        mk_land(Expr::boolean(false), Expr::taint(Type::Bool)),
        Expr::boolean(false)
    );
}

#[test]
fn test_evaluate_under_model() {
    let x = Expr::symbolic_var("x", Type::bits(8));
    let y = Expr::symbolic_var("y", Type::bits(8));
    let expr = mk_binary(BinOp::Add, Rc::clone(&x), Rc::clone(&y));

    let mut model = Model::new();
    model.insert("x".to_string(), Expr::bits(8, 7));
    let partial = evaluate(&expr, &model);
    assert!(!partial.is_constant());

    model.insert("y".to_string(), Expr::bits(8, 250));
    assert_eq!(evaluate(&expr, &model), Expr::bits(8, 1));

    let mux = Rc::new(Expr::Mux {
        cond: mk_eq(x, Expr::bits(8, 7)),
        if_true: Expr::bits(8, 1),
        if_false: Expr::bits(8, 2),
        ty: Type::bits(8),
    });
    assert_eq!(evaluate(&mux, &model), Expr::bits(8, 1));
    assert_eq!(simplify(&mux), mux);
}

#[test]
fn test_keyset_conditions() {
    let x = Expr::symbolic_var("x", Type::bits(8));
    assert_eq!(keyset_condition(&x, &Keyset::Default), None);

    let masked = keyset_condition(
        &x,
        &Keyset::Mask {
            value: Expr::bits(8, 0x1f),
            mask: Expr::bits(8, 0xf0),
        },
    )
    .unwrap();
    let mut model = Model::new();
    model.insert("x".to_string(), Expr::bits(8, 0x12));
    assert_eq!(evaluate(&masked, &model), Expr::boolean(true));
    model.insert("x".to_string(), Expr::bits(8, 0x21));
    assert_eq!(evaluate(&masked, &model), Expr::boolean(false));

    let range = keyset_condition(
        &x,
        &Keyset::Range {
            lo: Expr::bits(8, 0x20),
            hi: Expr::bits(8, 0x30),
        },
    )
    .unwrap();
    assert_eq!(evaluate(&range, &model), Expr::boolean(true));
}

#[test]
fn test_saturating_ops_on_zero_width_ints() {
    let zero = Expr::constant(Type::int(0), BigInt::from(0));
    assert_eq!(mk_binary(BinOp::AddSat, Rc::clone(&zero), Rc::clone(&zero)), zero);
    assert_eq!(mk_binary(BinOp::SubSat, Rc::clone(&zero), Rc::clone(&zero)), zero);
}
