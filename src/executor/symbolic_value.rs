use std::collections::BTreeMap;
use std::rc::Rc;

use colored::Colorize;
use num_bigint_dig::BigInt;
use num_traits::{One, ToPrimitive, Zero};

use crate::executor::concolic;
use crate::executor::utils::{all_ones, extract_bits, italic, shift_amount, wrap_to_width};
use crate::ir::expression::{BinOp, Expr, ExprRef, Keyset, NamedExpr, UnOp};
use crate::ir::types::Type;

/// A satisfying assignment: symbolic variable name to constant.
pub type Model = BTreeMap<String, ExprRef>;

/// Builds a constant of type `ty`, wrapped to the type's width.
pub fn mk_constant(ty: &Type, value: BigInt) -> ExprRef {
    match ty {
        Type::Bool => Expr::boolean(!value.is_zero()),
        _ => {
            let value = match ty.width_bits() {
                Some(w) => wrap_to_width(&value, w, ty.is_signed()),
                None => value,
            };
            Expr::constant(ty.clone(), value)
        }
    }
}

/// Result type of a binary operation over operands of the given types.
fn binary_result_type(op: BinOp, left: &Type, right: &Type) -> Type {
    if op.is_comparison() || op.is_logical() {
        return Type::Bool;
    }
    if op == BinOp::Concat {
        let w = left.width_bits().unwrap_or(0) + right.width_bits().unwrap_or(0);
        return Type::Bits {
            width: w,
            signed: left.is_signed(),
        };
    }
    left.clone()
}

/// Returns true if any leaf of `expr` is taint.
pub fn has_taint(expr: &Expr) -> bool {
    match expr {
        Expr::Taint { .. } => true,
        Expr::Member { expr, .. } | Expr::Unary { expr, .. } | Expr::Cast { expr, .. } => {
            has_taint(expr)
        }
        Expr::Slice { expr, hi, lo, .. } => has_taint(expr) || has_taint(hi) || has_taint(lo),
        Expr::ArrayIndex { array, index, .. } => has_taint(array) || has_taint(index),
        Expr::Binary { left, right, .. } => has_taint(left) || has_taint(right),
        Expr::Mux {
            cond,
            if_true,
            if_false,
            ..
        } => has_taint(cond) || has_taint(if_true) || has_taint(if_false),
        Expr::List { components } => components.iter().any(|c| has_taint(c)),
        Expr::Struct { fields, .. } => fields.iter().any(|f| has_taint(&f.expr)),
        Expr::Concolic { args, .. } => args.iter().any(|a| has_taint(a)),
        Expr::MethodCall { method, args, .. } => {
            has_taint(method) || args.iter().any(|a| has_taint(&a.expr))
        }
        _ => false,
    }
}

fn fold_constants(op: BinOp, ty: &Type, lt: &Type, lv: &BigInt, rv: &BigInt) -> Option<ExprRef> {
    let width = lt.width_bits().unwrap_or(0);
    let signed = lt.is_signed();
    let value = match op {
        BinOp::Add => lv + rv,
        BinOp::Sub => lv - rv,
        BinOp::Mul => lv * rv,
        BinOp::Div => {
            if rv.is_zero() {
                BigInt::zero()
            } else {
                lv / rv
            }
        }
        BinOp::Mod => {
            if rv.is_zero() {
                BigInt::zero()
            } else {
                lv % rv
            }
        }
        BinOp::Shl => lv << shift_amount(rv, width),
        BinOp::Shr => {
            let amount = shift_amount(rv, width);
            if signed {
                lv >> amount
            } else {
                wrap_to_width(lv, width, false) >> amount
            }
        }
        BinOp::BAnd => wrap_to_width(lv, width, false) & wrap_to_width(rv, width, false),
        BinOp::BOr => wrap_to_width(lv, width, false) | wrap_to_width(rv, width, false),
        BinOp::BXor => wrap_to_width(lv, width, false) ^ wrap_to_width(rv, width, false),
        BinOp::Equ => return Some(Expr::boolean(lv == rv)),
        BinOp::Neq => return Some(Expr::boolean(lv != rv)),
        BinOp::Lss => return Some(Expr::boolean(lv < rv)),
        BinOp::Leq => return Some(Expr::boolean(lv <= rv)),
        BinOp::Grt => return Some(Expr::boolean(lv > rv)),
        BinOp::Geq => return Some(Expr::boolean(lv >= rv)),
        BinOp::AddSat => {
            let sum = lv + rv;
            let (min, max) = type_bounds(width, signed);
            clamp(sum, &min, &max)
        }
        BinOp::SubSat => {
            let diff = lv - rv;
            let (min, max) = type_bounds(width, signed);
            clamp(diff, &min, &max)
        }
        BinOp::Concat => {
            let rw = match ty.width_bits() {
                Some(total) => total - width,
                None => return None,
            };
            (wrap_to_width(lv, width, false) << rw as usize) | wrap_to_width(rv, rw, false)
        }
        BinOp::LAnd | BinOp::LOr => return None,
    };
    Some(mk_constant(ty, value))
}

fn type_bounds(width: u32, signed: bool) -> (BigInt, BigInt) {
    if width == 0 {
        return (BigInt::zero(), BigInt::zero());
    }
    if signed {
        let half = BigInt::one() << (width as usize - 1);
        (-half.clone(), half - BigInt::one())
    } else {
        (BigInt::zero(), all_ones(width))
    }
}

fn clamp(v: BigInt, min: &BigInt, max: &BigInt) -> BigInt {
    if &v < min {
        min.clone()
    } else if &v > max {
        max.clone()
    } else {
        v
    }
}

fn is_zero_constant(e: &Expr) -> bool {
    matches!(e, Expr::Constant { value, .. } if value.is_zero())
}

fn is_all_ones_constant(e: &Expr) -> bool {
    match e {
        Expr::Constant { ty, value } => match ty.width_bits() {
            Some(w) => wrap_to_width(value, w, false) == all_ones(w),
            None => false,
        },
        _ => false,
    }
}

/// Builds a binary operation, folding constants and absorbing trivial
/// operands. Taint dominates unless the other operand decides the result.
///
/// # Arguments
///
/// * `op` - The operator.
/// * `left` - Left operand.
/// * `right` - Right operand.
///
/// # Returns
///
/// The simplified expression.
pub fn mk_binary(op: BinOp, left: ExprRef, right: ExprRef) -> ExprRef {
    let lt = left.ty();
    let ty = binary_result_type(op, &lt, &right.ty());

    match op {
        BinOp::LAnd => {
            match (left.as_bool(), right.as_bool()) {
                (Some(false), _) | (_, Some(false)) => return Expr::boolean(false),
                (Some(true), _) => return right,
                (_, Some(true)) => return left,
                _ => {}
            }
        }
        BinOp::LOr => {
            match (left.as_bool(), right.as_bool()) {
                (Some(true), _) | (_, Some(true)) => return Expr::boolean(true),
                (Some(false), _) => return right,
                (_, Some(false)) => return left,
                _ => {}
            }
        }
        BinOp::BAnd => {
            if is_zero_constant(&left) || is_zero_constant(&right) {
                return mk_constant(&ty, BigInt::zero());
            }
            if is_all_ones_constant(&left) && !has_taint(&right) {
                return right;
            }
            if is_all_ones_constant(&right) && !has_taint(&left) {
                return left;
            }
        }
        BinOp::Mul => {
            if is_zero_constant(&left) || is_zero_constant(&right) {
                return mk_constant(&ty, BigInt::zero());
            }
        }
        _ => {}
    }

    if has_taint(&left) || has_taint(&right) {
        return Expr::taint(ty);
    }

    match (left.as_ref(), right.as_ref()) {
        (Expr::Constant { value: lv, .. }, Expr::Constant { value: rv, .. }) => {
            if let Some(folded) = fold_constants(op, &ty, &lt, lv, rv) {
                return folded;
            }
        }
        (Expr::Bool { value: lv }, Expr::Bool { value: rv }) => match op {
            BinOp::Equ => return Expr::boolean(lv == rv),
            BinOp::Neq => return Expr::boolean(lv != rv),
            _ => {}
        },
        (Expr::Str { value: lv }, Expr::Str { value: rv }) => match op {
            BinOp::Equ => return Expr::boolean(lv == rv),
            BinOp::Neq => return Expr::boolean(lv != rv),
            _ => {}
        },
        _ => {
            if op == BinOp::Equ && left == right && left.is_symbolic() {
                return Expr::boolean(true);
            }
        }
    }

    Rc::new(Expr::Binary {
        op,
        left,
        right,
        ty,
    })
}

pub fn mk_unary(op: UnOp, expr: ExprRef) -> ExprRef {
    let ty = expr.ty();
    if has_taint(&expr) {
        return Expr::taint(ty);
    }
    match (op, expr.as_ref()) {
        (UnOp::LNot, Expr::Bool { value }) => Expr::boolean(!value),
        (
            UnOp::LNot,
            Expr::Unary {
                op: UnOp::LNot,
                expr: inner,
                ..
            },
        ) => Rc::clone(inner),
        (UnOp::Neg, Expr::Constant { value, .. }) => mk_constant(&ty, -value.clone()),
        (UnOp::Cmpl, Expr::Constant { value, .. }) => {
            let w = ty.width_bits().unwrap_or(0);
            mk_constant(&ty, all_ones(w) ^ wrap_to_width(value, w, false))
        }
        _ => Rc::new(Expr::Unary { op, expr, ty }),
    }
}

pub fn mk_cast(ty: &Type, expr: ExprRef) -> ExprRef {
    if has_taint(&expr) {
        return Expr::taint(ty.clone());
    }
    if &expr.ty() == ty {
        return expr;
    }
    match (ty, expr.as_ref()) {
        (Type::Bool, Expr::Constant { value, .. }) => Expr::boolean(!value.is_zero()),
        (_, Expr::Bool { value }) => mk_constant(ty, BigInt::from(*value as u8)),
        (_, Expr::Constant { value, .. }) => mk_constant(ty, value.clone()),
        _ => Rc::new(Expr::Cast {
            expr,
            ty: ty.clone(),
        }),
    }
}

/// Bit slice `expr[hi:lo]`. Both bounds must be constants.
pub fn mk_slice(expr: ExprRef, hi: u32, lo: u32) -> ExprRef {
    let ty = Type::bits(hi - lo + 1);
    if has_taint(&expr) {
        return Expr::taint(ty);
    }
    match expr.as_ref() {
        Expr::Constant { ty: et, value } => {
            let w = et.width_bits().unwrap_or(0);
            mk_constant(&ty, extract_bits(&wrap_to_width(value, w, false), hi, lo))
        }
        _ => Rc::new(Expr::Slice {
            expr,
            hi: Expr::bits(32, hi as u64),
            lo: Expr::bits(32, lo as u64),
            ty,
        }),
    }
}

pub fn mk_eq(left: ExprRef, right: ExprRef) -> ExprRef {
    mk_binary(BinOp::Equ, left, right)
}

pub fn mk_land(left: ExprRef, right: ExprRef) -> ExprRef {
    mk_binary(BinOp::LAnd, left, right)
}

pub fn mk_lor(left: ExprRef, right: ExprRef) -> ExprRef {
    mk_binary(BinOp::LOr, left, right)
}

pub fn mk_lnot(expr: ExprRef) -> ExprRef {
    mk_unary(UnOp::LNot, expr)
}

pub fn mk_band(left: ExprRef, right: ExprRef) -> ExprRef {
    mk_binary(BinOp::BAnd, left, right)
}

pub fn mk_leq(left: ExprRef, right: ExprRef) -> ExprRef {
    mk_binary(BinOp::Leq, left, right)
}

/// Conjunction of optional conditions; `None` stands for `true`.
pub fn conjoin(acc: Option<ExprRef>, cond: ExprRef) -> Option<ExprRef> {
    match acc {
        None => Some(cond),
        Some(a) => Some(mk_land(a, cond)),
    }
}

/// The condition under which `value` belongs to `keyset`, or `None` when
/// the keyset always matches. Value sets are resolved by the caller.
pub fn keyset_condition(value: &ExprRef, keyset: &Keyset) -> Option<ExprRef> {
    match keyset {
        Keyset::Default => None,
        Keyset::Value { value: v } => Some(mk_eq(Rc::clone(value), Rc::clone(v))),
        Keyset::Mask { value: v, mask } => Some(mk_eq(
            mk_band(Rc::clone(value), Rc::clone(mask)),
            mk_band(Rc::clone(v), Rc::clone(mask)),
        )),
        Keyset::Range { lo, hi } => Some(mk_land(
            mk_leq(Rc::clone(lo), Rc::clone(value)),
            mk_leq(Rc::clone(value), Rc::clone(hi)),
        )),
        Keyset::Tuple { components } => {
            let values: Vec<ExprRef> = match value.as_ref() {
                Expr::List { components } => components.clone(),
                _ => vec![Rc::clone(value)],
            };
            let mut acc = None;
            for (v, k) in values.iter().zip(components.iter()) {
                if let Some(c) = keyset_condition(v, k) {
                    acc = conjoin(acc, c);
                }
            }
            acc
        }
        Keyset::ValueSet { .. } => None,
    }
}

/// Rebuilds `expr` bottom-up, replacing every node for which `f` returns
/// `Some`. Replaced nodes are not descended into.
pub fn transform<F>(expr: &ExprRef, f: &F) -> ExprRef
where
    F: Fn(&Expr) -> Option<ExprRef>,
{
    if let Some(r) = f(expr) {
        return r;
    }
    let t = |e: &ExprRef| transform(e, f);
    let rebuilt = match expr.as_ref() {
        Expr::Member { expr: e, member, ty } => Expr::Member {
            expr: t(e),
            member: member.clone(),
            ty: ty.clone(),
        },
        Expr::ArrayIndex { array, index, ty } => Expr::ArrayIndex {
            array: t(array),
            index: t(index),
            ty: ty.clone(),
        },
        Expr::MethodCall { method, args, ty } => Expr::MethodCall {
            method: t(method),
            args: args
                .iter()
                .map(|a| crate::ir::expression::Argument {
                    direction: a.direction,
                    expr: t(&a.expr),
                })
                .collect(),
            ty: ty.clone(),
        },
        Expr::TableApply { table, keys } => Expr::TableApply {
            table: table.clone(),
            keys: keys.iter().map(t).collect(),
        },
        Expr::Mux {
            cond,
            if_true,
            if_false,
            ty,
        } => Expr::Mux {
            cond: t(cond),
            if_true: t(if_true),
            if_false: t(if_false),
            ty: ty.clone(),
        },
        Expr::Binary {
            op,
            left,
            right,
            ty,
        } => Expr::Binary {
            op: *op,
            left: t(left),
            right: t(right),
            ty: ty.clone(),
        },
        Expr::Unary { op, expr: e, ty } => Expr::Unary {
            op: *op,
            expr: t(e),
            ty: ty.clone(),
        },
        Expr::Cast { expr: e, ty } => Expr::Cast {
            expr: t(e),
            ty: ty.clone(),
        },
        Expr::Slice { expr: e, hi, lo, ty } => Expr::Slice {
            expr: t(e),
            hi: t(hi),
            lo: t(lo),
            ty: ty.clone(),
        },
        Expr::Select { select, cases } => Expr::Select {
            select: t(select),
            cases: cases.clone(),
        },
        Expr::List { components } => Expr::List {
            components: components.iter().map(t).collect(),
        },
        Expr::Struct { fields, ty } => Expr::Struct {
            fields: fields
                .iter()
                .map(|n| NamedExpr {
                    name: n.name.clone(),
                    expr: t(&n.expr),
                })
                .collect(),
            ty: ty.clone(),
        },
        Expr::Concolic {
            method,
            args,
            id,
            ty,
        } => Expr::Concolic {
            method: method.clone(),
            args: args.iter().map(t).collect(),
            id: *id,
            ty: ty.clone(),
        },
        _ => return Rc::clone(expr),
    };
    Rc::new(rebuilt)
}

/// Replaces the continuation placeholder `id` with `value`.
pub fn substitute_placeholder(expr: &ExprRef, id: u64, value: &ExprRef) -> ExprRef {
    transform(expr, &|e: &Expr| match e {
        Expr::Placeholder { id: pid, .. } if *pid == id => Some(Rc::clone(value)),
        _ => None,
    })
}

/// Re-applies constant folding over a whole expression tree.
pub fn simplify(expr: &ExprRef) -> ExprRef {
    match expr.as_ref() {
        Expr::Binary {
            op, left, right, ..
        } => mk_binary(*op, simplify(left), simplify(right)),
        Expr::Unary { op, expr: e, .. } => mk_unary(*op, simplify(e)),
        Expr::Cast { expr: e, ty } => mk_cast(ty, simplify(e)),
        Expr::Slice { expr: e, hi, lo, .. } => {
            match (
                hi.as_bigint().and_then(|v| v.to_u32()),
                lo.as_bigint().and_then(|v| v.to_u32()),
            ) {
                (Some(h), Some(l)) if h >= l => mk_slice(simplify(e), h, l),
                _ => Rc::clone(expr),
            }
        }
        Expr::Mux {
            cond,
            if_true,
            if_false,
            ty,
        } => {
            let c = simplify(cond);
            match c.as_bool() {
                Some(true) => simplify(if_true),
                Some(false) => simplify(if_false),
                None => Rc::new(Expr::Mux {
                    cond: c,
                    if_true: simplify(if_true),
                    if_false: simplify(if_false),
                    ty: ty.clone(),
                }),
            }
        }
        Expr::List { components } => Rc::new(Expr::List {
            components: components.iter().map(simplify).collect(),
        }),
        Expr::Struct { fields, ty } => Rc::new(Expr::Struct {
            fields: fields
                .iter()
                .map(|n| NamedExpr {
                    name: n.name.clone(),
                    expr: simplify(&n.expr),
                })
                .collect(),
            ty: ty.clone(),
        }),
        Expr::Concolic {
            method,
            args,
            id,
            ty,
        } => {
            let args: Vec<ExprRef> = args.iter().map(simplify).collect();
            if args.iter().any(|a| has_taint(a)) {
                return Expr::taint(ty.clone());
            }
            match concolic::compute(method, &args, ty) {
                Some(v) => mk_constant(ty, v),
                None => Rc::new(Expr::Concolic {
                    method: method.clone(),
                    args,
                    id: *id,
                    ty: ty.clone(),
                }),
            }
        }
        _ => Rc::clone(expr),
    }
}

/// Evaluates `expr` under `model`. Variables missing from the model stay
/// symbolic, so the result is a constant only if the model covers every
/// leaf. Concolic functions are computed once their inputs are known.
pub fn evaluate(expr: &ExprRef, model: &Model) -> ExprRef {
    let substituted = transform(expr, &|e: &Expr| match e {
        Expr::SymbolicVar { name, .. } => model.get(name).cloned(),
        _ => None,
    });
    simplify(&substituted)
}

/// Collects the symbolic variables of `expr` with their types.
pub fn collect_symbolic_vars(expr: &Expr, out: &mut BTreeMap<String, Type>) {
    match expr {
        Expr::SymbolicVar { name, ty } => {
            out.entry(name.clone()).or_insert_with(|| ty.clone());
        }
        _ => for_each_child(expr, &mut |c| collect_symbolic_vars(c, out)),
    }
}

/// Collects every bit-vector constant appearing in `expr`.
pub fn collect_constants(expr: &Expr, out: &mut Vec<BigInt>) {
    match expr {
        Expr::Constant { value, .. } => out.push(value.clone()),
        _ => for_each_child(expr, &mut |c| collect_constants(c, out)),
    }
}

fn for_each_child<F: FnMut(&Expr)>(expr: &Expr, f: &mut F) {
    match expr {
        Expr::Member { expr, .. } | Expr::Unary { expr, .. } | Expr::Cast { expr, .. } => f(expr),
        Expr::ArrayIndex { array, index, .. } => {
            f(array);
            f(index);
        }
        Expr::Slice { expr, hi, lo, .. } => {
            f(expr);
            f(hi);
            f(lo);
        }
        Expr::Binary { left, right, .. } => {
            f(left);
            f(right);
        }
        Expr::Mux {
            cond,
            if_true,
            if_false,
            ..
        } => {
            f(cond);
            f(if_true);
            f(if_false);
        }
        Expr::List { components } => components.iter().for_each(|c| f(c)),
        Expr::Struct { fields, .. } => fields.iter().for_each(|n| f(&n.expr)),
        Expr::Concolic { args, .. } => args.iter().for_each(|a| f(a)),
        Expr::MethodCall { method, args, .. } => {
            f(method);
            args.iter().for_each(|a| f(&a.expr));
        }
        Expr::TableApply { keys, .. } => keys.iter().for_each(|k| f(k)),
        _ => {}
    }
}

/// Formats an expression for debug dumps, colouring operators and leaves.
pub fn lookup_fmt(expr: &Expr) -> String {
    match expr {
        Expr::Constant { .. } => format!("{}", expr).bright_yellow().to_string(),
        Expr::Bool { value } => {
            if *value {
                "true".on_bright_green().white().to_string()
            } else {
                "false".on_bright_red().white().to_string()
            }
        }
        Expr::SymbolicVar { name, .. } => italic(name).magenta().to_string(),
        Expr::Taint { ty } => format!("taint<{}>", ty).red().bold().to_string(),
        Expr::Binary {
            op, left, right, ..
        } => {
            let sym = if op.is_comparison() || op.is_logical() {
                op.symbol().green()
            } else {
                op.symbol().yellow()
            };
            format!("({} {} {})", lookup_fmt(left), sym, lookup_fmt(right))
        }
        Expr::Unary { op, expr, .. } => format!("{}{}", op.symbol().green(), lookup_fmt(expr)),
        Expr::Concolic {
            method, args, id, ..
        } => format!(
            "{}({})",
            format!("{}#{}", method, id).cyan(),
            args.iter()
                .map(|a| lookup_fmt(a))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        _ => format!("{}", expr),
    }
}

/// Signed view of a constant for display and comparisons across widths.
pub fn constant_value(expr: &Expr) -> Option<BigInt> {
    match expr {
        Expr::Constant { value, .. } => Some(value.clone()),
        Expr::Bool { value } => Some(BigInt::from(*value as u8)),
        _ => None,
    }
}
