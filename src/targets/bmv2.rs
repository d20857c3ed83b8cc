//! The bmv2 simple switch with the v1model architecture.

use std::rc::Rc;

use log::{debug, warn};
use num_bigint_dig::BigInt;
use num_traits::{ToPrimitive, Zero};

use crate::executor::branch::GuardChain;
use crate::executor::concolic;
use crate::executor::continuation::{Command, ExceptionKind, PropertyValue};
use crate::executor::error::StepError;
use crate::executor::execution_state::{ExecutionState, TraceKind};
use crate::executor::extern_methods::{
    finish, resolve_reference, ExternCall, ExternMethodImpl, ExternMethodImpls, PARSER_ERROR,
};
use crate::executor::small_step::Stepper;
use crate::executor::symbolic_setting::TestBackend;
use crate::executor::symbolic_value::{
    has_taint, mk_band, mk_binary, mk_cast, mk_constant, mk_eq, mk_land, mk_leq, mk_lnot, mk_lor,
};
use crate::executor::table_stepper::{KeyProperties, TableStepper};
use crate::executor::test_object::{
    CloneInfo, MeterValue, RegisterValue, RegisterWrite, TableMatch, TestObject, CLONE_INFOS,
    METER_VALUES, REGISTER_VALUES,
};
use crate::executor::utils::all_ones;
use crate::ir::expression::{BinOp, Expr, ExprRef, StateVariable, VALID_FIELD};
use crate::ir::types::Type;
use crate::targets::{zero_value, TargetExtension};
use crate::{bug, unimplemented_step};

/// Egress port that makes bmv2 drop the packet.
pub const DROP_PORT: u64 = 511;
pub const STANDARD_METADATA: &str = "standard_metadata";

pub const CLONE_ACTIVE: &str = "clone_active";
pub const RECIRCULATE_COUNT: &str = "recirculate_count";
pub const RESUBMIT_COUNT: &str = "resubmit_count";
pub const TRUNCATE_LENGTH: &str = "truncate_length";

pub struct Bmv2Target {
    impls: ExternMethodImpls,
}

impl Bmv2Target {
    pub fn new() -> Self {
        Bmv2Target {
            impls: ExternMethodImpls::new(&[
                ("register.read", register_read as ExternMethodImpl),
                ("register.write", register_write as ExternMethodImpl),
                ("counter.count", no_effect as ExternMethodImpl),
                ("direct_counter.count", no_effect as ExternMethodImpl),
                ("meter.execute_meter", meter_execute as ExternMethodImpl),
                ("direct_meter.read", direct_meter_read as ExternMethodImpl),
                ("*method.hash", hash as ExternMethodImpl),
                ("*method.verify_checksum", verify_checksum as ExternMethodImpl),
                ("*method.update_checksum", update_checksum as ExternMethodImpl),
                ("*method.random", random as ExternMethodImpl),
                ("*method.mark_to_drop", mark_to_drop as ExternMethodImpl),
                ("*method.clone", clone as ExternMethodImpl),
                (
                    "*method.clone_preserving_field_list",
                    clone_preserving_field_list as ExternMethodImpl,
                ),
                (
                    "*method.resubmit_preserving_field_list",
                    resubmit_preserving_field_list as ExternMethodImpl,
                ),
                (
                    "*method.recirculate_preserving_field_list",
                    recirculate_preserving_field_list as ExternMethodImpl,
                ),
                ("*method.truncate", truncate as ExternMethodImpl),
                ("*method.assert", assert as ExternMethodImpl),
                ("*method.assume", assume as ExternMethodImpl),
                ("*method.log_msg", log_msg as ExternMethodImpl),
                ("*method.digest", digest as ExternMethodImpl),
            ]),
        }
    }
}

impl Default for Bmv2Target {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetExtension for Bmv2Target {
    fn name(&self) -> &str {
        "bmv2"
    }

    fn extern_impls(&self) -> &ExternMethodImpls {
        &self.impls
    }

    /// bmv2 zero-initializes all metadata and registers.
    fn create_target_uninitialized(&self, ty: &Type, force_taint: bool) -> ExprRef {
        if force_taint {
            return Expr::taint(ty.clone());
        }
        zero_value(ty)
    }

    fn compute_target_match_type(
        &self,
        table: &mut TableStepper<'_>,
        key: &KeyProperties,
        matches: &mut Vec<(String, TableMatch)>,
    ) -> Result<Option<ExprRef>, StepError> {
        match key.match_kind.as_str() {
            "range" => range_match(table, key, matches),
            "optional" => optional_match(table, key, matches),
            // Selector keys only feed the member hash.
            "selector" => Ok(None),
            _ => Err(unimplemented_step!(
                "match kind {} of key {} on bmv2",
                key.match_kind,
                key.name
            )),
        }
    }

    fn eval_target_table(&self, table: &mut TableStepper<'_>) -> Result<bool, StepError> {
        let p4table = table.table;
        let implementation = match &p4table.implementation {
            Some(name) => name,
            None => return Ok(false),
        };
        let (program, state) = (table.ctx.program, table.state);
        let instance = program
            .find_extern(state.namespaces(), implementation)
            .ok_or_else(|| bug!("table implementation {} does not exist", implementation))?;
        match instance.type_name.as_str() {
            "action_profile" => table.eval_table_action_profile(&instance.name)?,
            "action_selector" => table.eval_table_action_selector(&instance.name)?,
            other => {
                return Err(unimplemented_step!(
                    "table implementation {} of type {}",
                    implementation,
                    other
                ))
            }
        }
        Ok(true)
    }

    /// STF has no range syntax, so a range key is always matched exactly.
    fn can_wildcard(&self, match_kind: &str, backend: TestBackend) -> bool {
        !(match_kind == "range" && backend == TestBackend::Stf)
    }

    fn supports_default_override(&self, backend: TestBackend) -> bool {
        matches!(backend, TestBackend::Ptf | TestBackend::Protobuf)
    }

    /// v1model parsers never drop: the packet reaches ingress with
    /// `parser_error` set.
    fn parser_exception_handler(&self, kind: ExceptionKind) -> Option<Vec<Command>> {
        let error = match kind {
            ExceptionKind::Reject => return Some(Vec::new()),
            ExceptionKind::NoMatch => "NoMatch",
            ExceptionKind::PacketTooShort => "PacketTooShort",
            ExceptionKind::StackOutOfBounds => "StackOutOfBounds",
            _ => return None,
        };
        Some(vec![Command::PropertyUpdate {
            key: PARSER_ERROR.to_string(),
            value: PropertyValue::Str(error.to_string()),
        }])
    }
}

fn range_match(
    table: &mut TableStepper<'_>,
    key: &KeyProperties,
    matches: &mut Vec<(String, TableMatch)>,
) -> Result<Option<ExprRef>, StepError> {
    let width = key
        .ty
        .width_bits()
        .ok_or_else(|| bug!("range key {} has no width", key.name))?;
    if key.is_tainted {
        if table.setting().backend == TestBackend::Stf {
            return Err(bug!(
                "tainted range key {} of table {} reached synthesis on STF",
                key.name,
                table.table.name
            ));
        }
        matches.push((
            key.name.clone(),
            TableMatch::Range {
                key: Rc::clone(&key.key),
                low: mk_constant(&key.ty, BigInt::zero()),
                high: mk_constant(&key.ty, all_ones(width)),
            },
        ));
        return Ok(None);
    }
    if table.setting().backend == TestBackend::Stf {
        warn!(
            "STF tests cannot express ranges; key {} of table {} is matched exactly",
            key.name, table.table.name
        );
        return Ok(Some(table.exact_match(key, matches)));
    }
    let low = table.fresh_variable(key.ty.clone(), &format!("range_lo_{}", key.name));
    let high = table.fresh_variable(key.ty.clone(), &format!("range_hi_{}", key.name));
    let cond = mk_land(
        mk_leq(Rc::clone(&low), Rc::clone(&high)),
        mk_land(
            mk_leq(Rc::clone(&low), Rc::clone(&key.key)),
            mk_leq(Rc::clone(&key.key), Rc::clone(&high)),
        ),
    );
    matches.push((
        key.name.clone(),
        TableMatch::Range {
            key: Rc::clone(&key.key),
            low,
            high,
        },
    ));
    Ok(Some(cond))
}

/// Optional keys are either pinned to one value or fully wildcarded.
fn optional_match(
    table: &mut TableStepper<'_>,
    key: &KeyProperties,
    matches: &mut Vec<(String, TableMatch)>,
) -> Result<Option<ExprRef>, StepError> {
    let width = key
        .ty
        .width_bits()
        .ok_or_else(|| bug!("optional key {} has no width", key.name))?;
    let value = table.fresh_variable(key.ty.clone(), &format!("key_{}", key.name));
    if key.is_tainted {
        matches.push((
            key.name.clone(),
            TableMatch::Optional {
                key: Rc::clone(&key.key),
                value,
                mask: mk_constant(&key.ty, BigInt::zero()),
            },
        ));
        return Ok(None);
    }
    let mask = table.fresh_variable(key.ty.clone(), &format!("mask_{}", key.name));
    let zero = mk_constant(&key.ty, BigInt::zero());
    let ones = mk_constant(&key.ty, all_ones(width));
    let mut cond = mk_land(
        mk_lor(mk_eq(Rc::clone(&mask), zero), mk_eq(Rc::clone(&mask), ones)),
        mk_eq(
            mk_band(Rc::clone(&key.key), Rc::clone(&mask)),
            mk_band(Rc::clone(&value), Rc::clone(&mask)),
        ),
    );
    // P4Runtime rejects values with bits outside the mask.
    if matches!(table.setting().backend, TestBackend::Ptf | TestBackend::Protobuf) {
        cond = mk_land(
            cond,
            mk_eq(mk_band(Rc::clone(&value), Rc::clone(&mask)), Rc::clone(&value)),
        );
    }
    matches.push((
        key.name.clone(),
        TableMatch::Optional {
            key: Rc::clone(&key.key),
            value,
            mask,
        },
    ));
    Ok(Some(cond))
}

/// Variable written by an `out` or `inout` extern argument.
fn out_variable(stepper: &Stepper<'_>, expr: &ExprRef) -> Result<StateVariable, StepError> {
    match resolve_reference(stepper, expr)? {
        Some((var, _)) => Ok(var),
        None => Err(unimplemented_step!(
            "extern output {} indexes past the end of its stack",
            expr
        )),
    }
}

/// Name of a `HashAlgorithm` or `CloneType` member.
fn enum_member_name(expr: &ExprRef) -> String {
    match expr.as_ref() {
        Expr::Constant {
            ty: Type::Enum { members, .. },
            value,
        } => value
            .to_usize()
            .and_then(|i| members.get(i).cloned())
            .unwrap_or_else(|| expr.to_string()),
        Expr::Member { member, .. } => member.clone(),
        Expr::Path { name, .. } => name.rsplit('.').next().unwrap_or(name).to_string(),
        _ => expr.to_string(),
    }
}

/// The fields a hash or checksum is computed over.
fn data_fields(expr: &ExprRef) -> Vec<ExprRef> {
    match expr.as_ref() {
        Expr::List { components } => components.clone(),
        Expr::Struct { fields, .. } => fields
            .iter()
            .filter(|f| f.name != VALID_FIELD)
            .map(|f| Rc::clone(&f.expr))
            .collect(),
        _ => vec![Rc::clone(expr)],
    }
}

fn concolic_digest(next: &mut ExecutionState, algorithm: &str, data: &ExprRef, ty: &Type) -> ExprRef {
    Rc::new(Expr::Concolic {
        method: algorithm.to_string(),
        args: data_fields(data),
        id: next.next_concolic_id(),
        ty: ty.clone(),
    })
}

fn constant_u64(expr: &ExprRef, what: &str) -> Result<u64, StepError> {
    expr.as_bigint()
        .and_then(|v| v.to_u64())
        .ok_or_else(|| unimplemented_step!("{} with the non-constant value {}", what, expr))
}

fn no_effect(stepper: &mut Stepper<'_>, call: &ExternCall) -> Result<(), StepError> {
    let next = stepper.state.clone();
    finish(stepper, call, next, None);
    Ok(())
}

fn register_object(
    stepper: &Stepper<'_>,
    state: &ExecutionState,
    name: &str,
    ty: &Type,
) -> Result<RegisterValue, StepError> {
    match state.get_test_object(REGISTER_VALUES, name, false)? {
        Some(obj) => obj
            .as_register_value()
            .cloned()
            .ok_or_else(|| bug!("{} is not a register", name)),
        None => Ok(RegisterValue::new(stepper.ctx.uninitialized(ty, false))),
    }
}

/// `read(out T result, in bit<32> index)`. A read before any write sees the
/// register's initial value, which is recorded so that later accesses on
/// the path observe the same contents.
fn register_read(stepper: &mut Stepper<'_>, call: &ExternCall) -> Result<(), StepError> {
    let result = out_variable(stepper, call.arg(0)?)?;
    let index = Rc::clone(call.arg(1)?);
    let name = call.instance_name();
    let ty = stepper.program().resolve_type(&result.ty);

    let mut next = stepper.state.clone();
    let register = register_object(stepper, &next, &name, &ty)?;
    let value = if has_taint(&index) {
        stepper.ctx.uninitialized(&ty, true)
    } else {
        match register.current_value(&index) {
            Some(value) => value,
            None => {
                debug!("{}[{}] may alias an earlier write; the read is tainted", name, index);
                Expr::taint(ty.clone())
            }
        }
    };
    next.add_test_object(REGISTER_VALUES, &name, TestObject::RegisterValue(register));
    stepper.write_variable(&mut next, &result, Rc::clone(&value))?;
    next.add_trace_event(
        TraceKind::Extern,
        format!("{}.read({}) = {}", name, index, value),
        None,
    );
    finish(stepper, call, next, None);
    Ok(())
}

/// `write(in bit<32> index, in T value)`.
fn register_write(stepper: &mut Stepper<'_>, call: &ExternCall) -> Result<(), StepError> {
    let index = Rc::clone(call.arg(0)?);
    let value = Rc::clone(call.arg(1)?);
    let name = call.instance_name();
    let ty = stepper.program().resolve_type(&value.ty());

    let mut next = stepper.state.clone();
    let mut register = register_object(stepper, &next, &name, &ty)?;
    register.writes.push(RegisterWrite {
        index: Rc::clone(&index),
        value: Rc::clone(&value),
    });
    next.add_test_object(REGISTER_VALUES, &name, TestObject::RegisterValue(register));
    next.add_trace_event(
        TraceKind::Extern,
        format!("{}.write({}, {})", name, index, value),
        None,
    );
    finish(stepper, call, next, None);
    Ok(())
}

/// Meter colours can only be preset by PTF tests. Other back ends see the
/// green colour.
fn meter_result(
    stepper: &mut Stepper<'_>,
    call: &ExternCall,
    index: ExprRef,
    result: &ExprRef,
    is_direct: bool,
) -> Result<(), StepError> {
    let result = out_variable(stepper, result)?;
    let ty = stepper.program().resolve_type(&result.ty);
    let name = call.instance_name();
    let backend = stepper.setting().backend;

    let mut next = stepper.state.clone();
    let value = if backend == TestBackend::Ptf {
        let value = next.create_symbolic_variable(ty.clone(), &format!("{}_color", name));
        let mut meter = match next.get_test_object(METER_VALUES, &name, false)? {
            Some(obj) => match obj.as_ref() {
                TestObject::MeterValue(m) => m.clone(),
                _ => return Err(bug!("{} is not a meter", name)),
            },
            None => MeterValue {
                is_direct,
                results: Vec::new(),
            },
        };
        meter.results.push(RegisterWrite {
            index,
            value: Rc::clone(&value),
        });
        next.add_test_object(METER_VALUES, &name, TestObject::MeterValue(meter));
        value
    } else {
        warn!(
            "Meter {} is not modelled for {} tests; its result is 0",
            name, backend
        );
        zero_value(&ty)
    };
    stepper.write_variable(&mut next, &result, value)?;
    finish(stepper, call, next, None);
    Ok(())
}

/// `execute_meter(in bit<32> index, out T result)`.
fn meter_execute(stepper: &mut Stepper<'_>, call: &ExternCall) -> Result<(), StepError> {
    let index = Rc::clone(call.arg(0)?);
    let result = Rc::clone(call.arg(1)?);
    meter_result(stepper, call, index, &result, false)
}

/// `read(out T result)` of a direct meter.
fn direct_meter_read(stepper: &mut Stepper<'_>, call: &ExternCall) -> Result<(), StepError> {
    let result = Rc::clone(call.arg(0)?);
    meter_result(stepper, call, Expr::bits(32, 0), &result, true)
}

/// `hash(out O result, in HashAlgorithm algo, in T base, in D data, in M max)`
/// computes `base + digest(data) % max`, with the digest left to the
/// concolic evaluation once the data is known.
fn hash(stepper: &mut Stepper<'_>, call: &ExternCall) -> Result<(), StepError> {
    let result = out_variable(stepper, call.arg(0)?)?;
    let ty = stepper.program().resolve_type(&result.ty);
    let algorithm = enum_member_name(call.arg(1)?);
    let base = Rc::clone(call.arg(2)?);
    let data = Rc::clone(call.arg(3)?);
    let max = Rc::clone(call.arg(4)?);

    let mut next = stepper.state.clone();
    let value = if !concolic::is_supported(&algorithm) {
        warn!("Hash algorithm {} is not supported; the result is tainted", algorithm);
        Expr::taint(ty.clone())
    } else if has_taint(&data) || has_taint(&base) || has_taint(&max) {
        Expr::taint(ty.clone())
    } else {
        let digest = concolic_digest(&mut next, &algorithm, &data, &ty);
        let digest = match max.as_bigint() {
            Some(m) if m.is_zero() => digest,
            _ => mk_binary(BinOp::Mod, digest, mk_cast(&ty, max)),
        };
        mk_binary(BinOp::Add, mk_cast(&ty, base), digest)
    };
    stepper.write_variable(&mut next, &result, Rc::clone(&value))?;
    next.add_trace_event(TraceKind::Extern, format!("hash {} = {}", algorithm, value), None);
    finish(stepper, call, next, None);
    Ok(())
}

/// `verify_checksum(in bool cond, in T data, in O checksum, HashAlgorithm algo)`
/// sets `checksum_error` on the paths where the checksum does not match.
fn verify_checksum(stepper: &mut Stepper<'_>, call: &ExternCall) -> Result<(), StepError> {
    let cond = Rc::clone(call.arg(0)?);
    let data = Rc::clone(call.arg(1)?);
    let checksum = Rc::clone(call.arg(2)?);
    let algorithm = enum_member_name(call.arg(3)?);
    if !concolic::is_supported(&algorithm) {
        return Err(unimplemented_step!("checksum algorithm {}", algorithm));
    }
    let error = StateVariable::new(
        &format!("{}.checksum_error", STANDARD_METADATA),
        Type::bits(1),
    );

    let mut base = stepper.state.clone();
    if has_taint(&cond) || has_taint(&data) || has_taint(&checksum) {
        base.set(&error, Expr::taint(Type::bits(1)));
        finish(stepper, call, base, None);
        return Ok(());
    }
    let ty = stepper.program().resolve_type(&checksum.ty());
    let computed = concolic_digest(&mut base, &algorithm, &data, &ty);
    let mismatch = mk_land(cond, mk_lnot(mk_eq(checksum, computed)));

    let mut chain = GuardChain::new();
    if let Some(guard) = chain.exclusive(Some(mismatch)) {
        let mut next = base.clone();
        next.set(&error, Expr::bits(1, 1));
        next.add_trace_event(TraceKind::Extern, "checksum mismatch".to_string(), None);
        stepper.finish_call(&mut next, call.context, None);
        stepper.push(guard, next);
    }
    if let Some(guard) = chain.exclusive(None) {
        let mut next = base;
        stepper.finish_call(&mut next, call.context, None);
        stepper.push(guard, next);
    }
    Ok(())
}

/// `update_checksum(in bool cond, in T data, inout O checksum, HashAlgorithm algo)`.
fn update_checksum(stepper: &mut Stepper<'_>, call: &ExternCall) -> Result<(), StepError> {
    let cond = Rc::clone(call.arg(0)?);
    let data = Rc::clone(call.arg(1)?);
    let checksum = out_variable(stepper, call.arg(2)?)?;
    let algorithm = enum_member_name(call.arg(3)?);
    if !concolic::is_supported(&algorithm) {
        return Err(unimplemented_step!("checksum algorithm {}", algorithm));
    }
    let ty = stepper.program().resolve_type(&checksum.ty);

    let mut base = stepper.state.clone();
    if has_taint(&cond) || has_taint(&data) {
        stepper.write_variable(&mut base, &checksum, Expr::taint(ty))?;
        finish(stepper, call, base, None);
        return Ok(());
    }
    let computed = concolic_digest(&mut base, &algorithm, &data, &ty);
    let mut chain = GuardChain::new();
    if let Some(guard) = chain.exclusive(Some(cond)) {
        let mut next = base.clone();
        stepper.write_variable(&mut next, &checksum, computed)?;
        stepper.finish_call(&mut next, call.context, None);
        stepper.push(guard, next);
    }
    if let Some(guard) = chain.exclusive(None) {
        let mut next = base;
        stepper.finish_call(&mut next, call.context, None);
        stepper.push(guard, next);
    }
    Ok(())
}

/// `random(out T result, in T lo, in T hi)`. The value cannot be predicted
/// by a test, so it is taint unless the range has one element.
fn random(stepper: &mut Stepper<'_>, call: &ExternCall) -> Result<(), StepError> {
    let result = out_variable(stepper, call.arg(0)?)?;
    let ty = stepper.program().resolve_type(&result.ty);
    let (lo, hi) = (call.arg(1)?, call.arg(2)?);
    let value = match (lo.as_bigint(), hi.as_bigint()) {
        (Some(l), Some(h)) if l == h => mk_constant(&ty, l.clone()),
        _ => stepper.ctx.uninitialized(&ty, true),
    };
    let mut next = stepper.state.clone();
    stepper.write_variable(&mut next, &result, value)?;
    finish(stepper, call, next, None);
    Ok(())
}

/// `mark_to_drop(inout standard_metadata_t smeta)`.
fn mark_to_drop(stepper: &mut Stepper<'_>, call: &ExternCall) -> Result<(), StepError> {
    let metadata = out_variable(stepper, call.arg(0)?)?;
    let mut next = stepper.state.clone();
    stepper.write_variable(
        &mut next,
        &metadata.field("egress_spec", Type::bits(9)),
        Expr::bits(9, DROP_PORT),
    )?;
    stepper.write_variable(&mut next, &metadata.field("mcast_grp", Type::bits(16)), Expr::bits(16, 0))?;
    next.add_trace_event(TraceKind::Extern, "mark_to_drop".to_string(), None);
    finish(stepper, call, next, None);
    Ok(())
}

fn record_clone(
    stepper: &mut Stepper<'_>,
    call: &ExternCall,
    preserve_field_list: Option<u64>,
) -> Result<(), StepError> {
    let clone_type = enum_member_name(call.arg(0)?);
    let session_id = Rc::clone(call.arg(1)?);
    let mut next = stepper.state.clone();
    next.add_test_object(
        CLONE_INFOS,
        &clone_type,
        TestObject::CloneInfo(CloneInfo {
            session_id: Rc::clone(&session_id),
            clone_type: clone_type.clone(),
            preserve_field_list,
        }),
    );
    next.set_property(CLONE_ACTIVE, PropertyValue::Bool(true));
    next.add_trace_event(
        TraceKind::Extern,
        format!("clone {} to session {}", clone_type, session_id),
        None,
    );
    finish(stepper, call, next, None);
    Ok(())
}

/// `clone(in CloneType type, in bit<32> session)`.
fn clone(stepper: &mut Stepper<'_>, call: &ExternCall) -> Result<(), StepError> {
    record_clone(stepper, call, None)
}

/// `clone_preserving_field_list(in CloneType type, in bit<32> session, bit<8> index)`.
fn clone_preserving_field_list(stepper: &mut Stepper<'_>, call: &ExternCall) -> Result<(), StepError> {
    let index = constant_u64(call.arg(2)?, "clone field list")?;
    record_clone(stepper, call, Some(index))
}

fn bump_counter(stepper: &mut Stepper<'_>, call: &ExternCall, property: &str) -> Result<(), StepError> {
    let field_list = constant_u64(call.arg(0)?, call.method.as_str())?;
    let mut next = stepper.state.clone();
    let count = next.get_property_uint(property) + 1;
    next.set_property(property, PropertyValue::UInt(count));
    next.add_trace_event(
        TraceKind::Extern,
        format!("{} with field list {}", call.method, field_list),
        None,
    );
    finish(stepper, call, next, None);
    Ok(())
}

/// `resubmit_preserving_field_list(bit<8> index)`.
fn resubmit_preserving_field_list(stepper: &mut Stepper<'_>, call: &ExternCall) -> Result<(), StepError> {
    bump_counter(stepper, call, RESUBMIT_COUNT)
}

/// `recirculate_preserving_field_list(bit<8> index)`.
fn recirculate_preserving_field_list(
    stepper: &mut Stepper<'_>,
    call: &ExternCall,
) -> Result<(), StepError> {
    bump_counter(stepper, call, RECIRCULATE_COUNT)
}

/// `truncate(in bit<32> length)`, with the length in bytes.
fn truncate(stepper: &mut Stepper<'_>, call: &ExternCall) -> Result<(), StepError> {
    let length = constant_u64(call.arg(0)?, "truncate")?;
    let mut next = stepper.state.clone();
    next.set_property(TRUNCATE_LENGTH, PropertyValue::UInt(length));
    finish(stepper, call, next, None);
    Ok(())
}

/// `assert(in bool check)` aborts the packet when the check fails.
fn assert(stepper: &mut Stepper<'_>, call: &ExternCall) -> Result<(), StepError> {
    let check = Rc::clone(call.arg(0)?);
    if has_taint(&check) {
        warn!("assert on the tainted condition {} is ignored", check);
        return no_effect(stepper, call);
    }
    let mut chain = GuardChain::new();
    if let Some(guard) = chain.exclusive(Some(Rc::clone(&check))) {
        let mut next = stepper.state.clone();
        stepper.finish_call(&mut next, call.context, None);
        stepper.push(guard, next);
    }
    if let Some(guard) = chain.exclusive(None) {
        let mut next = stepper.state.clone();
        next.add_trace_event(TraceKind::Extern, format!("assertion {} failed", check), None);
        next.replace_top_body(vec![Command::Exception(ExceptionKind::Abort)]);
        stepper.push(guard, next);
    }
    Ok(())
}

/// `assume(in bool check)` restricts the path to packets satisfying it.
fn assume(stepper: &mut Stepper<'_>, call: &ExternCall) -> Result<(), StepError> {
    let check = Rc::clone(call.arg(0)?);
    if has_taint(&check) {
        warn!("assume on the tainted condition {} is ignored", check);
        return no_effect(stepper, call);
    }
    let mut next = stepper.state.clone();
    stepper.finish_call(&mut next, call.context, None);
    stepper.push(Some(check), next);
    Ok(())
}

fn log_msg(stepper: &mut Stepper<'_>, call: &ExternCall) -> Result<(), StepError> {
    let message = call.arg(0)?.to_string();
    let mut next = stepper.state.clone();
    next.add_trace_event(TraceKind::Extern, format!("log_msg: {}", message), None);
    finish(stepper, call, next, None);
    Ok(())
}

/// `digest(in bit<32> receiver, in T data)`. Digests go to the control
/// plane and do not change the packet.
fn digest(stepper: &mut Stepper<'_>, call: &ExternCall) -> Result<(), StepError> {
    let receiver = call.arg(0)?.to_string();
    let mut next = stepper.state.clone();
    next.add_trace_event(TraceKind::Extern, format!("digest to {}", receiver), None);
    finish(stepper, call, next, None);
    Ok(())
}
