use std::rc::Rc;

use log::debug;
use num_traits::ToPrimitive;
use rustc_hash::FxHashMap;

use crate::executor::branch::GuardChain;
use crate::executor::cmd_stepper::{index_out_of_bounds, unreduced_index};
use crate::executor::continuation::{Command, ExceptionKind, PropertyValue};
use crate::executor::error::StepError;
use crate::executor::execution_state::{flatten_variable, ExecutionState, TraceKind};
use crate::executor::small_step::{CallContext, Stepper};
use crate::executor::symbolic_value::has_taint;
use crate::ir::expression::{Argument, Direction, Expr, ExprRef, StateVariable, VALID_FIELD};
use crate::ir::program::ExternInstance;
use crate::ir::statement::{Meta, Statement};
use crate::ir::types::Type;
use crate::{bug, unimplemented_step};

/// Property holding the parser error raised by `verify` or by a parser
/// exception handler.
pub const PARSER_ERROR: &str = "parser_error";

/// A resolved extern call, handed to the registered implementation.
#[derive(Clone, Debug)]
pub struct ExternCall {
    pub call: ExprRef,
    /// The receiver expression, `None` for free functions.
    pub receiver: Option<ExprRef>,
    /// The declared instance, when the receiver names one.
    pub instance: Option<ExternInstance>,
    /// Extern type name, or `*method` for built-ins and free functions.
    pub type_name: String,
    pub method: String,
    /// Arguments; `in` arguments are already values, `out` and `inout`
    /// arguments are still references.
    pub args: Vec<Argument>,
    pub ty: Type,
    pub context: CallContext,
}

impl ExternCall {
    pub fn arg(&self, index: usize) -> Result<&ExprRef, StepError> {
        self.args
            .get(index)
            .map(|a| &a.expr)
            .ok_or_else(|| bug!("{}.{} has no argument {}", self.type_name, self.method, index))
    }

    pub fn receiver(&self) -> Result<&ExprRef, StepError> {
        self.receiver
            .as_ref()
            .ok_or_else(|| bug!("{} needs a receiver", self.method))
    }

    /// Name of the extern instance, used to key test objects.
    pub fn instance_name(&self) -> String {
        match (&self.instance, &self.receiver) {
            (Some(inst), _) => inst.name.clone(),
            (None, Some(r)) => r.to_string(),
            (None, None) => self.method.clone(),
        }
    }
}

pub type ExternMethodImpl = fn(&mut Stepper<'_>, &ExternCall) -> Result<(), StepError>;

/// Registry of extern implementations keyed by `<type>.<method>`, with
/// `*method.<method>` as the fallback for any receiver.
pub struct ExternMethodImpls {
    impls: FxHashMap<String, ExternMethodImpl>,
}

impl ExternMethodImpls {
    pub fn new(impls: &[(&str, ExternMethodImpl)]) -> Self {
        ExternMethodImpls {
            impls: impls
                .iter()
                .map(|(name, f)| (name.to_string(), *f))
                .collect(),
        }
    }

    pub fn find(&self, type_name: &str, method: &str) -> Option<ExternMethodImpl> {
        self.impls
            .get(&format!("{}.{}", type_name, method))
            .or_else(|| self.impls.get(&format!("*method.{}", method)))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.impls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.impls.is_empty()
    }
}

lazy_static::lazy_static! {
    /// Architecture-independent externs, consulted after the target's own.
    pub static ref CORE_EXTERN_IMPLS: ExternMethodImpls = ExternMethodImpls::new(&[
        ("*method.isValid", is_valid as ExternMethodImpl),
        ("*method.setValid", set_valid as ExternMethodImpl),
        ("*method.setInvalid", set_invalid as ExternMethodImpl),
        ("*method.verify", verify as ExternMethodImpl),
        ("packet_in.extract", extract as ExternMethodImpl),
        ("packet_in.advance", advance as ExternMethodImpl),
        ("packet_in.lookahead", lookahead as ExternMethodImpl),
        ("packet_out.emit", emit as ExternMethodImpl),
    ]);
}

/// Resolves a reference argument to its canonical variable, rewriting
/// header stack `.next`/`.last`.
///
/// # Returns
///
/// The variable and the stacks accessed through `.next`, or `None` when the
/// reference indexes past the end of a stack.
pub fn resolve_reference(
    stepper: &Stepper<'_>,
    expr: &ExprRef,
) -> Result<Option<(StateVariable, Vec<StateVariable>)>, StepError> {
    let (lowered, advanced) = stepper.lower_stack_members(stepper.state, expr)?;
    if let Some(index) = unreduced_index(&lowered) {
        return Err(unimplemented_step!(
            "extern argument {} with the non-constant index {}",
            expr,
            index
        ));
    }
    if index_out_of_bounds(&lowered) {
        return Ok(None);
    }
    let var = lowered
        .state_variable()
        .ok_or_else(|| bug!("{} is not a reference", expr))?;
    Ok(Some((var, advanced)))
}

/// Replaces the call with an exception.
pub fn raise(stepper: &mut Stepper<'_>, kind: ExceptionKind) {
    let mut next = stepper.state.clone();
    next.replace_top_body(vec![Command::Exception(kind)]);
    stepper.push_unconditional(next);
}

/// Completes the call in `next` and adds it as the only successor.
pub fn finish(stepper: &mut Stepper<'_>, call: &ExternCall, mut next: ExecutionState, value: Option<ExprRef>) {
    stepper.finish_call(&mut next, call.context, value);
    stepper.push_unconditional(next);
}

fn is_valid(stepper: &mut Stepper<'_>, call: &ExternCall) -> Result<(), StepError> {
    let header = match resolve_reference(stepper, call.receiver()?)? {
        Some((var, _)) => var,
        None => {
            raise(stepper, ExceptionKind::StackOutOfBounds);
            return Ok(());
        }
    };
    let valid = stepper.state.get(&header.validity());
    let next = stepper.state.clone();
    finish(stepper, call, next, Some(valid));
    Ok(())
}

fn set_validity(stepper: &mut Stepper<'_>, call: &ExternCall, valid: bool) -> Result<(), StepError> {
    let header = match resolve_reference(stepper, call.receiver()?)? {
        Some((var, _)) => var,
        None => {
            raise(stepper, ExceptionKind::StackOutOfBounds);
            return Ok(());
        }
    };
    let mut next = stepper.state.clone();
    next.set(&header.validity(), Expr::boolean(valid));
    finish(stepper, call, next, None);
    Ok(())
}

fn set_valid(stepper: &mut Stepper<'_>, call: &ExternCall) -> Result<(), StepError> {
    set_validity(stepper, call, true)
}

fn set_invalid(stepper: &mut Stepper<'_>, call: &ExternCall) -> Result<(), StepError> {
    set_validity(stepper, call, false)
}

/// `verify(cond, err)` rejects the packet with `err` when `cond` is false.
fn verify(stepper: &mut Stepper<'_>, call: &ExternCall) -> Result<(), StepError> {
    let cond = Rc::clone(call.arg(0)?);
    if has_taint(&cond) {
        return Err(unimplemented_step!("verify on the tainted condition {}", cond));
    }
    let error = call.arg(1).map(|e| e.to_string()).unwrap_or_default();
    let mut chain = GuardChain::new();
    if let Some(guard) = chain.exclusive(Some(Rc::clone(&cond))) {
        let mut next = stepper.state.clone();
        stepper.finish_call(&mut next, call.context, None);
        stepper.push(guard, next);
    }
    if let Some(guard) = chain.exclusive(None) {
        let mut next = stepper.state.clone();
        next.set_property(PARSER_ERROR, PropertyValue::Str(error.clone()));
        next.add_trace_event(TraceKind::Parser, format!("verify failed: {}", error), None);
        next.replace_top_body(vec![Command::Exception(ExceptionKind::Reject)]);
        stepper.push(guard, next);
    }
    Ok(())
}

/// Consumes the bits of a header from the input packet. Every field gets a
/// fresh variable that is also appended to the input packet.
fn extract(stepper: &mut Stepper<'_>, call: &ExternCall) -> Result<(), StepError> {
    if call.args.len() > 1 {
        return Err(unimplemented_step!("variable-length extract {}", call.call));
    }
    let (header, advanced) = match resolve_reference(stepper, call.arg(0)?)? {
        Some(resolved) => resolved,
        None => {
            raise(stepper, ExceptionKind::StackOutOfBounds);
            return Ok(());
        }
    };
    let ty = stepper.program().resolve_type(&header.ty);
    if !ty.is_header() {
        return Err(unimplemented_step!("extract into {} of type {}", header, ty));
    }
    let width = ty
        .width_bits()
        .ok_or_else(|| bug!("header {} has no fixed width", header))?;
    if stepper.state.input_packet_bits() + width as u64 > stepper.setting().max_packet_size {
        raise(stepper, ExceptionKind::PacketTooShort);
        return Ok(());
    }
    let mut next = stepper.state.clone();
    for leaf in flatten_variable(stepper.program(), &header) {
        if leaf.name.ends_with(VALID_FIELD) {
            continue;
        }
        let value = next.create_symbolic_variable(leaf.ty.clone(), &format!("pkt_{}", leaf.name));
        let bits = leaf.ty.width_bits().unwrap_or(0);
        next.append_to_input_packet(&leaf.name, Rc::clone(&value), bits);
        next.set(&leaf, value);
    }
    next.set(&header.validity(), Expr::boolean(true));
    for stack in advanced {
        let index = stack.field("nextIndex", Type::bits(32));
        let current = next.get(&index).as_bigint().and_then(|v| v.to_u64()).unwrap_or(0);
        next.set(&index, Expr::bits(32, current + 1));
    }
    next.add_trace_event(TraceKind::Packet, format!("extract {} ({} bits)", header, width), None);
    debug!("extract {}: input packet now {} bits", header, next.input_packet_bits());
    finish(stepper, call, next, None);
    Ok(())
}

/// Skips a constant number of input bits.
fn advance(stepper: &mut Stepper<'_>, call: &ExternCall) -> Result<(), StepError> {
    let amount = call.arg(0)?;
    let bits = amount
        .as_bigint()
        .and_then(|v| v.to_u32())
        .ok_or_else(|| unimplemented_step!("advance by the non-constant amount {}", amount))?;
    if stepper.state.input_packet_bits() + bits as u64 > stepper.setting().max_packet_size {
        raise(stepper, ExceptionKind::PacketTooShort);
        return Ok(());
    }
    let mut next = stepper.state.clone();
    if bits > 0 {
        let padding = next.create_symbolic_variable(Type::bits(bits), "pkt_padding");
        next.append_to_input_packet("padding", padding, bits);
    }
    next.add_trace_event(TraceKind::Packet, format!("advance {} bits", bits), None);
    finish(stepper, call, next, None);
    Ok(())
}

fn lookahead(_stepper: &mut Stepper<'_>, call: &ExternCall) -> Result<(), StepError> {
    Err(unimplemented_step!("packet lookahead {}", call.call))
}

fn emit_statement(method: &ExprRef, value: ExprRef) -> Command {
    Command::Statement(Rc::new(Statement::MethodCall {
        meta: Meta::default(),
        call: Expr::method_call(
            Rc::clone(method),
            vec![Argument {
                direction: Direction::In,
                expr: value,
            }],
            Type::Void,
        ),
    }))
}

/// Appends a valid header to the output packet. A struct is emitted field
/// by field.
fn emit(stepper: &mut Stepper<'_>, call: &ExternCall) -> Result<(), StepError> {
    let value = Rc::clone(call.arg(0)?);
    let (fields, ty) = match value.as_ref() {
        Expr::Struct { fields, ty } => (fields, stepper.program().resolve_type(ty)),
        _ => return Err(bug!("emit of the non-aggregate {}", value)),
    };
    let method = match call.call.as_ref() {
        Expr::MethodCall { method, .. } => Rc::clone(method),
        _ => return Err(bug!("{} is not a method call", call.call)),
    };
    if !ty.is_header() {
        let commands = fields
            .iter()
            .map(|f| emit_statement(&method, Rc::clone(&f.expr)))
            .collect();
        let mut next = stepper.state.clone();
        next.replace_top_body(commands);
        stepper.push_unconditional(next);
        return Ok(());
    }
    let valid = fields
        .iter()
        .find(|f| f.name == VALID_FIELD)
        .map(|f| Rc::clone(&f.expr))
        .ok_or_else(|| bug!("header value {} carries no validity", value))?;
    if has_taint(&valid) {
        return Err(unimplemented_step!("emit of a header with tainted validity"));
    }
    let header_name = ty.type_name().unwrap_or("header").to_string();
    let mut chain = GuardChain::new();
    if let Some(guard) = chain.exclusive(Some(Rc::clone(&valid))) {
        let mut next = stepper.state.clone();
        for f in fields.iter().filter(|f| f.name != VALID_FIELD) {
            next.append_to_output_packet(&format!("{}.{}", header_name, f.name), Rc::clone(&f.expr));
        }
        next.add_trace_event(TraceKind::Packet, format!("emit {}", header_name), None);
        stepper.finish_call(&mut next, call.context, None);
        stepper.push(guard, next);
    }
    if let Some(guard) = chain.exclusive(None) {
        let mut next = stepper.state.clone();
        stepper.finish_call(&mut next, call.context, None);
        stepper.push(guard, next);
    }
    Ok(())
}
