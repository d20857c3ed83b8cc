use std::rc::Rc;

use num_bigint_dig::BigInt;
use num_traits::ToPrimitive;

use crate::executor::branch::GuardChain;
use crate::executor::continuation::{Body, Command, ExceptionKind, Frame};
use crate::executor::error::StepError;
use crate::executor::execution_state::{flatten_variable, ExecutionState, TraceKind};
use crate::executor::expr_stepper::has_stack_member;
use crate::executor::small_step::{CallContext, Stepper};
use crate::executor::symbolic_value::{
    has_taint, mk_band, mk_binary, mk_cast, mk_constant, mk_eq, simplify, transform,
};
use crate::executor::table_stepper::TableStepper;
use crate::executor::utils::all_ones;
use crate::ir::expression::{BinOp, Expr, ExprRef, StateVariable, VALID_FIELD};
use crate::ir::program::{BlockKind, PipelineBlock};
use crate::ir::statement::{Meta, Statement, StmtRef, SwitchCase, SwitchLabel};
use crate::ir::types::Type;
use crate::{bug, unimplemented_step};

/// First array index of a reference that is not a constant yet.
pub(crate) fn unreduced_index(expr: &ExprRef) -> Option<ExprRef> {
    match expr.as_ref() {
        Expr::ArrayIndex { array, index, .. } => {
            if index.as_bigint().is_none() {
                Some(Rc::clone(index))
            } else {
                unreduced_index(array)
            }
        }
        Expr::Member { expr, .. } | Expr::Slice { expr, .. } => unreduced_index(expr),
        _ => None,
    }
}

/// Whether a reference indexes a header stack past its end.
pub(crate) fn index_out_of_bounds(expr: &ExprRef) -> bool {
    match expr.as_ref() {
        Expr::ArrayIndex { array, index, .. } => {
            let out = match (array.ty(), index.as_bigint().and_then(|i| i.to_usize())) {
                (Type::Stack { size, .. }, Some(i)) => i >= size,
                _ => false,
            };
            out || index_out_of_bounds(array)
        }
        Expr::Member { expr, .. } | Expr::Slice { expr, .. } => index_out_of_bounds(expr),
        _ => false,
    }
}

/// Replaces every occurrence of `target` in `expr` with `value`.
pub(crate) fn replace_subexpr(expr: &ExprRef, target: &ExprRef, value: &ExprRef) -> ExprRef {
    transform(expr, &|e: &Expr| {
        if e == target.as_ref() {
            Some(Rc::clone(value))
        } else {
            None
        }
    })
}

fn constant_bound(e: &ExprRef) -> Result<u32, StepError> {
    e.as_bigint()
        .and_then(|v| v.to_u32())
        .ok_or_else(|| bug!("slice bound {} is not a constant", e))
}

impl<'a> Stepper<'a> {
    pub fn step_statement(&mut self, stmt: &StmtRef) -> Result<(), StepError> {
        match stmt.as_ref() {
            Statement::Assignment { meta, left, right } => self.step_assignment(*meta, left, right),
            Statement::MethodCall { meta, call } => match call.as_ref() {
                Expr::TableApply { table, keys } => self.step_table_apply(*meta, table, keys),
                Expr::MethodCall { .. } => self.step_method_call(call, CallContext::Statement(*meta)),
                _ => Err(bug!("{} is not a call", call)),
            },
            Statement::If {
                meta,
                cond,
                if_true,
                if_false,
            } => self.step_if(*meta, cond, if_true, if_false.as_ref()),
            Statement::Block { stmts, .. } => {
                let mut next = self.state.clone();
                next.replace_top_body(
                    stmts
                        .iter()
                        .map(|s| Command::Statement(Rc::clone(s)))
                        .collect(),
                );
                self.push_unconditional(next);
                Ok(())
            }
            Statement::Switch { meta, expr, cases } => self.step_switch(*meta, expr, cases),
            Statement::Return { meta, expr } => match expr {
                Some(e) if !e.is_symbolic() => {
                    let meta = *meta;
                    self.step_to_subexpr(e, move |v| {
                        Command::Statement(Rc::new(Statement::Return {
                            meta,
                            expr: Some(v),
                        }))
                    });
                    Ok(())
                }
                _ => {
                    let mut next = self.state.clone();
                    next.pop_continuation(expr.as_ref().map(simplify));
                    self.push_unconditional(next);
                    Ok(())
                }
            },
            Statement::Exit { .. } => {
                let mut next = self.state.clone();
                next.replace_top_body(vec![Command::Exception(ExceptionKind::Exit)]);
                self.push_unconditional(next);
                Ok(())
            }
            Statement::Empty { .. } => {
                let mut next = self.state.clone();
                next.pop_body();
                self.push_unconditional(next);
                Ok(())
            }
            Statement::Declaration {
                meta,
                name,
                ty,
                init,
            } => self.step_declaration(*meta, name, ty, init.as_ref()),
            Statement::Transition { meta, target } => self.step_transition(*meta, target),
        }
    }

    fn step_assignment(&mut self, meta: Meta, left: &ExprRef, right: &ExprRef) -> Result<(), StepError> {
        if has_stack_member(left) {
            let (lowered, _) = self.lower_stack_members(self.state, left)?;
            let mut next = self.state.clone();
            next.replace_top_body(vec![Command::Statement(Rc::new(Statement::Assignment {
                meta,
                left: lowered,
                right: Rc::clone(right),
            }))]);
            self.push_unconditional(next);
            return Ok(());
        }
        if let Some(index) = unreduced_index(left) {
            if index.is_symbolic() {
                return Err(unimplemented_step!(
                    "assignment to {} through the non-constant index {}",
                    left,
                    index
                ));
            }
            let (l, r, idx) = (Rc::clone(left), Rc::clone(right), Rc::clone(&index));
            self.step_to_subexpr(&index, move |v| {
                Command::Statement(Rc::new(Statement::Assignment {
                    meta,
                    left: replace_subexpr(&l, &idx, &v),
                    right: r,
                }))
            });
            return Ok(());
        }
        if !right.is_symbolic() {
            let l = Rc::clone(left);
            self.step_to_subexpr(right, move |v| {
                Command::Statement(Rc::new(Statement::Assignment { meta, left: l, right: v }))
            });
            return Ok(());
        }
        let mut next = self.state.clone();
        if index_out_of_bounds(left) {
            next.replace_top_body(vec![Command::Exception(ExceptionKind::StackOutOfBounds)]);
        } else {
            self.assign(&mut next, left, simplify(right))?;
            next.pop_body();
        }
        self.push_unconditional(next);
        Ok(())
    }

    /// Writes `value` through the l-value `left`. A slice l-value rewrites
    /// the whole variable under a mask.
    pub(crate) fn assign(
        &self,
        next: &mut ExecutionState,
        left: &ExprRef,
        value: ExprRef,
    ) -> Result<(), StepError> {
        if let Expr::Slice { expr: base, hi, lo, .. } = left.as_ref() {
            let (hi, lo) = (constant_bound(hi)?, constant_bound(lo)?);
            let var = base
                .state_variable()
                .ok_or_else(|| bug!("{} is not an l-value", base))?;
            let base_ty = self.program().resolve_type(&var.ty);
            let width = base_ty
                .width_bits()
                .ok_or_else(|| bug!("cannot slice {} of type {}", base, base_ty))?;
            if hi < lo || hi >= width {
                return Err(bug!("slice [{}:{}] of {} is out of range", hi, lo, left));
            }
            let mask_value = (all_ones(hi - lo + 1)) << lo as usize;
            let mask = mk_constant(&base_ty, mask_value.clone());
            let inverted = mk_constant(&base_ty, all_ones(width) ^ mask_value);
            let old = self.read_variable(next, &var);
            let shifted = mk_binary(
                BinOp::Shl,
                mk_cast(&base_ty, value),
                mk_constant(&base_ty, BigInt::from(lo)),
            );
            let updated = simplify(&mk_binary(
                BinOp::BOr,
                mk_band(old, inverted),
                mk_band(shifted, mask),
            ));
            return self.assign(next, base, updated);
        }
        let var = left
            .state_variable()
            .ok_or_else(|| bug!("{} is not an l-value", left))?;
        self.write_variable(next, &var, value)
    }

    fn step_if(
        &mut self,
        meta: Meta,
        cond: &ExprRef,
        if_true: &StmtRef,
        if_false: Option<&StmtRef>,
    ) -> Result<(), StepError> {
        if !cond.is_symbolic() {
            let (t, f) = (Rc::clone(if_true), if_false.cloned());
            self.step_to_subexpr(cond, move |v| {
                Command::Statement(Rc::new(Statement::If {
                    meta,
                    cond: v,
                    if_true: t,
                    if_false: f,
                }))
            });
            return Ok(());
        }
        let cond = simplify(cond);
        if has_taint(&cond) {
            return Err(unimplemented_step!("branching on the tainted condition {}", cond));
        }
        let mut chain = GuardChain::new();
        if let Some(guard) = chain.exclusive(Some(Rc::clone(&cond))) {
            let mut next = self.state.clone();
            next.replace_top_body(vec![Command::Statement(Rc::clone(if_true))]);
            self.push(guard, next);
        }
        if let Some(guard) = chain.exclusive(None) {
            let mut next = self.state.clone();
            match if_false {
                Some(f) => next.replace_top_body(vec![Command::Statement(Rc::clone(f))]),
                None => next.pop_body(),
            }
            self.push(guard, next);
        }
        Ok(())
    }

    /// Switch over a scalar or over `action_run`. A case without a body
    /// runs the body of the next case that has one.
    fn step_switch(&mut self, meta: Meta, expr: &ExprRef, cases: &[SwitchCase]) -> Result<(), StepError> {
        if !expr.is_symbolic() {
            let cases = cases.to_vec();
            self.step_to_subexpr(expr, move |v| {
                Command::Statement(Rc::new(Statement::Switch {
                    meta,
                    expr: v,
                    cases,
                }))
            });
            return Ok(());
        }
        let value = simplify(expr);
        if has_taint(&value) {
            return Err(unimplemented_step!("switch on the tainted value {}", value));
        }
        let mut chain = GuardChain::new();
        let mut has_default = false;
        for (i, case) in cases.iter().enumerate() {
            let cond = match &case.label {
                SwitchLabel::Default => {
                    has_default = true;
                    None
                }
                SwitchLabel::Action { name } => {
                    let ty = value.ty();
                    let index = match &ty {
                        Type::Enum { members, .. } => members
                            .iter()
                            .position(|m| m == name)
                            .ok_or_else(|| bug!("{} is not an action of {}", name, ty))?,
                        _ => return Err(bug!("switch on {} with an action label", ty)),
                    };
                    Some(mk_eq(Rc::clone(&value), mk_constant(&ty, BigInt::from(index))))
                }
                SwitchLabel::Value { value: label } => Some(mk_eq(Rc::clone(&value), Rc::clone(label))),
            };
            let body = cases[i..].iter().find_map(|c| c.body.clone());
            if let Some(guard) = chain.exclusive(cond) {
                let mut next = self.state.clone();
                match body {
                    Some(b) => next.replace_top_body(vec![Command::Statement(b)]),
                    None => next.pop_body(),
                }
                self.push(guard, next);
            }
            if has_default {
                break;
            }
        }
        if !has_default {
            if let Some(guard) = chain.remainder() {
                let mut next = self.state.clone();
                next.pop_body();
                self.push(guard, next);
            }
        }
        Ok(())
    }

    fn step_declaration(
        &mut self,
        meta: Meta,
        name: &str,
        ty: &Type,
        init: Option<&ExprRef>,
    ) -> Result<(), StepError> {
        if let Some(e) = init {
            if !e.is_symbolic() {
                let (name, ty) = (name.to_string(), ty.clone());
                self.step_to_subexpr(e, move |v| {
                    Command::Statement(Rc::new(Statement::Declaration {
                        meta,
                        name,
                        ty,
                        init: Some(v),
                    }))
                });
                return Ok(());
            }
        }
        let var = StateVariable::new(name, ty.clone());
        let mut next = self.state.clone();
        match init {
            Some(v) => self.write_variable(&mut next, &var, simplify(v))?,
            None => {
                for leaf in flatten_variable(self.program(), &var) {
                    let value = if leaf.name.ends_with(VALID_FIELD) {
                        Expr::boolean(false)
                    } else if leaf.name.ends_with(".nextIndex") {
                        Expr::bits(32, 0)
                    } else {
                        self.ctx.uninitialized(&leaf.ty, false)
                    };
                    next.set(&leaf, value);
                }
            }
        }
        next.pop_body();
        self.push_unconditional(next);
        Ok(())
    }

    fn step_transition(&mut self, meta: Meta, target: &ExprRef) -> Result<(), StepError> {
        if let Expr::Path { name, ty: Type::State } = target.as_ref() {
            let mut next = self.state.clone();
            next.replace_top_body(vec![Command::ParserState(name.clone())]);
            self.push_unconditional(next);
            return Ok(());
        }
        if target.is_symbolic() {
            return Err(bug!("transition to {}", target));
        }
        self.step_to_subexpr(target, move |v| {
            Command::Statement(Rc::new(Statement::Transition { meta, target: v }))
        });
        Ok(())
    }

    fn step_table_apply(&mut self, meta: Meta, table: &str, keys: &[ExprRef]) -> Result<(), StepError> {
        if let Some(i) = keys.iter().position(|k| !k.is_symbolic()) {
            let (table, keys_copy) = (table.to_string(), keys.to_vec());
            self.step_to_subexpr(&keys[i], move |v| {
                let mut keys = keys_copy;
                keys[i] = v;
                Command::Statement(Rc::new(Statement::MethodCall {
                    meta,
                    call: Rc::new(Expr::TableApply { table, keys }),
                }))
            });
            return Ok(());
        }
        let table = self
            .program()
            .find_table(&[], table)
            .ok_or_else(|| bug!("table {} does not exist", table))?;
        let keys = keys.iter().map(simplify).collect();
        let branches = TableStepper::new(self.ctx, self.state, table, keys)?.eval()?;
        for branch in branches {
            self.push_branch(branch);
        }
        Ok(())
    }

    pub(crate) fn step_return(&mut self, value: Option<&ExprRef>) -> Result<(), StepError> {
        match value {
            Some(v) if !v.is_symbolic() => {
                self.step_to_subexpr(v, |x| Command::Return(Some(x)));
            }
            _ => {
                let mut next = self.state.clone();
                next.pop_continuation(value.map(simplify));
                self.push_unconditional(next);
            }
        }
        Ok(())
    }

    pub(crate) fn step_exception(&mut self, kind: ExceptionKind) {
        let mut next = self.state.clone();
        next.add_trace_event(TraceKind::Exception, format!("{} raised", kind), None);
        next.handle_exception(kind);
        self.push_unconditional(next);
    }

    /// Runs a parser or a control of the pipeline, then resumes with the
    /// rest of the pipeline.
    pub(crate) fn step_invoke(&mut self, block: &PipelineBlock) -> Result<(), StepError> {
        let mut next = self.state.clone();
        let rest = next.body().tail();
        let mut frame = Frame::new(rest.clone(), None, next.namespaces_rc());
        let body = match block.kind {
            BlockKind::Parser => {
                self.program()
                    .find_parser(&block.name)
                    .ok_or_else(|| bug!("parser {} does not exist", block.name))?;
                for kind in [
                    ExceptionKind::Reject,
                    ExceptionKind::NoMatch,
                    ExceptionKind::PacketTooShort,
                    ExceptionKind::StackOutOfBounds,
                ] {
                    if let Some(commands) = self.ctx.target.parser_exception_handler(kind) {
                        frame = frame.with_handler(kind, rest.prepend(commands));
                    }
                }
                vec![Command::ParserState("start".to_string())]
            }
            BlockKind::Control => {
                let control = self
                    .program()
                    .find_control(&block.name)
                    .ok_or_else(|| bug!("control {} does not exist", block.name))?;
                frame = frame.with_handler(ExceptionKind::Exit, rest.clone());
                vec![Command::Statement(Rc::clone(&control.body))]
            }
        };
        next.push_continuation(frame);
        next.push_namespace(&block.name);
        next.replace_body(Body::from_commands(body));
        next.add_trace_event(TraceKind::Generic, format!("enter {}", block.name), None);
        self.push_unconditional(next);
        Ok(())
    }

    pub(crate) fn step_parser_state(&mut self, name: &str) -> Result<(), StepError> {
        let mut next = self.state.clone();
        next.add_trace_event(TraceKind::Parser, format!("state {}", name), None);
        match name {
            "accept" => next.pop_continuation(None),
            "reject" => next.replace_top_body(vec![Command::Exception(ExceptionKind::Reject)]),
            _ => {
                let parser_name = self
                    .state
                    .namespaces()
                    .last()
                    .ok_or_else(|| bug!("parser state {} outside of a parser", name))?;
                let parser = self
                    .program()
                    .find_parser(parser_name)
                    .ok_or_else(|| bug!("parser {} does not exist", parser_name))?;
                let state = parser
                    .states
                    .iter()
                    .find(|s| s.name == name)
                    .ok_or_else(|| bug!("parser {} has no state {}", parser_name, name))?;
                let mut commands: Vec<Command> = state
                    .components
                    .iter()
                    .map(|s| Command::Statement(Rc::clone(s)))
                    .collect();
                match &state.transition {
                    Some(t) => commands.push(Command::Statement(Rc::clone(t))),
                    None => return Err(bug!("parser state {} has no transition", name)),
                }
                next.replace_top_body(commands);
            }
        }
        self.push_unconditional(next);
        Ok(())
    }
}
