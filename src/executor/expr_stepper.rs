use std::rc::Rc;

use log::warn;
use num_bigint_dig::BigInt;
use num_traits::{ToPrimitive, Zero};

use crate::executor::branch::GuardChain;
use crate::executor::cmd_stepper::{index_out_of_bounds, replace_subexpr, unreduced_index};
use crate::executor::continuation::{Body, Command, ExceptionKind, Frame};
use crate::executor::error::StepError;
use crate::executor::execution_state::{ExecutionState, TraceKind};
use crate::executor::extern_methods::{ExternCall, CORE_EXTERN_IMPLS};
use crate::executor::small_step::{CallContext, Stepper};
use crate::executor::symbolic_value::{
    has_taint, keyset_condition, mk_binary, mk_constant, mk_eq, mk_lor, simplify,
};
use crate::executor::table_stepper::{table_action_var, table_hit_var};
use crate::executor::test_object::{TestObject, ValueSetConfig, VALUE_SETS};
use crate::executor::utils::all_ones;
use crate::ir::expression::{
    Argument, BinOp, Direction, Expr, ExprRef, Keyset, NamedExpr, SelectCase, StateVariable, UnOp,
};
use crate::ir::program::{P4Action, P4Table};
use crate::ir::statement::{Meta, Statement};
use crate::ir::types::Type;
use crate::{bug, unimplemented_step};

/// Members of a table apply result that are rewritten into reads of the
/// table's canonical variables.
const APPLY_RESULT_MEMBERS: [&str; 3] = ["hit", "miss", "action_run"];

fn is_reference_chain(expr: &Expr) -> bool {
    match expr {
        Expr::Path { .. } => true,
        Expr::Member { expr, .. } => is_reference_chain(expr),
        Expr::ArrayIndex { array, .. } => is_reference_chain(array),
        _ => false,
    }
}

pub(crate) fn has_stack_member(expr: &Expr) -> bool {
    match expr {
        Expr::Member { expr, member, .. } => {
            (matches!(expr.ty(), Type::Stack { .. }) && (member == "next" || member == "last"))
                || has_stack_member(expr)
        }
        Expr::ArrayIndex { array, .. } => has_stack_member(array),
        _ => false,
    }
}

impl<'a> Stepper<'a> {
    pub fn step_expression(&mut self, expr: &ExprRef) -> Result<(), StepError> {
        if expr.is_symbolic() {
            self.step_symbolic_value(expr);
            return Ok(());
        }
        match expr.as_ref() {
            Expr::Path { ty: Type::State, .. } => {
                let mut next = self.state.clone();
                next.pop_continuation(Some(Rc::clone(expr)));
                self.push_unconditional(next);
                Ok(())
            }
            Expr::Path { .. } | Expr::ArrayIndex { .. } => self.step_reference(expr),
            Expr::Member {
                expr: inner,
                member,
                ty,
            } => self.step_member(expr, inner, member, ty),
            Expr::MethodCall { .. } => self.step_method_call(expr, CallContext::Expression),
            Expr::Mux {
                cond,
                if_true,
                if_false,
                ty,
            } => self.step_mux(cond, if_true, if_false, ty),
            Expr::Binary {
                op,
                left,
                right,
                ty,
            } => self.step_binary(*op, left, right, ty),
            Expr::Unary { op, expr: inner, ty } => {
                let (op, ty) = (*op, ty.clone());
                self.step_to_subexpr(inner, move |v| {
                    Command::Expression(Rc::new(Expr::Unary { op, expr: v, ty }))
                });
                Ok(())
            }
            Expr::Cast { expr: inner, ty } => {
                let ty = ty.clone();
                self.step_to_subexpr(inner, move |v| {
                    Command::Expression(Rc::new(Expr::Cast { expr: v, ty }))
                });
                Ok(())
            }
            Expr::Slice {
                expr: inner,
                hi,
                lo,
                ty,
            } => {
                match (hi.as_bigint(), lo.as_bigint()) {
                    (Some(h), Some(l)) if h >= l => {}
                    (Some(_), Some(_)) => return Err(bug!("slice {} has reversed bounds", expr)),
                    _ => return Err(bug!("slice {} has non-constant bounds", expr)),
                }
                let (hi, lo, ty) = (Rc::clone(hi), Rc::clone(lo), ty.clone());
                self.step_to_subexpr(inner, move |v| {
                    Command::Expression(Rc::new(Expr::Slice { expr: v, hi, lo, ty }))
                });
                Ok(())
            }
            Expr::Select { select, cases } => self.step_select(select, cases),
            Expr::List { components } => {
                let i = components
                    .iter()
                    .position(|c| !c.is_symbolic())
                    .ok_or_else(|| bug!("list {} has nothing to reduce", expr))?;
                let components = components.clone();
                self.step_to_subexpr(&components[i].clone(), move |v| {
                    let mut components = components;
                    components[i] = v;
                    Command::Expression(Rc::new(Expr::List { components }))
                });
                Ok(())
            }
            Expr::Struct { fields, ty } => {
                let i = fields
                    .iter()
                    .position(|f| !f.expr.is_symbolic())
                    .ok_or_else(|| bug!("struct {} has nothing to reduce", expr))?;
                let (fields, ty) = (fields.clone(), ty.clone());
                self.step_to_subexpr(&fields[i].expr.clone(), move |v| {
                    let mut fields = fields;
                    fields[i] = NamedExpr {
                        name: fields[i].name.clone(),
                        expr: v,
                    };
                    Command::Expression(Rc::new(Expr::Struct { fields, ty }))
                });
                Ok(())
            }
            Expr::TableApply { .. } | Expr::Placeholder { .. } => {
                Err(bug!("{} cannot be evaluated as an expression", expr))
            }
            _ => Err(bug!("unexpected expression {}", expr)),
        }
    }

    /// Rewrites `.next` and `.last` of header stacks into indices computed
    /// from the stack's `nextIndex`.
    ///
    /// # Returns
    ///
    /// The rewritten reference and the stacks accessed through `.next`.
    pub(crate) fn lower_stack_members(
        &self,
        state: &ExecutionState,
        expr: &ExprRef,
    ) -> Result<(ExprRef, Vec<StateVariable>), StepError> {
        let mut advanced = Vec::new();
        let lowered = self.lower_stack_members_into(state, expr, &mut advanced)?;
        Ok((lowered, advanced))
    }

    fn lower_stack_members_into(
        &self,
        state: &ExecutionState,
        expr: &ExprRef,
        advanced: &mut Vec<StateVariable>,
    ) -> Result<ExprRef, StepError> {
        match expr.as_ref() {
            Expr::Member {
                expr: inner,
                member,
                ty,
            } => {
                let inner = self.lower_stack_members_into(state, inner, advanced)?;
                let stack_ty = self.program().resolve_type(&inner.ty());
                match (&stack_ty, member.as_str()) {
                    (Type::Stack { size, .. }, "next") | (Type::Stack { size, .. }, "last") => {
                        let stack = inner
                            .state_variable()
                            .ok_or_else(|| bug!("{} is not a header stack reference", inner))?;
                        let next_index = state.get(&stack.field("nextIndex", Type::bits(32)));
                        let next_index = next_index
                            .as_bigint()
                            .and_then(|v| v.to_usize())
                            .ok_or_else(|| {
                                unimplemented_step!("{} with a symbolic nextIndex", expr)
                            })?;
                        let index = if member == "next" {
                            advanced.push(stack);
                            next_index
                        } else if next_index == 0 {
                            *size
                        } else {
                            next_index - 1
                        };
                        Ok(Rc::new(Expr::ArrayIndex {
                            array: inner,
                            index: Expr::bits(32, index as u64),
                            ty: ty.clone(),
                        }))
                    }
                    _ => Ok(Rc::new(Expr::Member {
                        expr: inner,
                        member: member.clone(),
                        ty: ty.clone(),
                    })),
                }
            }
            Expr::ArrayIndex { array, index, ty } => Ok(Rc::new(Expr::ArrayIndex {
                array: self.lower_stack_members_into(state, array, advanced)?,
                index: Rc::clone(index),
                ty: ty.clone(),
            })),
            _ => Ok(Rc::clone(expr)),
        }
    }

    fn step_reference(&mut self, expr: &ExprRef) -> Result<(), StepError> {
        if has_stack_member(expr) {
            let (lowered, _) = self.lower_stack_members(self.state, expr)?;
            let mut next = self.state.clone();
            next.replace_top_body(vec![Command::Expression(lowered)]);
            self.push_unconditional(next);
            return Ok(());
        }
        if let Some(index) = unreduced_index(expr) {
            if index.is_symbolic() {
                return Err(unimplemented_step!(
                    "read of {} through the non-constant index {}",
                    expr,
                    index
                ));
            }
            let (e, idx) = (Rc::clone(expr), Rc::clone(&index));
            self.step_to_subexpr(&index, move |v| Command::Expression(replace_subexpr(&e, &idx, &v)));
            return Ok(());
        }
        if index_out_of_bounds(expr) {
            let mut next = self.state.clone();
            next.replace_top_body(vec![Command::Exception(ExceptionKind::StackOutOfBounds)]);
            self.push_unconditional(next);
            return Ok(());
        }
        let var = expr
            .state_variable()
            .ok_or_else(|| bug!("{} is not a reference", expr))?;
        let value = match expr.as_ref() {
            Expr::Member { expr: parent, .. } if self.reads_invalid_header(parent) => {
                self.ctx.uninitialized(&var.ty, false)
            }
            _ => self.read_variable(self.state, &var),
        };
        self.step_symbolic_value(&value);
        Ok(())
    }

    /// Whether `parent` is a header that is known to be invalid.
    fn reads_invalid_header(&self, parent: &ExprRef) -> bool {
        if !self.program().resolve_type(&parent.ty()).is_header() {
            return false;
        }
        match parent.state_variable() {
            Some(header) => self.state.get(&header.validity()).as_bool() == Some(false),
            None => false,
        }
    }

    fn step_member(
        &mut self,
        expr: &ExprRef,
        inner: &ExprRef,
        member: &str,
        ty: &Type,
    ) -> Result<(), StepError> {
        if let Expr::MethodCall { method, .. } = inner.as_ref() {
            if APPLY_RESULT_MEMBERS.contains(&member) {
                if let Some(table) = self.applied_table(method) {
                    return self.step_apply_result(inner, table, member);
                }
            }
        }
        if is_reference_chain(expr) {
            return self.step_reference(expr);
        }
        if !inner.is_symbolic() {
            let (member, ty) = (member.to_string(), ty.clone());
            self.step_to_subexpr(inner, move |v| {
                Command::Expression(Rc::new(Expr::Member {
                    expr: v,
                    member,
                    ty,
                }))
            });
            return Ok(());
        }
        match inner.as_ref() {
            Expr::Struct { fields, .. } => {
                let field = fields
                    .iter()
                    .find(|f| f.name == member)
                    .ok_or_else(|| bug!("{} has no field {}", inner, member))?;
                let value = Rc::clone(&field.expr);
                self.step_symbolic_value(&value);
                Ok(())
            }
            Expr::Taint { .. } => {
                self.step_symbolic_value(&Expr::taint(ty.clone()));
                Ok(())
            }
            _ => Err(bug!("cannot project {} out of {}", member, inner)),
        }
    }

    /// The table a call's method applies, if it is `<table>.apply`.
    fn applied_table(&self, method: &ExprRef) -> Option<&'a P4Table> {
        match method.as_ref() {
            Expr::Member { expr, member, .. } if member == "apply" => match expr.as_ref() {
                Expr::Path { name, .. } => self.program().find_table(self.state.namespaces(), name),
                _ => None,
            },
            _ => None,
        }
    }

    /// `t.apply().hit` runs the apply as a statement first, then reads the
    /// variable the table stepper bound.
    fn step_apply_result(
        &mut self,
        apply: &ExprRef,
        table: &P4Table,
        member: &str,
    ) -> Result<(), StepError> {
        let hit = table_hit_var(&table.name);
        let value = match member {
            "hit" => hit.to_expr(),
            "miss" => Rc::new(Expr::Unary {
                op: UnOp::LNot,
                expr: hit.to_expr(),
                ty: Type::Bool,
            }),
            _ => table_action_var(table).to_expr(),
        };
        let mut next = self.state.clone();
        next.replace_top_body(vec![
            Command::Statement(Statement::method_call(Rc::clone(apply))),
            Command::Expression(value),
        ]);
        self.push_unconditional(next);
        Ok(())
    }

    /// Classifies a call as a table apply, an action call or an extern call.
    pub(crate) fn step_method_call(&mut self, call: &ExprRef, ctx: CallContext) -> Result<(), StepError> {
        let (method, args, ty) = match call.as_ref() {
            Expr::MethodCall { method, args, ty } => (method, args, ty),
            _ => return Err(bug!("{} is not a method call", call)),
        };
        if let Some(table) = self.applied_table(method) {
            let meta = match ctx {
                CallContext::Statement(meta) => meta,
                CallContext::Expression => {
                    return Err(bug!("table {} applied inside an expression", table.name))
                }
            };
            let mut next = self.state.clone();
            next.replace_top_body(vec![Command::Statement(Rc::new(Statement::MethodCall {
                meta,
                call: Rc::new(Expr::TableApply {
                    table: table.name.clone(),
                    keys: table.keys.iter().map(|k| Rc::clone(&k.expr)).collect(),
                }),
            }))]);
            self.push_unconditional(next);
            return Ok(());
        }
        if let Expr::Path { name, .. } = method.as_ref() {
            if let Some(action) = self.program().find_action(self.state.namespaces(), name) {
                return self.step_action_call(action, args, ctx);
            }
        }
        self.step_extern_call(call, method, args, ty, ctx)
    }

    /// Runs an action body in a new frame. Parameters are declared as
    /// locals bound to the arguments; `out` and `inout` parameters are
    /// copied back once the body completes.
    fn step_action_call(
        &mut self,
        action: &P4Action,
        args: &[Argument],
        ctx: CallContext,
    ) -> Result<(), StepError> {
        if ctx == CallContext::Expression {
            return Err(bug!("action {} called inside an expression", action.name));
        }
        if args.len() != action.params.len() {
            return Err(bug!(
                "action {} takes {} arguments, {} given",
                action.name,
                action.params.len(),
                args.len()
            ));
        }
        let mut body = Vec::new();
        let mut copy_out = Vec::new();
        for (param, arg) in action.params.iter().zip(args.iter()) {
            let init = match param.direction {
                Direction::Out => None,
                _ => Some(Rc::clone(&arg.expr)),
            };
            body.push(Command::Statement(Rc::new(Statement::Declaration {
                meta: Meta::default(),
                name: param.name.clone(),
                ty: param.ty.clone(),
                init,
            })));
            if param.direction.is_write_capable() {
                copy_out.push(Command::Statement(Statement::assignment(
                    Rc::clone(&arg.expr),
                    Expr::path(&param.name, param.ty.clone()),
                )));
            }
        }
        body.push(Command::Statement(Rc::clone(&action.body)));

        let mut next = self.state.clone();
        let rest = next.body().tail().prepend(copy_out);
        next.push_continuation(Frame::new(rest, None, next.namespaces_rc()));
        next.push_namespace(&action.name);
        next.replace_body(Body::from_commands(body));
        next.add_trace_event(TraceKind::Generic, format!("action {}", action.name), None);
        self.push_unconditional(next);
        Ok(())
    }

    fn step_extern_call(
        &mut self,
        call: &ExprRef,
        method: &ExprRef,
        args: &[Argument],
        ty: &Type,
        ctx: CallContext,
    ) -> Result<(), StepError> {
        if let Some(i) = args
            .iter()
            .position(|a| !a.direction.is_write_capable() && !a.expr.is_symbolic())
        {
            let (method, args_copy, ty) = (Rc::clone(method), args.to_vec(), ty.clone());
            self.step_to_subexpr(&args[i].expr, move |v| {
                let mut args = args_copy;
                args[i] = Argument {
                    direction: args[i].direction,
                    expr: v,
                };
                let call = Expr::method_call(method, args, ty);
                match ctx {
                    CallContext::Statement(meta) => {
                        Command::Statement(Rc::new(Statement::MethodCall { meta, call }))
                    }
                    CallContext::Expression => Command::Expression(call),
                }
            });
            return Ok(());
        }
        let (receiver, method_name) = match method.as_ref() {
            Expr::Member { expr, member, .. } => (Some(Rc::clone(expr)), member.clone()),
            Expr::Path { name, .. } => (None, name.clone()),
            _ => return Err(bug!("cannot call {}", method)),
        };
        let instance = match receiver.as_deref() {
            Some(Expr::Path { name, .. }) => self
                .program()
                .find_extern(self.state.namespaces(), name)
                .cloned(),
            _ => None,
        };
        let type_name = match (&instance, &receiver) {
            (Some(inst), _) => inst.type_name.clone(),
            (None, Some(r)) => match self.program().resolve_type(&r.ty()) {
                Type::Extern { name } => name,
                _ => "*method".to_string(),
            },
            (None, None) => "*method".to_string(),
        };
        let extern_call = ExternCall {
            call: Rc::clone(call),
            receiver,
            instance,
            type_name,
            method: method_name,
            args: args
                .iter()
                .map(|a| Argument {
                    direction: a.direction,
                    expr: if a.direction.is_write_capable() {
                        Rc::clone(&a.expr)
                    } else {
                        simplify(&a.expr)
                    },
                })
                .collect(),
            ty: ty.clone(),
            context: ctx,
        };
        let handler = self
            .ctx
            .target
            .extern_impls()
            .find(&extern_call.type_name, &extern_call.method)
            .or_else(|| CORE_EXTERN_IMPLS.find(&extern_call.type_name, &extern_call.method))
            .ok_or_else(|| {
                unimplemented_step!(
                    "extern method {}.{}",
                    extern_call.type_name,
                    extern_call.method
                )
            })?;
        handler(self, &extern_call)
    }

    fn step_mux(
        &mut self,
        cond: &ExprRef,
        if_true: &ExprRef,
        if_false: &ExprRef,
        ty: &Type,
    ) -> Result<(), StepError> {
        if !cond.is_symbolic() {
            let (t, f, ty) = (Rc::clone(if_true), Rc::clone(if_false), ty.clone());
            self.step_to_subexpr(cond, move |v| {
                Command::Expression(Rc::new(Expr::Mux {
                    cond: v,
                    if_true: t,
                    if_false: f,
                    ty,
                }))
            });
            return Ok(());
        }
        let cond = simplify(cond);
        if has_taint(&cond) {
            let value = self.ctx.uninitialized(ty, true);
            self.step_symbolic_value(&value);
            return Ok(());
        }
        let mut chain = GuardChain::new();
        for (c, arm) in [(Some(Rc::clone(&cond)), if_true), (None, if_false)] {
            if let Some(guard) = chain.exclusive(c) {
                let mut next = self.state.clone();
                if arm.is_symbolic() {
                    next.pop_continuation(Some(simplify(arm)));
                } else {
                    next.replace_top_body(vec![Command::Expression(Rc::clone(arm))]);
                }
                self.push(guard, next);
            }
        }
        Ok(())
    }

    fn step_binary(&mut self, op: BinOp, left: &ExprRef, right: &ExprRef, ty: &Type) -> Result<(), StepError> {
        if !left.is_symbolic() {
            let (r, ty) = (Rc::clone(right), ty.clone());
            self.step_to_subexpr(left, move |v| {
                Command::Expression(Rc::new(Expr::Binary {
                    op,
                    left: v,
                    right: r,
                    ty,
                }))
            });
            return Ok(());
        }
        if !right.is_symbolic() {
            let (l, ty) = (Rc::clone(left), ty.clone());
            self.step_to_subexpr(right, move |v| {
                Command::Expression(Rc::new(Expr::Binary {
                    op,
                    left: l,
                    right: v,
                    ty,
                }))
            });
            return Ok(());
        }
        if !op.is_saturating() {
            return Err(bug!("binary operation {:?} is already a value", op));
        }
        let (l, r) = (simplify(left), simplify(right));
        if (l.is_constant() && r.is_constant()) || has_taint(&l) || has_taint(&r) {
            let value = mk_binary(op, l, r);
            self.step_symbolic_value(&value);
            return Ok(());
        }
        let width = match ty {
            Type::Bits {
                width,
                signed: false,
            } => *width,
            Type::Bits { signed: true, .. } => {
                return Err(unimplemented_step!("signed saturating arithmetic {}", op.symbol()))
            }
            _ => return Err(bug!("saturating arithmetic on {}", ty)),
        };
        let mux = if op == BinOp::AddSat {
            let sum = mk_binary(BinOp::Add, Rc::clone(&l), r);
            Expr::Mux {
                cond: mk_binary(BinOp::Lss, Rc::clone(&sum), l),
                if_true: mk_constant(ty, all_ones(width)),
                if_false: sum,
                ty: ty.clone(),
            }
        } else {
            Expr::Mux {
                cond: mk_binary(BinOp::Lss, Rc::clone(&l), Rc::clone(&r)),
                if_true: mk_constant(ty, BigInt::zero()),
                if_false: mk_binary(BinOp::Sub, l, r),
                ty: ty.clone(),
            }
        };
        let mut next = self.state.clone();
        next.replace_top_body(vec![Command::Expression(Rc::new(mux))]);
        self.push_unconditional(next);
        Ok(())
    }

    /// Forks once per select case. Without a `default` case the remaining
    /// guard raises `NoMatch`.
    fn step_select(&mut self, select: &ExprRef, cases: &[SelectCase]) -> Result<(), StepError> {
        if !select.is_symbolic() {
            let cases = cases.to_vec();
            self.step_to_subexpr(select, move |v| {
                Command::Expression(Rc::new(Expr::Select { select: v, cases }))
            });
            return Ok(());
        }
        let value = simplify(select);
        if has_taint(&value) {
            warn!("Select on the tainted value {}; the path is abandoned", value);
            return Err(unimplemented_step!("select on the tainted value {}", value));
        }
        let mut base = self.state.clone();
        let mut chain = GuardChain::new();
        for case in cases {
            let cond = self.select_case_condition(&mut base, &value, &case.keyset)?;
            if let Some(guard) = chain.exclusive(cond) {
                let mut next = base.clone();
                next.add_trace_event(
                    TraceKind::Parser,
                    format!("select case {:?} -> {}", case.keyset, case.state),
                    None,
                );
                next.pop_continuation(Some(Expr::path(&case.state, Type::State)));
                self.push(guard, next);
            }
        }
        if let Some(guard) = chain.remainder() {
            let mut next = base;
            next.replace_top_body(vec![Command::Exception(ExceptionKind::NoMatch)]);
            self.push(guard, next);
        }
        Ok(())
    }

    /// Condition of a select keyset. Value sets are instantiated with fresh
    /// elements on first use and reused afterwards.
    fn select_case_condition(
        &self,
        base: &mut ExecutionState,
        value: &ExprRef,
        keyset: &Keyset,
    ) -> Result<Option<ExprRef>, StepError> {
        match keyset {
            Keyset::ValueSet { name } => {
                if matches!(value.as_ref(), Expr::List { .. }) {
                    return Err(unimplemented_step!("value set {} over a tuple", name));
                }
                let vs = self
                    .program()
                    .find_value_set(name)
                    .ok_or_else(|| bug!("value set {} does not exist", name))?;
                let elements = match base.get_test_object(VALUE_SETS, name, false)? {
                    Some(obj) => obj
                        .as_value_set()
                        .ok_or_else(|| bug!("{} is not a value set", name))?
                        .elements
                        .clone(),
                    None => {
                        let elements: Vec<ExprRef> = (0..vs.size)
                            .map(|_| base.create_symbolic_variable(vs.ty.clone(), &format!("{}_elem", name)))
                            .collect();
                        base.add_test_object(
                            VALUE_SETS,
                            name,
                            TestObject::ValueSet(ValueSetConfig {
                                elements: elements.clone(),
                            }),
                        );
                        elements
                    }
                };
                let cond = elements.into_iter().fold(Expr::boolean(false), |acc, e| {
                    mk_lor(acc, mk_eq(Rc::clone(value), e))
                });
                Ok(Some(cond))
            }
            Keyset::Tuple { components } => {
                if components.iter().any(|k| matches!(k, Keyset::ValueSet { .. })) {
                    return Err(unimplemented_step!("value set nested in a tuple keyset"));
                }
                Ok(keyset_condition(value, keyset))
            }
            _ => Ok(keyset_condition(value, keyset)),
        }
    }
}
