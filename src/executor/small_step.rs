use std::rc::Rc;

use log::trace;

use crate::bug;
use crate::executor::branch::{fold_guard, Branch};
use crate::executor::continuation::{Body, Command, Frame};
use crate::executor::error::{StepError, StepResult};
use crate::executor::execution_state::{flatten_variable, ExecutionState, IN_UNDEFINED_STATE};
use crate::executor::path_selection::{compute_potential_nodes, requires_lookahead};
use crate::executor::symbolic_setting::TestgenSetting;
use crate::executor::symbolic_value::simplify;
use crate::ir::expression::{Expr, ExprRef, NamedExpr, StateVariable, VALID_FIELD};
use crate::ir::program::ProgramInfo;
use crate::ir::statement::{Meta, Statement};
use crate::ir::types::Type;
use crate::targets::TargetExtension;

/// Everything a step needs besides the state being stepped.
#[derive(Clone, Copy)]
pub struct StepContext<'a> {
    pub program: &'a ProgramInfo,
    pub target: &'a dyn TargetExtension,
    pub setting: &'a TestgenSetting,
}

impl<'a> StepContext<'a> {
    pub fn new(
        program: &'a ProgramInfo,
        target: &'a dyn TargetExtension,
        setting: &'a TestgenSetting,
    ) -> Self {
        StepContext {
            program,
            target,
            setting,
        }
    }

    /// Attaches the statements the successor may cover, when the path
    /// selection policy asks for it.
    pub fn finalize_branch(&self, mut branch: Branch) -> Branch {
        if requires_lookahead(self.setting.path_selection) {
            branch.potential_nodes = compute_potential_nodes(self.program, &branch.next_state);
        }
        branch
    }

    /// The value the target gives storage nobody wrote.
    pub fn uninitialized(&self, ty: &Type, force_taint: bool) -> ExprRef {
        self.target
            .create_target_uninitialized(&self.program.resolve_type(ty), force_taint)
    }
}

/// Where the result of a call goes once the call completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallContext {
    /// The call is a statement; completing it consumes the statement.
    Statement(Meta),
    /// The call produces a value for the innermost frame.
    Expression,
}

/// Performs one step of a single state. Statement handling lives in
/// `cmd_stepper`, expression handling in `expr_stepper`.
pub struct Stepper<'a> {
    pub ctx: StepContext<'a>,
    pub state: &'a ExecutionState,
    pub result: Vec<Branch>,
    /// Statement being executed, marked visited in every successor.
    visiting: usize,
}

impl<'a> Stepper<'a> {
    pub fn new(ctx: StepContext<'a>, state: &'a ExecutionState) -> Self {
        Stepper {
            ctx,
            state,
            result: Vec::new(),
            visiting: 0,
        }
    }

    pub fn program(&self) -> &'a ProgramInfo {
        self.ctx.program
    }

    pub fn setting(&self) -> &'a TestgenSetting {
        self.ctx.setting
    }

    pub(crate) fn set_visiting(&mut self, node: usize) {
        self.visiting = node;
    }

    /// Adds a successor. Guards that fold to `false` drop the branch, guards
    /// that fold to `true` make it unconditional.
    pub fn push(&mut self, guard: Option<ExprRef>, next: ExecutionState) {
        if let Some(guard) = fold_guard(guard) {
            let branch = Branch::new(guard, self.state, next);
            self.push_branch(branch);
        }
    }

    pub fn push_unconditional(&mut self, next: ExecutionState) {
        self.push(None, next);
    }

    pub fn push_branch(&mut self, mut branch: Branch) {
        branch.next_state.mark_visited(self.visiting);
        let branch = self.ctx.finalize_branch(branch);
        self.result.push(branch);
    }

    /// Suspends the current command and evaluates `subexpr` first.
    ///
    /// # Arguments
    ///
    /// * `subexpr` - The leftmost child that is not yet a value.
    /// * `rebuild` - Rebuilds the current command with the child replaced by
    ///   the placeholder it is given.
    pub fn step_to_subexpr<F>(&mut self, subexpr: &ExprRef, rebuild: F)
    where
        F: FnOnce(ExprRef) -> Command,
    {
        let mut next = self.state.clone();
        let (id, placeholder) = next.create_placeholder(subexpr.ty());
        let rest = next.body().tail().push_front(rebuild(placeholder));
        next.push_continuation(Frame::new(rest, Some(id), next.namespaces_rc()));
        next.replace_body(Body::from_commands(vec![Command::Expression(Rc::clone(subexpr))]));
        self.push_unconditional(next);
    }

    /// Hands a finished value to the innermost frame.
    pub fn step_symbolic_value(&mut self, value: &ExprRef) {
        let mut next = self.state.clone();
        next.pop_continuation(Some(simplify(value)));
        self.push_unconditional(next);
    }

    /// Completes a call in `next`.
    pub fn finish_call(&self, next: &mut ExecutionState, ctx: CallContext, value: Option<ExprRef>) {
        match ctx {
            CallContext::Statement(_) => next.pop_body(),
            CallContext::Expression => next.pop_continuation(value.map(|v| simplify(&v))),
        }
    }

    /// Completes a call by writing `assignments` through ordinary assignment
    /// statements, then yielding `value` if the call is an expression.
    pub fn finish_with_assignments(
        &self,
        next: &mut ExecutionState,
        ctx: CallContext,
        assignments: Vec<(ExprRef, ExprRef)>,
        value: Option<ExprRef>,
    ) {
        let mut commands: Vec<Command> = assignments
            .into_iter()
            .map(|(left, right)| Command::Statement(Statement::assignment(left, right)))
            .collect();
        if ctx == CallContext::Expression {
            commands.push(Command::Return(value));
        }
        next.replace_top_body(commands);
    }

    /// Reads a variable. Headers and structs read as a struct expression of
    /// their fields, headers including their validity.
    pub fn read_variable(&self, state: &ExecutionState, var: &StateVariable) -> ExprRef {
        let ty = self.ctx.program.resolve_type(&var.ty);
        match &ty {
            Type::Header { fields, .. } | Type::Struct { fields, .. } => {
                let mut out = Vec::new();
                if ty.is_header() {
                    out.push(NamedExpr {
                        name: VALID_FIELD.to_string(),
                        expr: state.get(&var.validity()),
                    });
                }
                for f in fields {
                    out.push(NamedExpr {
                        name: f.name.clone(),
                        expr: self.read_variable(state, &var.field(&f.name, f.ty.clone())),
                    });
                }
                Rc::new(Expr::Struct {
                    fields: out,
                    ty: ty.clone(),
                })
            }
            Type::Stack { element, size } => Rc::new(Expr::List {
                components: (0..*size)
                    .map(|i| {
                        let elem =
                            StateVariable::new(&format!("{}[{}]", var.name, i), (**element).clone());
                        self.read_variable(state, &elem)
                    })
                    .collect(),
            }),
            _ => state.get(&StateVariable::new(&var.name, ty.clone())),
        }
    }

    /// Writes `value` to `var`. Composite values are written field by field;
    /// while the undefined-state property is set every write is taint.
    pub fn write_variable(
        &self,
        state: &mut ExecutionState,
        var: &StateVariable,
        value: ExprRef,
    ) -> Result<(), StepError> {
        let ty = self.ctx.program.resolve_type(&var.ty);
        if state.get_property_bool(IN_UNDEFINED_STATE) {
            for leaf in flatten_variable(self.ctx.program, var) {
                let t = Expr::taint(leaf.ty.clone());
                state.set(&leaf, t);
            }
            return Ok(());
        }
        match (&ty, value.as_ref()) {
            (Type::Header { fields, .. }, Expr::Struct { fields: values, .. })
            | (Type::Struct { fields, .. }, Expr::Struct { fields: values, .. }) => {
                if ty.is_header() {
                    let valid = values
                        .iter()
                        .find(|n| n.name == VALID_FIELD)
                        .map(|n| Rc::clone(&n.expr))
                        .unwrap_or_else(|| Expr::boolean(true));
                    state.set(&var.validity(), valid);
                }
                for f in fields {
                    let v = values
                        .iter()
                        .find(|n| n.name == f.name)
                        .ok_or_else(|| bug!("no value for field {} of {}", f.name, var))?;
                    self.write_variable(state, &var.field(&f.name, f.ty.clone()), Rc::clone(&v.expr))?;
                }
                Ok(())
            }
            (Type::Header { fields, .. }, Expr::List { components })
            | (Type::Struct { fields, .. }, Expr::List { components }) => {
                if fields.len() != components.len() {
                    return Err(bug!("cannot assign {} values to {}", components.len(), var));
                }
                if ty.is_header() {
                    state.set(&var.validity(), Expr::boolean(true));
                }
                for (f, v) in fields.iter().zip(components.iter()) {
                    self.write_variable(state, &var.field(&f.name, f.ty.clone()), Rc::clone(v))?;
                }
                Ok(())
            }
            (Type::Stack { element, size }, Expr::List { components }) => {
                if *size != components.len() {
                    return Err(bug!("cannot assign {} elements to {}", components.len(), var));
                }
                for (i, v) in components.iter().enumerate() {
                    let elem = StateVariable::new(&format!("{}[{}]", var.name, i), (**element).clone());
                    self.write_variable(state, &elem, Rc::clone(v))?;
                }
                Ok(())
            }
            (_, Expr::Taint { .. }) if ty.is_composite() => {
                for leaf in flatten_variable(self.ctx.program, var) {
                    let t = Expr::taint(leaf.ty.clone());
                    state.set(&leaf, t);
                }
                Ok(())
            }
            _ if ty.is_composite() => Err(bug!("cannot assign {} to composite {}", value, var)),
            _ => {
                state.set(&StateVariable::new(&var.name, ty.clone()), value);
                Ok(())
            }
        }
    }
}

/// Entry point of the interpreter: one call performs one atomic step.
pub struct SmallStepEvaluator<'a> {
    ctx: StepContext<'a>,
}

impl<'a> SmallStepEvaluator<'a> {
    pub fn new(
        program: &'a ProgramInfo,
        target: &'a dyn TargetExtension,
        setting: &'a TestgenSetting,
    ) -> Self {
        SmallStepEvaluator {
            ctx: StepContext::new(program, target, setting),
        }
    }

    pub fn context(&self) -> StepContext<'a> {
        self.ctx
    }

    /// Steps `state` once.
    ///
    /// # Returns
    ///
    /// The successors of `state`, empty for a finished path, or the reason
    /// the path cannot be continued.
    pub fn step(&self, state: &ExecutionState) -> StepResult {
        let mut stepper = Stepper::new(self.ctx, state);
        let command = match state.top_command() {
            Some(c) => c.clone(),
            None => {
                if !state.stack().is_empty() {
                    let mut next = state.clone();
                    next.pop_continuation(None);
                    stepper.push_unconditional(next);
                }
                return Ok(stepper.result);
            }
        };
        trace!("step: {:?}", command);
        match &command {
            Command::Statement(stmt) => {
                stepper.set_visiting(stmt.meta().elem_id);
                stepper.step_statement(stmt)?;
            }
            Command::Expression(expr) => stepper.step_expression(expr)?,
            Command::Return(value) => stepper.step_return(value.as_ref())?,
            Command::Exception(kind) => stepper.step_exception(*kind),
            Command::PropertyUpdate { key, value } => {
                let mut next = state.clone();
                next.set_property(key, value.clone());
                next.pop_body();
                stepper.push_unconditional(next);
            }
            Command::Invoke(block) => stepper.step_invoke(block)?,
            Command::ParserState(name) => stepper.step_parser_state(name)?,
        }
        Ok(stepper.result)
    }
}
