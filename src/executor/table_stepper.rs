use std::cmp::Reverse;
use std::rc::Rc;

use log::{debug, warn};
use num_bigint_dig::BigInt;
use num_traits::Zero;

use crate::executor::branch::{Branch, GuardChain};
use crate::executor::continuation::{Command, PropertyValue};
use crate::executor::error::StepError;
use crate::executor::execution_state::{ExecutionState, TraceKind, IN_UNDEFINED_STATE};
use crate::executor::small_step::StepContext;
use crate::executor::symbolic_setting::TestgenSetting;
use crate::executor::symbolic_value::{
    conjoin, has_taint, keyset_condition, mk_band, mk_binary, mk_cast, mk_constant, mk_eq, mk_land,
    mk_leq,
};
use crate::executor::test_object::{
    ActionCallRule, ActionProfile, ActionSelector, TableConfig, TableMatch, TableProperty,
    TestObject, ACTION_PROFILES, ACTION_SELECTORS, TABLE_CONFIGS,
};
use crate::executor::utils::{all_ones, prefix_length};
use crate::ir::expression::{Argument, BinOp, Direction, Expr, ExprRef, Keyset, StateVariable};
use crate::ir::program::{ActionCall, P4Table};
use crate::ir::statement::Statement;
use crate::ir::types::Type;
use crate::bug;

pub const ACTION_PROFILE_PROPERTY: &str = "action_profile";
pub const ACTION_SELECTOR_PROPERTY: &str = "action_selector";
pub const OVERRIDEN_DEFAULT_ACTION_PROPERTY: &str = "overriden_default_action";

/// Canonical variable telling whether the last apply of `table` hit.
pub fn table_hit_var(table: &str) -> StateVariable {
    StateVariable::new(&format!("*table.{}.hit", table), Type::Bool)
}

/// Canonical variable telling whether `table` was applied on this path.
pub fn table_reached_var(table: &str) -> StateVariable {
    StateVariable::new(&format!("*table.{}.reached", table), Type::Bool)
}

/// Canonical variable holding the index of the action the last apply ran.
pub fn table_action_var(table: &P4Table) -> StateVariable {
    StateVariable::new(
        &format!("*table.{}.action", table.name),
        table.action_enum_type(),
    )
}

#[derive(Clone, Debug)]
pub struct KeyProperties {
    /// Control-plane name of the key.
    pub name: String,
    pub match_kind: String,
    /// Position of the key in the table's key list.
    pub index: usize,
    pub key: ExprRef,
    pub ty: Type,
    pub is_tainted: bool,
}

/// How the actions of a table are provided.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableImplementation<'s> {
    Direct,
    ActionProfile(&'s str),
    ActionSelector(&'s str),
}

/// Evaluates one apply of a table whose keys are all values.
///
/// The stepper walks the table through key classification, constant or
/// initial entries, control-plane synthesis and finally the default action.
/// Fresh variables are allocated on a working copy of the state so that
/// every successor, including the default one, sees all of them.
pub struct TableStepper<'a> {
    pub ctx: StepContext<'a>,
    pub state: &'a ExecutionState,
    pub table: &'a P4Table,
    pub keys: Vec<KeyProperties>,
    pub working: ExecutionState,
    result: Vec<Branch>,
    chain: GuardChain,
}

impl<'a> TableStepper<'a> {
    /// Prepares the evaluation of `table`.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The step context.
    /// * `state` - The state whose top command is the apply.
    /// * `table` - The applied table.
    /// * `keys` - The values of the table's keys, in declaration order.
    pub fn new(
        ctx: StepContext<'a>,
        state: &'a ExecutionState,
        table: &'a P4Table,
        keys: Vec<ExprRef>,
    ) -> Result<Self, StepError> {
        if keys.len() != table.keys.len() {
            return Err(bug!(
                "table {} has {} keys, {} values given",
                table.name,
                table.keys.len(),
                keys.len()
            ));
        }
        let keys = table
            .keys
            .iter()
            .zip(keys)
            .enumerate()
            .map(|(index, (element, key))| KeyProperties {
                name: element.name.clone(),
                match_kind: element.match_kind.clone(),
                index,
                ty: ctx.program.resolve_type(&key.ty()),
                is_tainted: has_taint(&key),
                key,
            })
            .collect();
        Ok(TableStepper {
            ctx,
            state,
            table,
            keys,
            working: state.clone(),
            result: Vec::new(),
            chain: GuardChain::new(),
        })
    }

    pub fn setting(&self) -> &'a TestgenSetting {
        self.ctx.setting
    }

    /// Runs the table state machine.
    ///
    /// # Returns
    ///
    /// The hit branches followed by the default-action branch. Their guards
    /// together cover every packet.
    pub fn eval(mut self) -> Result<Vec<Branch>, StepError> {
        debug!("apply table {} with {} keys", self.table.name, self.keys.len());
        if self.is_tainted() {
            self.eval_tainted()?;
            return Ok(self.result);
        }
        if !self.table.has_key() {
            self.eval_no_key()?;
            self.eval_default()?;
            return Ok(self.result);
        }
        if !self.table.entries.is_empty() {
            self.eval_entries()?;
        }
        if !self.table.entries_are_const {
            let target = self.ctx.target;
            if !target.eval_target_table(&mut self)? {
                self.eval_control_entries(TableImplementation::Direct)?;
            }
        }
        self.eval_default()?;
        Ok(self.result)
    }

    fn is_immutable(&self) -> bool {
        self.table.entries_are_const && !self.table.entries.is_empty()
    }

    /// A table is tainted when a tainted key cannot be recovered by a
    /// wildcard match, either because the policy forbids it or because the
    /// target cannot express the wildcard for the test back end.
    fn is_tainted(&self) -> bool {
        let has_entries = !self.table.entries.is_empty();
        let recovery = &self.setting().taint_recovery;
        let backend = self.setting().backend;
        self.keys.iter().any(|k| {
            k.is_tainted
                && (k.match_kind == "exact"
                    || has_entries
                    || !recovery.recovers(&k.match_kind)
                    || !self.ctx.target.can_wildcard(&k.match_kind, backend))
        })
    }

    /// Binds the canonical result variables of the table in `next`.
    fn set_table_result(&self, next: &mut ExecutionState, hit: ExprRef, action: Option<usize>) {
        next.set(&table_hit_var(&self.table.name), hit);
        next.set(&table_reached_var(&self.table.name), Expr::boolean(true));
        let action_var = table_action_var(self.table);
        let value = match action {
            Some(index) => mk_constant(&action_var.ty, BigInt::from(index)),
            None => Expr::taint(action_var.ty.clone()),
        };
        next.set(&action_var, value);
    }

    fn action_index(&self, name: &str) -> Result<usize, StepError> {
        self.table
            .action_index(name)
            .ok_or_else(|| bug!("action {} is not listed in table {}", name, self.table.name))
    }

    /// Statement calling `action` with the arguments bound in the table's
    /// action list followed by `control_plane_args`.
    fn action_call_statement(&self, action: &str, control_plane_args: &[ExprRef]) -> Command {
        let mut args: Vec<Argument> = self
            .table
            .actions
            .iter()
            .find(|a| a.name == action)
            .map(|a| a.args.clone())
            .unwrap_or_default();
        args.extend(control_plane_args.iter().map(|e| Argument {
            direction: Direction::None,
            expr: Rc::clone(e),
        }));
        Command::Statement(Statement::method_call(Expr::method_call(
            Expr::path(action, Type::Action),
            args,
            Type::Void,
        )))
    }

    fn push(&mut self, guard: Option<ExprRef>, next: ExecutionState) {
        self.result.push(Branch::new(guard, self.state, next));
    }

    /// Allocates a fresh control-plane variable named after the table.
    pub fn fresh_variable(&mut self, ty: Type, hint: &str) -> ExprRef {
        let hint = format!("{}_{}", self.table.name, hint);
        self.working.create_symbolic_variable(ty, &hint)
    }

    /// Tainted keys: an immutable table runs every entry with all writes
    /// tainted, a mutable one falls back to its default action.
    fn eval_tainted(&mut self) -> Result<(), StepError> {
        if !self.is_immutable() {
            warn!(
                "Table {} is applied to a tainted key; only its default action is executed",
                self.table.name
            );
            return self.eval_default();
        }
        let mut commands = vec![Command::PropertyUpdate {
            key: IN_UNDEFINED_STATE.to_string(),
            value: PropertyValue::Bool(true),
        }];
        let table = self.table;
        for entry in &table.entries {
            commands.push(self.action_call_statement(&entry.action.name, &entry.action.args));
        }
        let default = &self.table.default_action;
        commands.push(self.action_call_statement(&default.name, &default.args));
        commands.push(Command::PropertyUpdate {
            key: IN_UNDEFINED_STATE.to_string(),
            value: PropertyValue::Bool(false),
        });

        let mut next = self.working.clone();
        self.set_table_result(&mut next, Expr::taint(Type::Bool), None);
        next.add_trace_event(
            TraceKind::Table,
            format!("{}: tainted key, all constant entries executed", self.table.name),
            None,
        );
        next.replace_top_body(commands);
        self.push(None, next);
        Ok(())
    }

    /// Prefix length an LPM keyset matches on, for ordering entries.
    fn lpm_prefix(keyset: &Keyset, width: u32) -> u32 {
        match keyset {
            Keyset::Default => 0,
            Keyset::Mask { mask, .. } => mask
                .as_bigint()
                .and_then(|m| prefix_length(m, width))
                .unwrap_or(0),
            _ => width,
        }
    }

    /// Constant or initial entries, in priority order. Without explicit
    /// priorities, entries of an LPM table are checked longest prefix first
    /// and other entries in declaration order.
    fn eval_entries(&mut self) -> Result<(), StepError> {
        let table = self.table;
        if let Some(entry) = table.entries.iter().find(|e| e.keys.len() != self.keys.len()) {
            return Err(bug!(
                "entry of table {} has {} keysets for {} keys",
                table.name,
                entry.keys.len(),
                self.keys.len()
            ));
        }
        let mut entries: Vec<_> = table.entries.iter().collect();
        if entries.iter().any(|e| e.priority.is_some()) {
            // Larger priorities win; entries without one rank lowest.
            entries.sort_by_key(|e| Reverse(e.priority.unwrap_or(0)));
        } else if let Some(lpm) = self.keys.iter().find(|k| k.match_kind == "lpm") {
            let (index, width) = (lpm.index, lpm.ty.width_bits().unwrap_or(0));
            entries.sort_by_key(|e| Reverse(Self::lpm_prefix(&e.keys[index], width)));
        }
        for entry in entries {
            let mut cond = None;
            for (key, keyset) in self.keys.iter().zip(entry.keys.iter()) {
                if let Some(c) = keyset_condition(&key.key, keyset) {
                    cond = conjoin(cond, c);
                }
            }
            let guard = match self.chain.exclusive(cond) {
                Some(guard) => guard,
                None => continue,
            };
            let index = self.action_index(&entry.action.name)?;
            let mut next = self.working.clone();
            self.set_table_result(&mut next, Expr::boolean(true), Some(index));
            next.add_trace_event(
                TraceKind::Table,
                format!("{}: entry hit, action {}", self.table.name, entry.action.name),
                None,
            );
            next.replace_top_body(vec![
                self.action_call_statement(&entry.action.name, &entry.action.args)
            ]);
            self.push(guard, next);
        }
        Ok(())
    }

    /// Exact match of `key` against a fresh control-plane value.
    pub fn exact_match(
        &mut self,
        key: &KeyProperties,
        matches: &mut Vec<(String, TableMatch)>,
    ) -> ExprRef {
        let value = self.fresh_variable(key.ty.clone(), &format!("key_{}", key.name));
        matches.push((
            key.name.clone(),
            TableMatch::Exact {
                key: Rc::clone(&key.key),
                value: Rc::clone(&value),
            },
        ));
        mk_eq(Rc::clone(&key.key), value)
    }

    /// Hit condition of one key for a synthesized entry. `None` means the
    /// key matches every packet.
    pub fn compute_hit_condition(
        &mut self,
        key: &KeyProperties,
        matches: &mut Vec<(String, TableMatch)>,
    ) -> Result<Option<ExprRef>, StepError> {
        match key.match_kind.as_str() {
            "exact" => Ok(Some(self.exact_match(key, matches))),
            "ternary" => {
                let value = self.fresh_variable(key.ty.clone(), &format!("key_{}", key.name));
                if key.is_tainted {
                    matches.push((
                        key.name.clone(),
                        TableMatch::Ternary {
                            key: Rc::clone(&key.key),
                            value,
                            mask: mk_constant(&key.ty, BigInt::zero()),
                        },
                    ));
                    return Ok(None);
                }
                let mask = self.fresh_variable(key.ty.clone(), &format!("mask_{}", key.name));
                let cond = mk_eq(
                    mk_band(Rc::clone(&key.key), Rc::clone(&mask)),
                    mk_band(Rc::clone(&value), Rc::clone(&mask)),
                );
                matches.push((
                    key.name.clone(),
                    TableMatch::Ternary {
                        key: Rc::clone(&key.key),
                        value,
                        mask,
                    },
                ));
                Ok(Some(cond))
            }
            "lpm" => {
                let width = key
                    .ty
                    .width_bits()
                    .ok_or_else(|| bug!("lpm key {} has no width", key.name))?;
                let value = self.fresh_variable(key.ty.clone(), &format!("key_{}", key.name));
                if key.is_tainted {
                    matches.push((
                        key.name.clone(),
                        TableMatch::Lpm {
                            key: Rc::clone(&key.key),
                            value,
                            prefix_len: Expr::bits(32, 0),
                        },
                    ));
                    return Ok(None);
                }
                let prefix = self.fresh_variable(Type::bits(32), &format!("prefix_{}", key.name));
                let shift = mk_binary(
                    BinOp::Sub,
                    mk_constant(&key.ty, BigInt::from(width)),
                    mk_cast(&key.ty, Rc::clone(&prefix)),
                );
                let mask = mk_binary(BinOp::Shl, mk_constant(&key.ty, all_ones(width)), shift);
                let cond = mk_land(
                    mk_leq(Rc::clone(&prefix), Expr::bits(32, width as u64)),
                    mk_eq(
                        mk_band(Rc::clone(&key.key), Rc::clone(&mask)),
                        mk_band(Rc::clone(&value), mask),
                    ),
                );
                matches.push((
                    key.name.clone(),
                    TableMatch::Lpm {
                        key: Rc::clone(&key.key),
                        value,
                        prefix_len: prefix,
                    },
                ));
                Ok(Some(cond))
            }
            _ => {
                let target = self.ctx.target;
                target.compute_target_match_type(self, key, matches)
            }
        }
    }

    /// Action-profile tables: every action becomes a profile member that
    /// the synthesized entry points to.
    pub fn eval_table_action_profile(&mut self, profile: &str) -> Result<(), StepError> {
        self.eval_control_entries(TableImplementation::ActionProfile(profile))
    }

    /// Action-selector tables: like profiles, and the selector keys feeding
    /// the member hash are recorded.
    pub fn eval_table_action_selector(&mut self, selector: &str) -> Result<(), StepError> {
        self.eval_control_entries(TableImplementation::ActionSelector(selector))
    }

    fn existing_config(&self, next: &ExecutionState) -> Result<TableConfig, StepError> {
        match next.get_test_object(TABLE_CONFIGS, &self.table.name, false)? {
            Some(obj) => obj
                .as_table_config()
                .cloned()
                .ok_or_else(|| bug!("{} is not a table configuration", self.table.name)),
            None => Ok(TableConfig::new(&self.table.name)),
        }
    }

    fn add_profile_member(
        &self,
        next: &mut ExecutionState,
        profile_name: &str,
        action: ActionCallRule,
    ) -> Result<usize, StepError> {
        let mut profile = match next.get_test_object(ACTION_PROFILES, profile_name, false)? {
            Some(obj) => obj
                .as_action_profile()
                .cloned()
                .ok_or_else(|| bug!("{} is not an action profile", profile_name))?,
            None => ActionProfile {
                name: profile_name.to_string(),
                members: Vec::new(),
            },
        };
        let index = profile.add_member(action);
        next.add_test_object(ACTION_PROFILES, profile_name, TestObject::ActionProfile(profile));
        Ok(index)
    }

    fn add_selector_member(
        &self,
        next: &mut ExecutionState,
        selector_name: &str,
        action: ActionCallRule,
    ) -> Result<usize, StepError> {
        let mut selector = match next.get_test_object(ACTION_SELECTORS, selector_name, false)? {
            Some(obj) => obj
                .as_action_selector()
                .cloned()
                .ok_or_else(|| bug!("{} is not an action selector", selector_name))?,
            None => ActionSelector {
                name: selector_name.to_string(),
                profile: ActionProfile {
                    name: selector_name.to_string(),
                    members: Vec::new(),
                },
                selector_keys: self
                    .keys
                    .iter()
                    .filter(|k| k.match_kind == "selector")
                    .map(|k| Rc::clone(&k.key))
                    .collect(),
            },
        };
        let index = selector.profile.add_member(action);
        next.add_test_object(ACTION_SELECTORS, selector_name, TestObject::ActionSelector(selector));
        Ok(index)
    }

    /// Synthesizes one control-plane entry per action. Each entry gets fresh
    /// key and argument variables, so its guard only depends on its own
    /// variables and on the miss of the entries evaluated before. A hit
    /// condition that matches every packet makes the entry unconditional.
    pub fn eval_control_entries(
        &mut self,
        implementation: TableImplementation<'_>,
    ) -> Result<(), StepError> {
        if !self.chain.is_open() {
            debug!("table {}: no packet left for control-plane entries", self.table.name);
            return Ok(());
        }
        let (table, program) = (self.table, self.ctx.program);
        let namespaces = self.state.namespaces().to_vec();
        for action_ref in table.actions.iter().filter(|a| !a.default_only) {
            let action = program
                .find_action(&namespaces, &action_ref.name)
                .ok_or_else(|| bug!("action {} does not exist", action_ref.name))?;

            let mut matches = Vec::new();
            let mut cond = None;
            for key in self.keys.clone() {
                if let Some(c) = self.compute_hit_condition(&key, &mut matches)? {
                    cond = conjoin(cond, c);
                }
            }
            let guard = match self.chain.independent(cond) {
                Some(guard) => guard,
                None => continue,
            };
            let mut control_plane_args = Vec::new();
            let mut rule_args = Vec::new();
            for param in action.params.iter().skip(action_ref.args.len()) {
                let hint = format!("arg_{}_{}", action.name, param.name);
                let value = self.fresh_variable(param.ty.clone(), &hint);
                control_plane_args.push(Rc::clone(&value));
                rule_args.push((param.name.clone(), value));
            }

            let mut next = self.working.clone();
            let rule_action = ActionCallRule {
                name: action.name.clone(),
                args: rule_args,
            };
            let mut config = self.existing_config(&next)?;
            let rule_action = match implementation {
                TableImplementation::Direct => rule_action,
                TableImplementation::ActionProfile(profile) => {
                    let member = self.add_profile_member(&mut next, profile, rule_action)?;
                    config.properties.insert(
                        ACTION_PROFILE_PROPERTY.to_string(),
                        TableProperty::ActionProfile(profile.to_string()),
                    );
                    ActionCallRule {
                        name: format!("{}[{}]", profile, member),
                        args: Vec::new(),
                    }
                }
                TableImplementation::ActionSelector(selector) => {
                    let member = self.add_selector_member(&mut next, selector, rule_action)?;
                    config.properties.insert(
                        ACTION_SELECTOR_PROPERTY.to_string(),
                        TableProperty::ActionSelector(selector.to_string()),
                    );
                    ActionCallRule {
                        name: format!("{}[{}]", selector, member),
                        args: Vec::new(),
                    }
                }
            };
            config.add_rule(matches, rule_action);
            next.add_test_object(TABLE_CONFIGS, &self.table.name, TestObject::TableConfig(config));

            let index = self.action_index(&action_ref.name)?;
            self.set_table_result(&mut next, Expr::boolean(true), Some(index));
            next.add_trace_event(
                TraceKind::Table,
                format!("{}: control-plane entry, action {}", self.table.name, action.name),
                guard.clone(),
            );
            next.replace_top_body(vec![
                self.action_call_statement(&action_ref.name, &control_plane_args)
            ]);
            self.push(guard, next);
        }
        Ok(())
    }

    /// Tables without keys: the control plane may replace the default
    /// action when the default is not constant and the back end can say so.
    fn eval_no_key(&mut self) -> Result<(), StepError> {
        if self.table.default_is_const
            || !self.ctx.target.supports_default_override(self.setting().backend)
        {
            return Ok(());
        }
        let (table, program) = (self.table, self.ctx.program);
        let namespaces = self.state.namespaces().to_vec();
        let default_name = &table.default_action.name;
        for action_ref in table.actions.iter().filter(|a| &a.name != default_name) {
            let action = program
                .find_action(&namespaces, &action_ref.name)
                .ok_or_else(|| bug!("action {} does not exist", action_ref.name))?;
            let mut control_plane_args = Vec::new();
            let mut rule_args = Vec::new();
            for param in action.params.iter().skip(action_ref.args.len()) {
                let hint = format!("arg_{}_{}", action.name, param.name);
                let value = self.fresh_variable(param.ty.clone(), &hint);
                control_plane_args.push(Rc::clone(&value));
                rule_args.push((param.name.clone(), value));
            }
            let mut next = self.working.clone();
            let mut config = self.existing_config(&next)?;
            config.properties.insert(
                OVERRIDEN_DEFAULT_ACTION_PROPERTY.to_string(),
                TableProperty::OverridenDefaultAction(ActionCallRule {
                    name: action.name.clone(),
                    args: rule_args,
                }),
            );
            next.add_test_object(TABLE_CONFIGS, &self.table.name, TestObject::TableConfig(config));
            let index = self.action_index(&action_ref.name)?;
            self.set_table_result(&mut next, Expr::boolean(false), Some(index));
            next.add_trace_event(
                TraceKind::Table,
                format!("{}: default action overridden by {}", self.table.name, action.name),
                None,
            );
            next.replace_top_body(vec![
                self.action_call_statement(&action_ref.name, &control_plane_args)
            ]);
            self.push(None, next);
        }
        Ok(())
    }

    /// The default action, guarded by the miss of every entry considered.
    fn eval_default(&mut self) -> Result<(), StepError> {
        let guard = match self.chain.remainder() {
            Some(guard) => guard,
            None => return Ok(()),
        };
        let table = self.table;
        let default: &ActionCall = &table.default_action;
        let index = self.action_index(&default.name)?;
        let mut next = self.working.clone();
        self.set_table_result(&mut next, Expr::boolean(false), Some(index));
        next.add_trace_event(
            TraceKind::Table,
            format!("{}: miss, default action {}", self.table.name, default.name),
            guard.clone(),
        );
        next.replace_top_body(vec![self.action_call_statement(&default.name, &default.args)]);
        self.push(guard, next);
        Ok(())
    }
}
