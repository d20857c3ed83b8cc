use std::collections::BTreeSet;
use std::rc::Rc;

use crate::executor::execution_state::ExecutionState;
use crate::executor::symbolic_value::{conjoin, mk_lnot, simplify};
use crate::ir::expression::ExprRef;

/// One outcome of a step: the successor state and the condition under which
/// it is taken. A `None` guard means the successor is unconditional.
#[derive(Clone, Debug)]
pub struct Branch {
    pub guard: Option<ExprRef>,
    pub prior_state: ExecutionState,
    pub next_state: ExecutionState,
    /// Statements the successor could still cover, filled in only when the
    /// path selection policy needs lookahead.
    pub potential_nodes: BTreeSet<usize>,
}

impl Branch {
    pub fn new(guard: Option<ExprRef>, prior_state: &ExecutionState, next_state: ExecutionState) -> Self {
        Branch {
            guard,
            prior_state: prior_state.clone(),
            next_state,
            potential_nodes: BTreeSet::new(),
        }
    }

    pub fn unconditional(prior_state: &ExecutionState, next_state: ExecutionState) -> Self {
        Branch::new(None, prior_state, next_state)
    }
}

/// Builds the guards of a forking node so that their disjunction covers
/// every case. `None` stands for `true` throughout.
#[derive(Clone, Debug, Default)]
pub struct GuardChain {
    miss: Option<ExprRef>,
    exhausted: bool,
    /// Miss of the exclusive outcomes, fixed by the first independent one.
    prior: Option<Option<ExprRef>>,
}

impl GuardChain {
    pub fn new() -> Self {
        GuardChain::default()
    }

    /// Guard of an outcome taken when `cond` holds and no earlier outcome
    /// did. Returns `None` when the outcome is infeasible; a condition that
    /// always holds closes the chain.
    pub fn exclusive(&mut self, cond: Option<ExprRef>) -> Option<Option<ExprRef>> {
        if self.exhausted {
            return None;
        }
        let guard = match &cond {
            Some(c) => conjoin(self.miss.clone(), Rc::clone(c)),
            None => self.miss.clone(),
        };
        self.record_miss(cond);
        fold_guard(guard)
    }

    /// Guard of an outcome that only depends on `cond` and on the miss of
    /// the exclusive outcomes recorded before it, e.g. a control-plane entry
    /// with its own fresh variables after the initial entries. Independent
    /// outcomes do not exclude each other, but their miss still accumulates
    /// for `remainder`.
    pub fn independent(&mut self, cond: Option<ExprRef>) -> Option<Option<ExprRef>> {
        let prior = match &self.prior {
            Some(prior) => prior.clone(),
            None => {
                if self.exhausted {
                    return None;
                }
                self.prior = Some(self.miss.clone());
                self.miss.clone()
            }
        };
        let guard = match &cond {
            Some(c) => conjoin(prior, Rc::clone(c)),
            None => prior,
        };
        self.record_miss(cond);
        fold_guard(guard)
    }

    /// Whether an outcome added now could still be taken.
    pub fn is_open(&self) -> bool {
        self.prior.is_some() || !self.exhausted
    }

    /// Guard of the fallthrough outcome: no earlier outcome was taken.
    pub fn remainder(&self) -> Option<Option<ExprRef>> {
        if self.exhausted {
            return None;
        }
        fold_guard(self.miss.clone())
    }

    fn record_miss(&mut self, cond: Option<ExprRef>) {
        match cond {
            None => self.exhausted = true,
            Some(c) => {
                let miss = simplify(&mk_lnot(c));
                self.miss = conjoin(self.miss.take(), miss);
                if self.miss.as_ref().and_then(|m| m.as_bool()) == Some(false) {
                    self.exhausted = true;
                }
            }
        }
    }
}

/// Folds a guard: `Some(None)` for an unconditional branch, `None` for an
/// infeasible one.
pub fn fold_guard(guard: Option<ExprRef>) -> Option<Option<ExprRef>> {
    match guard.map(|g| simplify(&g)) {
        None => Some(None),
        Some(g) => match g.as_bool() {
            Some(true) => Some(None),
            Some(false) => None,
            None => Some(Some(g)),
        },
    }
}
