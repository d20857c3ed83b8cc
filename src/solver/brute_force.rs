use log::{debug, trace};
use num_bigint_dig::BigInt;
use num_traits::{One, Zero};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;

use crate::executor::symbolic_setting::TestgenSetting;
use crate::executor::symbolic_value::{
    collect_constants, collect_symbolic_vars, evaluate, mk_constant, Model,
};
use crate::executor::utils::{all_ones, wrap_to_width};
use crate::ir::expression::{Expr, ExprRef};
use crate::ir::types::Type;
use crate::solver::{Solver, SolverResult};

/// A bounded backtracking search over small candidate domains.
///
/// Narrow variables are enumerated exhaustively. Wide ones only try values
/// near the constants of the constraints, so a failed search over them is
/// `Unknown` rather than `Unsat`.
pub struct BruteForceSolver {
    pub max_assignments: usize,
    pub full_enumeration_bits: u32,
    pub extra_candidates: Vec<BigInt>,
}

impl BruteForceSolver {
    pub fn new(setting: &TestgenSetting) -> Self {
        BruteForceSolver {
            max_assignments: setting.solver_max_assignments,
            full_enumeration_bits: setting.solver_full_enumeration_bits,
            extra_candidates: setting.solver_extra_candidates.clone(),
        }
    }

    /// Candidate values of a variable of type `ty`.
    ///
    /// # Returns
    ///
    /// The candidates, and whether they cover the whole domain.
    fn candidates(&self, ty: &Type, constants: &[BigInt]) -> (Vec<BigInt>, bool) {
        let (width, signed) = match ty {
            Type::Bool => return ((0..2).map(BigInt::from).collect(), true),
            Type::Enum { members, .. } => {
                return ((0..members.len()).map(BigInt::from).collect(), true)
            }
            Type::Bits { width, signed } => (*width, *signed),
            Type::Error => (32, false),
            _ => return (vec![BigInt::zero()], false),
        };
        if width <= self.full_enumeration_bits {
            let values = (0..(1_u64 << width))
                .map(|v| wrap_to_width(&BigInt::from(v), width, signed))
                .collect();
            return (values, true);
        }

        let mut raw = vec![BigInt::zero(), BigInt::one(), all_ones(width)];
        for c in constants.iter().chain(self.extra_candidates.iter()) {
            raw.push(c.clone());
            raw.push(c + BigInt::one());
            raw.push(c - BigInt::one());
        }
        let mut seen = FxHashSet::default();
        let values = raw
            .into_iter()
            .map(|v| wrap_to_width(&v, width, signed))
            .filter(|v| seen.insert(v.clone()))
            .collect();
        (values, false)
    }
}

/// A constraint that does not fold to a boolean under a full assignment
/// (taint, unsupported operations) is not held against the assignment.
fn holds(constraint: &ExprRef, model: &Model) -> bool {
    match evaluate(constraint, model).as_ref() {
        Expr::Bool { value } => *value,
        _ => true,
    }
}

impl Solver for BruteForceSolver {
    fn solve(&mut self, constraints: &[ExprRef]) -> SolverResult {
        let mut variables: Vec<(String, Type)> = Vec::new();
        let mut per_constraint = Vec::new();
        let mut seen = FxHashSet::default();
        for c in constraints {
            let mut vars = BTreeMap::new();
            collect_symbolic_vars(c, &mut vars);
            for (name, ty) in &vars {
                if seen.insert(name.clone()) {
                    variables.push((name.clone(), ty.clone()));
                }
            }
            per_constraint.push(vars);
        }
        let position: FxHashMap<&str, usize> = variables
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (name.as_str(), i))
            .collect();

        // A constraint is checked as soon as its last variable is assigned.
        let mut checks: Vec<Vec<&ExprRef>> = vec![Vec::new(); variables.len() + 1];
        for (c, vars) in constraints.iter().zip(per_constraint.iter()) {
            let depth = vars
                .keys()
                .filter_map(|n| position.get(n.as_str()))
                .map(|i| i + 1)
                .max()
                .unwrap_or(0);
            checks[depth].push(c);
        }

        let mut model = Model::new();
        if !checks[0].iter().all(|c| holds(c, &model)) {
            return SolverResult::Unsat;
        }

        let mut constants = Vec::new();
        for c in constraints {
            collect_constants(c, &mut constants);
        }
        let mut complete = true;
        let domains: Vec<Vec<BigInt>> = variables
            .iter()
            .map(|(_, ty)| {
                let (values, full) = self.candidates(ty, &constants);
                complete &= full;
                values
            })
            .collect();

        fn search(
            index: usize,
            variables: &[(String, Type)],
            domains: &[Vec<BigInt>],
            checks: &[Vec<&ExprRef>],
            model: &mut Model,
            budget: &mut usize,
            truncated: &mut bool,
        ) -> bool {
            if index == variables.len() {
                return true;
            }
            let (name, ty) = &variables[index];
            for value in &domains[index] {
                if *budget == 0 {
                    *truncated = true;
                    return false;
                }
                *budget -= 1;
                model.insert(name.clone(), mk_constant(ty, value.clone()));
                if checks[index + 1].iter().all(|c| holds(c, model))
                    && search(index + 1, variables, domains, checks, model, budget, truncated)
                {
                    return true;
                }
            }
            model.remove(name);
            false
        }

        let mut budget = self.max_assignments;
        let mut truncated = false;
        let found = search(
            0,
            &variables,
            &domains,
            &checks,
            &mut model,
            &mut budget,
            &mut truncated,
        );
        trace!(
            "solver: {} constraints, {} variables, {} assignments tried",
            constraints.len(),
            variables.len(),
            self.max_assignments - budget
        );
        if found {
            SolverResult::Sat(model)
        } else if complete && !truncated {
            SolverResult::Unsat
        } else {
            debug!(
                "solver gave up on {} constraints over {} variables",
                constraints.len(),
                variables.len()
            );
            SolverResult::Unknown
        }
    }
}
