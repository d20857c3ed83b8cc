pub mod brute_force;

use crate::executor::symbolic_value::Model;
use crate::ir::expression::ExprRef;

pub use brute_force::BruteForceSolver;

#[derive(Clone, Debug, PartialEq)]
pub enum SolverResult {
    /// The constraints hold under the model.
    Sat(Model),
    Unsat,
    /// The solver gave up before deciding.
    Unknown,
}

impl SolverResult {
    /// Whether the constraints may be satisfiable. `Unknown` counts as
    /// feasible so that no reachable path is dropped.
    pub fn is_feasible(&self) -> bool {
        !matches!(self, SolverResult::Unsat)
    }

    pub fn model(&self) -> Option<&Model> {
        match self {
            SolverResult::Sat(model) => Some(model),
            _ => None,
        }
    }
}

/// Decides conjunctions of boolean constraints over symbolic variables.
pub trait Solver {
    fn solve(&mut self, constraints: &[ExprRef]) -> SolverResult;
}
