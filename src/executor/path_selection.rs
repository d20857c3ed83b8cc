use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::executor::continuation::{Body, Command};
use crate::executor::execution_state::ExecutionState;
use crate::ir::expression::Expr;
use crate::ir::program::{BlockKind, ProgramInfo};
use crate::ir::statement::{Statement, StmtRef};

/// Strategy the driver uses to pick the next state from its frontier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathSelectionPolicy {
    DepthFirst,
    RandomBacktrack,
    GreedyStatementCoverage,
    MaxStatementCoverage,
}

impl FromStr for PathSelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dfs" | "depth_first" => Ok(PathSelectionPolicy::DepthFirst),
            "random" | "random_backtrack" => Ok(PathSelectionPolicy::RandomBacktrack),
            "greedy" | "greedy_statement_coverage" => {
                Ok(PathSelectionPolicy::GreedyStatementCoverage)
            }
            "max_coverage" | "max_statement_coverage" => {
                Ok(PathSelectionPolicy::MaxStatementCoverage)
            }
            _ => Err(format!("unknown path selection policy `{}`", s)),
        }
    }
}

impl fmt::Display for PathSelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PathSelectionPolicy::DepthFirst => "depth_first",
            PathSelectionPolicy::RandomBacktrack => "random_backtrack",
            PathSelectionPolicy::GreedyStatementCoverage => "greedy_statement_coverage",
            PathSelectionPolicy::MaxStatementCoverage => "max_statement_coverage",
        };
        write!(f, "{}", s)
    }
}

/// Whether branches must carry the statements their successor could cover.
///
/// # Examples
///
/// ```
/// use p4testgen::executor::path_selection::{requires_lookahead, PathSelectionPolicy};
///
/// assert!(requires_lookahead(PathSelectionPolicy::GreedyStatementCoverage));
/// assert!(!requires_lookahead(PathSelectionPolicy::DepthFirst));
/// ```
pub fn requires_lookahead(policy: PathSelectionPolicy) -> bool {
    matches!(
        policy,
        PathSelectionPolicy::GreedyStatementCoverage | PathSelectionPolicy::MaxStatementCoverage
    )
}

/// Collects the ids of statements that the pending work of `state` could
/// still visit and that it has not visited yet. The state is only read.
///
/// # Arguments
///
/// * `program` - The program, used to look into action and block bodies.
/// * `state` - The successor state to scan.
///
/// # Returns
///
/// The set of statement ids not yet in `state.visited()`.
pub fn compute_potential_nodes(program: &ProgramInfo, state: &ExecutionState) -> BTreeSet<usize> {
    let mut scanner = CoverageScanner {
        program,
        namespaces: state.namespaces().to_vec(),
        seen_actions: BTreeSet::new(),
        nodes: BTreeSet::new(),
    };
    scanner.scan_body(state.body());
    for frame in state.stack().iter() {
        scanner.namespaces = frame.namespaces.to_vec();
        scanner.scan_body(&frame.body);
    }
    let visited = state.visited();
    scanner
        .nodes
        .into_iter()
        .filter(|id| *id != 0 && !visited.contains(id))
        .collect()
}

struct CoverageScanner<'a> {
    program: &'a ProgramInfo,
    namespaces: Vec<String>,
    seen_actions: BTreeSet<String>,
    nodes: BTreeSet<usize>,
}

impl<'a> CoverageScanner<'a> {
    fn scan_body(&mut self, body: &Body) {
        for command in body.iter() {
            match command {
                Command::Statement(stmt) => self.scan_statement(stmt),
                Command::Invoke(block) => match block.kind {
                    BlockKind::Control => {
                        if let Some(control) = self.program.find_control(&block.name) {
                            self.scan_statement(&control.body);
                        }
                    }
                    BlockKind::Parser => {
                        if let Some(parser) = self.program.find_parser(&block.name) {
                            for state in &parser.states {
                                state.components.iter().for_each(|s| self.scan_statement(s));
                                if let Some(t) = &state.transition {
                                    self.scan_statement(t);
                                }
                            }
                        }
                    }
                },
                Command::ParserState(name) => {
                    let parser = self
                        .namespaces
                        .last()
                        .and_then(|ns| self.program.find_parser(ns));
                    if let Some(state) = parser.and_then(|p| p.states.iter().find(|s| &s.name == name)) {
                        state.components.iter().for_each(|s| self.scan_statement(s));
                        if let Some(t) = &state.transition {
                            self.scan_statement(t);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn scan_statement(&mut self, stmt: &StmtRef) {
        let id = stmt.meta().elem_id;
        if stmt.is_coverable() && id != 0 {
            self.nodes.insert(id);
        }
        if let Statement::MethodCall { call, .. } = stmt.as_ref() {
            self.scan_call(call);
        }
        for child in stmt.children() {
            self.scan_statement(child);
        }
    }

    fn scan_call(&mut self, call: &Expr) {
        let method = match call {
            Expr::MethodCall { method, .. } => method,
            _ => return,
        };
        if let Expr::Path { name, .. } = method.as_ref() {
            if self.seen_actions.contains(name) {
                return;
            }
            if let Some(action) = self.program.find_action(&self.namespaces, name) {
                self.seen_actions.insert(name.clone());
                let body = action.body.clone();
                self.scan_statement(&body);
            }
        }
    }
}
