use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use colored::Colorize;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Serialize, Serializer};

use crate::executor::branch::Branch;
use crate::executor::continuation::{Command, ExceptionKind, PropertyValue};
use crate::executor::coverage::CoverageTracker;
use crate::executor::error::{ExecutorError, StepError};
use crate::executor::execution_state::ExecutionState;
use crate::executor::path_selection::PathSelectionPolicy;
use crate::executor::small_step::SmallStepEvaluator;
use crate::executor::symbolic_setting::TestgenSetting;
use crate::executor::symbolic_value::{collect_symbolic_vars, evaluate, Model};
use crate::executor::test_object::{TableConfig, TestObject, TABLE_CONFIGS};
use crate::ir::expression::{ExprRef, StateVariable};
use crate::ir::program::{BlockKind, ProgramInfo};
use crate::solver::{Solver, SolverResult};
use crate::targets::{zero_value, TargetExtension};

fn ser_model<S: Serializer>(model: &Model, s: S) -> Result<S::Ok, S::Error> {
    s.collect_map(model.iter().map(|(k, v)| (k.clone(), v.to_string())))
}

#[derive(Clone, Debug, Serialize)]
pub struct PacketField {
    pub label: String,
    pub value: String,
}

/// A finished path with every symbolic value resolved by the solver model.
/// This is what a test emitter turns into an STF, PTF or Protobuf test.
#[derive(Clone, Debug, Serialize)]
pub struct AbstractTest {
    pub id: usize,
    pub input_packet: Vec<PacketField>,
    pub input_packet_bits: u64,
    pub output_packet: Vec<PacketField>,
    /// The exception that ended the path, if any.
    pub exception: Option<ExceptionKind>,
    pub test_objects: BTreeMap<String, BTreeMap<String, TestObject>>,
    pub properties: BTreeMap<String, PropertyValue>,
    #[serde(serialize_with = "ser_model")]
    pub model: Model,
    pub trace: Vec<String>,
    pub covered_statements: Vec<usize>,
}

impl AbstractTest {
    pub fn table_config(&self, table: &str) -> Option<&TableConfig> {
        self.test_objects
            .get(TABLE_CONFIGS)
            .and_then(|objs| objs.get(table))
            .and_then(|obj| obj.as_table_config())
    }

    pub fn test_object(&self, category: &str, name: &str) -> Option<&TestObject> {
        self.test_objects.get(category).and_then(|objs| objs.get(name))
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ExecutionStats {
    pub steps: usize,
    pub finished_paths: usize,
    pub abandoned_paths: usize,
    pub infeasible_branches: usize,
    pub unknown_branches: usize,
    /// Finished paths for which the solver found no model.
    pub unsolved_paths: usize,
}

struct PendingState {
    state: ExecutionState,
    steps: usize,
    potential_nodes: BTreeSet<usize>,
}

/// Explores the paths of a program and collects one abstract test per
/// feasible finished path.
pub struct SymbolicExecutor<'a> {
    pub program: &'a ProgramInfo,
    pub setting: &'a TestgenSetting,
    evaluator: SmallStepEvaluator<'a>,
    solver: Box<dyn Solver + 'a>,
    frontier: Vec<PendingState>,
    rng: StdRng,
    backtrack: bool,
    pub coverage: CoverageTracker,
    pub tests: Vec<AbstractTest>,
    pub stats: ExecutionStats,
}

impl<'a> SymbolicExecutor<'a> {
    pub fn new(
        program: &'a ProgramInfo,
        target: &'a dyn TargetExtension,
        setting: &'a TestgenSetting,
        solver: Box<dyn Solver + 'a>,
    ) -> Self {
        SymbolicExecutor {
            program,
            setting,
            evaluator: SmallStepEvaluator::new(program, target, setting),
            solver,
            frontier: Vec::new(),
            rng: StdRng::seed_from_u64(setting.seed),
            backtrack: false,
            coverage: CoverageTracker::new(program.statement_count()),
            tests: Vec::new(),
            stats: ExecutionStats::default(),
        }
    }

    /// Builds the root state: the pipeline blocks in order, with every global
    /// variable declared.
    pub fn initial_state(&self) -> Result<ExecutionState, ExecutorError> {
        if self.program.pipeline.is_empty() {
            return Err(ExecutorError::InvalidProgram(format!(
                "program {} has no pipeline",
                self.program.name
            )));
        }
        for block in &self.program.pipeline {
            let exists = match block.kind {
                BlockKind::Parser => self.program.find_parser(&block.name).is_some(),
                BlockKind::Control => self.program.find_control(&block.name).is_some(),
            };
            if !exists {
                return Err(ExecutorError::InvalidProgram(format!(
                    "pipeline block {} is not declared",
                    block.name
                )));
            }
        }
        let mut state = ExecutionState::with_body(
            self.program
                .pipeline
                .iter()
                .map(|b| Command::Invoke(b.clone()))
                .collect(),
        );
        let ctx = self.evaluator.context();
        for decl in &self.program.variables {
            let var = StateVariable::new(&decl.name, decl.ty.clone());
            state.declare_variable(&ctx, &var, &decl.init)?;
        }
        Ok(state)
    }

    fn test_limit_reached(&self) -> bool {
        self.setting.max_tests != 0 && self.tests.len() >= self.setting.max_tests
    }

    /// Runs the exploration until the frontier is empty or the test limit is
    /// reached.
    ///
    /// # Returns
    ///
    /// The generated tests, or an error if the run hit an internal bug.
    pub fn run(&mut self) -> Result<&[AbstractTest], ExecutorError> {
        let root = self.initial_state()?;
        self.frontier.push(PendingState {
            state: root,
            steps: 0,
            potential_nodes: BTreeSet::new(),
        });

        while !self.test_limit_reached() {
            let pending = match self.select_state() {
                Some(pending) => pending,
                None => break,
            };
            if pending.state.is_terminated() {
                self.finish_path(&pending.state);
                continue;
            }
            if pending.steps >= self.setting.max_steps_per_path {
                warn!(
                    "Path abandoned after {} steps without finishing",
                    pending.steps
                );
                self.stats.abandoned_paths += 1;
                continue;
            }
            self.stats.steps += 1;
            match self.evaluator.step(&pending.state) {
                Ok(branches) if branches.is_empty() => self.finish_path(&pending.state),
                Ok(branches) => self.admit(branches, pending.steps + 1),
                Err(StepError::Unimplemented(msg)) => {
                    warn!("Path abandoned: unimplemented {}", msg);
                    self.stats.abandoned_paths += 1;
                    self.backtrack = true;
                }
                Err(StepError::Bug(msg)) => return Err(ExecutorError::Bug(msg)),
            }
        }

        info!(
            "{} tests generated, {:.1}% statement coverage",
            self.tests.len(),
            self.coverage.statement_coverage() * 100.0
        );
        Ok(&self.tests)
    }

    /// Adds the feasible successors to the frontier, first branch on top.
    fn admit(&mut self, branches: Vec<Branch>, steps: usize) {
        let mut admitted = Vec::new();
        for branch in branches {
            let mut next = branch.next_state;
            if let Some(guard) = &branch.guard {
                next.add_path_constraint(Rc::clone(guard));
                match self.solver.solve(next.path_constraint()) {
                    SolverResult::Unsat => {
                        debug!("infeasible branch under {}", guard);
                        self.stats.infeasible_branches += 1;
                        continue;
                    }
                    SolverResult::Unknown => self.stats.unknown_branches += 1,
                    SolverResult::Sat(_) => {}
                }
            }
            admitted.push(PendingState {
                state: next,
                steps,
                potential_nodes: branch.potential_nodes,
            });
        }
        self.frontier.extend(admitted.into_iter().rev());
    }

    fn select_state(&mut self) -> Option<PendingState> {
        if self.frontier.is_empty() {
            return None;
        }
        let index = match self.setting.path_selection {
            PathSelectionPolicy::DepthFirst => self.frontier.len() - 1,
            PathSelectionPolicy::RandomBacktrack => {
                if self.backtrack {
                    self.backtrack = false;
                    self.rng.gen_range(0, self.frontier.len())
                } else {
                    self.frontier.len() - 1
                }
            }
            PathSelectionPolicy::GreedyStatementCoverage => self
                .frontier
                .iter()
                .rposition(|p| self.coverage.would_cover_new(&p.potential_nodes))
                .unwrap_or(self.frontier.len() - 1),
            PathSelectionPolicy::MaxStatementCoverage => {
                let mut best = self.frontier.len() - 1;
                let mut best_count = 0;
                for (i, p) in self.frontier.iter().enumerate() {
                    let count = self.coverage.new_nodes(&p.potential_nodes);
                    if count >= best_count && count > 0 {
                        best = i;
                        best_count = count;
                    }
                }
                best
            }
        };
        Some(self.frontier.remove(index))
    }

    /// Gives every variable of the test a value; variables the constraints
    /// leave free are zero.
    fn complete_model(&self, mut model: Model, state: &ExecutionState) -> Model {
        let mut exprs: Vec<ExprRef> = Vec::new();
        exprs.extend(state.input_packet().iter().map(|(_, e)| Rc::clone(e)));
        exprs.extend(state.output_packet().iter().map(|(_, e)| Rc::clone(e)));
        for objs in state.test_objects().values() {
            for obj in objs.values() {
                exprs.extend(obj.exprs());
            }
        }
        let mut vars = BTreeMap::new();
        for e in &exprs {
            collect_symbolic_vars(e, &mut vars);
        }
        for (name, ty) in vars {
            model.entry(name).or_insert_with(|| zero_value(&ty));
        }
        model
    }

    fn finish_path(&mut self, state: &ExecutionState) {
        self.stats.finished_paths += 1;
        self.backtrack = true;
        let model = match self.solver.solve(state.path_constraint()) {
            SolverResult::Sat(model) => model,
            other => {
                debug!("finished path dropped, solver result {:?}", other);
                self.stats.unsolved_paths += 1;
                return;
            }
        };
        let model = self.complete_model(model, state);
        let concretize = |fields: &[(String, ExprRef)]| {
            fields
                .iter()
                .map(|(label, e)| PacketField {
                    label: label.clone(),
                    value: evaluate(e, &model).to_string(),
                })
                .collect::<Vec<_>>()
        };
        let test = AbstractTest {
            id: self.tests.len(),
            input_packet: concretize(state.input_packet()),
            input_packet_bits: state.input_packet_bits(),
            output_packet: concretize(state.output_packet()),
            exception: state.exception(),
            test_objects: state
                .test_objects()
                .iter()
                .map(|(category, objs)| {
                    let objs = objs
                        .iter()
                        .map(|(name, obj)| (name.clone(), obj.evaluate(&model)))
                        .collect();
                    (category.clone(), objs)
                })
                .collect(),
            properties: state.properties().clone(),
            trace: state.trace().iter().map(|e| e.to_string()).collect(),
            covered_statements: state.visited().iter().copied().filter(|id| *id != 0).collect(),
            model,
        };
        let new_path = self.coverage.record_path(state.visited(), state.trace());
        info!(
            "{} {} ({:.1}% statement coverage{})",
            "generated test".green(),
            test.id,
            self.coverage.statement_coverage() * 100.0,
            if new_path { "" } else { ", repeated path" }
        );
        self.tests.push(test);
    }
}
