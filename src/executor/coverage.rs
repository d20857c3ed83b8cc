use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashSet, FxHasher};

use crate::executor::execution_state::TraceEvent;

/// Tracks which statements the generated tests cover and how many distinct
/// paths they exercise.
///
/// # Fields
/// - `covered`: Statement ids visited by at least one finished path.
/// - `total`: Number of coverable statements in the program.
/// - `paths`: Hashes of the finished paths, over their visited statements
///   and trace messages.
///
/// # Methods
/// ## `new`
/// Creates a tracker for a program with `total` statements.
///
/// ## `record_path`
/// Records a finished path.
///
/// ### Returns
/// `true` if the path was not seen before.
///
/// ## `would_cover_new`
/// Whether any of the given statements is not covered yet.
///
/// ## `statement_coverage`
/// The covered fraction of the program's statements, between 0 and 1.
///
/// # Example
/// ```rust
/// use std::collections::BTreeSet;
/// use p4testgen::executor::coverage::CoverageTracker;
///
/// let mut tracker = CoverageTracker::new(4);
/// let visited: BTreeSet<usize> = [1, 2].into_iter().collect();
///
/// assert!(tracker.record_path(&visited, &[]));
/// assert!(!tracker.record_path(&visited, &[]));
/// assert_eq!(tracker.coverage_count(), 1);
/// assert_eq!(tracker.statement_coverage(), 0.5);
/// ```
#[derive(Clone, Debug)]
pub struct CoverageTracker {
    covered: BTreeSet<usize>,
    total: usize,
    paths: FxHashSet<u64>,
}

impl CoverageTracker {
    pub fn new(total: usize) -> Self {
        CoverageTracker {
            covered: BTreeSet::new(),
            total,
            paths: FxHashSet::default(),
        }
    }

    pub fn record_path(&mut self, visited: &BTreeSet<usize>, trace: &[TraceEvent]) -> bool {
        self.covered.extend(visited.iter().filter(|id| **id != 0));
        let mut hasher = FxHasher::default();
        visited.hash(&mut hasher);
        for event in trace {
            event.message.hash(&mut hasher);
        }
        self.paths.insert(hasher.finish())
    }

    pub fn would_cover_new(&self, nodes: &BTreeSet<usize>) -> bool {
        nodes.iter().any(|id| !self.covered.contains(id))
    }

    /// Number of statements in `nodes` not covered yet.
    pub fn new_nodes(&self, nodes: &BTreeSet<usize>) -> usize {
        nodes.iter().filter(|id| !self.covered.contains(id)).count()
    }

    pub fn covered(&self) -> &BTreeSet<usize> {
        &self.covered
    }

    pub fn statement_coverage(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.covered.len() as f64 / self.total as f64
    }

    pub fn coverage_count(&self) -> usize {
        self.paths.len()
    }

    pub fn clear(&mut self) {
        self.covered.clear();
        self.paths.clear();
    }
}
