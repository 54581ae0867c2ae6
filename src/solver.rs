mod pbs;
mod selection;

pub use pbs::{BranchStep, PBS};
pub use selection::ConflictSelection;

use crate::common::Solution;
use crate::config::Config;
use crate::stat::Stats;

use std::fmt;
use thiserror::Error;

pub trait Solver {
    fn solve(&mut self, config: &Config) -> Result<Solution, SolveError>;

    fn stats(&self) -> &Stats;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetReason {
    TimeLimit,
    NodeLimit,
}

impl fmt::Display for BudgetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetReason::TimeLimit => write!(f, "time limit"),
            BudgetReason::NodeLimit => write!(f, "node limit"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SolveError {
    /// Every branch of the priority tree was discarded.
    #[error("no solution exists under priority-based search")]
    Exhausted,

    /// Inconclusive: the search stopped early and carries the statistics gathered so far.
    #[error("search budget exceeded: {reason}")]
    BudgetExceeded {
        reason: BudgetReason,
        stats: Box<Stats>,
    },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl SolveError {
    /// Status column of the stats report.
    pub fn status(&self) -> &'static str {
        match self {
            SolveError::Exhausted => "exhausted",
            SolveError::BudgetExceeded {
                reason: BudgetReason::TimeLimit,
                ..
            } => "timeout",
            SolveError::BudgetExceeded {
                reason: BudgetReason::NodeLimit,
                ..
            } => "node_limit",
            SolveError::InvariantViolation(_) => "invariant_violation",
        }
    }
}
