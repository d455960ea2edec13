//! Error taxonomy for assembly and solving
//!
//! | Error | Raised by | Effect |
//! |-------|-----------|--------|
//! | [`AllocationError`] | edge preallocation | aborts assembly before any solve |
//! | [`AssemblyError`] | model builder | aborts assembly |
//! | [`SolveError`] | monolithic / planning / subproblem solve | aborts the current stage, returned with context |
//! | [`ConvergenceWarning`] | Benders loop | non-fatal, attached to the outcome |

use crate::engine::TerminationStatus;
use gridplan_core::{CaseError, EdgeCapability, EdgeId};
use std::fmt;
use thiserror::Error;

/// Edge capability/attribute mismatch found during preallocation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AllocationError {
    /// A capability is declared but an attribute needed to bound its variables is missing.
    #[error("edge {edge}: capability {capability:?} requires attribute `{attribute}`")]
    MissingAttribute {
        edge: EdgeId,
        capability: EdgeCapability,
        attribute: &'static str,
    },

    /// A capability depends on another capability that is not declared.
    #[error("edge {edge}: capability {capability:?} requires capability {requires:?}")]
    MissingCapability {
        edge: EdgeId,
        capability: EdgeCapability,
        requires: EdgeCapability,
    },

    /// Attribute values that cannot bound a variable.
    #[error("edge {edge}: invalid attribute `{attribute}`: {reason}")]
    InvalidAttribute {
        edge: EdgeId,
        attribute: &'static str,
        reason: String,
    },

    /// The same edge appears twice in one allocation call.
    #[error("edge {0} allocated twice")]
    DuplicateEdge(EdgeId),

    /// A handle for this (edge, kind, step) key is already registered.
    #[error("edge {edge}: {kind} handle for step {step:?} registered twice")]
    DuplicateHandle {
        edge: EdgeId,
        kind: &'static str,
        step: Option<usize>,
    },
}

/// Structural problems found while assembling the multi-period model.
#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    Case(#[from] CaseError),

    /// Periods are not numbered 1..N in order.
    #[error("period at position {position} has index {found}, expected {expected}")]
    PeriodOrder {
        position: usize,
        expected: usize,
        found: usize,
    },

    /// An edge with capacity in period `period` has no counterpart in the next period.
    #[error("period {period}: edge {edge} has no carry-over target in period {}", .period + 1)]
    MissingCarryOverTarget { period: usize, edge: EdgeId },

    /// Periods disagree on a setting that must be global.
    #[error("period {period}: {setting} differs from period 1")]
    InconsistentSettings { period: usize, setting: &'static str },

    /// Invalid discounting inputs.
    #[error("invalid discounting input: {0}")]
    Discounting(String),

    /// A handle was looked up that the store never allocated.
    #[error("period {period}: no {what} handle for edge {edge}")]
    MissingHandle {
        period: usize,
        edge: EdgeId,
        what: String,
    },

    /// A constraint or objective term couples operation variables of two periods.
    #[error("constraint `{constraint}` couples operations of periods {first} and {second}")]
    CrossPeriodCoupling {
        constraint: String,
        first: usize,
        second: usize,
    },
}

/// Where in the solve pipeline something happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStage {
    Monolithic,
    Planning { iteration: usize },
    Subproblem { period: usize, iteration: usize },
}

impl fmt::Display for SolveStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveStage::Monolithic => write!(f, "monolithic"),
            SolveStage::Planning { iteration } => write!(f, "planning (iteration {})", iteration),
            SolveStage::Subproblem { period, iteration } => {
                write!(f, "subproblem of period {} (iteration {})", period, iteration)
            }
        }
    }
}

/// A solve that cannot produce a usable answer. Never retried automatically.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolveError {
    #[error("{stage}: problem is infeasible")]
    Infeasible { stage: SolveStage },

    #[error("{stage}: problem is unbounded")]
    Unbounded { stage: SolveStage },

    /// The engine failed before returning a status.
    #[error("{stage}: solver engine failed: {message}")]
    Engine { stage: SolveStage, message: String },

    /// Dual values are needed for cut generation but the engine returned none.
    #[error("{stage}: engine did not report dual values")]
    MissingDuals { stage: SolveStage },
}

impl SolveError {
    pub fn stage(&self) -> SolveStage {
        match self {
            SolveError::Infeasible { stage }
            | SolveError::Unbounded { stage }
            | SolveError::Engine { stage, .. }
            | SolveError::MissingDuals { stage } => *stage,
        }
    }

    /// Period index when the failure happened in a subproblem.
    pub fn period(&self) -> Option<usize> {
        match self.stage() {
            SolveStage::Subproblem { period, .. } => Some(period),
            _ => None,
        }
    }
}

/// Why the decomposition loop stopped before meeting its tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitReason {
    Iterations,
    WallClock,
    /// A stage solve ended without optimality (time/iteration limit, numerics)
    SolverStatus,
}

/// Decomposition stopped without meeting the gap tolerance. Non-fatal.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceWarning {
    pub reason: LimitReason,
    pub iterations: usize,
    pub gap: f64,
    pub tolerance: f64,
    /// Status of the last solve before stopping
    pub last_status: TerminationStatus,
}

impl fmt::Display for ConvergenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self.reason {
            LimitReason::Iterations => "iteration limit",
            LimitReason::WallClock => "time limit",
            LimitReason::SolverStatus => "non-optimal solver status",
        };
        write!(
            f,
            "{} reached after {} iterations with relative gap {:.3e} (tolerance {:.3e})",
            reason, self.iterations, self.gap, self.tolerance
        )
    }
}

/// Umbrella error for the top-level `run` entry point.
#[derive(Error, Debug)]
pub enum ExpansionError {
    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Solve(#[from] SolveError),

    #[error(transparent)]
    Case(#[from] CaseError),

    #[error("unknown solver engine '{0}'")]
    UnknownEngine(String),
}

impl From<AllocationError> for ExpansionError {
    fn from(err: AllocationError) -> Self {
        ExpansionError::Assembly(AssemblyError::Allocation(err))
    }
}
