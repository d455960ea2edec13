//! Solver engine seam
//!
//! The assembled [`LinearProgram`] is handed to a [`SolverEngine`] together
//! with free-form [`SolverAttributes`]. Engines report a
//! [`TerminationStatus`], an objective value, primal values and, when they
//! can, dual values of every constraint row.
//!
//! | Engine | Integrality | Duals | Notes |
//! |--------|-------------|-------|-------|
//! | [`ClarabelEngine`] | relaxed | yes | interior point, used for Benders |
//! | [`GoodLpEngine`] | honoured with `solver-highs` | no | monolithic MIP solves |
//!
//! # Dual sign convention
//!
//! `duals[i]` is the sensitivity of the optimal objective to the right-hand
//! side of constraint `i`: `∂z*/∂bᵢ`, whatever the row sense.

mod clarabel;
#[cfg(any(feature = "solver-clarabel", feature = "solver-highs"))]
mod good_lp;

pub use self::clarabel::ClarabelEngine;
#[cfg(any(feature = "solver-clarabel", feature = "solver-highs"))]
pub use self::good_lp::GoodLpEngine;

use crate::error::ExpansionError;
use crate::program::{LinearProgram, Sense};
use gridplan_core::SolverAttributes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Termination status reported by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationStatus {
    Optimal,
    Infeasible,
    Unbounded,
    TimeLimit,
    IterationLimit,
    NumericalError,
}

impl TerminationStatus {
    pub fn is_optimal(&self) -> bool {
        matches!(self, TerminationStatus::Optimal)
    }

    /// Infeasible and unbounded outcomes carry no usable point.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TerminationStatus::Infeasible | TerminationStatus::Unbounded
        )
    }
}

impl fmt::Display for TerminationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationStatus::Optimal => "optimal",
            TerminationStatus::Infeasible => "infeasible",
            TerminationStatus::Unbounded => "unbounded",
            TerminationStatus::TimeLimit => "time-limit",
            TerminationStatus::IterationLimit => "iteration-limit",
            TerminationStatus::NumericalError => "numerical-error",
        };
        f.write_str(s)
    }
}

const CONSTANT_ROW_TOLERANCE: f64 = 1e-9;

/// Result of one engine call.
#[derive(Debug, Clone)]
pub struct ProgramSolution {
    pub status: TerminationStatus,
    /// Objective value including the objective constant
    pub objective: f64,
    /// Primal values indexed by variable (empty for fatal statuses)
    pub values: Vec<f64>,
    /// Row sensitivities indexed by constraint, when the engine provides them
    pub duals: Option<Vec<f64>>,
    pub iterations: usize,
    pub solve_time: Duration,
}

impl ProgramSolution {
    /// Solution of a program without variables.
    ///
    /// Every row reduces to `0 <sense> rhs`; a violated row makes the program
    /// infeasible.
    pub fn trivial(program: &LinearProgram) -> Self {
        let violated = program.constraints().iter().any(|row| {
            let tol = CONSTANT_ROW_TOLERANCE * row.rhs.abs().max(1.0);
            match row.sense {
                Sense::Equal => row.rhs.abs() > tol,
                Sense::LessEqual => row.rhs < -tol,
                Sense::GreaterEqual => row.rhs > tol,
            }
        });
        if violated {
            return Self::without_point(TerminationStatus::Infeasible);
        }
        Self {
            status: TerminationStatus::Optimal,
            objective: program.objective().constant_term(),
            values: Vec::new(),
            duals: Some(vec![0.0; program.num_constraints()]),
            iterations: 0,
            solve_time: Duration::ZERO,
        }
    }

    pub fn without_point(status: TerminationStatus) -> Self {
        Self {
            status,
            objective: f64::NAN,
            values: Vec::new(),
            duals: None,
            iterations: 0,
            solve_time: Duration::ZERO,
        }
    }
}

/// Failures inside an engine before a status could be determined.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("solver setup failed: {0}")]
    Setup(String),

    #[error("solver backend error: {0}")]
    Backend(String),
}

/// Solves assembled programs.
pub trait SolverEngine: Send + Sync {
    /// Unique identifier (e.g. "clarabel", "good_lp")
    fn id(&self) -> &str;

    /// Whether [`ProgramSolution::duals`] is populated on success.
    fn provides_duals(&self) -> bool;

    fn solve(
        &self,
        program: &LinearProgram,
        attributes: &SolverAttributes,
    ) -> Result<ProgramSolution, EngineError>;
}

/// Registry of built-in engines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SolverKind {
    #[default]
    Clarabel,
    #[cfg(any(feature = "solver-clarabel", feature = "solver-highs"))]
    GoodLp,
}

impl FromStr for SolverKind {
    type Err = ExpansionError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_ascii_lowercase().as_str() {
            "clarabel" | "default" => Ok(SolverKind::Clarabel),
            #[cfg(any(feature = "solver-clarabel", feature = "solver-highs"))]
            "good_lp" | "goodlp" | "milp" => Ok(SolverKind::GoodLp),
            _ => Err(ExpansionError::UnknownEngine(input.to_string())),
        }
    }
}

impl SolverKind {

    pub fn build_engine(self) -> Arc<dyn SolverEngine> {
        match self {
            SolverKind::Clarabel => Arc::new(ClarabelEngine::default()),
            #[cfg(any(feature = "solver-clarabel", feature = "solver-highs"))]
            SolverKind::GoodLp => Arc::new(GoodLpEngine::default()),
        }
    }

    pub fn available() -> &'static [&'static str] {
        #[cfg(any(feature = "solver-clarabel", feature = "solver-highs"))]
        {
            &["clarabel", "good_lp"]
        }
        #[cfg(not(any(feature = "solver-clarabel", feature = "solver-highs")))]
        {
            &["clarabel"]
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SolverKind::Clarabel => "clarabel",
            #[cfg(any(feature = "solver-clarabel", feature = "solver-highs"))]
            SolverKind::GoodLp => "good_lp",
        }
    }
}
