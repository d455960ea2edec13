//! # gridplan-algo: Model Assembly and Solve Control for Capacity Expansion
//!
//! This crate turns a multi-period [`Case`](gridplan_core::Case) into one
//! linear (or mixed-integer) program and solves it, either in a single
//! engine call or by Benders decomposition over planning periods.
//!
//! ## Assembly
//!
//! | Step | Component | Output |
//! |------|-----------|--------|
//! | Edge preallocation | [`EdgeVariableStore`] | variables and allocation rows per edge |
//! | Period assembly | [`ModelBuilder`] | balances, capacity rows, per-period cost expressions |
//! | Carry-over | [`ModelBuilder`] | period `s+1` start capacity linked to period `s` end capacity |
//! | Discounting | [`CostAggregator`] | total discounted cost objective |
//!
//! Every variable carries a [`Stage`]: investment variables are
//! [`Stage::Planning`], dispatch variables are [`Stage::Operation`] of their
//! period. The Benders split relies only on these tags.
//!
//! ## Solving
//!
//! The [`DecompositionController`] dispatches on the case's
//! [`SolutionAlgorithm`](gridplan_core::SolutionAlgorithm):
//!
//! - **Monolithic**: one call to the configured [`SolverEngine`].
//! - **Benders**: planning problem with cost-to-go variables plus one
//!   operational subproblem per period, iterated until the relative gap
//!   between the bounds is within tolerance.
//!
//! Engines are selected by name through [`SolverKind`]; `clarabel` is the
//! default and the only one that reports duals (required by Benders).
//!
//! ## Example
//!
//! ```ignore
//! use gridplan_algo::{run, test_utils::synthetic_case};
//! use gridplan_core::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("expansion.toml"))?;
//! let mut case = synthetic_case(3);
//! let outcome = run(&mut case, &config)?;
//! println!("Total discounted cost: {:.2}", outcome.objective());
//! ```

pub mod builder;
pub mod cost;
pub mod decomposition;
pub mod engine;
pub mod error;
pub mod program;
pub mod store;
pub mod telemetry;
pub mod test_utils;

pub use builder::{AssembledModel, ModelBuilder, PeriodModel};
pub use cost::{CostAggregator, DiscountedCosts, PeriodCosts};
pub use decomposition::{
    run, BendersCut, BendersState, DecompositionController, DecompositionOutcome,
    DecompositionSettings, DecompositionState, IterationRecord, MonolithicOutcome, SolveOutcome,
};
pub use engine::{ProgramSolution, SolverEngine, SolverKind, TerminationStatus};
pub use error::{
    AllocationError, AssemblyError, ConvergenceWarning, ExpansionError, LimitReason, SolveError,
    SolveStage,
};
pub use program::{LinearExpr, LinearProgram, Sense, Stage, VariableDef, VariableId};
pub use store::{validate_edge, ConstraintKind, EdgeVariableStore, VariableKind};
pub use telemetry::init_tracing;
