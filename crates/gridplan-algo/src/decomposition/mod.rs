//! Solve strategies for the assembled program
//!
//! The [`DecompositionController`] owns a [`SolverEngine`] and the solve
//! settings. It runs one of two strategies, selected by the case's
//! [`SolutionAlgorithm`]:
//!
//! - **Monolithic** – the whole program in one engine call
//!   ([`DecompositionController::solve_monolithic`]).
//! - **Benders** – planning problem and per-period operational subproblems,
//!   iterated until the bounds meet
//!   ([`DecompositionController::solve_benders`]).
//!
//! [`run`] is the end-to-end entry point: configuration, assembly, solve.

mod benders;
mod monolithic;
pub mod split;

pub use benders::{BendersCut, BendersState, DecompositionOutcome, DecompositionState, IterationRecord};
pub use monolithic::MonolithicOutcome;

use crate::builder::{AssembledModel, ModelBuilder};
use crate::engine::{SolverEngine, SolverKind};
use crate::error::ExpansionError;
use gridplan_core::{
    AttributeValue, BendersConfig, Case, ExpansionConfig, SolutionAlgorithm, SolverAttributes,
};
use std::sync::Arc;
use tracing::info;

/// Immutable solve settings derived from the configuration.
#[derive(Debug, Clone, Default)]
pub struct DecompositionSettings {
    /// Attributes passed to every engine call
    pub attributes: SolverAttributes,
    pub benders: BendersConfig,
}

impl DecompositionSettings {
    pub fn from_config(config: &ExpansionConfig) -> Self {
        Self {
            attributes: config.solver.attributes.clone(),
            benders: config.benders.clone(),
        }
    }

    /// Base attributes overridden by the planning stage's own.
    pub fn planning_attributes(&self) -> SolverAttributes {
        stage_defaults()
            .merged(&self.attributes)
            .merged(&self.benders.planning.attributes)
    }

    /// Base attributes overridden by the subproblem stage's own.
    pub fn subproblem_attributes(&self) -> SolverAttributes {
        stage_defaults()
            .merged(&self.attributes)
            .merged(&self.benders.subproblem.attributes)
    }
}

/// Tolerances of the Benders stage solves unless configured otherwise.
///
/// Cut values and the upper bound inherit the stage solve error, which has
/// to stay well below the gap tolerance.
fn stage_defaults() -> SolverAttributes {
    SolverAttributes::new()
        .with("tol_feas", AttributeValue::Float(1e-9))
        .with("tol_gap_abs", AttributeValue::Float(1e-9))
        .with("tol_gap_rel", AttributeValue::Float(1e-9))
}

/// Result of either strategy.
#[derive(Debug, Clone)]
pub enum SolveOutcome {
    Monolithic(MonolithicOutcome),
    Benders(DecompositionOutcome),
}

impl SolveOutcome {
    /// Best objective found.
    pub fn objective(&self) -> f64 {
        match self {
            SolveOutcome::Monolithic(o) => o.objective,
            SolveOutcome::Benders(o) => o.objective,
        }
    }

    pub fn model(&self) -> &AssembledModel {
        match self {
            SolveOutcome::Monolithic(o) => &o.model,
            SolveOutcome::Benders(o) => &o.model,
        }
    }

    /// Values of all program variables for the best solution found.
    pub fn values(&self) -> &[f64] {
        match self {
            SolveOutcome::Monolithic(o) => &o.values,
            SolveOutcome::Benders(o) => &o.values,
        }
    }
}

/// Drives the monolithic or Benders solve of an assembled model.
#[derive(Clone)]
pub struct DecompositionController {
    engine: Arc<dyn SolverEngine>,
    settings: DecompositionSettings,
}

impl std::fmt::Debug for DecompositionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecompositionController")
            .field("engine", &self.engine.id())
            .field("settings", &self.settings)
            .finish()
    }
}

impl DecompositionController {
    pub fn new(engine: Arc<dyn SolverEngine>) -> Self {
        Self {
            engine,
            settings: DecompositionSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: DecompositionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Controller with the engine named in `[solver] engine`.
    pub fn from_config(config: &ExpansionConfig) -> Result<Self, ExpansionError> {
        let kind: SolverKind = config.solver.engine.parse()?;
        Ok(Self::new(kind.build_engine()).with_settings(DecompositionSettings::from_config(config)))
    }

    pub fn engine(&self) -> &dyn SolverEngine {
        self.engine.as_ref()
    }

    pub fn settings(&self) -> &DecompositionSettings {
        &self.settings
    }

    /// Solve with the strategy the model was assembled for.
    pub fn solve(&self, model: AssembledModel) -> Result<SolveOutcome, ExpansionError> {
        match model.algorithm {
            SolutionAlgorithm::Monolithic => Ok(SolveOutcome::Monolithic(self.solve_monolithic(model)?)),
            SolutionAlgorithm::Benders => Ok(SolveOutcome::Benders(self.solve_benders(model)?)),
        }
    }
}

/// Configure, assemble and solve `case`.
///
/// When `[model] period_lengths` is set, every period's settings are replaced
/// by the ones derived from the configuration before assembly.
pub fn run(case: &mut Case, config: &ExpansionConfig) -> Result<SolveOutcome, ExpansionError> {
    config.validate()?;
    if !config.model.period_lengths.is_empty() {
        for period in &mut case.periods {
            period.settings = config.model.period_settings(period.index)?;
        }
    }
    let controller = DecompositionController::from_config(config)?;
    let model = ModelBuilder::new().build(case)?;
    info!(
        periods = model.num_periods(),
        algorithm = model.algorithm.as_str(),
        engine = controller.engine().id(),
        "starting solve"
    );
    controller.solve(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_attributes_layering() {
        let mut settings = DecompositionSettings::default();
        settings.attributes.set("tol_gap_rel", AttributeValue::Float(1e-7));
        settings.attributes.set("max_iter", AttributeValue::Int(400));
        settings
            .benders
            .subproblem
            .attributes
            .set("tol_feas", AttributeValue::Float(1e-8));

        let planning = settings.planning_attributes();
        assert_eq!(planning.get_f64("tol_feas"), Some(1e-9));
        assert_eq!(planning.get_f64("tol_gap_rel"), Some(1e-7));
        assert_eq!(planning.get_u32("max_iter"), Some(400));

        let subproblem = settings.subproblem_attributes();
        assert_eq!(subproblem.get_f64("tol_feas"), Some(1e-8));
        assert_eq!(subproblem.get_f64("tol_gap_abs"), Some(1e-9));
    }
}
