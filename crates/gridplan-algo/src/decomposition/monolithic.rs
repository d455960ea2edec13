//! Single-solve strategy: `Built → Solved`

use super::DecompositionController;
use crate::builder::AssembledModel;
use crate::cost::DiscountedCosts;
use crate::engine::TerminationStatus;
use crate::error::{SolveError, SolveStage};
use std::time::Duration;
use tracing::{info, warn};

/// Result of solving the whole program at once.
#[derive(Debug, Clone)]
pub struct MonolithicOutcome {
    pub model: AssembledModel,
    pub status: TerminationStatus,
    pub objective: f64,
    /// Values of all program variables (empty when the engine returned no point)
    pub values: Vec<f64>,
    pub duals: Option<Vec<f64>>,
    /// Discounted fixed and variable cost per period
    pub period_costs: Vec<DiscountedCosts>,
    pub iterations: usize,
    pub solve_time: Duration,
}

impl DecompositionController {
    /// Solve the assembled program in one engine call.
    pub fn solve_monolithic(&self, model: AssembledModel) -> Result<MonolithicOutcome, SolveError> {
        let stage = SolveStage::Monolithic;
        info!(
            engine = self.engine.id(),
            variables = model.program.num_variables(),
            constraints = model.program.num_constraints(),
            "monolithic solve"
        );

        let solution = self
            .engine
            .solve(&model.program, &self.settings.attributes)
            .map_err(|e| SolveError::Engine {
                stage,
                message: e.to_string(),
            })?;

        match solution.status {
            TerminationStatus::Infeasible => return Err(SolveError::Infeasible { stage }),
            TerminationStatus::Unbounded => return Err(SolveError::Unbounded { stage }),
            TerminationStatus::Optimal => {}
            other => warn!(status = %other, "monolithic solve ended without optimality"),
        }

        let period_costs = if solution.values.is_empty() {
            Vec::new()
        } else {
            model.costs.breakdown(model.period_costs(), &solution.values)
        };
        info!(
            status = %solution.status,
            objective = solution.objective,
            iterations = solution.iterations,
            "monolithic solve finished"
        );

        Ok(MonolithicOutcome {
            model,
            status: solution.status,
            objective: solution.objective,
            values: solution.values,
            duals: solution.duals,
            period_costs,
            iterations: solution.iterations,
            solve_time: solution.solve_time,
        })
    }
}
