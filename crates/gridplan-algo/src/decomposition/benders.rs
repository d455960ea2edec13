//! Benders decomposition over planning periods
//!
//! ```text
//!   Initialized ──▶ PlanningSolved ──▶ SubproblemsSolved ──┬──▶ Converged
//!                        ▲                                 │
//!                        └──────────── add cuts ◀──────────┴──▶ IterationLimitReached
//! ```
//!
//! Each iteration solves the planning problem (investment variables plus
//! cost-to-go variables θ), pins the planning solution x̂ into every
//! subproblem, solves the subproblems and adds optimality cuts
//!
//! ```text
//! multi:   θₛ ≥ Qₛ(x̂) + gₛᵀ(x − x̂)                 one cut per period
//! single:  θ  ≥ Σₛ Qₛ(x̂) + (Σₛ gₛ)ᵀ(x − x̂)         one cut per iteration
//! ```
//!
//! where `gₛ` are the duals of subproblem `s`'s fixing rows. The planning
//! objective is a lower bound; planning cost at x̂ plus `Σ Qₛ(x̂)` is an upper
//! bound. The loop stops when the relative gap
//! `(UB − LB) / max(|UB|, 1e-9)` is within tolerance, at the iteration limit,
//! or when the wall-clock budget is exhausted at an iteration boundary.
//!
//! Planning variables the model leaves unbounded are capped at
//! `planning_bound` (by default a multiple of peak demand) so the planning
//! problem stays bounded before the first cuts arrive. The planning point is
//! clamped to its bounds and its capacities are settled along the carry-over
//! chain before it is pinned; an upper bound is only accepted when the
//! assembled assignment satisfies every row of the full program.
//!
//! Subproblems must have complete recourse (non-served energy at every
//! node); an infeasible subproblem is reported as a [`SolveError`].

use super::split::{partition, Partition, PlanningProblem, Subproblem};
use super::DecompositionController;
use crate::builder::AssembledModel;
use crate::engine::{ProgramSolution, SolverEngine, TerminationStatus};
use crate::error::{ConvergenceWarning, ExpansionError, LimitReason, SolveError, SolveStage};
use crate::program::{LinearExpr, LinearProgram, Sense, Stage, VariableDef, VariableId};
use gridplan_core::{CutStrategy, SolverAttributes};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use web_time::Instant;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

const GAP_FLOOR: f64 = 1e-9;
/// Default planning bound as a multiple of peak demand
const PLANNING_BOUND_FACTOR: f64 = 100.0;
/// Largest row violation of an upper-bound point, relative to its largest value
const UPPER_BOUND_FEASIBILITY: f64 = 1e-6;

/// Position of the Benders loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BendersState {
    Initialized,
    PlanningSolved,
    SubproblemsSolved,
    Converged,
    IterationLimitReached,
}

/// One optimality cut added to the planning problem.
#[derive(Debug, Clone, PartialEq)]
pub struct BendersCut {
    pub iteration: usize,
    /// Period of the cut (`None` for the aggregate single cut)
    pub period: Option<usize>,
    /// Subproblem cost at the planning point the cut was generated from
    pub value: f64,
    /// Cut slope per planning variable (ids of the assembled program)
    pub gradient: Vec<(VariableId, f64)>,
}

/// Bounds after one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub gap: f64,
    pub elapsed: Duration,
}

/// Working state of the loop.
#[derive(Debug, Clone)]
pub struct DecompositionState {
    pub state: BendersState,
    pub iteration: usize,
    pub lower_bound: f64,
    pub upper_bound: f64,
    /// Current planning point (planning program indexing)
    pub planning_values: Vec<f64>,
    pub cuts: Vec<BendersCut>,
    /// Full assignment (assembled program indexing) at the best upper bound
    pub best: Option<Vec<f64>>,
    pub last_status: TerminationStatus,
}

impl DecompositionState {
    fn new() -> Self {
        Self {
            state: BendersState::Initialized,
            iteration: 0,
            lower_bound: f64::NEG_INFINITY,
            upper_bound: f64::INFINITY,
            planning_values: Vec::new(),
            cuts: Vec::new(),
            best: None,
            last_status: TerminationStatus::Optimal,
        }
    }

    /// Relative gap between the bounds (infinite until both are known).
    pub fn gap(&self) -> f64 {
        relative_gap(self.upper_bound, self.lower_bound)
    }

    fn transition(&mut self, next: BendersState) {
        debug!(iteration = self.iteration, from = ?self.state, to = ?next, "benders state");
        self.state = next;
    }
}

fn relative_gap(upper: f64, lower: f64) -> f64 {
    if !upper.is_finite() || !lower.is_finite() {
        return f64::INFINITY;
    }
    (upper - lower).max(0.0) / upper.abs().max(GAP_FLOOR)
}

/// Result of the Benders loop.
#[derive(Debug, Clone)]
pub struct DecompositionOutcome {
    pub model: AssembledModel,
    pub state: BendersState,
    /// Best upper bound (total discounted cost of `values`)
    pub objective: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub gap: f64,
    pub iterations: usize,
    /// Full assignment at the best upper bound (empty if none was found)
    pub values: Vec<f64>,
    pub cuts: Vec<BendersCut>,
    pub history: Vec<IterationRecord>,
    pub last_status: TerminationStatus,
    pub warning: Option<ConvergenceWarning>,
    pub solve_time: Duration,
}

impl DecompositionOutcome {
    pub fn converged(&self) -> bool {
        self.state == BendersState::Converged
    }

    /// Values of the planning variables at the best upper bound.
    pub fn planning_decision(&self) -> Vec<(VariableId, f64)> {
        self.model
            .program
            .variables()
            .iter()
            .enumerate()
            .filter(|(_, def)| def.stage == Stage::Planning)
            .filter_map(|(j, _)| self.values.get(j).map(|&v| (VariableId::from_index(j), v)))
            .collect()
    }
}

#[derive(Debug)]
struct SubproblemResult {
    status: TerminationStatus,
    objective: f64,
    values: Vec<f64>,
    /// Slope per planning-program variable
    gradient: Vec<(VariableId, f64)>,
}

fn solve_subproblem(
    engine: &dyn SolverEngine,
    sub: &Subproblem,
    attributes: &SolverAttributes,
    iteration: usize,
) -> Result<SubproblemResult, SolveError> {
    let stage = SolveStage::Subproblem {
        period: sub.period,
        iteration,
    };
    let solution = solve_stage(engine, &sub.program, attributes, stage)?;
    match solution.status {
        TerminationStatus::Infeasible => return Err(SolveError::Infeasible { stage }),
        TerminationStatus::Unbounded => return Err(SolveError::Unbounded { stage }),
        _ => {}
    }
    let duals = solution.duals.ok_or(SolveError::MissingDuals { stage })?;
    let gradient = sub
        .copies
        .iter()
        .map(|copy| (copy.planning, duals.get(copy.row.index()).copied().unwrap_or(0.0)))
        .collect();
    Ok(SubproblemResult {
        status: solution.status,
        objective: solution.objective,
        values: solution.values,
        gradient,
    })
}

fn solve_stage(
    engine: &dyn SolverEngine,
    program: &LinearProgram,
    attributes: &SolverAttributes,
    stage: SolveStage,
) -> Result<ProgramSolution, SolveError> {
    engine
        .solve(program, attributes)
        .map_err(|e| SolveError::Engine {
            stage,
            message: e.to_string(),
        })
}

/// Cap every unbounded planning variable; returns the capped variables.
fn bound_planning(master: &mut LinearProgram, n_planning: usize, bound: f64) -> Vec<VariableId> {
    let mut capped = Vec::new();
    for j in 0..n_planning {
        let id = VariableId::from_index(j);
        let def = master.variable(id);
        if def.upper.is_infinite() {
            let upper = bound.max(def.lower);
            master.set_upper(id, upper);
            capped.push(id);
        }
    }
    capped
}

/// Planning point clamped to the planning bounds, with capacities settled.
fn planning_point(
    model: &AssembledModel,
    master: &LinearProgram,
    planning_vars: &[VariableId],
    values: &[f64],
) -> Vec<f64> {
    let mut full = vec![0.0; model.program.num_variables()];
    for (local, var) in planning_vars.iter().enumerate() {
        let def = master.variable(VariableId::from_index(local));
        full[var.index()] = values[local].max(def.lower).min(def.upper);
    }
    model.settle_capacities(&mut full);
    planning_vars.iter().map(|var| full[var.index()]).collect()
}

impl DecompositionController {
    /// Solve the assembled model by Benders decomposition.
    pub fn solve_benders(&self, model: AssembledModel) -> Result<DecompositionOutcome, ExpansionError> {
        let config = &self.settings.benders;
        let started = Instant::now();
        let Partition {
            planning,
            mut subproblems,
        } = partition(&model)?;
        let PlanningProblem {
            program: mut master,
            planning_vars,
        } = planning;
        let n_planning = planning_vars.len();
        let n_periods = subproblems.len();

        let planning_bound = config
            .planning_bound
            .unwrap_or(PLANNING_BOUND_FACTOR * model.peak_demand.max(1.0));
        let capped = bound_planning(&mut master, n_planning, planning_bound);

        // θ variables after the planning variables
        let base_objective = master.objective().clone();
        let n_theta = match config.cut_strategy {
            CutStrategy::Multi => n_periods,
            CutStrategy::Single => 1,
        };
        let thetas: Vec<VariableId> = (0..n_theta)
            .map(|k| {
                master.add_variable(
                    VariableDef::free(format!("theta[{}]", k + 1), Stage::Planning)
                        .with_bounds(config.theta_lower_bound, f64::INFINITY),
                )
            })
            .collect();
        let mut objective = base_objective.clone();
        for &theta in &thetas {
            objective.add_term(theta, 1.0);
        }
        master.set_objective(objective);

        let planning_attributes = self.settings.planning_attributes();
        let subproblem_attributes = self.settings.subproblem_attributes();
        info!(
            periods = n_periods,
            planning_vars = n_planning,
            capped = capped.len(),
            planning_bound,
            cut_strategy = ?config.cut_strategy,
            max_iterations = config.max_iterations,
            "benders decomposition"
        );

        let mut state = DecompositionState::new();
        let mut history = Vec::new();
        let mut stop: Option<LimitReason> = None;

        for iteration in 1..=config.max_iterations {
            if iteration > 1 {
                if let Some(limit) = config.time_limit_seconds {
                    if started.elapsed().as_secs_f64() >= limit {
                        stop = Some(LimitReason::WallClock);
                        break;
                    }
                }
            }
            state.iteration = iteration;

            // Planning
            let stage = SolveStage::Planning { iteration };
            let planning_solution =
                solve_stage(self.engine.as_ref(), &master, &planning_attributes, stage)?;
            match planning_solution.status {
                TerminationStatus::Infeasible => return Err(SolveError::Infeasible { stage }.into()),
                TerminationStatus::Unbounded => return Err(SolveError::Unbounded { stage }.into()),
                _ => {}
            }
            state.last_status = planning_solution.status;
            if !planning_solution.status.is_optimal() {
                warn!(iteration, status = %planning_solution.status, "planning solve not optimal");
                stop = Some(LimitReason::SolverStatus);
                break;
            }
            state.lower_bound = planning_solution.objective;
            state.planning_values = planning_point(
                &model,
                &master,
                &planning_vars,
                &planning_solution.values[..n_planning],
            );
            state.transition(BendersState::PlanningSolved);

            // Subproblems
            let results = self.solve_subproblems(
                &mut subproblems,
                &state.planning_values,
                &subproblem_attributes,
                iteration,
            )?;
            if let Some(bad) = results.iter().find(|r| !r.status.is_optimal()) {
                state.last_status = bad.status;
                warn!(iteration, status = %bad.status, "subproblem solve not optimal");
                stop = Some(LimitReason::SolverStatus);
                break;
            }
            state.transition(BendersState::SubproblemsSolved);

            // Bounds
            let planning_cost = base_objective.evaluate(&state.planning_values);
            let candidate = planning_cost + results.iter().map(|r| r.objective).sum::<f64>();
            if candidate < state.upper_bound {
                let values = assemble_values(
                    &model,
                    &planning_vars,
                    &state.planning_values,
                    &subproblems,
                    &results,
                );
                let scale = values.iter().fold(1.0_f64, |m, v| m.max(v.abs()));
                let violation = model.program.max_violation(&values);
                if violation <= UPPER_BOUND_FEASIBILITY * scale {
                    state.upper_bound = candidate;
                    state.best = Some(values);
                } else {
                    warn!(iteration, violation, candidate, "upper bound point violates the program, skipped");
                }
            }

            // Cuts
            let new_cuts = build_cuts(config.cut_strategy, iteration, &results, &subproblems);
            for (k, cut) in new_cuts.iter().enumerate() {
                let theta = thetas[k.min(thetas.len() - 1)];
                let mut expr = LinearExpr::from(theta);
                let mut rhs = cut.value;
                for &(var, slope) in &cut.gradient {
                    expr.add_term(var, -slope);
                    rhs -= slope * state.planning_values[var.index()];
                }
                let name = match cut.period {
                    Some(p) => format!("cut[{},{}]", iteration, p),
                    None => format!("cut[{}]", iteration),
                };
                master.add_constraint(name, expr, Sense::GreaterEqual, rhs);
            }
            state.cuts.extend(new_cuts.into_iter().map(|cut| BendersCut {
                gradient: cut
                    .gradient
                    .into_iter()
                    .map(|(var, slope)| (planning_vars[var.index()], slope))
                    .collect(),
                ..cut
            }));

            let gap = state.gap();
            history.push(IterationRecord {
                iteration,
                lower_bound: state.lower_bound,
                upper_bound: state.upper_bound,
                gap,
                elapsed: started.elapsed(),
            });
            info!(
                iteration,
                lower_bound = state.lower_bound,
                upper_bound = state.upper_bound,
                gap,
                "benders iteration"
            );

            if gap <= config.gap_tolerance {
                state.transition(BendersState::Converged);
                break;
            }
        }

        if let Some(best) = &state.best {
            let at_bound = capped
                .iter()
                .filter(|id| best[planning_vars[id.index()].index()] >= planning_bound * (1.0 - 1e-6))
                .count();
            if at_bound > 0 {
                warn!(at_bound, planning_bound, "planning variables at the planning bound, raise planning_bound");
            }
        }

        let warning = if state.state == BendersState::Converged {
            None
        } else {
            let reason = stop.unwrap_or(LimitReason::Iterations);
            if reason != LimitReason::SolverStatus {
                state.transition(BendersState::IterationLimitReached);
            }
            let warning = ConvergenceWarning {
                reason,
                iterations: state.iteration,
                gap: state.gap(),
                tolerance: config.gap_tolerance,
                last_status: state.last_status,
            };
            warn!("benders: {}", warning);
            Some(warning)
        };

        let gap = state.gap();
        Ok(DecompositionOutcome {
            model,
            state: state.state,
            objective: state.upper_bound,
            lower_bound: state.lower_bound,
            upper_bound: state.upper_bound,
            gap,
            iterations: state.iteration,
            values: state.best.unwrap_or_default(),
            cuts: state.cuts,
            history,
            last_status: state.last_status,
            warning,
            solve_time: started.elapsed(),
        })
    }

    fn solve_subproblems(
        &self,
        subproblems: &mut [Subproblem],
        planning_values: &[f64],
        attributes: &SolverAttributes,
        iteration: usize,
    ) -> Result<Vec<SubproblemResult>, SolveError> {
        for sub in subproblems.iter_mut() {
            sub.fix(planning_values);
        }
        let engine = self.engine.as_ref();
        let solve = |sub: &Subproblem| solve_subproblem(engine, sub, attributes, iteration);

        #[cfg(feature = "parallel")]
        let results: Vec<Result<SubproblemResult, SolveError>> =
            if self.settings.benders.parallel_subproblems {
                subproblems.par_iter().map(solve).collect()
            } else {
                subproblems.iter().map(solve).collect()
            };
        #[cfg(not(feature = "parallel"))]
        let results: Vec<Result<SubproblemResult, SolveError>> =
            subproblems.iter().map(solve).collect();

        // Merge in period order; the first failing period is reported
        results.into_iter().collect()
    }
}

/// Cuts in planning-program indexing, one per θ.
fn build_cuts(
    strategy: CutStrategy,
    iteration: usize,
    results: &[SubproblemResult],
    subproblems: &[Subproblem],
) -> Vec<BendersCut> {
    match strategy {
        CutStrategy::Multi => results
            .iter()
            .zip(subproblems)
            .map(|(r, sub)| BendersCut {
                iteration,
                period: Some(sub.period),
                value: r.objective,
                gradient: r.gradient.clone(),
            })
            .collect(),
        CutStrategy::Single => {
            let mut slope = LinearExpr::new();
            for r in results {
                for &(var, g) in &r.gradient {
                    slope.add_term(var, g);
                }
            }
            vec![BendersCut {
                iteration,
                period: None,
                value: results.iter().map(|r| r.objective).sum(),
                gradient: slope.terms().collect(),
            }]
        }
    }
}

/// Map planning and subproblem values back onto the assembled program.
fn assemble_values(
    model: &AssembledModel,
    planning_vars: &[VariableId],
    planning_values: &[f64],
    subproblems: &[Subproblem],
    results: &[SubproblemResult],
) -> Vec<f64> {
    let mut values = vec![0.0; model.program.num_variables()];
    for (local, var) in planning_vars.iter().enumerate() {
        values[var.index()] = planning_values[local];
    }
    for (sub, result) in subproblems.iter().zip(results) {
        for (local, var) in sub.operation_vars.iter().enumerate() {
            values[var.index()] = result.values.get(local).copied().unwrap_or(0.0);
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_planning_caps_unbounded_only() {
        let mut master = LinearProgram::new();
        let free = master.add_variable(VariableDef::non_negative("free", Stage::Planning));
        let limited =
            master.add_variable(VariableDef::non_negative("limited", Stage::Planning).with_upper(5.0));
        let floor = master.add_variable(
            VariableDef::non_negative("floor", Stage::Planning).with_bounds(80.0, f64::INFINITY),
        );
        let theta = master.add_variable(VariableDef::free("theta", Stage::Planning));

        let capped = bound_planning(&mut master, 3, 50.0);
        assert_eq!(capped, vec![free, floor]);
        assert_eq!(master.variable(free).upper, 50.0);
        assert_eq!(master.variable(limited).upper, 5.0);
        assert_eq!(master.variable(floor).upper, 80.0);
        assert!(master.variable(theta).upper.is_infinite());
    }

    #[test]
    fn test_relative_gap() {
        assert_eq!(relative_gap(f64::INFINITY, 1.0), f64::INFINITY);
        assert!((relative_gap(100.0, 99.0) - 0.01).abs() < 1e-12);
        assert_eq!(relative_gap(10.0, 10.000001), 0.0);
        assert_eq!(relative_gap(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_single_cut_aggregates_slopes() {
        let x = VariableId::from_index(0);
        let results = vec![
            SubproblemResult {
                status: TerminationStatus::Optimal,
                objective: 3.0,
                values: Vec::new(),
                gradient: vec![(x, -1.0)],
            },
            SubproblemResult {
                status: TerminationStatus::Optimal,
                objective: 4.0,
                values: Vec::new(),
                gradient: vec![(x, -2.0)],
            },
        ];
        let subs: Vec<Subproblem> = (1..=2)
            .map(|period| Subproblem {
                period,
                program: Default::default(),
                operation_vars: Vec::new(),
                copies: Vec::new(),
            })
            .collect();

        let single = build_cuts(CutStrategy::Single, 1, &results, &subs);
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].value, 7.0);
        assert_eq!(single[0].gradient, vec![(x, -3.0)]);

        let multi = build_cuts(CutStrategy::Multi, 1, &results, &subs);
        assert_eq!(multi.len(), 2);
        assert_eq!(multi[1].period, Some(2));
    }
}
