//! `good_lp` backend
//!
//! Builds the program through good_lp's modelling layer. With the
//! `solver-highs` feature the HiGHS MIP solver is used and integer
//! variables keep their domain; otherwise good_lp's Clarabel wrapper solves
//! the LP relaxation. good_lp does not expose row duals, so this engine is
//! only used for monolithic solves.

use super::{EngineError, ProgramSolution, SolverEngine, TerminationStatus};
use crate::program::{LinearExpr, LinearProgram, Sense};
#[cfg(feature = "solver-highs")]
use crate::program::Domain;
use good_lp::{
    constraint, variable, Constraint, Expression, ProblemVariables, ResolutionError, Solution,
    SolverModel, Variable,
};
use gridplan_core::SolverAttributes;
use std::time::Duration;
use tracing::{debug, warn};
use web_time::Instant;

/// Modelling-layer engine (HiGHS when available, Clarabel otherwise).
#[derive(Debug, Default, Clone)]
pub struct GoodLpEngine;

fn to_expression(expr: &LinearExpr, vars: &[Variable]) -> Expression {
    let mut out = Expression::from(expr.constant_term());
    for (v, c) in expr.terms() {
        out += c * vars[v.index()];
    }
    out
}

fn extract<S: Solution>(solution: &S, vars: &[Variable]) -> Vec<f64> {
    vars.iter().map(|&v| solution.value(v)).collect()
}

impl SolverEngine for GoodLpEngine {
    fn id(&self) -> &str {
        "good_lp"
    }

    fn provides_duals(&self) -> bool {
        false
    }

    fn solve(
        &self,
        program: &LinearProgram,
        attributes: &SolverAttributes,
    ) -> Result<ProgramSolution, EngineError> {
        if program.num_variables() == 0 {
            return Ok(ProgramSolution::trivial(program));
        }
        if !attributes.is_empty() {
            warn!("good_lp: solver attributes are not forwarded by this engine");
        }
        let start = Instant::now();

        let mut problem = ProblemVariables::new();
        let vars: Vec<Variable> = program
            .variables()
            .iter()
            .map(|def| {
                let mut var = variable().name(def.name.clone());
                if def.lower.is_finite() {
                    var = var.min(def.lower);
                }
                if def.upper.is_finite() {
                    var = var.max(def.upper);
                }
                #[cfg(feature = "solver-highs")]
                if def.domain == Domain::Integer {
                    var = var.integer();
                }
                problem.add(var)
            })
            .collect();

        let constraints: Vec<Constraint> = program
            .constraints()
            .iter()
            .map(|c| {
                let lhs = to_expression(&c.expr, &vars);
                match c.sense {
                    Sense::LessEqual => constraint!(lhs <= c.rhs),
                    Sense::Equal => constraint!(lhs == c.rhs),
                    Sense::GreaterEqual => constraint!(lhs >= c.rhs),
                }
            })
            .collect();
        let objective = to_expression(program.objective(), &vars);

        #[cfg(feature = "solver-highs")]
        let result = {
            let mut model = problem
                .minimise(objective)
                .using(good_lp::solvers::highs::highs);
            for c in constraints {
                model = model.with(c);
            }
            model.solve().map(|s| extract(&s, &vars))
        };
        #[cfg(not(feature = "solver-highs"))]
        let result = {
            let mut model = problem
                .minimise(objective)
                .using(good_lp::solvers::clarabel::clarabel);
            for c in constraints {
                model = model.with(c);
            }
            model.solve().map(|s| extract(&s, &vars))
        };

        let solve_time = Duration::from_secs_f64(start.elapsed().as_secs_f64());
        match result {
            Ok(values) => {
                debug!(vars = values.len(), "good_lp: solved");
                Ok(ProgramSolution {
                    status: TerminationStatus::Optimal,
                    objective: program.objective_value(&values),
                    values,
                    duals: None,
                    iterations: 0,
                    solve_time,
                })
            }
            Err(ResolutionError::Infeasible) => Ok(ProgramSolution {
                solve_time,
                ..ProgramSolution::without_point(TerminationStatus::Infeasible)
            }),
            Err(ResolutionError::Unbounded) => Ok(ProgramSolution {
                solve_time,
                ..ProgramSolution::without_point(TerminationStatus::Unbounded)
            }),
            Err(e) => Err(EngineError::Backend(format!("{:?}", e))),
        }
    }
}
