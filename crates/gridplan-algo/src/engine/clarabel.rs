//! Direct Clarabel backend
//!
//! Translates a [`LinearProgram`] into Clarabel's conic standard form
//!
//! ```text
//! minimise    qᵀx
//! subject to  Ax + s = b,   s ∈ K
//! ```
//!
//! with `K = {0}ᵐ¹ × ℝ₊ᵐ²`. Equality rows go into zero cones, `≤` rows and
//! finite variable bounds into non-negative cones, `≥` rows are negated.
//! Integrality is relaxed.
//!
//! Constraint rows are optionally equilibrated (divided by their largest
//! absolute coefficient) when [`LinearProgram::scale_constraints`] is set.
//! Duals are mapped back to the unscaled, unnegated rows so that
//! `duals[i] = ∂z*/∂bᵢ` for every constraint.

use super::{EngineError, ProgramSolution, SolverEngine, TerminationStatus};
use crate::program::{LinearProgram, Sense};
use clarabel::{
    algebra::CscMatrix,
    solver::{DefaultSettings, DefaultSolver, IPSolver, SolverStatus, SupportedConeT},
};
use gridplan_core::SolverAttributes;
use std::time::Duration;
use tracing::{debug, warn};
use web_time::Instant;

/// Attribute keys understood by this engine.
const KNOWN_ATTRIBUTES: &[&str] = &[
    "verbose",
    "max_iter",
    "time_limit",
    "tol_gap_abs",
    "tol_gap_rel",
    "tol_feas",
    "equilibrate_enable",
    "presolve_enable",
];

/// Interior-point LP engine with dual extraction.
#[derive(Debug, Default, Clone)]
pub struct ClarabelEngine;

/// Row mapping of one program constraint into the conic form.
#[derive(Debug, Clone, Copy)]
struct RowMap {
    row: usize,
    /// `+1` for `≤`/`=` rows, `-1` for negated `≥` rows
    sign: f64,
    /// Equilibration factor applied to the row
    scale: f64,
}

/// Column-wise accumulation of `A`, `b` and the cone list.
struct ConicRows {
    columns: Vec<Vec<(usize, f64)>>,
    rhs: Vec<f64>,
    cones: Vec<SupportedConeT<f64>>,
}

impl ConicRows {
    fn new(n_var: usize) -> Self {
        Self {
            columns: vec![Vec::new(); n_var],
            rhs: Vec::new(),
            cones: Vec::new(),
        }
    }

    fn push_row(&mut self, coeffs: impl Iterator<Item = (usize, f64)>, b: f64) -> usize {
        let row = self.rhs.len();
        for (col, val) in coeffs {
            self.columns[col].push((row, val));
        }
        self.rhs.push(b);
        row
    }

    /// `Σ aⱼxⱼ = b` (zero cone)
    fn push_eq(&mut self, coeffs: impl Iterator<Item = (usize, f64)>, b: f64) -> usize {
        let row = self.push_row(coeffs, b);
        match self.cones.last_mut() {
            Some(SupportedConeT::ZeroConeT(n)) => *n += 1,
            _ => self.cones.push(SupportedConeT::ZeroConeT(1)),
        }
        row
    }

    /// `Σ aⱼxⱼ ≤ b` (non-negative cone)
    fn push_leq(&mut self, coeffs: impl Iterator<Item = (usize, f64)>, b: f64) -> usize {
        let row = self.push_row(coeffs, b);
        match self.cones.last_mut() {
            Some(SupportedConeT::NonnegativeConeT(n)) => *n += 1,
            _ => self.cones.push(SupportedConeT::NonnegativeConeT(1)),
        }
        row
    }

    fn into_csc(self) -> (CscMatrix<f64>, Vec<f64>, Vec<SupportedConeT<f64>>) {
        let n_var = self.columns.len();
        let n_rows = self.rhs.len();
        let mut col_ptr = Vec::with_capacity(n_var + 1);
        let mut row_idx = Vec::new();
        let mut values = Vec::new();

        for mut column in self.columns {
            col_ptr.push(row_idx.len());
            column.sort_by_key(|(r, _)| *r);
            for (r, v) in column {
                row_idx.push(r);
                values.push(v);
            }
        }
        col_ptr.push(row_idx.len());

        (
            CscMatrix::new(n_rows, n_var, col_ptr, row_idx, values),
            self.rhs,
            self.cones,
        )
    }
}

fn row_scale(program: &LinearProgram, coeffs: &[(usize, f64)]) -> f64 {
    if !program.scale_constraints {
        return 1.0;
    }
    let largest = coeffs.iter().fold(0.0_f64, |m, (_, c)| m.max(c.abs()));
    if largest > 0.0 && largest.is_finite() {
        1.0 / largest
    } else {
        1.0
    }
}

fn build_settings(attributes: &SolverAttributes) -> DefaultSettings<f64> {
    let mut settings = DefaultSettings::<f64>::default();
    settings.verbose = attributes.get_bool("verbose").unwrap_or(false);
    if let Some(v) = attributes.get_u32("max_iter") {
        settings.max_iter = v;
    }
    if let Some(v) = attributes.get_f64("time_limit") {
        settings.time_limit = v;
    }
    if let Some(v) = attributes.get_f64("tol_gap_abs") {
        settings.tol_gap_abs = v;
    }
    if let Some(v) = attributes.get_f64("tol_gap_rel") {
        settings.tol_gap_rel = v;
    }
    if let Some(v) = attributes.get_f64("tol_feas") {
        settings.tol_feas = v;
    }
    if let Some(v) = attributes.get_bool("equilibrate_enable") {
        settings.equilibrate_enable = v;
    }
    if let Some(v) = attributes.get_bool("presolve_enable") {
        settings.presolve_enable = v;
    }
    for (key, _) in attributes.iter() {
        if !KNOWN_ATTRIBUTES.contains(&key.as_str()) {
            warn!(attribute = %key, "clarabel: ignoring unknown solver attribute");
        }
    }
    settings
}

fn map_status(status: SolverStatus) -> TerminationStatus {
    match status {
        SolverStatus::Solved | SolverStatus::AlmostSolved => TerminationStatus::Optimal,
        SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
            TerminationStatus::Infeasible
        }
        SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => {
            TerminationStatus::Unbounded
        }
        SolverStatus::MaxIterations => TerminationStatus::IterationLimit,
        SolverStatus::MaxTime => TerminationStatus::TimeLimit,
        _ => TerminationStatus::NumericalError,
    }
}

impl SolverEngine for ClarabelEngine {
    fn id(&self) -> &str {
        "clarabel"
    }

    fn provides_duals(&self) -> bool {
        true
    }

    fn solve(
        &self,
        program: &LinearProgram,
        attributes: &SolverAttributes,
    ) -> Result<ProgramSolution, EngineError> {
        let n_var = program.num_variables();
        if n_var == 0 {
            return Ok(ProgramSolution::trivial(program));
        }
        let relaxed = program.num_integer_variables();
        if relaxed > 0 {
            debug!(count = relaxed, "clarabel: relaxing integer variables");
        }

        let start = Instant::now();
        let mut conic = ConicRows::new(n_var);
        let mut row_map = Vec::with_capacity(program.num_constraints());

        // Zero cones first, then one non-negative block for rows and bounds
        let mut pending_leq = Vec::new();
        for (i, constraint) in program.constraints().iter().enumerate() {
            let coeffs: Vec<(usize, f64)> = constraint
                .expr
                .terms()
                .map(|(v, c)| (v.index(), c))
                .collect();
            let scale = row_scale(program, &coeffs);
            match constraint.sense {
                Sense::Equal => {
                    let row = conic.push_eq(
                        coeffs.iter().map(|&(j, c)| (j, c * scale)),
                        constraint.rhs * scale,
                    );
                    row_map.push(Some(RowMap {
                        row,
                        sign: 1.0,
                        scale,
                    }));
                }
                Sense::LessEqual => {
                    row_map.push(None);
                    pending_leq.push((i, coeffs, 1.0, scale));
                }
                Sense::GreaterEqual => {
                    row_map.push(None);
                    pending_leq.push((i, coeffs, -1.0, scale));
                }
            }
        }
        for (i, coeffs, sign, scale) in pending_leq {
            let factor = sign * scale;
            let row = conic.push_leq(
                coeffs.iter().map(|&(j, c)| (j, c * factor)),
                program.constraints()[i].rhs * factor,
            );
            row_map[i] = Some(RowMap { row, sign, scale });
        }
        for (j, var) in program.variables().iter().enumerate() {
            if var.upper.is_finite() {
                conic.push_leq(std::iter::once((j, 1.0)), var.upper);
            }
            if var.lower.is_finite() {
                conic.push_leq(std::iter::once((j, -1.0)), -var.lower);
            }
        }

        let mut q = vec![0.0; n_var];
        for (v, c) in program.objective().terms() {
            q[v.index()] = c;
        }
        let (a_mat, b, cones) = conic.into_csc();
        let p_mat = CscMatrix::new(n_var, n_var, vec![0; n_var + 1], vec![], vec![]);

        debug!(
            vars = n_var,
            rows = b.len(),
            constraints = program.num_constraints(),
            "clarabel: assembled conic program"
        );

        let settings = build_settings(attributes);
        let mut solver = DefaultSolver::new(&p_mat, &q, &a_mat, &b, &cones, settings)
            .map_err(|e| EngineError::Setup(format!("Clarabel initialization failed: {:?}", e)))?;
        solver.solve();

        let sol = solver.solution;
        let status = map_status(sol.status);
        let iterations = sol.iterations as usize;
        let solve_time = Duration::from_secs_f64(start.elapsed().as_secs_f64());

        if status.is_fatal() {
            debug!(status = ?sol.status, "clarabel: no usable point");
            return Ok(ProgramSolution {
                iterations,
                solve_time,
                ..ProgramSolution::without_point(status)
            });
        }

        let values = sol.x.clone();
        let duals = row_map
            .iter()
            .map(|mapping| match mapping {
                // Ax + s = b with s in the dual cone: ∂z*/∂b_row = -z_row
                Some(m) => -sol.z[m.row] * m.sign * m.scale,
                None => 0.0,
            })
            .collect();

        Ok(ProgramSolution {
            status,
            objective: program.objective_value(&values),
            values,
            duals: Some(duals),
            iterations,
            solve_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{LinearExpr, Stage, VariableDef};
    use gridplan_core::AttributeValue;

    /// min x + 2y  s.t.  x + y ≥ 10,  x ≤ 4
    fn small_lp() -> (LinearProgram, crate::program::ConstraintId) {
        let mut lp = LinearProgram::new();
        let x = lp.add_variable(VariableDef::non_negative("x", Stage::Planning));
        let y = lp.add_variable(VariableDef::non_negative("y", Stage::Planning));
        let demand = lp.add_constraint(
            "demand",
            LinearExpr::from_terms([(x, 1.0), (y, 1.0)]),
            Sense::GreaterEqual,
            10.0,
        );
        lp.add_constraint("cap", LinearExpr::from(x), Sense::LessEqual, 4.0);
        lp.set_objective(LinearExpr::from_terms([(x, 1.0), (y, 2.0)]));
        (lp, demand)
    }

    #[test]
    fn test_solves_small_lp_with_duals() {
        let (lp, demand) = small_lp();
        let sol = ClarabelEngine.solve(&lp, &SolverAttributes::new()).unwrap();
        assert_eq!(sol.status, TerminationStatus::Optimal);
        assert!((sol.objective - 16.0).abs() < 1e-5);
        assert!((sol.values[0] - 4.0).abs() < 1e-5);
        // One more unit of demand is served by y at cost 2
        let duals = sol.duals.unwrap();
        assert!((duals[demand.index()] - 2.0).abs() < 1e-5);
        // Relaxing x's cap saves 1 per unit
        assert!((duals[1] + 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_scaled_rows_give_unscaled_duals() {
        let (mut lp, demand) = small_lp();
        lp.scale_constraints = true;
        let sol = ClarabelEngine.solve(&lp, &SolverAttributes::new()).unwrap();
        let duals = sol.duals.unwrap();
        assert!((duals[demand.index()] - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_equality_dual_sign() {
        // min 3x s.t. 2x = 8  → z* = 12, ∂z*/∂b = 1.5
        let mut lp = LinearProgram::new();
        let x = lp.add_variable(VariableDef::free("x", Stage::Planning));
        let row = lp.add_constraint("fix", LinearExpr::from_terms([(x, 2.0)]), Sense::Equal, 8.0);
        lp.set_objective(LinearExpr::from_terms([(x, 3.0)]));
        let sol = ClarabelEngine.solve(&lp, &SolverAttributes::new()).unwrap();
        assert!((sol.objective - 12.0).abs() < 1e-6);
        assert!((sol.duals.unwrap()[row.index()] - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_detects_infeasibility() {
        let mut lp = LinearProgram::new();
        let x = lp.add_variable(VariableDef::non_negative("x", Stage::Planning).with_upper(1.0));
        lp.add_constraint("too_much", LinearExpr::from(x), Sense::GreaterEqual, 5.0);
        lp.set_objective(LinearExpr::from(x));
        let sol = ClarabelEngine.solve(&lp, &SolverAttributes::new()).unwrap();
        assert_eq!(sol.status, TerminationStatus::Infeasible);
        assert!(sol.values.is_empty());
    }

    #[test]
    fn test_iteration_limit_is_reported() {
        let (lp, _) = small_lp();
        let attrs = SolverAttributes::new().with("max_iter", AttributeValue::Int(1));
        let sol = ClarabelEngine.solve(&lp, &attrs).unwrap();
        assert_eq!(sol.status, TerminationStatus::IterationLimit);
    }

    #[test]
    fn test_empty_program_is_trivially_optimal() {
        let mut lp = LinearProgram::new();
        lp.set_objective(LinearExpr::constant(7.0));
        let sol = ClarabelEngine.solve(&lp, &SolverAttributes::new()).unwrap();
        assert!(sol.status.is_optimal());
        assert_eq!(sol.objective, 7.0);
    }
}
