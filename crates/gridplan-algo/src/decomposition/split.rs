//! Partitioning of the assembled program into planning and subproblems
//!
//! Rows are assigned by the stage tags of the variables they touch:
//!
//! | Row touches | Goes to |
//! |-------------|---------|
//! | planning variables only (or nothing) | planning problem |
//! | operation variables of period `s` (plus any planning variables) | subproblem `s` |
//! | operation variables of two periods | rejected |
//!
//! Planning variables referenced by subproblem `s` are replaced by local
//! copies pinned by a fixing row `copy = x̂`. The fixing rows are the only
//! rows whose right-hand side changes between iterations; their duals are
//! the cut gradient.

use crate::builder::AssembledModel;
use crate::error::AssemblyError;
use crate::program::{ConstraintId, LinearExpr, LinearProgram, Sense, Stage, VariableDef, VariableId};
use std::collections::BTreeMap;

/// A planning variable pinned inside a subproblem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedCopy {
    /// Planning variable in the planning program
    pub planning: VariableId,
    /// Local copy in the subproblem program
    pub local: VariableId,
    /// Row `local = x̂`
    pub row: ConstraintId,
}

/// Operational problem of one period.
#[derive(Debug, Clone)]
pub struct Subproblem {
    pub period: usize,
    pub program: LinearProgram,
    /// Monolithic ids of the operation variables, in local order
    pub operation_vars: Vec<VariableId>,
    pub copies: Vec<FixedCopy>,
}

impl Subproblem {
    /// Pin the planning copies to the given planning solution.
    pub fn fix(&mut self, planning_values: &[f64]) {
        for copy in &self.copies {
            let value = planning_values
                .get(copy.planning.index())
                .copied()
                .unwrap_or(0.0);
            self.program.set_rhs(copy.row, value);
        }
    }
}

/// Investment problem without cost-to-go variables.
#[derive(Debug, Clone)]
pub struct PlanningProblem {
    pub program: LinearProgram,
    /// Monolithic ids of the planning variables, in local order
    pub planning_vars: Vec<VariableId>,
}

/// Planning problem plus one subproblem per period.
#[derive(Debug, Clone)]
pub struct Partition {
    pub planning: PlanningProblem,
    pub subproblems: Vec<Subproblem>,
}

#[derive(Debug, Clone, Copy)]
enum Local {
    Planning(VariableId),
    Operation { period: usize, id: VariableId },
}

/// Split `model.program` by stage.
pub fn partition(model: &AssembledModel) -> Result<Partition, AssemblyError> {
    let source = &model.program;
    let n_periods = model.num_periods();

    let mut planning = PlanningProblem {
        program: LinearProgram::new(),
        planning_vars: Vec::new(),
    };
    planning.program.scale_constraints = source.scale_constraints;
    let mut subproblems: Vec<Subproblem> = (1..=n_periods)
        .map(|period| {
            let mut program = LinearProgram::new();
            program.scale_constraints = source.scale_constraints;
            Subproblem {
                period,
                program,
                operation_vars: Vec::new(),
                copies: Vec::new(),
            }
        })
        .collect();

    let mut locals = Vec::with_capacity(source.num_variables());
    for (j, def) in source.variables().iter().enumerate() {
        let local = match def.stage {
            Stage::Planning => {
                planning.planning_vars.push(VariableId::from_index(j));
                Local::Planning(planning.program.add_variable(def.clone()))
            }
            Stage::Operation(period) => {
                let sub = period
                    .checked_sub(1)
                    .and_then(|i| subproblems.get_mut(i))
                    .ok_or_else(|| AssemblyError::PeriodOrder {
                        position: period.saturating_sub(1),
                        expected: n_periods,
                        found: period,
                    })?;
                sub.operation_vars.push(VariableId::from_index(j));
                Local::Operation {
                    period,
                    id: sub.program.add_variable(def.clone()),
                }
            }
        };
        locals.push(local);
    }

    // Planning variable (planning-local id) -> copy per subproblem
    let mut copies: Vec<BTreeMap<VariableId, VariableId>> = vec![BTreeMap::new(); n_periods];

    for row in source.constraints() {
        let mut period = None;
        for (var, _) in row.expr.terms() {
            if let Local::Operation { period: p, .. } = locals[var.index()] {
                match period {
                    None => period = Some(p),
                    Some(first) if first != p => {
                        return Err(AssemblyError::CrossPeriodCoupling {
                            constraint: row.name.clone(),
                            first: first.min(p),
                            second: first.max(p),
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        match period {
            None => {
                let expr = LinearExpr::from_terms(row.expr.terms().map(|(var, coef)| {
                    match locals[var.index()] {
                        Local::Planning(id) | Local::Operation { id, .. } => (id, coef),
                    }
                }));
                planning
                    .program
                    .add_constraint(row.name.clone(), expr, row.sense, row.rhs);
            }
            Some(p) => {
                let sub = &mut subproblems[p - 1];
                let sub_copies = &mut copies[p - 1];
                let mut expr = LinearExpr::new();
                for (var, coef) in row.expr.terms() {
                    let id = match locals[var.index()] {
                        Local::Operation { id, .. } => id,
                        Local::Planning(planning_id) => {
                            *sub_copies.entry(planning_id).or_insert_with(|| {
                                let name = format!("{}#copy", source.variable(var).name);
                                sub.program.add_variable(VariableDef::free(name, Stage::Planning))
                            })
                        }
                    };
                    expr.add_term(id, coef);
                }
                sub.program
                    .add_constraint(row.name.clone(), expr, row.sense, row.rhs);
            }
        }
    }

    // Fixing rows come last so subproblem row order matches the source order
    for (sub, sub_copies) in subproblems.iter_mut().zip(copies) {
        for (planning_id, local) in sub_copies {
            let name = format!("{}#fix", sub.program.variable(local).name);
            let row = sub
                .program
                .add_constraint(name, LinearExpr::from(local), Sense::Equal, 0.0);
            sub.copies.push(FixedCopy {
                planning: planning_id,
                local,
                row,
            });
        }
    }

    // Objective
    let mut planning_objective = LinearExpr::constant(source.objective().constant_term());
    let mut sub_objectives = vec![LinearExpr::new(); n_periods];
    for (var, coef) in source.objective().terms() {
        match locals[var.index()] {
            Local::Planning(id) => planning_objective.add_term(id, coef),
            Local::Operation { period, id } => sub_objectives[period - 1].add_term(id, coef),
        }
    }
    planning.program.set_objective(planning_objective);
    for (sub, objective) in subproblems.iter_mut().zip(sub_objectives) {
        sub.program.set_objective(objective);
    }

    Ok(Partition {
        planning,
        subproblems,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::CostAggregator;
    use gridplan_core::SolutionAlgorithm;

    fn model_from(program: LinearProgram, periods: usize) -> AssembledModel {
        AssembledModel {
            program,
            periods: Vec::new(),
            costs: CostAggregator::new(0.0, vec![1; periods]).unwrap(),
            algorithm: SolutionAlgorithm::Benders,
            peak_demand: 0.0,
        }
    }

    #[test]
    fn test_rows_follow_stage_tags() {
        let mut lp = LinearProgram::new();
        let cap = lp.add_variable(VariableDef::non_negative("cap", Stage::Planning));
        let f1 = lp.add_variable(VariableDef::non_negative("f1", Stage::Operation(1)));
        let f2 = lp.add_variable(VariableDef::non_negative("f2", Stage::Operation(2)));
        lp.add_constraint("cap_max", LinearExpr::from(cap), Sense::LessEqual, 10.0);
        lp.add_constraint(
            "f1_cap",
            LinearExpr::from(f1).with_term(cap, -1.0),
            Sense::LessEqual,
            0.0,
        );
        lp.add_constraint("f2_dem", LinearExpr::from(f2), Sense::Equal, 3.0);
        lp.set_objective(LinearExpr::from_terms([(cap, 5.0), (f1, 1.0), (f2, 2.0)]));

        let part = partition(&model_from(lp, 2)).unwrap();
        let first = VariableId::from_index(0);

        assert_eq!(part.planning.program.num_variables(), 1);
        assert_eq!(part.planning.program.num_constraints(), 1);
        assert_eq!(part.planning.program.objective().coefficient(first), 5.0);

        let sub1 = &part.subproblems[0];
        assert_eq!(sub1.operation_vars, vec![f1]);
        assert_eq!(sub1.copies.len(), 1);
        assert_eq!(sub1.program.num_constraints(), 2);
        let sub2 = &part.subproblems[1];
        assert!(sub2.copies.is_empty());
        assert_eq!(sub2.program.objective().coefficient(first), 2.0);
    }

    #[test]
    fn test_cross_period_row_rejected() {
        let mut lp = LinearProgram::new();
        let f1 = lp.add_variable(VariableDef::non_negative("f1", Stage::Operation(1)));
        let f2 = lp.add_variable(VariableDef::non_negative("f2", Stage::Operation(2)));
        lp.add_constraint(
            "link",
            LinearExpr::from(f1).with_term(f2, -1.0),
            Sense::Equal,
            0.0,
        );
        let err = partition(&model_from(lp, 2)).unwrap_err();
        assert!(matches!(
            err,
            AssemblyError::CrossPeriodCoupling {
                first: 1,
                second: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_fix_updates_rhs() {
        let mut lp = LinearProgram::new();
        let cap = lp.add_variable(VariableDef::non_negative("cap", Stage::Planning));
        let f1 = lp.add_variable(VariableDef::non_negative("f1", Stage::Operation(1)));
        lp.add_constraint(
            "f1_cap",
            LinearExpr::from(f1).with_term(cap, -1.0),
            Sense::LessEqual,
            0.0,
        );
        let mut part = partition(&model_from(lp, 1)).unwrap();
        let sub = &mut part.subproblems[0];
        sub.fix(&[42.0]);
        let row = sub.copies[0].row;
        assert_eq!(sub.program.constraint(row).rhs, 42.0);
        assert_eq!(sub.program.constraint(row).name, "cap#copy#fix");
    }
}
