//! Edge variable preallocation
//!
//! [`EdgeVariableStore::allocate`] creates every edge-level decision variable
//! and every binding constraint of one period in a single pass, before any
//! other part of the builder looks at those edges. Later steps fetch handles
//! from the store; there is no on-demand creation path.
//!
//! Allocation runs in two phases:
//!
//! 1. **Plan** – each edge is validated and turned into an [`EdgePlan`]
//!    (variables and constraints it needs, referencing its own variables by
//!    `(kind, step)`). Plans are independent, so with the `parallel` feature
//!    they are computed on the rayon pool.
//! 2. **Commit** – plans are written into the [`LinearProgram`] sequentially,
//!    edges sorted by [`EdgeId`].
//!
//! No variable is created unless every edge planned successfully, and the
//! resulting variable/constraint sequence depends only on the edge ids, not
//! on the order the edges were handed in.

use crate::error::AllocationError;
use crate::program::{
    ConstraintId, LinearExpr, LinearProgram, Sense, Stage, VariableDef, VariableId,
};
use gridplan_core::{Edge, EdgeCapability, EdgeId, TimeDomain};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Edge-level decision variable kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VariableKind {
    Capacity,
    NewCapacity,
    RetiredCapacity,
    Flow,
    Commitment,
    Startup,
    Shutdown,
    RampUp,
    RampDown,
}

impl VariableKind {
    pub const ALL: [VariableKind; 9] = [
        VariableKind::Capacity,
        VariableKind::NewCapacity,
        VariableKind::RetiredCapacity,
        VariableKind::Flow,
        VariableKind::Commitment,
        VariableKind::Startup,
        VariableKind::Shutdown,
        VariableKind::RampUp,
        VariableKind::RampDown,
    ];

    /// Whether the kind has one variable per time step.
    pub fn is_per_step(&self) -> bool {
        !matches!(
            self,
            VariableKind::Capacity | VariableKind::NewCapacity | VariableKind::RetiredCapacity
        )
    }

    /// Capability an edge must declare for this kind to exist.
    pub fn required_capability(&self) -> Option<EdgeCapability> {
        match self {
            VariableKind::Capacity => Some(EdgeCapability::Capacity),
            VariableKind::NewCapacity => Some(EdgeCapability::Expansion),
            VariableKind::RetiredCapacity => Some(EdgeCapability::Retirement),
            VariableKind::Flow => None,
            VariableKind::Commitment | VariableKind::Startup | VariableKind::Shutdown => {
                Some(EdgeCapability::UnitCommitment)
            }
            VariableKind::RampUp | VariableKind::RampDown => Some(EdgeCapability::Ramping),
        }
    }

    pub fn applies_to(&self, edge: &Edge) -> bool {
        self.required_capability().map_or(true, |c| edge.has(c))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VariableKind::Capacity => "capacity",
            VariableKind::NewCapacity => "new_capacity",
            VariableKind::RetiredCapacity => "retired_capacity",
            VariableKind::Flow => "flow",
            VariableKind::Commitment => "commitment",
            VariableKind::Startup => "startup",
            VariableKind::Shutdown => "shutdown",
            VariableKind::RampUp => "ramp_up",
            VariableKind::RampDown => "ramp_down",
        }
    }
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edge-level constraint kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstraintKind {
    MaxCapacity,
    MinCapacity,
    FlowCapacity,
    ReverseFlowCapacity,
    CommitmentCapacity,
    MinStableFlow,
    CommitmentTransition,
    MinUpTime,
    MinDownTime,
    RampDefinition,
    RampUpLimit,
    RampDownLimit,
    // Registered by the model builder
    CapacityDefinition,
    MaxNewCapacity,
    MaxRetiredCapacity,
    AgeRetirement,
}

impl ConstraintKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintKind::MaxCapacity => "max_capacity",
            ConstraintKind::MinCapacity => "min_capacity",
            ConstraintKind::FlowCapacity => "flow_capacity",
            ConstraintKind::ReverseFlowCapacity => "reverse_flow_capacity",
            ConstraintKind::CommitmentCapacity => "commitment_capacity",
            ConstraintKind::MinStableFlow => "min_stable_flow",
            ConstraintKind::CommitmentTransition => "commitment_transition",
            ConstraintKind::MinUpTime => "min_up_time",
            ConstraintKind::MinDownTime => "min_down_time",
            ConstraintKind::RampDefinition => "ramp_definition",
            ConstraintKind::RampUpLimit => "ramp_up_limit",
            ConstraintKind::RampDownLimit => "ramp_down_limit",
            ConstraintKind::CapacityDefinition => "capacity_definition",
            ConstraintKind::MaxNewCapacity => "max_new_capacity",
            ConstraintKind::MaxRetiredCapacity => "max_retired_capacity",
            ConstraintKind::AgeRetirement => "age_retirement",
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts reported by one allocation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationSummary {
    pub edges: usize,
    pub variables: usize,
    pub integer_variables: usize,
    pub constraints: usize,
}

type VarKey = (VariableKind, Option<usize>);

#[derive(Debug)]
struct PlannedVariable {
    kind: VariableKind,
    step: Option<usize>,
    lower: f64,
    upper: f64,
    integer: bool,
}

#[derive(Debug)]
struct PlannedConstraint {
    kind: ConstraintKind,
    step: Option<usize>,
    terms: Vec<(VarKey, f64)>,
    sense: Sense,
    rhs: f64,
}

/// Validated allocation of one edge, not yet written into a program.
#[derive(Debug)]
struct EdgePlan {
    edge: EdgeId,
    variables: Vec<PlannedVariable>,
    constraints: Vec<PlannedConstraint>,
}

impl EdgePlan {
    fn var(&mut self, kind: VariableKind, step: Option<usize>, lower: f64, upper: f64, integer: bool) {
        self.variables.push(PlannedVariable {
            kind,
            step,
            lower,
            upper,
            integer,
        });
    }

    fn row(
        &mut self,
        kind: ConstraintKind,
        step: Option<usize>,
        terms: Vec<(VarKey, f64)>,
        sense: Sense,
        rhs: f64,
    ) {
        self.constraints.push(PlannedConstraint {
            kind,
            step,
            terms,
            sense,
            rhs,
        });
    }
}

fn missing(edge: &Edge, capability: EdgeCapability, attribute: &'static str) -> AllocationError {
    AllocationError::MissingAttribute {
        edge: edge.id.clone(),
        capability,
        attribute,
    }
}

fn invalid(edge: &Edge, attribute: &'static str, reason: impl Into<String>) -> AllocationError {
    AllocationError::InvalidAttribute {
        edge: edge.id.clone(),
        attribute,
        reason: reason.into(),
    }
}

/// Check capability dependencies and attribute values of one edge.
pub fn validate_edge(edge: &Edge, time: &TimeDomain) -> Result<(), AllocationError> {
    for dependent in [
        EdgeCapability::Expansion,
        EdgeCapability::Retirement,
        EdgeCapability::UnitCommitment,
        EdgeCapability::Ramping,
    ] {
        if edge.has(dependent) && !edge.has(EdgeCapability::Capacity) {
            return Err(AllocationError::MissingCapability {
                edge: edge.id.clone(),
                capability: dependent,
                requires: EdgeCapability::Capacity,
            });
        }
    }

    if edge.has(EdgeCapability::UnitCommitment) {
        let uc = &edge.unit_commitment;
        let min_stable = uc
            .min_stable_fraction
            .ok_or_else(|| missing(edge, EdgeCapability::UnitCommitment, "min_stable_fraction"))?;
        let size = uc
            .unit_size
            .ok_or_else(|| missing(edge, EdgeCapability::UnitCommitment, "unit_size"))?;
        if !(0.0..=1.0).contains(&min_stable) {
            return Err(invalid(edge, "min_stable_fraction", "must lie in [0, 1]"));
        }
        if !(size > 0.0) || !size.is_finite() {
            return Err(invalid(edge, "unit_size", "must be positive"));
        }
        if uc.startup_cost < 0.0 {
            return Err(invalid(edge, "startup_cost", "must be non-negative"));
        }
    }

    if edge.has(EdgeCapability::Ramping) {
        let up = edge
            .ramp_up_fraction
            .ok_or_else(|| missing(edge, EdgeCapability::Ramping, "ramp_up_fraction"))?;
        let down = edge
            .ramp_down_fraction
            .ok_or_else(|| missing(edge, EdgeCapability::Ramping, "ramp_down_fraction"))?;
        if up < 0.0 || down < 0.0 {
            return Err(invalid(edge, "ramp_fraction", "must be non-negative"));
        }
    }

    if edge.existing_capacity < 0.0 || !edge.existing_capacity.is_finite() {
        return Err(invalid(edge, "existing_capacity", "must be non-negative"));
    }
    if edge.min_capacity < 0.0 {
        return Err(invalid(edge, "min_capacity", "must be non-negative"));
    }
    if let Some(max) = edge.max_capacity {
        if max < edge.min_capacity {
            return Err(invalid(
                edge,
                "max_capacity",
                format!("{} is below min_capacity {}", max, edge.min_capacity),
            ));
        }
    }
    if matches!(edge.max_new_capacity, Some(limit) if limit < 0.0) {
        return Err(invalid(edge, "max_new_capacity", "must be non-negative"));
    }
    if let Some(profile) = &edge.availability {
        if profile.len() != time.len() {
            return Err(invalid(
                edge,
                "availability",
                format!("{} values for {} time steps", profile.len(), time.len()),
            ));
        }
        if profile.iter().any(|a| !a.is_finite() || *a < 0.0) {
            return Err(invalid(edge, "availability", "values must be non-negative"));
        }
    }
    if !(0.0..1.0).contains(&edge.loss_fraction) {
        return Err(invalid(edge, "loss_fraction", "must lie in [0, 1)"));
    }
    if edge.loss_fraction > 0.0 && !edge.unidirectional {
        return Err(invalid(
            edge,
            "loss_fraction",
            "losses are only supported on unidirectional edges",
        ));
    }
    Ok(())
}

/// Validate an edge and compute everything it needs.
fn plan_edge(edge: &Edge, time: &TimeDomain) -> Result<EdgePlan, AllocationError> {
    validate_edge(edge, time)?;

    let mut plan = EdgePlan {
        edge: edge.id.clone(),
        variables: Vec::new(),
        constraints: Vec::new(),
    };
    let steps = time.steps();
    let cap = (VariableKind::Capacity, None);
    let flow = |t: usize| (VariableKind::Flow, Some(t));

    // Variables
    for kind in [
        VariableKind::Capacity,
        VariableKind::NewCapacity,
        VariableKind::RetiredCapacity,
    ] {
        if kind.applies_to(edge) {
            plan.var(kind, None, 0.0, f64::INFINITY, false);
        }
    }
    let flow_lower = if edge.unidirectional {
        0.0
    } else {
        f64::NEG_INFINITY
    };
    for t in steps.clone() {
        plan.var(VariableKind::Flow, Some(t), flow_lower, f64::INFINITY, false);
    }
    let integer = edge.unit_commitment.integer;
    for kind in [
        VariableKind::Commitment,
        VariableKind::Startup,
        VariableKind::Shutdown,
        VariableKind::RampUp,
        VariableKind::RampDown,
    ] {
        if !kind.applies_to(edge) {
            continue;
        }
        let is_integer = integer && kind.required_capability() == Some(EdgeCapability::UnitCommitment);
        for t in steps.clone() {
            plan.var(kind, Some(t), 0.0, f64::INFINITY, is_integer);
        }
    }

    if !edge.has(EdgeCapability::Capacity) {
        return Ok(plan);
    }

    // Capacity bounds
    if let Some(max) = edge.max_capacity {
        plan.row(ConstraintKind::MaxCapacity, None, vec![(cap, 1.0)], Sense::LessEqual, max);
    }
    if edge.min_capacity > 0.0 {
        plan.row(
            ConstraintKind::MinCapacity,
            None,
            vec![(cap, 1.0)],
            Sense::GreaterEqual,
            edge.min_capacity,
        );
    }

    let uc = edge.has(EdgeCapability::UnitCommitment);
    let size = edge.unit_commitment.unit_size.unwrap_or(0.0);
    let min_stable = edge.unit_commitment.min_stable_fraction.unwrap_or(0.0);
    let commit = |t: usize| (VariableKind::Commitment, Some(t));
    let startup = |t: usize| (VariableKind::Startup, Some(t));
    let shutdown = |t: usize| (VariableKind::Shutdown, Some(t));

    for t in steps.clone() {
        let avail = edge.availability_at(t);
        if uc {
            plan.row(
                ConstraintKind::FlowCapacity,
                Some(t),
                vec![(flow(t), 1.0), (commit(t), -avail * size)],
                Sense::LessEqual,
                0.0,
            );
        } else {
            plan.row(
                ConstraintKind::FlowCapacity,
                Some(t),
                vec![(flow(t), 1.0), (cap, -avail)],
                Sense::LessEqual,
                0.0,
            );
        }
        if !edge.unidirectional {
            plan.row(
                ConstraintKind::ReverseFlowCapacity,
                Some(t),
                vec![(flow(t), 1.0), (cap, avail)],
                Sense::GreaterEqual,
                0.0,
            );
        }
    }

    if uc {
        for t in steps.clone() {
            plan.row(
                ConstraintKind::CommitmentCapacity,
                Some(t),
                vec![(commit(t), size), (cap, -1.0)],
                Sense::LessEqual,
                0.0,
            );
            plan.row(
                ConstraintKind::MinStableFlow,
                Some(t),
                vec![(flow(t), 1.0), (commit(t), -min_stable * size)],
                Sense::GreaterEqual,
                0.0,
            );
            plan.row(
                ConstraintKind::CommitmentTransition,
                Some(t),
                vec![
                    (commit(t), 1.0),
                    (commit(time.prev(t)), -1.0),
                    (startup(t), -1.0),
                    (shutdown(t), 1.0),
                ],
                Sense::Equal,
                0.0,
            );
        }
        if let Some(k) = edge.unit_commitment.min_up_steps.filter(|&k| k > 0) {
            let window = k.min(time.subperiod_length);
            for t in steps.clone() {
                let mut terms: Vec<(VarKey, f64)> =
                    (0..window).map(|j| (startup(time.lag(t, j)), 1.0)).collect();
                terms.push((commit(t), -1.0));
                plan.row(ConstraintKind::MinUpTime, Some(t), terms, Sense::LessEqual, 0.0);
            }
        }
        if let Some(k) = edge.unit_commitment.min_down_steps.filter(|&k| k > 0) {
            let window = k.min(time.subperiod_length);
            for t in steps.clone() {
                let mut terms: Vec<(VarKey, f64)> =
                    (0..window).map(|j| (shutdown(time.lag(t, j)), 1.0)).collect();
                terms.push((commit(t), 1.0));
                terms.push((cap, -1.0 / size));
                plan.row(ConstraintKind::MinDownTime, Some(t), terms, Sense::LessEqual, 0.0);
            }
        }
    }

    if edge.has(EdgeCapability::Ramping) {
        let up_frac = edge.ramp_up_fraction.unwrap_or(0.0);
        let down_frac = edge.ramp_down_fraction.unwrap_or(0.0);
        for t in steps {
            let up = (VariableKind::RampUp, Some(t));
            let down = (VariableKind::RampDown, Some(t));
            plan.row(
                ConstraintKind::RampDefinition,
                Some(t),
                vec![(flow(t), 1.0), (flow(time.prev(t)), -1.0), (up, -1.0), (down, 1.0)],
                Sense::Equal,
                0.0,
            );
            plan.row(
                ConstraintKind::RampUpLimit,
                Some(t),
                vec![(up, 1.0), (cap, -up_frac)],
                Sense::LessEqual,
                0.0,
            );
            plan.row(
                ConstraintKind::RampDownLimit,
                Some(t),
                vec![(down, 1.0), (cap, -down_frac)],
                Sense::LessEqual,
                0.0,
            );
        }
    }

    Ok(plan)
}

#[cfg(feature = "parallel")]
fn plan_all(edges: &[&Edge], time: &TimeDomain) -> Vec<Result<EdgePlan, AllocationError>> {
    edges.par_iter().map(|edge| plan_edge(edge, time)).collect()
}

#[cfg(not(feature = "parallel"))]
fn plan_all(edges: &[&Edge], time: &TimeDomain) -> Vec<Result<EdgePlan, AllocationError>> {
    edges.iter().map(|edge| plan_edge(edge, time)).collect()
}

/// Handles of all edge-level variables and constraints of one period.
#[derive(Debug, Clone, Default)]
pub struct EdgeVariableStore {
    period: usize,
    variables: HashMap<(EdgeId, VariableKind, Option<usize>), VariableId>,
    constraints: HashMap<(EdgeId, ConstraintKind, Option<usize>), ConstraintId>,
    edges: Vec<EdgeId>,
}

impl EdgeVariableStore {
    /// Empty store for period `period` (1-based).
    pub fn new(period: usize) -> Self {
        Self {
            period,
            ..Default::default()
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Create all variables and binding constraints of `edges`.
    ///
    /// Every edge is validated first; on error nothing is written into
    /// `program` or the store.
    pub fn allocate(
        &mut self,
        program: &mut LinearProgram,
        edges: &[&Edge],
        time: &TimeDomain,
    ) -> Result<AllocationSummary, AllocationError> {
        let mut sorted: Vec<&Edge> = edges.to_vec();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        for pair in sorted.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(AllocationError::DuplicateEdge(pair[0].id.clone()));
            }
        }
        if let Some(edge) = sorted.iter().find(|e| self.edges.contains(&e.id)) {
            return Err(AllocationError::DuplicateEdge(edge.id.clone()));
        }

        let plans = plan_all(&sorted, time)
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;

        let mut summary = AllocationSummary {
            edges: plans.len(),
            ..Default::default()
        };
        for plan in plans {
            self.commit(program, plan, &mut summary);
        }
        debug!(
            period = self.period,
            edges = summary.edges,
            variables = summary.variables,
            constraints = summary.constraints,
            "allocated edge variables"
        );
        Ok(summary)
    }

    fn commit(&mut self, program: &mut LinearProgram, plan: EdgePlan, summary: &mut AllocationSummary) {
        let mut local: HashMap<VarKey, VariableId> = HashMap::with_capacity(plan.variables.len());
        for var in &plan.variables {
            let stage = if var.kind.is_per_step() {
                Stage::Operation(self.period)
            } else {
                Stage::Planning
            };
            let mut def = VariableDef::non_negative(
                variable_name(self.period, var.kind, &plan.edge, var.step),
                stage,
            )
            .with_bounds(var.lower, var.upper);
            if var.integer {
                def = def.integer();
                summary.integer_variables += 1;
            }
            let id = program.add_variable(def);
            local.insert((var.kind, var.step), id);
            self.variables
                .insert((plan.edge.clone(), var.kind, var.step), id);
            summary.variables += 1;
        }
        for row in plan.constraints {
            let expr = LinearExpr::from_terms(
                row.terms
                    .iter()
                    .filter_map(|(key, coef)| local.get(key).map(|&id| (id, *coef))),
            );
            let name = constraint_name(self.period, row.kind, &plan.edge, row.step);
            let id = program.add_constraint(name, expr, row.sense, row.rhs);
            self.constraints
                .insert((plan.edge.clone(), row.kind, row.step), id);
            summary.constraints += 1;
        }
        self.edges.push(plan.edge);
    }

    /// Record a constraint created outside allocation (builder-time rows).
    pub fn register_constraint(
        &mut self,
        edge: &EdgeId,
        kind: ConstraintKind,
        step: Option<usize>,
        id: ConstraintId,
    ) -> Result<(), AllocationError> {
        let key = (edge.clone(), kind, step);
        if self.constraints.contains_key(&key) {
            return Err(AllocationError::DuplicateHandle {
                edge: edge.clone(),
                kind: kind.as_str(),
                step,
            });
        }
        self.constraints.insert(key, id);
        Ok(())
    }

    pub fn variable(&self, edge: &EdgeId, kind: VariableKind, step: Option<usize>) -> Option<VariableId> {
        self.variables.get(&(edge.clone(), kind, step)).copied()
    }

    pub fn capacity(&self, edge: &EdgeId) -> Option<VariableId> {
        self.variable(edge, VariableKind::Capacity, None)
    }

    pub fn new_capacity(&self, edge: &EdgeId) -> Option<VariableId> {
        self.variable(edge, VariableKind::NewCapacity, None)
    }

    pub fn retired_capacity(&self, edge: &EdgeId) -> Option<VariableId> {
        self.variable(edge, VariableKind::RetiredCapacity, None)
    }

    pub fn flow(&self, edge: &EdgeId, t: usize) -> Option<VariableId> {
        self.variable(edge, VariableKind::Flow, Some(t))
    }

    pub fn constraint(&self, edge: &EdgeId, kind: ConstraintKind, step: Option<usize>) -> Option<ConstraintId> {
        self.constraints.get(&(edge.clone(), kind, step)).copied()
    }

    /// Allocated edges, in allocation (id) order.
    pub fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    pub fn is_allocated(&self, edge: &EdgeId) -> bool {
        self.edges.contains(edge)
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// Number of handles of `kind` (over all edges and steps).
    pub fn count_variables(&self, kind: VariableKind) -> usize {
        self.variables.keys().filter(|(_, k, _)| *k == kind).count()
    }

    pub fn count_constraints(&self, kind: ConstraintKind) -> usize {
        self.constraints.keys().filter(|(_, k, _)| *k == kind).count()
    }
}

fn variable_name(period: usize, kind: VariableKind, edge: &EdgeId, step: Option<usize>) -> String {
    match step {
        Some(t) => format!("s{}.{}[{},{}]", period, kind, edge, t),
        None => format!("s{}.{}[{}]", period, kind, edge),
    }
}

fn constraint_name(period: usize, kind: ConstraintKind, edge: &EdgeId, step: Option<usize>) -> String {
    match step {
        Some(t) => format!("s{}.{}[{},{}]", period, kind, edge, t),
        None => format!("s{}.{}[{}]", period, kind, edge),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridplan_core::{Endpoint, NodeId, UnitCommitmentParams};

    fn edge(id: &str) -> Edge {
        Edge::new(
            id,
            Endpoint::Asset(id.into()),
            Endpoint::Node(NodeId::from("zone")),
        )
    }

    fn uc_params() -> UnitCommitmentParams {
        UnitCommitmentParams {
            unit_size: Some(50.0),
            min_stable_fraction: Some(0.4),
            startup_cost: 10.0,
            min_up_steps: Some(2),
            min_down_steps: Some(2),
            integer: false,
        }
    }

    #[test]
    fn test_plain_flow_edge() {
        let time = TimeDomain::uniform_year(4);
        let e = edge("import");
        let mut program = LinearProgram::new();
        let mut store = EdgeVariableStore::new(1);
        let summary = store.allocate(&mut program, &[&e], &time).unwrap();
        assert_eq!(summary.variables, 4);
        assert_eq!(summary.constraints, 0);
        assert!(store.capacity(&e.id).is_none());
        assert!(store.flow(&e.id, 3).is_some());
        assert!(store.flow(&e.id, 4).is_none());
    }

    #[test]
    fn test_one_handle_per_kind_and_step() {
        let time = TimeDomain::uniform_year(6).with_subperiod_length(3);
        let e = edge("coal")
            .with_capacity(100.0)
            .with_expansion(1.0)
            .with_retirement(None)
            .with_unit_commitment(uc_params())
            .with_ramping(0.5, 0.5);
        let mut program = LinearProgram::new();
        let mut store = EdgeVariableStore::new(1);
        store.allocate(&mut program, &[&e], &time).unwrap();

        for kind in VariableKind::ALL {
            let expected = if kind.is_per_step() { 6 } else { 1 };
            assert_eq!(store.count_variables(kind), expected, "{}", kind);
        }
        assert_eq!(store.num_variables(), program.num_variables());
        assert_eq!(store.count_constraints(ConstraintKind::FlowCapacity), 6);
        assert_eq!(store.count_constraints(ConstraintKind::MinUpTime), 6);
        assert_eq!(store.count_constraints(ConstraintKind::RampDownLimit), 6);
        assert_eq!(store.count_constraints(ConstraintKind::ReverseFlowCapacity), 0);
        assert_eq!(store.num_constraints(), program.num_constraints());
    }

    #[test]
    fn test_transition_wraps_inside_subperiod() {
        let time = TimeDomain::uniform_year(4).with_subperiod_length(2);
        let e = edge("coal").with_capacity(100.0).with_unit_commitment(uc_params());
        let mut program = LinearProgram::new();
        let mut store = EdgeVariableStore::new(1);
        store.allocate(&mut program, &[&e], &time).unwrap();

        let row = store
            .constraint(&e.id, ConstraintKind::CommitmentTransition, Some(2))
            .unwrap();
        let commit3 = store.variable(&e.id, VariableKind::Commitment, Some(3)).unwrap();
        assert_eq!(program.constraint(row).expr.coefficient(commit3), -1.0);
    }

    #[test]
    fn test_bidirectional_edge_gets_reverse_limit() {
        let time = TimeDomain::uniform_year(3);
        let e = edge("line").with_capacity(10.0).bidirectional();
        let mut program = LinearProgram::new();
        let mut store = EdgeVariableStore::new(2);
        store.allocate(&mut program, &[&e], &time).unwrap();
        assert_eq!(store.count_constraints(ConstraintKind::ReverseFlowCapacity), 3);
        let flow = store.flow(&e.id, 0).unwrap();
        assert_eq!(program.variable(flow).lower, f64::NEG_INFINITY);
        assert_eq!(program.variable(flow).stage, Stage::Operation(2));
        let cap = store.capacity(&e.id).unwrap();
        assert_eq!(program.variable(cap).stage, Stage::Planning);
    }

    #[test]
    fn test_missing_min_stable_level_creates_nothing() {
        let time = TimeDomain::uniform_year(4);
        let good = edge("a_gas").with_capacity(10.0);
        let mut params = uc_params();
        params.min_stable_fraction = None;
        let bad = edge("z_coal").with_capacity(10.0).with_unit_commitment(params);

        let mut program = LinearProgram::new();
        let mut store = EdgeVariableStore::new(1);
        let err = store.allocate(&mut program, &[&good, &bad], &time).unwrap_err();
        assert!(matches!(
            err,
            AllocationError::MissingAttribute {
                attribute: "min_stable_fraction",
                ..
            }
        ));
        assert_eq!(program.num_variables(), 0);
        assert_eq!(store.num_variables(), 0);
    }

    #[test]
    fn test_capability_dependencies() {
        let time = TimeDomain::uniform_year(2);
        let e = edge("wind").with_expansion(5.0);
        let err = validate_edge(&e, &time).unwrap_err();
        assert!(matches!(
            err,
            AllocationError::MissingCapability {
                requires: EdgeCapability::Capacity,
                ..
            }
        ));

        let mut ramp = edge("hydro").with_capacity(1.0).with_ramping(0.1, 0.1);
        ramp.ramp_down_fraction = None;
        assert!(matches!(
            validate_edge(&ramp, &time),
            Err(AllocationError::MissingAttribute {
                attribute: "ramp_down_fraction",
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_attributes() {
        let time = TimeDomain::uniform_year(2);
        let short = edge("pv").with_capacity(1.0).with_availability(vec![0.5]);
        assert!(validate_edge(&short, &time).is_err());

        let inverted = edge("gas").with_capacity(1.0).with_capacity_bounds(5.0, Some(2.0));
        assert!(validate_edge(&inverted, &time).is_err());

        let lossy = edge("line").with_capacity(1.0).with_loss_fraction(0.02).bidirectional();
        assert!(validate_edge(&lossy, &time).is_err());
    }

    #[test]
    fn test_duplicate_allocation_rejected() {
        let time = TimeDomain::uniform_year(2);
        let e = edge("gas").with_capacity(1.0);
        let mut program = LinearProgram::new();
        let mut store = EdgeVariableStore::new(1);
        assert!(matches!(
            store.allocate(&mut program, &[&e, &e], &time),
            Err(AllocationError::DuplicateEdge(_))
        ));
        store.allocate(&mut program, &[&e], &time).unwrap();
        assert!(store.allocate(&mut program, &[&e], &time).is_err());

        let c = program.add_constraint("extra", LinearExpr::new(), Sense::Equal, 0.0);
        store
            .register_constraint(&e.id, ConstraintKind::MaxNewCapacity, None, c)
            .unwrap();
        assert!(store
            .register_constraint(&e.id, ConstraintKind::MaxNewCapacity, None, c)
            .is_err());
    }

    #[test]
    fn test_integer_commitment() {
        let time = TimeDomain::uniform_year(2);
        let mut params = uc_params();
        params.integer = true;
        let e = edge("coal").with_capacity(100.0).with_unit_commitment(params);
        let mut program = LinearProgram::new();
        let mut store = EdgeVariableStore::new(1);
        let summary = store.allocate(&mut program, &[&e], &time).unwrap();
        assert_eq!(summary.integer_variables, 6);
        assert_eq!(program.num_integer_variables(), 6);
    }
}
