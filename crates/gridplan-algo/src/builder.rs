//! Multi-period model assembly
//!
//! [`ModelBuilder::build`] walks the periods of a [`Case`] strictly in order
//! and, for each period `s`:
//!
//! 1. preallocates all edge variables and edge constraints ([`EdgeVariableStore`]);
//! 2. adds linking variables (non-served energy per node, storage level per battery);
//! 3. defines available capacity `capacity = start + new − retired`;
//! 4. adds planning limits (`new ≤ max_new`, `retired ≤ start`);
//! 5. adds age-based retirement over all vintages built so far;
//! 6. hands `capacity[s]` over to the matching edge of period `s + 1`;
//! 7. adds node balances and storage balances;
//! 8. moves the cost registers into a [`PeriodCosts`] record.
//!
//! The objective is formed by the [`CostAggregator`] once all periods are built.

use crate::cost::{CostAggregator, PeriodCosts};
use crate::error::AssemblyError;
use crate::program::{
    ConstraintId, LinearExpr, LinearProgram, Sense, Stage, VariableDef, VariableId,
};
use crate::store::{AllocationSummary, ConstraintKind, EdgeVariableStore, VariableKind};
use gridplan_core::{
    Asset, AssetId, CarriedCapacity, Case, CaseError, Edge, EdgeCapability, EdgeId, Endpoint,
    NodeId, Period, SolutionAlgorithm,
};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Everything the builder created for one period.
#[derive(Debug, Clone)]
pub struct PeriodModel {
    /// 1-based period index
    pub index: usize,
    pub length_years: u32,
    /// Years elapsed between the horizon start and the start of this period
    pub start_year: u32,
    pub store: EdgeVariableStore,
    pub allocation: AllocationSummary,
    pub costs: PeriodCosts,
    /// Capacity available at the start of the period, per capacity edge
    pub start_capacity: BTreeMap<EdgeId, LinearExpr>,
    pub non_served: BTreeMap<(NodeId, usize), VariableId>,
    pub storage_level: BTreeMap<(AssetId, usize), VariableId>,
    pub balance: BTreeMap<(NodeId, usize), ConstraintId>,
}

impl PeriodModel {
    pub fn capacity(&self, edge: &EdgeId) -> Option<VariableId> {
        self.store.capacity(edge)
    }

    pub fn start_capacity(&self, edge: &EdgeId) -> Option<&LinearExpr> {
        self.start_capacity.get(edge)
    }
}

/// Output of the builder, handed read-only to the decomposition controller.
#[derive(Debug, Clone)]
pub struct AssembledModel {
    pub program: LinearProgram,
    pub periods: Vec<PeriodModel>,
    pub costs: CostAggregator,
    pub algorithm: SolutionAlgorithm,
    /// Largest coincident-peak demand of any period
    pub peak_demand: f64,
}

impl AssembledModel {
    pub fn num_periods(&self) -> usize {
        self.costs.num_periods()
    }

    pub fn period(&self, index: usize) -> Option<&PeriodModel> {
        index.checked_sub(1).and_then(|i| self.periods.get(i))
    }

    pub fn period_costs(&self) -> impl Iterator<Item = &PeriodCosts> + '_ {
        self.periods.iter().map(|p| &p.costs)
    }

    /// Rewrite every capacity as `start + new − retired`, in period order.
    ///
    /// Later periods read the settled capacity of earlier ones through their
    /// start expressions, so a planning point solved to a tolerance becomes
    /// exactly consistent along the carry-over chain.
    pub fn settle_capacities(&self, values: &mut [f64]) {
        for period in &self.periods {
            for (edge, start) in &period.start_capacity {
                let Some(capacity) = period.store.capacity(edge) else {
                    continue;
                };
                let mut level = start.evaluate(values);
                if let Some(new) = period.store.new_capacity(edge) {
                    level += values[new.index()];
                }
                if let Some(retired) = period.store.retired_capacity(edge) {
                    level -= values[retired.index()];
                }
                values[capacity.index()] = level.max(0.0);
            }
        }
    }
}

fn peak_demand(case: &Case) -> f64 {
    case.periods
        .iter()
        .map(|period| {
            period
                .graph
                .nodes
                .iter()
                .map(|node| node.demand.iter().copied().fold(0.0, f64::max))
                .sum::<f64>()
        })
        .fold(0.0, f64::max)
}

/// Build history of one edge, for age tracking.
#[derive(Debug, Clone, Copy)]
struct Vintage {
    start_year: u32,
    new: Option<VariableId>,
    retired: Option<VariableId>,
}

/// Assembles the multi-period program.
///
/// The three cost registers are working state: they collect terms while a
/// period is built and are emptied into that period's [`PeriodCosts`].
#[derive(Debug, Default)]
pub struct ModelBuilder {
    investment_cost: LinearExpr,
    om_fixed_cost: LinearExpr,
    variable_cost: LinearExpr,
    vintages: HashMap<EdgeId, Vec<Vintage>>,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble all periods of `case`.
    ///
    /// Period edges are updated in place with the capacity carried over from
    /// the previous period.
    pub fn build(&mut self, case: &mut Case) -> Result<AssembledModel, AssemblyError> {
        check_periods(case)?;
        self.vintages.clear();
        // Handles from an earlier build point into another program
        for edge in case.periods.iter_mut().flat_map(|p| p.graph.edges_mut()) {
            edge.carried_capacity = None;
        }

        let first = case.periods[0].settings;
        let costs = CostAggregator::new(first.discount_rate, case.period_lengths())?;
        let mut program = LinearProgram::new();
        program.scale_constraints = first.scale_constraints;

        let n = case.periods.len();
        let mut periods = Vec::with_capacity(n);
        for s in 0..n {
            let (head, tail) = case.periods.split_at_mut(s + 1);
            let period = &head[s];
            period.validate()?;

            let model = self.build_period(&mut program, period, costs.start_year(period.index))?;
            if let Some(next) = tail.first_mut() {
                carry_over(&model, next)?;
            }
            info!(
                period = model.index,
                variables = program.num_variables(),
                constraints = program.num_constraints(),
                "assembled period"
            );
            periods.push(model);
        }

        program.set_objective(costs.objective(periods.iter().map(|p| &p.costs)));
        Ok(AssembledModel {
            program,
            periods,
            costs,
            algorithm: first.algorithm,
            peak_demand: peak_demand(case),
        })
    }

    fn build_period(
        &mut self,
        program: &mut LinearProgram,
        period: &Period,
        start_year: u32,
    ) -> Result<PeriodModel, AssemblyError> {
        let s = period.index;
        let time = &period.time;

        // 1. preallocation
        let edges: Vec<&Edge> = period.graph.edges().collect();
        let mut store = EdgeVariableStore::new(s);
        let allocation = store.allocate(program, &edges, time)?;
        let mut sorted = edges;
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let mut model = PeriodModel {
            index: s,
            length_years: period.settings.period_length_years,
            start_year,
            store,
            allocation,
            costs: PeriodCosts::default(),
            start_capacity: BTreeMap::new(),
            non_served: BTreeMap::new(),
            storage_level: BTreeMap::new(),
            balance: BTreeMap::new(),
        };

        // 2. linking variables
        for node in &period.graph.nodes {
            let Some(penalty) = node.nse_penalty else {
                continue;
            };
            for t in time.steps() {
                let demand = node.demand[t].max(0.0);
                let var = program.add_variable(
                    VariableDef::non_negative(
                        format!("s{}.non_served[{},{}]", s, node.id, t),
                        Stage::Operation(s),
                    )
                    .with_upper(demand),
                );
                model.non_served.insert((node.id.clone(), t), var);
                self.variable_cost
                    .add_term(var, time.weight(t) * penalty);
            }
        }
        for asset in &period.graph.assets {
            if let Asset::Battery(battery) = asset {
                for t in time.steps() {
                    let var = program.add_variable(VariableDef::non_negative(
                        format!("s{}.storage_level[{},{}]", s, battery.id, t),
                        Stage::Operation(s),
                    ));
                    model.storage_level.insert((battery.id.clone(), t), var);
                }
            }
        }

        // 3-6. capacity bookkeeping
        for edge in &sorted {
            if edge.has(EdgeCapability::Capacity) {
                self.add_capacity_rows(program, &mut model, edge)?;
            }
        }

        // 7. operations
        add_node_balances(program, &mut model, period)?;
        add_storage_balances(program, &model, period)?;

        // 8. costs
        for edge in &sorted {
            self.accumulate_edge_costs(&model, edge, period)?;
        }
        model.costs = PeriodCosts::new(
            self.investment_cost.take(),
            self.om_fixed_cost.take(),
            self.variable_cost.take(),
        );
        debug!(
            period = s,
            investment_terms = model.costs.investment.num_terms(),
            variable_terms = model.costs.variable.num_terms(),
            "period costs accumulated"
        );
        Ok(model)
    }

    fn add_capacity_rows(
        &mut self,
        program: &mut LinearProgram,
        model: &mut PeriodModel,
        edge: &Edge,
    ) -> Result<(), AssemblyError> {
        let s = model.index;
        let id = &edge.id;
        let capacity = model
            .store
            .capacity(id)
            .ok_or_else(|| missing_handle(s, id, VariableKind::Capacity))?;
        let new = model.store.new_capacity(id);
        let retired = model.store.retired_capacity(id);

        let start = match edge.carried_capacity {
            Some(CarriedCapacity { from_period, handle }) if s > 1 && from_period + 1 == s => {
                LinearExpr::from(VariableId::from_index(handle))
            }
            _ => LinearExpr::constant(edge.existing_capacity),
        };

        // capacity − new + retired − start = 0
        let mut definition = LinearExpr::from(capacity);
        if let Some(new) = new {
            definition.add_term(new, -1.0);
        }
        if let Some(retired) = retired {
            definition.add_term(retired, 1.0);
        }
        definition.add_scaled(&start, -1.0);
        let row = program.add_constraint(
            format!("s{}.capacity_definition[{}]", s, id),
            definition,
            Sense::Equal,
            0.0,
        );
        model
            .store
            .register_constraint(id, ConstraintKind::CapacityDefinition, None, row)?;

        if let (Some(new), Some(limit)) = (new, edge.max_new_capacity) {
            let row = program.add_constraint(
                format!("s{}.max_new_capacity[{}]", s, id),
                LinearExpr::from(new),
                Sense::LessEqual,
                limit,
            );
            model
                .store
                .register_constraint(id, ConstraintKind::MaxNewCapacity, None, row)?;
        }

        if let Some(retired) = retired {
            let mut expr = LinearExpr::from(retired);
            expr.add_scaled(&start, -1.0);
            let row = program.add_constraint(
                format!("s{}.max_retired_capacity[{}]", s, id),
                expr,
                Sense::LessEqual,
                0.0,
            );
            model
                .store
                .register_constraint(id, ConstraintKind::MaxRetiredCapacity, None, row)?;
        }

        let history = self.vintages.entry(id.clone()).or_default();
        history.push(Vintage {
            start_year: model.start_year,
            new,
            retired,
        });

        if let (Some(lifetime), true) = (edge.lifetime_years, retired.is_some()) {
            // Σ retired ≥ Σ {new vintages of age ≥ lifetime} + existing (if expired)
            let now = model.start_year;
            let mut expr = LinearExpr::new();
            let mut required = false;
            for vintage in history.iter() {
                if let Some(r) = vintage.retired {
                    expr.add_term(r, 1.0);
                }
                if let Some(n) = vintage.new {
                    if now - vintage.start_year >= lifetime {
                        expr.add_term(n, -1.0);
                        required = true;
                    }
                }
            }
            let expired_existing = edge.existing_age_years + now >= lifetime;
            let rhs = if expired_existing {
                edge.existing_capacity
            } else {
                0.0
            };
            if required || rhs > 0.0 {
                let row = program.add_constraint(
                    format!("s{}.age_retirement[{}]", s, id),
                    expr,
                    Sense::GreaterEqual,
                    rhs,
                );
                model
                    .store
                    .register_constraint(id, ConstraintKind::AgeRetirement, None, row)?;
            }
        }

        model.start_capacity.insert(id.clone(), start);
        Ok(())
    }

    fn accumulate_edge_costs(
        &mut self,
        model: &PeriodModel,
        edge: &Edge,
        period: &Period,
    ) -> Result<(), AssemblyError> {
        let s = model.index;
        let id = &edge.id;
        let time = &period.time;

        if let Some(new) = model.store.new_capacity(id) {
            self.investment_cost.add_term(new, edge.investment_cost);
        }
        if let Some(capacity) = model.store.capacity(id) {
            self.om_fixed_cost.add_term(capacity, edge.fixed_om_cost);
        }

        let marginal = edge.marginal_cost();
        let startup_cost = if edge.has(EdgeCapability::UnitCommitment) {
            edge.unit_commitment.startup_cost * edge.unit_commitment.unit_size.unwrap_or(0.0)
        } else {
            0.0
        };
        for t in time.steps() {
            let weight = time.weight(t);
            if marginal != 0.0 {
                let flow = model
                    .store
                    .flow(id, t)
                    .ok_or_else(|| missing_handle(s, id, VariableKind::Flow))?;
                self.variable_cost.add_term(flow, weight * marginal);
            }
            if startup_cost != 0.0 {
                let startup = model
                    .store
                    .variable(id, VariableKind::Startup, Some(t))
                    .ok_or_else(|| missing_handle(s, id, VariableKind::Startup))?;
                self.variable_cost.add_term(startup, weight * startup_cost);
            }
        }
        Ok(())
    }
}

fn missing_handle(period: usize, edge: &EdgeId, kind: VariableKind) -> AssemblyError {
    AssemblyError::MissingHandle {
        period,
        edge: edge.clone(),
        what: kind.to_string(),
    }
}

/// Periods must be numbered 1..N and agree on the global settings.
fn check_periods(case: &Case) -> Result<(), AssemblyError> {
    let Some(first) = case.periods.first() else {
        return Err(AssemblyError::Case(CaseError::Validation(
            "case has no periods".to_string(),
        )));
    };
    for (pos, period) in case.periods.iter().enumerate() {
        if period.index != pos + 1 {
            return Err(AssemblyError::PeriodOrder {
                position: pos,
                expected: pos + 1,
                found: period.index,
            });
        }
        if period.settings.discount_rate != first.settings.discount_rate {
            return Err(AssemblyError::InconsistentSettings {
                period: period.index,
                setting: "discount_rate",
            });
        }
        if period.settings.algorithm != first.settings.algorithm {
            return Err(AssemblyError::InconsistentSettings {
                period: period.index,
                setting: "algorithm",
            });
        }
    }
    Ok(())
}

/// Write `capacity[s]` of every capacity edge into period `s + 1`.
fn carry_over(model: &PeriodModel, next: &mut Period) -> Result<(), AssemblyError> {
    for id in model.store.edges() {
        let Some(capacity) = model.store.capacity(id) else {
            continue;
        };
        let target = next
            .graph
            .edge_mut(id)
            .filter(|edge| edge.has(EdgeCapability::Capacity))
            .ok_or_else(|| AssemblyError::MissingCarryOverTarget {
                period: model.index,
                edge: id.clone(),
            })?;
        target.carried_capacity = Some(CarriedCapacity {
            from_period: model.index,
            handle: capacity.index(),
        });
    }
    Ok(())
}

/// `Σ_in (1 − loss)·flow − Σ_out flow + non_served = demand` per node and step.
fn add_node_balances(
    program: &mut LinearProgram,
    model: &mut PeriodModel,
    period: &Period,
) -> Result<(), AssemblyError> {
    let s = model.index;
    let topology = period.graph.topology()?;
    let losses: HashMap<&EdgeId, f64> = period
        .graph
        .edges()
        .map(|e| (&e.id, e.loss_fraction))
        .collect();

    for node in &period.graph.nodes {
        let endpoint = Endpoint::Node(node.id.clone());
        let incoming = topology.incoming(&endpoint);
        let outgoing = topology.outgoing(&endpoint);
        for t in period.time.steps() {
            let mut expr = LinearExpr::new();
            for &id in &incoming {
                let flow = model
                    .store
                    .flow(id, t)
                    .ok_or_else(|| missing_handle(s, id, VariableKind::Flow))?;
                let loss = losses.get(id).copied().unwrap_or(0.0);
                expr.add_term(flow, 1.0 - loss);
            }
            for &id in &outgoing {
                let flow = model
                    .store
                    .flow(id, t)
                    .ok_or_else(|| missing_handle(s, id, VariableKind::Flow))?;
                expr.add_term(flow, -1.0);
            }
            if let Some(&nse) = model.non_served.get(&(node.id.clone(), t)) {
                expr.add_term(nse, 1.0);
            }
            let row = program.add_constraint(
                format!("s{}.balance[{},{}]", s, node.id, t),
                expr,
                Sense::Equal,
                node.demand[t],
            );
            model.balance.insert((node.id.clone(), t), row);
        }
    }
    Ok(())
}

/// Storage level dynamics and the energy limit of every battery.
fn add_storage_balances(
    program: &mut LinearProgram,
    model: &PeriodModel,
    period: &Period,
) -> Result<(), AssemblyError> {
    let s = model.index;
    let time = &period.time;
    let hours = time.hours_per_step;

    for asset in &period.graph.assets {
        let Asset::Battery(battery) = asset else {
            continue;
        };
        let discharge_capacity = model.store.capacity(&battery.discharge.id);
        for t in time.steps() {
            let level = |t: usize| {
                model
                    .storage_level
                    .get(&(battery.id.clone(), t))
                    .copied()
                    .ok_or_else(|| AssemblyError::MissingHandle {
                        period: s,
                        edge: battery.discharge.id.clone(),
                        what: "storage_level".to_string(),
                    })
            };
            let charge = model
                .store
                .flow(&battery.charge.id, t)
                .ok_or_else(|| missing_handle(s, &battery.charge.id, VariableKind::Flow))?;
            let discharge = model
                .store
                .flow(&battery.discharge.id, t)
                .ok_or_else(|| missing_handle(s, &battery.discharge.id, VariableKind::Flow))?;

            // level[t] − level[prev] − h·ηc·charge + h/ηd·discharge = 0
            let mut expr = LinearExpr::from(level(t)?);
            expr.add_term(level(time.prev(t))?, -1.0);
            expr.add_term(charge, -hours * battery.charge_efficiency);
            expr.add_term(discharge, hours / battery.discharge_efficiency);
            program.add_constraint(
                format!("s{}.storage_balance[{},{}]", s, battery.id, t),
                expr,
                Sense::Equal,
                0.0,
            );

            if let Some(capacity) = discharge_capacity {
                let expr = LinearExpr::from(level(t)?).with_term(capacity, -battery.duration_hours);
                program.add_constraint(
                    format!("s{}.storage_energy[{},{}]", s, battery.id, t),
                    expr,
                    Sense::LessEqual,
                    0.0,
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridplan_core::{
        Battery, NetworkGraph, Node, PeriodSettings, ThermalPlant, TimeDomain, TransmissionLine,
    };

    fn period(index: usize, demand: f64) -> Period {
        let mut graph = NetworkGraph::new();
        graph.add_node(Node::new("zone", vec![demand; 4]).with_nse_penalty(1_000.0));
        let mut gas = ThermalPlant::new("gas", "zone");
        gas.generation = gas
            .generation
            .with_capacity(10.0)
            .with_expansion(50.0)
            .with_retirement(Some(10))
            .with_fixed_om_cost(2.0)
            .with_variable_cost(1.0, 3.0);
        graph.add_asset(gas);
        let settings = PeriodSettings {
            period_length_years: 5,
            ..PeriodSettings::default()
        };
        Period::new(index, graph, TimeDomain::uniform_year(4), settings)
    }

    #[test]
    fn test_capacity_carry_over_links_periods() {
        let mut case = Case::new(vec![period(1, 5.0), period(2, 5.0)]);
        let model = ModelBuilder::new().build(&mut case).unwrap();
        let id = EdgeId::from("gas_generation");

        let cap1 = model.period(1).unwrap().capacity(&id).unwrap();
        let start2 = model.period(2).unwrap().start_capacity(&id).unwrap();
        assert_eq!(start2.coefficient(cap1), 1.0);
        assert_eq!(start2.constant_term(), 0.0);

        let carried = case.periods[1].graph.edge(&id).unwrap().carried_capacity;
        assert_eq!(
            carried,
            Some(CarriedCapacity {
                from_period: 1,
                handle: cap1.index()
            })
        );

        let start1 = model.period(1).unwrap().start_capacity(&id).unwrap();
        assert_eq!(start1.constant_term(), 10.0);
    }

    #[test]
    fn test_settle_capacities_follows_carry_over() {
        let mut case = Case::new(vec![period(1, 5.0), period(2, 8.0)]);
        let model = ModelBuilder::new().build(&mut case).unwrap();
        assert_eq!(model.peak_demand, 8.0);

        let id = EdgeId::from("gas_generation");
        let p1 = model.period(1).unwrap();
        let p2 = model.period(2).unwrap();
        let mut values = vec![0.0; model.program.num_variables()];
        values[p1.store.new_capacity(&id).unwrap().index()] = 6.0;
        values[p1.store.retired_capacity(&id).unwrap().index()] = 1.0;
        values[p2.store.new_capacity(&id).unwrap().index()] = 2.5;
        // stale capacities from an inexact solve
        values[p1.capacity(&id).unwrap().index()] = 15.2;
        values[p2.capacity(&id).unwrap().index()] = 17.0;

        model.settle_capacities(&mut values);
        assert_eq!(values[p1.capacity(&id).unwrap().index()], 15.0);
        assert_eq!(values[p2.capacity(&id).unwrap().index()], 17.5);
    }

    #[test]
    fn test_rebuild_ignores_previous_carry_over() {
        let mut case = Case::new(vec![period(1, 5.0), period(2, 5.0)]);
        let first = ModelBuilder::new().build(&mut case).unwrap();
        let again = ModelBuilder::new().build(&mut case).unwrap();
        let names = |m: &AssembledModel| {
            m.program
                .constraints()
                .iter()
                .map(|c| (c.name.clone(), c.expr.clone(), c.rhs))
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&first), names(&again));

        // Without a predecessor the edge starts from its existing capacity
        case.periods[0].graph.assets.clear();
        let model = ModelBuilder::new().build(&mut case).unwrap();
        let id = EdgeId::from("gas_generation");
        let start = model.period(2).unwrap().start_capacity(&id).unwrap();
        assert_eq!(start.num_terms(), 0);
        assert_eq!(start.constant_term(), 10.0);
        assert_eq!(case.periods[1].graph.edge(&id).unwrap().carried_capacity, None);
    }

    #[test]
    fn test_invalid_battery_efficiency_is_rejected() {
        let mut p = period(1, 5.0);
        p.graph
            .add_asset(Battery::new("bat", "zone", 4.0).with_efficiencies(0.9, 0.0));
        let mut case = Case::new(vec![p]);
        assert!(matches!(
            ModelBuilder::new().build(&mut case),
            Err(AssemblyError::Case(CaseError::Validation(_)))
        ));
    }

    #[test]
    fn test_cost_registers_reset_between_periods() {
        let mut case = Case::new(vec![period(1, 5.0), period(2, 5.0)]);
        let model = ModelBuilder::new().build(&mut case).unwrap();
        let id = EdgeId::from("gas_generation");
        let p1 = model.period(1).unwrap();
        let p2 = model.period(2).unwrap();
        let new2 = p2.store.new_capacity(&id).unwrap();

        assert_eq!(p1.costs.investment.coefficient(new2), 0.0);
        assert_eq!(p2.costs.investment.coefficient(new2), 50.0);
        assert_eq!(p2.costs.fixed.coefficient(new2), 50.0);
        let flow = p2.store.flow(&id, 0).unwrap();
        assert!((p2.costs.variable.coefficient(flow) - 2190.0 * 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_age_retirement_of_existing_capacity() {
        let mut p1 = period(1, 5.0);
        let mut p2 = period(2, 5.0);
        for p in [&mut p1, &mut p2] {
            let edge = p.graph.edge_mut(&EdgeId::from("gas_generation")).unwrap();
            edge.existing_age_years = 7;
        }
        let mut case = Case::new(vec![p1, p2]);
        let model = ModelBuilder::new().build(&mut case).unwrap();
        let id = EdgeId::from("gas_generation");

        // age 7 < 10 at year 0, age 12 ≥ 10 at year 5
        let p1 = model.period(1).unwrap();
        assert!(p1.store.constraint(&id, ConstraintKind::AgeRetirement, None).is_none());
        let p2 = model.period(2).unwrap();
        let row = p2
            .store
            .constraint(&id, ConstraintKind::AgeRetirement, None)
            .unwrap();
        let c = model.program.constraint(row);
        assert_eq!(c.rhs, 10.0);
        assert_eq!(c.sense, Sense::GreaterEqual);
        assert_eq!(c.expr.coefficient(p1.store.retired_capacity(&id).unwrap()), 1.0);
        assert_eq!(c.expr.coefficient(p2.store.retired_capacity(&id).unwrap()), 1.0);
    }

    #[test]
    fn test_missing_carry_over_target() {
        let mut p2 = period(2, 5.0);
        p2.graph.assets.clear();
        let mut case = Case::new(vec![period(1, 5.0), p2]);
        let err = ModelBuilder::new().build(&mut case).unwrap_err();
        assert!(matches!(
            err,
            AssemblyError::MissingCarryOverTarget { period: 1, .. }
        ));
    }

    #[test]
    fn test_period_order_and_settings() {
        let mut case = Case::new(vec![period(1, 5.0), period(3, 5.0)]);
        assert!(matches!(
            ModelBuilder::new().build(&mut case),
            Err(AssemblyError::PeriodOrder { found: 3, .. })
        ));

        let mut p2 = period(2, 5.0);
        p2.settings.discount_rate = 0.07;
        let mut case = Case::new(vec![period(1, 5.0), p2]);
        assert!(matches!(
            ModelBuilder::new().build(&mut case),
            Err(AssemblyError::InconsistentSettings {
                setting: "discount_rate",
                ..
            })
        ));
    }

    #[test]
    fn test_period_without_assets() {
        let mut graph = NetworkGraph::new();
        graph.add_node(Node::new("zone", vec![0.0; 2]));
        let mut case = Case::new(vec![Period::new(
            1,
            graph,
            TimeDomain::uniform_year(2),
            PeriodSettings::default(),
        )]);
        let model = ModelBuilder::new().build(&mut case).unwrap();
        assert_eq!(model.program.num_variables(), 0);
        assert_eq!(model.program.num_constraints(), 2);
    }

    #[test]
    fn test_losses_and_storage_rows() {
        let mut graph = NetworkGraph::new();
        graph.add_node(Node::new("a", vec![1.0; 2]));
        graph.add_node(Node::new("b", vec![1.0; 2]));
        let mut line = TransmissionLine::new("ab", "a", "b");
        line.line = line.line.with_capacity(5.0).with_loss_fraction(0.1);
        graph.add_asset(line);
        let mut bat = Battery::new("bat", "b", 4.0).with_efficiencies(0.9, 0.9);
        bat.charge = bat.charge.with_capacity(1.0);
        bat.discharge = bat.discharge.with_capacity(1.0);
        graph.add_asset(bat);
        let mut case = Case::new(vec![Period::new(
            1,
            graph,
            TimeDomain::uniform_year(2),
            PeriodSettings::default(),
        )]);
        let model = ModelBuilder::new().build(&mut case).unwrap();
        let p = model.period(1).unwrap();

        let row = p.balance[&(NodeId::from("b"), 0)];
        let flow = p.store.flow(&EdgeId::from("ab_line"), 0).unwrap();
        assert!((model.program.constraint(row).expr.coefficient(flow) - 0.9).abs() < 1e-12);
        assert_eq!(p.storage_level.len(), 2);
        let storage_rows = model
            .program
            .constraints()
            .iter()
            .filter(|c| c.name.contains("storage_"))
            .count();
        assert_eq!(storage_rows, 4);
    }
}
