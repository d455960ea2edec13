//! Integration tests for model assembly.
//!
//! Covers edge preallocation, discounting and capacity carry-over between
//! periods on small hand-built cases.

use gridplan_algo::{
    AllocationError, AssemblyError, CostAggregator, DecompositionController, EdgeVariableStore,
    LinearProgram, ModelBuilder, SolveError, SolveStage, SolverKind,
};
use gridplan_core::{
    Case, Edge, EdgeCapability, EdgeId, Endpoint, NetworkGraph, Node, NodeId, Period,
    PeriodSettings, ThermalPlant, TimeDomain, UnitCommitmentParams,
};

fn generator(id: &str) -> Edge {
    Edge::new(
        id,
        Endpoint::Asset(id.into()),
        Endpoint::Node(NodeId::from("zone")),
    )
    .with_capacity(20.0)
    .with_expansion(5.0)
}

/// Variable names must not depend on the order edges are handed in.
#[test]
fn test_allocation_order_independent() {
    let time = TimeDomain::uniform_year(3);
    let a = generator("alpha").with_ramping(0.5, 0.5);
    let b = generator("beta").with_retirement(None);
    let c = generator("gamma");

    let names = |edges: &[&Edge]| {
        let mut program = LinearProgram::new();
        let mut store = EdgeVariableStore::new(1);
        store.allocate(&mut program, edges, &time).unwrap();
        let vars: Vec<String> = program.variables().iter().map(|v| v.name.clone()).collect();
        let rows: Vec<String> = program.constraints().iter().map(|r| r.name.clone()).collect();
        (vars, rows)
    };

    let forward = names(&[&a, &b, &c]);
    let backward = names(&[&c, &a, &b]);
    assert_eq!(forward, backward);
    assert!(!forward.0.is_empty());
}

/// A unit-commitment edge without a minimum stable level is rejected before
/// anything is written into the program.
#[test]
fn test_unit_commitment_requires_min_stable_level() {
    let time = TimeDomain::uniform_year(2);
    let good = generator("alpha");
    let bad = generator("coal").with_unit_commitment(UnitCommitmentParams {
        unit_size: Some(10.0),
        min_stable_fraction: None,
        ..UnitCommitmentParams::default()
    });

    let mut program = LinearProgram::new();
    let mut store = EdgeVariableStore::new(1);
    let err = store.allocate(&mut program, &[&good, &bad], &time).unwrap_err();

    assert!(
        matches!(
            &err,
            AllocationError::MissingAttribute { edge, capability: EdgeCapability::UnitCommitment, .. }
                if edge.as_str() == "coal"
        ),
        "unexpected error: {}",
        err
    );
    assert_eq!(program.num_variables(), 0);
    assert_eq!(program.num_constraints(), 0);
    assert!(!store.is_allocated(&good.id));
}

#[test]
fn test_unit_commitment_error_surfaces_from_builder() {
    let mut graph = NetworkGraph::new();
    graph.add_node(Node::new("zone", vec![1.0; 2]));
    let mut coal = ThermalPlant::new("coal", "zone");
    coal.generation = coal
        .generation
        .with_capacity(10.0)
        .with_unit_commitment(UnitCommitmentParams {
            unit_size: Some(10.0),
            ..UnitCommitmentParams::default()
        });
    graph.add_asset(coal);
    let mut case = Case::new(vec![Period::new(
        1,
        graph,
        TimeDomain::uniform_year(2),
        PeriodSettings::default(),
    )]);

    let err = ModelBuilder::new().build(&mut case).unwrap_err();
    assert!(matches!(
        err,
        AssemblyError::Allocation(AllocationError::MissingAttribute { .. })
    ));
}

#[test]
fn test_zero_discount_rate_gives_unit_factors() {
    let costs = CostAggregator::new(0.0, vec![5, 10, 5]).unwrap();
    assert_eq!(costs.discount_factors(), &[1.0, 1.0, 1.0]);
    assert_eq!(costs.opex_multipliers(), &[5.0, 10.0, 5.0]);
    assert_eq!(costs.start_year(3), 15);
}

#[test]
fn test_negative_discount_rate_rejected() {
    assert!(matches!(
        CostAggregator::new(-0.01, vec![5]),
        Err(AssemblyError::Discounting(_))
    ));
}

fn flat_period(index: usize) -> Period {
    let mut graph = NetworkGraph::new();
    graph.add_node(Node::new("zone", vec![100.0; 4]).with_nse_penalty(1_000.0));
    let mut gas = ThermalPlant::new("gas", "zone");
    gas.generation = gas
        .generation
        .with_capacity(0.0)
        .with_expansion(10.0)
        .with_variable_cost(1.0, 0.0);
    graph.add_asset(gas);
    let settings = PeriodSettings {
        period_length_years: 5,
        ..PeriodSettings::default()
    };
    Period::new(index, graph, TimeDomain::uniform_year(4), settings)
}

/// Capacity built in period 1 is available in period 2 without new investment.
#[test]
fn test_capacity_carries_into_next_period() {
    let mut case = Case::new(vec![flat_period(1), flat_period(2)]);
    let model = ModelBuilder::new().build(&mut case).unwrap();
    let controller = DecompositionController::new(SolverKind::Clarabel.build_engine());
    let outcome = controller.solve_monolithic(model).unwrap();
    assert!(outcome.status.is_optimal());

    let id = EdgeId::from("gas_generation");
    let p1 = outcome.model.period(1).unwrap();
    let p2 = outcome.model.period(2).unwrap();
    let built = outcome.values[p1.store.new_capacity(&id).unwrap().index()];
    let start = p2.start_capacity(&id).unwrap().evaluate(&outcome.values);
    let built_later = outcome.values[p2.store.new_capacity(&id).unwrap().index()];

    assert!((built - 100.0).abs() < 1e-3, "period 1 build {}", built);
    assert!((start - 100.0).abs() < 1e-3, "period 2 start {}", start);
    assert!(built_later.abs() < 1e-3, "period 2 build {}", built_later);
}

/// Demand with nothing to serve it leaves only constant balance rows.
#[test]
fn test_unserved_demand_without_assets_is_infeasible() {
    let mut graph = NetworkGraph::new();
    graph.add_node(Node::new("zone", vec![5.0; 2]));
    let mut case = Case::new(vec![Period::new(
        1,
        graph,
        TimeDomain::uniform_year(2),
        PeriodSettings::default(),
    )]);
    let model = ModelBuilder::new().build(&mut case).unwrap();
    assert_eq!(model.program.num_variables(), 0);
    assert_eq!(model.program.num_constraints(), 2);

    for kind in [SolverKind::Clarabel, SolverKind::GoodLp] {
        let controller = DecompositionController::new(kind.build_engine());
        let err = controller.solve_monolithic(model.clone()).unwrap_err();
        assert!(
            matches!(err, SolveError::Infeasible { stage: SolveStage::Monolithic }),
            "unexpected error: {}",
            err
        );
    }
}
