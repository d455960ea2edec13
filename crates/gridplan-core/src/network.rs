//! Assets, edges and the per-period network graph
//!
//! A period's network is a set of balance [`Node`]s and a set of [`Asset`]s.
//! Assets own their [`Edge`]s as named fields; the edge set of a period is
//! discovered by asking each asset for its edges ([`Asset::edges`]), never by
//! registration. Edges are directed: flow leaves `start` and arrives at `end`.
//!
//! ```text
//!   ThermalPlant ──generation──▶ Node
//!   Renewable    ──generation──▶ Node
//!   Node ──charge──▶ Battery(storage) ──discharge──▶ Node
//!   Node ──────────line──────────▶ Node
//! ```

use crate::error::{CaseError, CaseResult};
use crate::{AssetId, EdgeId, NodeId};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Energy balance node (e.g. an electricity zone).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Demand per time step (MW)
    pub demand: Vec<f64>,
    /// Penalty price for non-served energy ($/MWh). `None` disables load shedding.
    pub nse_penalty: Option<f64>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, demand: Vec<f64>) -> Self {
        Self {
            id: id.into(),
            demand,
            nse_penalty: None,
        }
    }

    /// Allow load shedding at the given price.
    pub fn with_nse_penalty(mut self, penalty: f64) -> Self {
        self.nse_penalty = Some(penalty);
        self
    }
}

/// One end of an edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Endpoint {
    /// A balance node of the network
    Node(NodeId),
    /// An asset-internal vertex (a generator's source, a battery's storage)
    Asset(AssetId),
}

/// Structural capabilities an edge may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeCapability {
    /// Flow is bounded by a capacity decision variable
    Capacity,
    /// New capacity may be built
    Expansion,
    /// Capacity may be retired
    Retirement,
    /// Discrete unit commitment (commitment/startup/shutdown per step)
    UnitCommitment,
    /// Explicit ramp-up/ramp-down variables limited by capacity
    Ramping,
}

/// Unit-commitment attributes of an edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitCommitmentParams {
    /// Size of one unit (MW)
    pub unit_size: Option<f64>,
    /// Minimum stable output as a fraction of unit size
    pub min_stable_fraction: Option<f64>,
    /// Cost per startup ($/MW of unit size)
    pub startup_cost: f64,
    /// Minimum number of steps a unit stays on after starting
    pub min_up_steps: Option<usize>,
    /// Minimum number of steps a unit stays off after shutting down
    pub min_down_steps: Option<usize>,
    /// Declare commitment/startup/shutdown variables integer
    pub integer: bool,
}

/// A directed, capacity-bounded flow path between two endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub start: Endpoint,
    pub end: Endpoint,
    pub capabilities: BTreeSet<EdgeCapability>,
    /// Flow restricted to start → end (otherwise `-capacity ≤ flow ≤ capacity`)
    pub unidirectional: bool,
    /// Installed capacity at the start of the horizon (MW)
    pub existing_capacity: f64,
    /// Age of the existing capacity at the start of the horizon (years)
    pub existing_age_years: u32,
    pub min_capacity: f64,
    pub max_capacity: Option<f64>,
    /// Build limit per period (MW)
    pub max_new_capacity: Option<f64>,
    /// Technical lifetime driving age-based retirement (years)
    pub lifetime_years: Option<u32>,
    /// Overnight investment cost ($/MW)
    pub investment_cost: f64,
    /// Fixed operation and maintenance cost ($/MW-year)
    pub fixed_om_cost: f64,
    /// Variable operation and maintenance cost ($/MWh)
    pub variable_om_cost: f64,
    /// Fuel cost per unit of flow ($/MWh)
    pub fuel_cost: f64,
    /// Fraction of flow lost between start and end
    pub loss_fraction: f64,
    /// Per-step availability (capacity factor); `None` means 1.0 everywhere
    pub availability: Option<Vec<f64>>,
    pub unit_commitment: UnitCommitmentParams,
    /// Max ramp up per step as a fraction of capacity
    pub ramp_up_fraction: Option<f64>,
    /// Max ramp down per step as a fraction of capacity
    pub ramp_down_fraction: Option<f64>,
    /// Capacity handed over by the previous period (set during assembly)
    #[serde(skip)]
    pub carried_capacity: Option<CarriedCapacity>,
}

/// Capacity state written into an edge by the previous period's assembly.
///
/// `handle` is the index of the previous period's capacity variable in the
/// assembled program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarriedCapacity {
    pub from_period: usize,
    pub handle: usize,
}

impl Edge {
    /// Create an unbounded unidirectional edge without any capability.
    pub fn new(id: impl Into<EdgeId>, start: Endpoint, end: Endpoint) -> Self {
        Self {
            id: id.into(),
            start,
            end,
            capabilities: BTreeSet::new(),
            unidirectional: true,
            existing_capacity: 0.0,
            existing_age_years: 0,
            min_capacity: 0.0,
            max_capacity: None,
            max_new_capacity: None,
            lifetime_years: None,
            investment_cost: 0.0,
            fixed_om_cost: 0.0,
            variable_om_cost: 0.0,
            fuel_cost: 0.0,
            loss_fraction: 0.0,
            availability: None,
            unit_commitment: UnitCommitmentParams::default(),
            ramp_up_fraction: None,
            ramp_down_fraction: None,
            carried_capacity: None,
        }
    }

    /// Declare a capability.
    pub fn with_capability(mut self, capability: EdgeCapability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    /// Capacity-bounded edge with the given existing capacity.
    pub fn with_capacity(mut self, existing: f64) -> Self {
        self.capabilities.insert(EdgeCapability::Capacity);
        self.existing_capacity = existing;
        self
    }

    /// Allow expansion at `investment_cost` $/MW.
    pub fn with_expansion(mut self, investment_cost: f64) -> Self {
        self.capabilities.insert(EdgeCapability::Expansion);
        self.investment_cost = investment_cost;
        self
    }

    /// Allow retirement, optionally forced at end of life.
    pub fn with_retirement(mut self, lifetime_years: Option<u32>) -> Self {
        self.capabilities.insert(EdgeCapability::Retirement);
        self.lifetime_years = lifetime_years;
        self
    }

    pub fn with_existing_age(mut self, years: u32) -> Self {
        self.existing_age_years = years;
        self
    }

    pub fn with_capacity_bounds(mut self, min: f64, max: Option<f64>) -> Self {
        self.min_capacity = min;
        self.max_capacity = max;
        self
    }

    pub fn with_max_new_capacity(mut self, limit: f64) -> Self {
        self.max_new_capacity = Some(limit);
        self
    }

    pub fn with_fixed_om_cost(mut self, cost: f64) -> Self {
        self.fixed_om_cost = cost;
        self
    }

    pub fn with_variable_cost(mut self, variable_om: f64, fuel: f64) -> Self {
        self.variable_om_cost = variable_om;
        self.fuel_cost = fuel;
        self
    }

    pub fn with_availability(mut self, profile: Vec<f64>) -> Self {
        self.availability = Some(profile);
        self
    }

    pub fn with_loss_fraction(mut self, loss: f64) -> Self {
        self.loss_fraction = loss;
        self
    }

    pub fn bidirectional(mut self) -> Self {
        self.unidirectional = false;
        self
    }

    /// Declare unit commitment with the given attributes.
    pub fn with_unit_commitment(mut self, params: UnitCommitmentParams) -> Self {
        self.capabilities.insert(EdgeCapability::UnitCommitment);
        self.unit_commitment = params;
        self
    }

    /// Declare ramping with symmetric or asymmetric limits.
    pub fn with_ramping(mut self, up_fraction: f64, down_fraction: f64) -> Self {
        self.capabilities.insert(EdgeCapability::Ramping);
        self.ramp_up_fraction = Some(up_fraction);
        self.ramp_down_fraction = Some(down_fraction);
        self
    }

    #[inline]
    pub fn has(&self, capability: EdgeCapability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Availability at step `t` (1.0 without a profile).
    pub fn availability_at(&self, t: usize) -> f64 {
        self.availability
            .as_ref()
            .and_then(|profile| profile.get(t).copied())
            .unwrap_or(1.0)
    }

    /// Marginal cost of one MWh of flow.
    pub fn marginal_cost(&self) -> f64 {
        self.variable_om_cost + self.fuel_cost
    }
}

/// Dispatchable generator feeding one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermalPlant {
    pub id: AssetId,
    pub generation: Edge,
}

/// Weather-dependent generator (availability profile on its edge).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableRenewable {
    pub id: AssetId,
    pub generation: Edge,
}

/// Storage with separate charge and discharge edges.
///
/// Energy capacity is `duration_hours × discharge capacity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Battery {
    pub id: AssetId,
    pub charge: Edge,
    pub discharge: Edge,
    pub duration_hours: f64,
    pub charge_efficiency: f64,
    pub discharge_efficiency: f64,
}

/// Transmission corridor between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmissionLine {
    pub id: AssetId,
    pub line: Edge,
}

/// Tagged asset variants. Each variant exposes its owned edges explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Asset {
    Thermal(ThermalPlant),
    Renewable(VariableRenewable),
    Battery(Battery),
    Transmission(TransmissionLine),
}

impl Asset {
    pub fn id(&self) -> &AssetId {
        match self {
            Asset::Thermal(a) => &a.id,
            Asset::Renewable(a) => &a.id,
            Asset::Battery(a) => &a.id,
            Asset::Transmission(a) => &a.id,
        }
    }

    /// Edges owned by this asset, in field order.
    pub fn edges(&self) -> Vec<&Edge> {
        match self {
            Asset::Thermal(a) => vec![&a.generation],
            Asset::Renewable(a) => vec![&a.generation],
            Asset::Battery(a) => vec![&a.charge, &a.discharge],
            Asset::Transmission(a) => vec![&a.line],
        }
    }

    pub fn edges_mut(&mut self) -> Vec<&mut Edge> {
        match self {
            Asset::Thermal(a) => vec![&mut a.generation],
            Asset::Renewable(a) => vec![&mut a.generation],
            Asset::Battery(a) => vec![&mut a.charge, &mut a.discharge],
            Asset::Transmission(a) => vec![&mut a.line],
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Asset::Thermal(_) => "thermal",
            Asset::Renewable(_) => "renewable",
            Asset::Battery(_) => "battery",
            Asset::Transmission(_) => "transmission",
        }
    }
}

impl ThermalPlant {
    /// Plant `id` feeding `node`; the generation edge is named `<id>_generation`.
    pub fn new(id: impl Into<AssetId>, node: impl Into<NodeId>) -> Self {
        let id = id.into();
        let generation = Edge::new(
            format!("{}_generation", id),
            Endpoint::Asset(id.clone()),
            Endpoint::Node(node.into()),
        );
        Self { id, generation }
    }
}

impl VariableRenewable {
    pub fn new(id: impl Into<AssetId>, node: impl Into<NodeId>, profile: Vec<f64>) -> Self {
        let id = id.into();
        let generation = Edge::new(
            format!("{}_generation", id),
            Endpoint::Asset(id.clone()),
            Endpoint::Node(node.into()),
        )
        .with_availability(profile);
        Self { id, generation }
    }
}

impl Battery {
    pub fn new(id: impl Into<AssetId>, node: impl Into<NodeId>, duration_hours: f64) -> Self {
        let id = id.into();
        let node = node.into();
        let charge = Edge::new(
            format!("{}_charge", id),
            Endpoint::Node(node.clone()),
            Endpoint::Asset(id.clone()),
        );
        let discharge = Edge::new(
            format!("{}_discharge", id),
            Endpoint::Asset(id.clone()),
            Endpoint::Node(node),
        );
        Self {
            id,
            charge,
            discharge,
            duration_hours,
            charge_efficiency: 1.0,
            discharge_efficiency: 1.0,
        }
    }

    pub fn with_efficiencies(mut self, charge: f64, discharge: f64) -> Self {
        self.charge_efficiency = charge;
        self.discharge_efficiency = discharge;
        self
    }
}

impl TransmissionLine {
    pub fn new(id: impl Into<AssetId>, from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        let id = id.into();
        let line = Edge::new(
            format!("{}_line", id),
            Endpoint::Node(from.into()),
            Endpoint::Node(to.into()),
        );
        Self { id, line }
    }
}

impl From<ThermalPlant> for Asset {
    fn from(a: ThermalPlant) -> Self {
        Asset::Thermal(a)
    }
}

impl From<VariableRenewable> for Asset {
    fn from(a: VariableRenewable) -> Self {
        Asset::Renewable(a)
    }
}

impl From<Battery> for Asset {
    fn from(a: Battery) -> Self {
        Asset::Battery(a)
    }
}

impl From<TransmissionLine> for Asset {
    fn from(a: TransmissionLine) -> Self {
        Asset::Transmission(a)
    }
}

/// Nodes and assets of one period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkGraph {
    pub nodes: Vec<Node>,
    pub assets: Vec<Asset>,
}

impl NetworkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) {
        self.nodes.push(node);
    }

    pub fn add_asset(&mut self, asset: impl Into<Asset>) {
        self.assets.push(asset.into());
    }

    /// All edges of all assets, in asset order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> + '_ {
        self.assets.iter().flat_map(|a| a.edges())
    }

    pub fn edges_mut(&mut self) -> impl Iterator<Item = &mut Edge> + '_ {
        self.assets.iter_mut().flat_map(|a| a.edges_mut())
    }

    pub fn edge(&self, id: &EdgeId) -> Option<&Edge> {
        self.edges().find(|e| &e.id == id)
    }

    pub fn edge_mut(&mut self, id: &EdgeId) -> Option<&mut Edge> {
        self.edges_mut().find(|e| &e.id == id)
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn num_edges(&self) -> usize {
        self.assets.iter().map(|a| a.edges().len()).sum()
    }

    /// Build the directed topology and check that every endpoint exists.
    pub fn topology(&self) -> CaseResult<Topology> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for node in &self.nodes {
            let endpoint = Endpoint::Node(node.id.clone());
            if index.contains_key(&endpoint) {
                return Err(CaseError::validation(format!("duplicate node {}", node.id)));
            }
            let idx = graph.add_node(endpoint.clone());
            index.insert(endpoint, idx);
        }
        for asset in &self.assets {
            let endpoint = Endpoint::Asset(asset.id().clone());
            if index.contains_key(&endpoint) {
                return Err(CaseError::validation(format!(
                    "duplicate asset {}",
                    asset.id()
                )));
            }
            let idx = graph.add_node(endpoint.clone());
            index.insert(endpoint, idx);
        }

        let mut seen = BTreeSet::new();
        for asset in &self.assets {
            for edge in asset.edges() {
                if !seen.insert(edge.id.clone()) {
                    return Err(CaseError::validation(format!("duplicate edge {}", edge.id)));
                }
                let from = lookup(&index, &edge.start, &edge.id)?;
                let to = lookup(&index, &edge.end, &edge.id)?;
                graph.add_edge(from, to, edge.id.clone());
            }
        }

        Ok(Topology { graph, index })
    }
}

fn lookup(
    index: &HashMap<Endpoint, NodeIndex>,
    endpoint: &Endpoint,
    edge: &EdgeId,
) -> CaseResult<NodeIndex> {
    index.get(endpoint).copied().ok_or_else(|| {
        CaseError::validation(format!("edge {} references unknown endpoint {:?}", edge, endpoint))
    })
}

/// Directed multigraph of endpoints, one graph edge per network edge.
#[derive(Debug)]
pub struct Topology {
    graph: DiGraph<Endpoint, EdgeId>,
    index: HashMap<Endpoint, NodeIndex>,
}

impl Topology {
    /// Edges arriving at `endpoint`, sorted by id.
    pub fn incoming(&self, endpoint: &Endpoint) -> Vec<&EdgeId> {
        self.incident(endpoint, Direction::Incoming)
    }

    /// Edges leaving `endpoint`, sorted by id.
    pub fn outgoing(&self, endpoint: &Endpoint) -> Vec<&EdgeId> {
        self.incident(endpoint, Direction::Outgoing)
    }

    fn incident(&self, endpoint: &Endpoint, direction: Direction) -> Vec<&EdgeId> {
        let Some(&idx) = self.index.get(endpoint) else {
            return Vec::new();
        };
        let mut ids: Vec<&EdgeId> = self
            .graph
            .edges_directed(idx, direction)
            .map(|e| e.weight())
            .collect();
        ids.sort();
        ids
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Balance nodes with no incident edge at all.
    pub fn isolated_nodes(&self) -> Vec<&NodeId> {
        let mut isolated: Vec<&NodeId> = self
            .graph
            .node_indices()
            .filter(|&idx| self.graph.neighbors_undirected(idx).next().is_none())
            .filter_map(|idx| match &self.graph[idx] {
                Endpoint::Node(id) => Some(id),
                Endpoint::Asset(_) => None,
            })
            .collect();
        isolated.sort();
        isolated
    }
}
