//! Synthetic planning cases for tests and benchmarks.
//!
//! One zone served by an existing gas plant (expandable, retirable) and an
//! expandable solar plant, optionally with a battery. Demand grows by a
//! fixed fraction per period; unserved demand is penalised so every
//! operational problem stays feasible.

use gridplan_core::{
    Battery, Case, NetworkGraph, Node, Period, PeriodSettings, SolutionAlgorithm, ThermalPlant,
    TimeDomain, VariableRenewable,
};

/// Shape of a generated case.
#[derive(Debug, Clone)]
pub struct SyntheticCase {
    pub periods: usize,
    /// Hourly steps per period, each representing `8760 / steps` hours
    pub steps: usize,
    pub period_length_years: u32,
    pub discount_rate: f64,
    /// Demand increase per period (0.1 = +10 %)
    pub growth: f64,
    pub with_battery: bool,
    pub algorithm: SolutionAlgorithm,
}

impl Default for SyntheticCase {
    fn default() -> Self {
        Self {
            periods: 3,
            steps: 4,
            period_length_years: 5,
            discount_rate: 0.05,
            growth: 0.2,
            with_battery: false,
            algorithm: SolutionAlgorithm::Monolithic,
        }
    }
}

const DEMAND_SHAPE: [f64; 4] = [40.0, 60.0, 80.0, 50.0];
const SOLAR_SHAPE: [f64; 4] = [0.0, 0.6, 0.9, 0.3];

impl SyntheticCase {
    pub fn with_periods(mut self, periods: usize) -> Self {
        self.periods = periods;
        self
    }

    pub fn with_algorithm(mut self, algorithm: SolutionAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_battery(mut self) -> Self {
        self.with_battery = true;
        self
    }

    /// Build the case. Edge ids are stable across periods.
    pub fn build(&self) -> Case {
        let settings = PeriodSettings {
            period_length_years: self.period_length_years,
            discount_rate: self.discount_rate,
            algorithm: self.algorithm,
            scale_constraints: false,
        };
        let periods = (1..=self.periods)
            .map(|index| Period::new(index, self.graph(index), TimeDomain::uniform_year(self.steps), settings))
            .collect();
        Case::new(periods)
    }

    fn graph(&self, index: usize) -> NetworkGraph {
        let scale = 1.0 + self.growth * (index - 1) as f64;
        let demand = (0..self.steps)
            .map(|t| DEMAND_SHAPE[t % DEMAND_SHAPE.len()] * scale)
            .collect();
        let solar_profile = (0..self.steps)
            .map(|t| SOLAR_SHAPE[t % SOLAR_SHAPE.len()])
            .collect();

        let mut graph = NetworkGraph::new();
        graph.add_node(Node::new("zone", demand).with_nse_penalty(5_000.0));

        let mut gas = ThermalPlant::new("gas", "zone");
        gas.generation = gas
            .generation
            .with_capacity(if index == 1 { 50.0 } else { 0.0 })
            .with_expansion(400.0)
            .with_retirement(None)
            .with_fixed_om_cost(10.0)
            .with_variable_cost(2.0, 30.0);
        graph.add_asset(gas);

        let mut solar = VariableRenewable::new("solar", "zone", solar_profile);
        solar.generation = solar
            .generation
            .with_capacity(0.0)
            .with_expansion(600.0)
            .with_fixed_om_cost(5.0);
        graph.add_asset(solar);

        if self.with_battery {
            let mut battery = Battery::new("battery", "zone", 4.0).with_efficiencies(0.95, 0.95);
            battery.charge = battery.charge.with_capacity(0.0).with_expansion(0.0);
            battery.discharge = battery
                .discharge
                .with_capacity(0.0)
                .with_expansion(300.0)
                .with_variable_cost(1.0, 0.0);
            graph.add_asset(battery);
        }
        graph
    }
}

/// Default synthetic case with `periods` periods.
pub fn synthetic_case(periods: usize) -> Case {
    SyntheticCase::default().with_periods(periods).build()
}
