//! Planning periods and the case handed over by the case loader

use crate::error::{CaseError, CaseResult};
use crate::network::{Asset, NetworkGraph};
use crate::time::TimeDomain;
use serde::{Deserialize, Serialize};

/// How the assembled program is solved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolutionAlgorithm {
    /// All periods in one program, solved once
    #[default]
    Monolithic,
    /// Planning problem plus per-period operational subproblems
    Benders,
}

impl SolutionAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolutionAlgorithm::Monolithic => "monolithic",
            SolutionAlgorithm::Benders => "benders",
        }
    }
}

/// Immutable settings of one period, fixed at case-load time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodSettings {
    /// Years represented by this period
    pub period_length_years: u32,
    /// Annual discount rate
    pub discount_rate: f64,
    pub algorithm: SolutionAlgorithm,
    /// Row equilibration before handing the program to the solver
    pub scale_constraints: bool,
}

impl Default for PeriodSettings {
    fn default() -> Self {
        Self {
            period_length_years: 1,
            discount_rate: 0.0,
            algorithm: SolutionAlgorithm::Monolithic,
            scale_constraints: false,
        }
    }
}

/// One planning stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Period {
    /// 1-based position in the planning horizon
    pub index: usize,
    pub graph: NetworkGraph,
    pub time: TimeDomain,
    pub settings: PeriodSettings,
}

impl Period {
    pub fn new(index: usize, graph: NetworkGraph, time: TimeDomain, settings: PeriodSettings) -> Self {
        Self {
            index,
            graph,
            time,
            settings,
        }
    }

    /// Check the period's own data (time domain, topology, demand lengths).
    pub fn validate(&self) -> CaseResult<()> {
        self.time.validate()?;
        self.graph.topology()?;
        for node in &self.graph.nodes {
            if node.demand.len() != self.time.len() {
                return Err(CaseError::validation(format!(
                    "period {}: node {} has {} demand values for {} time steps",
                    self.index,
                    node.id,
                    node.demand.len(),
                    self.time.len()
                )));
            }
        }
        for node in &self.graph.nodes {
            if let Some(penalty) = node.nse_penalty {
                if !penalty.is_finite() || penalty < 0.0 {
                    return Err(CaseError::validation(format!(
                        "period {}: node {} has non-served energy penalty {}",
                        self.index, node.id, penalty
                    )));
                }
            }
        }
        for asset in &self.graph.assets {
            let Asset::Battery(battery) = asset else {
                continue;
            };
            if !(battery.duration_hours.is_finite() && battery.duration_hours > 0.0) {
                return Err(CaseError::validation(format!(
                    "period {}: battery {} has duration {} h",
                    self.index, battery.id, battery.duration_hours
                )));
            }
            for (name, value) in [
                ("charge", battery.charge_efficiency),
                ("discharge", battery.discharge_efficiency),
            ] {
                // in (0, 1]; NaN fails both comparisons
                if !(value > 0.0 && value <= 1.0) {
                    return Err(CaseError::validation(format!(
                        "period {}: battery {} has {} efficiency {}",
                        self.index, battery.id, name, value
                    )));
                }
            }
        }
        if self.settings.period_length_years == 0 {
            return Err(CaseError::validation(format!(
                "period {}: period length must be at least one year",
                self.index
            )));
        }
        Ok(())
    }
}

/// Ordered periods of a capacity-expansion case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub periods: Vec<Period>,
}

impl Case {
    pub fn new(periods: Vec<Period>) -> Self {
        Self { periods }
    }

    pub fn num_periods(&self) -> usize {
        self.periods.len()
    }

    /// Period lengths in years, in period order.
    pub fn period_lengths(&self) -> Vec<u32> {
        self.periods
            .iter()
            .map(|p| p.settings.period_length_years)
            .collect()
    }

    /// Settings of the first period, which all periods must agree with on
    /// discount rate and algorithm.
    pub fn settings(&self) -> Option<&PeriodSettings> {
        self.periods.first().map(|p| &p.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Battery, Node};

    #[test]
    fn test_period_validation_checks_demand_length() {
        let mut graph = NetworkGraph::new();
        graph.add_node(Node::new("zone", vec![1.0; 3]));
        let period = Period::new(1, graph, TimeDomain::uniform_year(4), PeriodSettings::default());
        assert!(matches!(period.validate(), Err(CaseError::Validation(_))));
    }

    #[test]
    fn test_empty_period_is_valid() {
        let period = Period::new(
            1,
            NetworkGraph::new(),
            TimeDomain::uniform_year(4),
            PeriodSettings::default(),
        );
        assert!(period.validate().is_ok());
    }

    fn battery_period(battery: Battery) -> Period {
        let mut graph = NetworkGraph::new();
        graph.add_node(Node::new("zone", vec![1.0; 2]));
        graph.add_asset(battery);
        Period::new(1, graph, TimeDomain::uniform_year(2), PeriodSettings::default())
    }

    #[test]
    fn test_battery_efficiency_bounds() {
        let ok = Battery::new("bat", "zone", 4.0).with_efficiencies(0.9, 1.0);
        assert!(battery_period(ok).validate().is_ok());

        for (charge, discharge) in [(0.9, 0.0), (0.0, 0.9), (1.2, 0.9), (0.9, f64::NAN)] {
            let bad = Battery::new("bat", "zone", 4.0).with_efficiencies(charge, discharge);
            assert!(
                matches!(battery_period(bad).validate(), Err(CaseError::Validation(_))),
                "efficiencies ({}, {}) accepted",
                charge,
                discharge
            );
        }
    }

    #[test]
    fn test_battery_duration_must_be_positive() {
        for duration in [0.0, -1.0, f64::INFINITY] {
            let bad = Battery::new("bat", "zone", duration);
            assert!(matches!(
                battery_period(bad).validate(),
                Err(CaseError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_non_served_penalty_must_be_finite() {
        for penalty in [-1.0, f64::NAN, f64::INFINITY] {
            let mut graph = NetworkGraph::new();
            graph.add_node(Node::new("zone", vec![1.0; 2]).with_nse_penalty(penalty));
            let period = Period::new(1, graph, TimeDomain::uniform_year(2), PeriodSettings::default());
            assert!(matches!(period.validate(), Err(CaseError::Validation(_))));
        }
    }

    #[test]
    fn test_algorithm_serde_names() {
        let json = serde_json::to_string(&SolutionAlgorithm::Benders).unwrap();
        assert_eq!(json, "\"benders\"");
        assert_eq!(SolutionAlgorithm::default().as_str(), "monolithic");
    }
}
