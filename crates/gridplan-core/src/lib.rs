//! # gridplan-core: Capacity-Expansion Data Model
//!
//! Provides the data structures a capacity-expansion case is made of: the
//! ordered planning [`Period`]s, each with its own [`NetworkGraph`],
//! [`TimeDomain`] and immutable [`PeriodSettings`], plus the TOML
//! configuration layer.
//!
//! ## Design Philosophy
//!
//! - **Assets are tagged variants.** [`Asset`] enumerates the supported asset
//!   kinds; each variant owns its [`Edge`]s as named fields and hands them out
//!   through [`Asset::edges`]. There is no runtime field scanning.
//! - **Edges carry everything needed to bound their variables.** Capabilities
//!   ([`EdgeCapability`]) select which decision variables exist; static
//!   attributes bound them. Missing attributes are reported during
//!   preallocation in `gridplan-algo`.
//! - **Settings are immutable.** [`PeriodSettings`] are built once from
//!   [`ExpansionConfig`] and passed to assembly by reference.
//!
//! ## Quick Start
//!
//! ```rust
//! use gridplan_core::*;
//!
//! let mut graph = NetworkGraph::new();
//! graph.add_node(Node::new("zone", vec![80.0; 24]).with_nse_penalty(5_000.0));
//!
//! let mut gas = ThermalPlant::new("gas", "zone");
//! gas.generation = gas
//!     .generation
//!     .with_capacity(50.0)
//!     .with_expansion(900_000.0)
//!     .with_variable_cost(2.0, 40.0);
//! graph.add_asset(gas);
//!
//! let period = Period::new(1, graph, TimeDomain::uniform_year(24), PeriodSettings::default());
//! assert!(period.validate().is_ok());
//! ```
//!
//! ## ID System
//!
//! Nodes, assets and edges are identified by string newtypes ([`NodeId`],
//! [`AssetId`], [`EdgeId`]). Edge ids are stable across periods: the edge
//! `gas_generation` in period 2 is the same physical path as in period 1,
//! which is how carry-over and age tracking find their targets. Ids are
//! ordered, so sorting by id gives a build-order-independent sequence.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod config;
pub mod error;
pub mod network;
pub mod period;
pub mod time;

pub use config::{
    load_config, AttributeValue, BendersConfig, CutStrategy, ExpansionConfig, LoggingConfig,
    ModelConfig, SolverAttributes, SolverConfig, StageConfig,
};
pub use error::{CaseError, CaseResult};
pub use network::{
    Asset, Battery, CarriedCapacity, Edge, EdgeCapability, Endpoint, NetworkGraph, Node,
    ThermalPlant, Topology, TransmissionLine, UnitCommitmentParams, VariableRenewable,
};
pub use period::{Case, Period, PeriodSettings, SolutionAlgorithm};
pub use time::TimeDomain;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[inline]
            pub fn new(value: impl Into<String>) -> Self {
                $name(value.into())
            }
            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                $name(value)
            }
        }
    };
}

string_id!(
    /// Balance node identifier.
    NodeId
);
string_id!(
    /// Asset identifier.
    AssetId
);
string_id!(
    /// Edge identifier, stable across periods.
    EdgeId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_order_lexicographically() {
        let mut ids = vec![EdgeId::from("b"), EdgeId::from("a"), EdgeId::new("c")];
        ids.sort();
        let names: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_id_display() {
        assert_eq!(NodeId::from("zone").to_string(), "zone");
        assert_eq!(format!("{}_generation", AssetId::from("gas")), "gas_generation");
    }
}
