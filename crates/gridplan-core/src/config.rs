//! Run configuration
//!
//! Settings are read from a TOML file with every section optional; missing
//! values fall back to defaults. The loaded configuration is converted into
//! immutable [`PeriodSettings`] per period before assembly starts and is never
//! mutated afterwards.
//!
//! ```toml
//! [model]
//! discount_rate = 0.045
//! period_lengths = [5, 5, 5]
//! algorithm = "benders"
//!
//! [solver]
//! engine = "clarabel"
//!
//! [benders]
//! max_iterations = 100
//! gap_tolerance = 1e-4
//! cut_strategy = "multi"
//!
//! [benders.subproblem.attributes]
//! tol_gap_rel = 1e-9
//! ```

use crate::error::{CaseError, CaseResult};
use crate::period::{PeriodSettings, SolutionAlgorithm};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    pub model: ModelConfig,
    pub solver: SolverConfig,
    pub benders: BendersConfig,
    pub logging: LoggingConfig,
}

impl ExpansionConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> CaseResult<Self> {
        let config: ExpansionConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CaseResult<()> {
        self.model.validate()?;
        self.benders.validate()
    }
}

/// Load a configuration file; a missing file yields the defaults.
pub fn load_config(path: &Path) -> CaseResult<ExpansionConfig> {
    if !path.exists() {
        return Ok(ExpansionConfig::default());
    }
    let contents = std::fs::read_to_string(path)?;
    ExpansionConfig::from_toml_str(&contents)
}

/// Multi-period model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Annual discount rate (≥ 0)
    pub discount_rate: f64,
    /// Length of each period in years
    pub period_lengths: Vec<u32>,
    pub algorithm: SolutionAlgorithm,
    pub scale_constraints: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            discount_rate: 0.045,
            period_lengths: Vec::new(),
            algorithm: SolutionAlgorithm::Monolithic,
            scale_constraints: false,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> CaseResult<()> {
        if !self.discount_rate.is_finite() || self.discount_rate < 0.0 {
            return Err(CaseError::validation(format!(
                "discount rate must be non-negative, got {}",
                self.discount_rate
            )));
        }
        if let Some(pos) = self.period_lengths.iter().position(|&len| len == 0) {
            return Err(CaseError::validation(format!(
                "period {} has zero length",
                pos + 1
            )));
        }
        Ok(())
    }

    /// Settings of period `index` (1-based).
    pub fn period_settings(&self, index: usize) -> CaseResult<PeriodSettings> {
        let length = index
            .checked_sub(1)
            .and_then(|i| self.period_lengths.get(i))
            .copied()
            .ok_or_else(|| {
                CaseError::validation(format!("no period length configured for period {}", index))
            })?;
        Ok(PeriodSettings {
            period_length_years: length,
            discount_rate: self.discount_rate,
            algorithm: self.algorithm,
            scale_constraints: self.scale_constraints,
        })
    }
}

/// A single solver attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Key/value pairs forwarded to the solver engine (method selection,
/// tolerances, limits). Unknown keys are ignored by engines with a warning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SolverAttributes(BTreeMap<String, AttributeValue>);

impl SolverAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: AttributeValue) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.get(key)
    }

    /// Numeric attribute; integers are widened.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.0.get(key)? {
            AttributeValue::Float(v) => Some(*v),
            AttributeValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        match self.0.get(key)? {
            AttributeValue::Int(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            AttributeValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries of `other` override entries of `self`.
    pub fn merged(&self, other: &SolverAttributes) -> SolverAttributes {
        let mut merged = self.clone();
        for (key, value) in other.iter() {
            merged.0.insert(key.clone(), value.clone());
        }
        merged
    }
}

/// Solver engine selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Engine name (`clarabel`, `good_lp`)
    pub engine: String,
    pub attributes: SolverAttributes,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            engine: "clarabel".to_string(),
            attributes: SolverAttributes::default(),
        }
    }
}

/// Shape of the optimality cuts added to the planning problem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CutStrategy {
    /// One cost-to-go variable and one cut per period per iteration
    #[default]
    Multi,
    /// One aggregate cost-to-go variable and one cut per iteration
    Single,
}

/// Attributes of one decomposition stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub attributes: SolverAttributes,
}

/// Benders loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BendersConfig {
    pub max_iterations: usize,
    /// Relative gap between upper and lower bound that counts as converged
    pub gap_tolerance: f64,
    /// Wall-clock budget checked at iteration boundaries
    pub time_limit_seconds: Option<f64>,
    pub parallel_subproblems: bool,
    pub cut_strategy: CutStrategy,
    /// Lower bound on each cost-to-go variable
    pub theta_lower_bound: f64,
    /// Upper bound for planning variables the model leaves unbounded;
    /// derived from peak demand when unset
    pub planning_bound: Option<f64>,
    pub planning: StageConfig,
    pub subproblem: StageConfig,
}

impl Default for BendersConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            gap_tolerance: 1e-3,
            time_limit_seconds: None,
            parallel_subproblems: true,
            cut_strategy: CutStrategy::Multi,
            theta_lower_bound: 0.0,
            planning_bound: None,
            planning: StageConfig::default(),
            subproblem: StageConfig::default(),
        }
    }
}

impl BendersConfig {
    pub fn validate(&self) -> CaseResult<()> {
        if self.max_iterations == 0 {
            return Err(CaseError::validation("max_iterations must be at least 1"));
        }
        if !(self.gap_tolerance >= 0.0) {
            return Err(CaseError::validation("gap_tolerance must be non-negative"));
        }
        if let Some(limit) = self.time_limit_seconds {
            if !(limit > 0.0) {
                return Err(CaseError::validation("time_limit_seconds must be positive"));
            }
        }
        if let Some(bound) = self.planning_bound {
            if !(bound > 0.0 && bound.is_finite()) {
                return Err(CaseError::validation("planning_bound must be positive and finite"));
            }
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = ExpansionConfig::from_toml_str("").unwrap();
        assert_eq!(config.model.algorithm, SolutionAlgorithm::Monolithic);
        assert_eq!(config.solver.engine, "clarabel");
        assert_eq!(config.benders.max_iterations, 50);
        assert_eq!(config.benders.cut_strategy, CutStrategy::Multi);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_document() {
        let text = r#"
            [model]
            discount_rate = 0.05
            period_lengths = [5, 10]
            algorithm = "benders"

            [benders]
            gap_tolerance = 1e-5
            cut_strategy = "single"

            [benders.subproblem.attributes]
            tol_gap_rel = 1e-9
            max_iter = 500
            verbose = false
        "#;
        let config = ExpansionConfig::from_toml_str(text).unwrap();
        assert_eq!(config.model.period_lengths, vec![5, 10]);
        assert_eq!(config.model.algorithm, SolutionAlgorithm::Benders);
        assert_eq!(config.benders.cut_strategy, CutStrategy::Single);

        let attrs = &config.benders.subproblem.attributes;
        assert_eq!(attrs.get_f64("tol_gap_rel"), Some(1e-9));
        assert_eq!(attrs.get_u32("max_iter"), Some(500));
        assert_eq!(attrs.get_bool("verbose"), Some(false));

        let settings = config.model.period_settings(2).unwrap();
        assert_eq!(settings.period_length_years, 10);
        assert!(config.model.period_settings(3).is_err());
        assert!(config.model.period_settings(0).is_err());
    }

    #[test]
    fn test_negative_discount_rate_rejected() {
        let err = ExpansionConfig::from_toml_str("[model]\ndiscount_rate = -0.1\n").unwrap_err();
        assert!(matches!(err, CaseError::Validation(_)));
    }

    #[test]
    fn test_planning_bound_must_be_positive() {
        let config = ExpansionConfig::from_toml_str("[benders]\nplanning_bound = 2500.0\n").unwrap();
        assert_eq!(config.benders.planning_bound, Some(2500.0));
        let err = ExpansionConfig::from_toml_str("[benders]\nplanning_bound = 0.0\n").unwrap_err();
        assert!(matches!(err, CaseError::Validation(_)));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");

        let missing = load_config(Path::new("/nonexistent/gridplan.toml")).unwrap();
        assert_eq!(missing.logging.level, "info");
    }

    #[test]
    fn test_attribute_merge_overrides() {
        let base = SolverAttributes::new()
            .with("tol_gap_rel", AttributeValue::Float(1e-6))
            .with("verbose", AttributeValue::Bool(false));
        let stage = SolverAttributes::new().with("tol_gap_rel", AttributeValue::Float(1e-9));
        let merged = base.merged(&stage);
        assert_eq!(merged.get_f64("tol_gap_rel"), Some(1e-9));
        assert_eq!(merged.get_bool("verbose"), Some(false));
    }
}
