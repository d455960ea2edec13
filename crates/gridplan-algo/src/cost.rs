//! Multi-period cost aggregation and discounting
//!
//! Each period contributes a fixed-cost expression (investment plus fixed
//! O&M) and a variable-cost expression (one representative year of
//! operation). They are combined into the global objective
//!
//! ```text
//! minimise  Σₛ dfₛ · fixedₛ  +  Σₛ dfₛ · opexmultₛ · variableₛ
//!
//! dfₛ       = 1 / (1 + r)^(Σ_{p<s} lenₚ)
//! opexmultₛ = Σ_{i=1..lenₛ} 1 / (1 + r)^i        (= lenₛ when r = 0)
//! ```

use crate::error::AssemblyError;
use crate::program::LinearExpr;
use serde::{Deserialize, Serialize};

/// Cost expressions of one period, moved out of the builder's registers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeriodCosts {
    pub investment: LinearExpr,
    pub om_fixed: LinearExpr,
    /// `investment + om_fixed`
    pub fixed: LinearExpr,
    /// Operating cost of one representative year
    pub variable: LinearExpr,
}

impl PeriodCosts {
    pub fn new(investment: LinearExpr, om_fixed: LinearExpr, variable: LinearExpr) -> Self {
        let mut fixed = investment.clone();
        fixed.add_scaled(&om_fixed, 1.0);
        Self {
            investment,
            om_fixed,
            fixed,
            variable,
        }
    }
}

/// Discounted cost components of one period for a given solution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiscountedCosts {
    pub period: usize,
    pub discount_factor: f64,
    pub fixed: f64,
    pub variable: f64,
}

impl DiscountedCosts {
    pub fn total(&self) -> f64 {
        self.fixed + self.variable
    }
}

/// Discount factors and operating multipliers for an ordered set of periods.
#[derive(Debug, Clone, PartialEq)]
pub struct CostAggregator {
    discount_rate: f64,
    period_lengths: Vec<u32>,
    discount_factors: Vec<f64>,
    opex_multipliers: Vec<f64>,
}

impl CostAggregator {
    pub fn new(discount_rate: f64, period_lengths: Vec<u32>) -> Result<Self, AssemblyError> {
        if !discount_rate.is_finite() || discount_rate < 0.0 {
            return Err(AssemblyError::Discounting(format!(
                "discount rate must be non-negative, got {}",
                discount_rate
            )));
        }
        if let Some(pos) = period_lengths.iter().position(|&len| len == 0) {
            return Err(AssemblyError::Discounting(format!(
                "period {} has zero length",
                pos + 1
            )));
        }

        let base = 1.0 + discount_rate;
        let mut elapsed = 0_i32;
        let mut discount_factors = Vec::with_capacity(period_lengths.len());
        let mut opex_multipliers = Vec::with_capacity(period_lengths.len());
        for &len in &period_lengths {
            discount_factors.push(1.0 / base.powi(elapsed));
            opex_multipliers.push((1..=len as i32).map(|i| 1.0 / base.powi(i)).sum());
            elapsed += len as i32;
        }

        Ok(Self {
            discount_rate,
            period_lengths,
            discount_factors,
            opex_multipliers,
        })
    }

    pub fn discount_rate(&self) -> f64 {
        self.discount_rate
    }

    pub fn period_lengths(&self) -> &[u32] {
        &self.period_lengths
    }

    pub fn discount_factors(&self) -> &[f64] {
        &self.discount_factors
    }

    pub fn opex_multipliers(&self) -> &[f64] {
        &self.opex_multipliers
    }

    pub fn num_periods(&self) -> usize {
        self.period_lengths.len()
    }

    /// Year offset of the start of period `s` (1-based) from the horizon start.
    pub fn start_year(&self, s: usize) -> u32 {
        self.period_lengths.iter().take(s.saturating_sub(1)).sum()
    }

    /// Objective weight of period `s`'s fixed costs.
    pub fn fixed_weight(&self, s: usize) -> f64 {
        self.discount_factors[s - 1]
    }

    /// Objective weight of period `s`'s variable costs.
    pub fn variable_weight(&self, s: usize) -> f64 {
        self.discount_factors[s - 1] * self.opex_multipliers[s - 1]
    }

    /// Global objective from per-period costs given in period order.
    pub fn objective<'a>(&self, costs: impl IntoIterator<Item = &'a PeriodCosts>) -> LinearExpr {
        let mut objective = LinearExpr::new();
        for (i, period) in costs.into_iter().enumerate().take(self.num_periods()) {
            objective.add_scaled(&period.fixed, self.fixed_weight(i + 1));
            objective.add_scaled(&period.variable, self.variable_weight(i + 1));
        }
        objective
    }

    /// Discounted fixed and variable cost per period for a variable assignment.
    pub fn breakdown<'a>(
        &self,
        costs: impl IntoIterator<Item = &'a PeriodCosts>,
        values: &[f64],
    ) -> Vec<DiscountedCosts> {
        costs
            .into_iter()
            .enumerate()
            .take(self.num_periods())
            .map(|(i, period)| DiscountedCosts {
                period: i + 1,
                discount_factor: self.discount_factors[i],
                fixed: self.fixed_weight(i + 1) * period.fixed.evaluate(values),
                variable: self.variable_weight(i + 1) * period.variable.evaluate(values),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::VariableId;

    #[test]
    fn test_zero_rate_factors() {
        let agg = CostAggregator::new(0.0, vec![5, 5, 10]).unwrap();
        assert_eq!(agg.discount_factors(), &[1.0, 1.0, 1.0]);
        assert_eq!(agg.opex_multipliers(), &[5.0, 5.0, 10.0]);
        assert_eq!(agg.start_year(3), 10);
    }

    #[test]
    fn test_discounting_with_positive_rate() {
        let agg = CostAggregator::new(0.1, vec![1, 2]).unwrap();
        assert!((agg.discount_factors()[1] - 1.0 / 1.1).abs() < 1e-12);
        let expected = 1.0 / 1.1 + 1.0 / 1.21;
        assert!((agg.opex_multipliers()[1] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_objective_weights() {
        let x = VariableId::from_index(0);
        let y = VariableId::from_index(1);
        let costs = vec![
            PeriodCosts::new(LinearExpr::from(x), LinearExpr::new(), LinearExpr::from(y)),
            PeriodCosts::new(LinearExpr::new(), LinearExpr::from(x), LinearExpr::from(y)),
        ];
        let agg = CostAggregator::new(0.0, vec![3, 4]).unwrap();
        let objective = agg.objective(&costs);
        assert_eq!(objective.coefficient(x), 2.0);
        assert_eq!(objective.coefficient(y), 7.0);

        let parts = agg.breakdown(&costs, &[1.0, 10.0]);
        assert_eq!(parts[1].variable, 40.0);
        assert_eq!(parts.iter().map(|p| p.total()).sum::<f64>(), 72.0);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            CostAggregator::new(-0.01, vec![1]),
            Err(AssemblyError::Discounting(_))
        ));
        assert!(CostAggregator::new(0.05, vec![5, 0]).is_err());
    }

    #[test]
    fn test_fixed_is_sum_of_parts() {
        let x = VariableId::from_index(0);
        let y = VariableId::from_index(1);
        let costs = PeriodCosts::new(
            LinearExpr::from(x).with_term(x, 1.0),
            LinearExpr::from(y),
            LinearExpr::new(),
        );
        assert_eq!(costs.fixed.coefficient(x), 2.0);
        assert_eq!(costs.fixed.coefficient(y), 1.0);
    }
}
