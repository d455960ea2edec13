//! Operational time domain of one planning period
//!
//! A period is operated over a (usually reduced) set of representative time
//! steps. Each step carries a weight: the number of real hours of the year it
//! stands for. Steps are grouped into equal-length subperiods (e.g.
//! representative days); inter-temporal constraints wrap around cyclically
//! inside each subperiod.
//!
//! ```text
//!   subperiod 0            subperiod 1
//!   ┌──┬──┬──┬──┐          ┌──┬──┬──┬──┐
//!   │0 │1 │2 │3 │          │4 │5 │6 │7 │
//!   └──┴──┴──┴──┘          └──┴──┴──┴──┘
//!    prev(0) = 3            prev(4) = 7
//! ```

use crate::error::{CaseError, CaseResult};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Ordered operational time steps of a period with their weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeDomain {
    /// Hours of the year represented by each step (one entry per step)
    pub weights: Vec<f64>,
    /// Duration of a single step in hours (storage and ramp scaling)
    pub hours_per_step: f64,
    /// Number of consecutive steps per subperiod
    pub subperiod_length: usize,
}

impl TimeDomain {
    /// Build a time domain with explicit weights and one subperiod covering all steps.
    pub fn new(weights: Vec<f64>) -> Self {
        let len = weights.len().max(1);
        Self {
            weights,
            hours_per_step: 1.0,
            subperiod_length: len,
        }
    }

    /// `steps` hourly steps, each weighted to represent `8760 / steps` hours.
    pub fn uniform_year(steps: usize) -> Self {
        let weight = if steps == 0 { 0.0 } else { 8760.0 / steps as f64 };
        Self::new(vec![weight; steps])
    }

    /// Split the horizon into cyclic subperiods of `length` steps.
    pub fn with_subperiod_length(mut self, length: usize) -> Self {
        self.subperiod_length = length;
        self
    }

    /// Set the duration of one step in hours.
    pub fn with_hours_per_step(mut self, hours: f64) -> Self {
        self.hours_per_step = hours;
        self
    }

    /// Number of time steps.
    #[inline]
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Step indices in order (0-based).
    pub fn steps(&self) -> Range<usize> {
        0..self.weights.len()
    }

    /// Weight (represented hours) of step `t`.
    #[inline]
    pub fn weight(&self, t: usize) -> f64 {
        self.weights[t]
    }

    /// Sum of weights; 8760 for a horizon representing one full year.
    pub fn total_weight(&self) -> f64 {
        self.weights.iter().sum()
    }

    /// Number of subperiods.
    pub fn num_subperiods(&self) -> usize {
        if self.subperiod_length == 0 {
            0
        } else {
            self.weights.len() / self.subperiod_length
        }
    }

    /// Step preceding `t`, wrapping to the end of `t`'s subperiod.
    pub fn prev(&self, t: usize) -> usize {
        let start = (t / self.subperiod_length) * self.subperiod_length;
        if t == start {
            start + self.subperiod_length - 1
        } else {
            t - 1
        }
    }

    /// The `k`-th predecessor of `t` inside its subperiod (cyclic).
    pub fn lag(&self, t: usize, k: usize) -> usize {
        let start = (t / self.subperiod_length) * self.subperiod_length;
        let offset = t - start;
        let k = k % self.subperiod_length;
        start + (offset + self.subperiod_length - k) % self.subperiod_length
    }

    /// Check structural consistency.
    pub fn validate(&self) -> CaseResult<()> {
        if self.weights.is_empty() {
            return Err(CaseError::validation("time domain has no steps"));
        }
        if self.subperiod_length == 0 || self.weights.len() % self.subperiod_length != 0 {
            return Err(CaseError::validation(format!(
                "{} steps cannot be split into subperiods of length {}",
                self.weights.len(),
                self.subperiod_length
            )));
        }
        if let Some(t) = self.weights.iter().position(|w| !w.is_finite() || *w < 0.0) {
            return Err(CaseError::validation(format!(
                "time step {} has invalid weight {}",
                t, self.weights[t]
            )));
        }
        if !(self.hours_per_step > 0.0) {
            return Err(CaseError::validation("hours_per_step must be positive"));
        }
        Ok(())
    }
}
