//! Incremental decision-function bookkeeping
//!
//! Tracks the support-vector count, the number of alphas at their upper
//! bound and the threshold `b` as the working set changes. Margins inside
//! the solver are `(gradient_i - b) * y_i`; the exported model carries the
//! bias `-b`.

use crate::core::Model;
use crate::solver::state::{ExampleState, EPSILON_A};

#[derive(Debug, Clone)]
pub struct ModelBuilder {
    biased: bool,
    n_support_vectors: usize,
    n_at_upper_bound: usize,
    threshold: f64,
}

impl ModelBuilder {
    /// Start from the alphas already in `state` (nonzero on a warm start)
    pub fn new(state: &ExampleState, biased: bool) -> Self {
        let n_support_vectors = state.alpha.iter().filter(|&&a| a > 0.0).count();
        let n_at_upper_bound = (0..state.len())
            .filter(|&i| state.alpha[i] >= state.cost[i] - EPSILON_A && state.alpha[i] > 0.0)
            .count();
        Self {
            biased,
            n_support_vectors,
            n_at_upper_bound,
            threshold: 0.0,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn n_support_vectors(&self) -> usize {
        self.n_support_vectors
    }

    pub fn n_at_upper_bound(&self) -> usize {
        self.n_at_upper_bound
    }

    /// Account for the alpha changes of one iteration and recompute the threshold
    ///
    /// # Arguments
    /// * `working` - Working-set indices
    /// * `previous` - Alphas of the working set before the subproblem, aligned with `working`
    /// * `active` - Active examples, used when no free variable fixes the threshold
    /// * `qp_threshold` - Threshold estimate from the subproblem's equality multiplier
    pub fn update(
        &mut self,
        state: &ExampleState,
        working: &[usize],
        previous: &[f64],
        active: &[usize],
        qp_threshold: f64,
    ) -> f64 {
        let mut calculated = !self.biased;
        self.threshold = if self.biased { qp_threshold } else { 0.0 };

        for (&i, &old) in working.iter().zip(previous) {
            let a = state.alpha[i];
            if old > 0.0 && a == 0.0 {
                self.n_support_vectors -= 1;
            } else if old == 0.0 && a > 0.0 {
                self.n_support_vectors += 1;
            }

            let ex_c = state.cost[i] - EPSILON_A;
            if old >= ex_c && a < ex_c {
                self.n_at_upper_bound -= 1;
            } else if old < ex_c && a >= ex_c {
                self.n_at_upper_bound += 1;
            }

            if !calculated && a > EPSILON_A && a < ex_c {
                self.threshold = state.labels[i] * state.linear_term[i] + state.gradient[i];
                calculated = true;
            }
        }

        if self.biased && !calculated && self.n_support_vectors == self.n_at_upper_bound {
            self.threshold = Self::threshold_from_bounds(state, active);
        }
        self.threshold
    }

    /// Midpoint of the feasible threshold interval when every support
    /// vector sits at its upper bound
    fn threshold_from_bounds(state: &ExampleState, active: &[usize]) -> f64 {
        let mut low: Option<f64> = None;
        let mut high: Option<f64> = None;
        for &i in active {
            if state.inconsistent[i] {
                continue;
            }
            let y = state.labels[i];
            let candidate = -(y * state.linear_term[i] + state.gradient[i]);
            let below_upper = state.alpha[i] < state.cost[i] - EPSILON_A;
            if (below_upper && y > 0.0) || (!below_upper && y < 0.0) {
                low = Some(low.map_or(candidate, |b| b.max(candidate)));
            } else {
                high = Some(high.map_or(candidate, |b| b.min(candidate)));
            }
        }
        match (low, high) {
            (Some(low), None) => -low,
            (None, Some(high)) => -high,
            (Some(low), Some(high)) => -(low + high) / 2.0,
            (None, None) => 0.0,
        }
    }

    /// Snapshot the decision function for the current alphas
    pub fn finish(&self, state: &ExampleState) -> Model {
        let support_vectors: Vec<usize> = (0..state.len()).filter(|&i| state.alpha[i] > 0.0).collect();
        let coefficients = support_vectors
            .iter()
            .map(|&i| state.alpha[i] * state.labels[i])
            .collect();
        Model {
            support_vectors,
            coefficients,
            bias: -self.threshold,
        }
    }
}
