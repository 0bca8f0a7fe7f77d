//! Per-example arrays owned by one training run

/// Tolerance for deciding that an alpha sits on a bound
pub const EPSILON_A: f64 = 1e-15;

/// Labels, bounds, linear term, alphas and gradient of every example
///
/// The dual being minimized is `Σ p_i a_i + ½ Σ_ij a_i a_j y_i y_j K_ij`
/// subject to `0 <= a_i <= cost_i`. `gradient[i]` holds
/// `Σ_j a_j y_j K_ij` (the "linear component"); for shrunk examples it may be
/// stale until they are reactivated.
#[derive(Debug, Clone)]
pub struct ExampleState {
    pub labels: Vec<f64>,
    pub cost: Vec<f64>,
    pub linear_term: Vec<f64>,
    pub alpha: Vec<f64>,
    pub gradient: Vec<f64>,
    /// Examples that can never move (zero cost)
    pub inconsistent: Vec<bool>,
}

impl ExampleState {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Functional margin target, 1 for the standard SVM
    #[inline]
    pub fn target(&self, i: usize) -> f64 {
        -self.linear_term[i]
    }

    /// Functional margin y_i (f(x_i) - threshold) given the current gradient
    #[inline]
    pub fn margin(&self, i: usize, threshold: f64) -> f64 {
        (self.gradient[i] - threshold) * self.labels[i]
    }

    #[inline]
    pub fn at_lower(&self, i: usize) -> bool {
        self.alpha[i] <= EPSILON_A
    }

    #[inline]
    pub fn at_upper(&self, i: usize) -> bool {
        self.alpha[i] >= self.cost[i] - EPSILON_A
    }

    #[inline]
    pub fn is_free(&self, i: usize) -> bool {
        !self.at_lower(i) && !self.at_upper(i)
    }

    /// KKT violation of example i, 0 when optimal
    pub fn violation(&self, i: usize, threshold: f64) -> f64 {
        let dist = self.margin(i, threshold);
        let target = self.target(i);
        if self.alpha[i] > EPSILON_A && dist > target {
            dist - target
        } else if self.alpha[i] < self.cost[i] - EPSILON_A && dist < target {
            target - dist
        } else {
            0.0
        }
    }

    /// Whether example i is at a bound and on the optimal side of the
    /// target by at least `slack`
    pub fn settled_at_bound(&self, i: usize, threshold: f64, slack: f64) -> bool {
        let dist = self.margin(i, threshold);
        let target = self.target(i);
        if self.is_free(i) {
            false
        } else if self.at_lower(i) {
            dist >= target + slack
        } else {
            dist <= target - slack
        }
    }

    /// Dual objective `Σ p_i a_i + ½ Σ a_i y_i gradient_i`
    pub fn objective(&self) -> f64 {
        (0..self.len())
            .map(|i| {
                self.linear_term[i] * self.alpha[i]
                    + 0.5 * self.alpha[i] * self.labels[i] * self.gradient[i]
            })
            .sum()
    }

    /// Σ alpha_i y_i
    pub fn equality_sum(&self) -> f64 {
        self.alpha.iter().zip(&self.labels).map(|(a, y)| a * y).sum()
    }

    /// Σ alpha_i
    pub fn alpha_sum(&self) -> f64 {
        self.alpha.iter().sum()
    }
}
