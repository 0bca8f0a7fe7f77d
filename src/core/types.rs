//! Core type definitions: solver configuration, model and diagnostics

use crate::cache::CacheStats;
use crate::core::{Result, SolverError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for the chunking solver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Regularization constant (upper bound for negative examples)
    pub c: f64,
    /// Ratio C+/C- applied to positive examples
    pub positive_cost_ratio: f64,
    /// Enable the equality constraint Σ alpha·label = 0 (biased hyperplane)
    pub bias: bool,
    /// Maximum size of the QP subproblem
    pub qp_size: usize,
    /// Maximum number of new variables entering the working set per iteration
    pub new_vars_in_qp: Option<usize>,
    /// Target tolerance on the KKT violation
    pub epsilon: f64,
    /// Coarse starting tolerance, tightened towards `epsilon` once reached
    pub initial_epsilon: Option<f64>,
    /// Enable the shrinking heuristic
    pub shrinking: bool,
    /// Iterations an example must keep its bound state before it can be shrunk
    pub shrinking_threshold: usize,
    /// Maximum number of retained alpha snapshots
    pub shrink_history: usize,
    /// Lower bound on the number of candidates required to shrink
    pub shrink_batch_floor: usize,
    /// Hard cap on outer iterations
    pub max_iterations: usize,
    /// Iterations without improvement of the best violation before giving up
    pub stall_iterations: usize,
    /// Optional wall-clock budget in seconds
    pub max_train_time_secs: Option<f64>,
    /// Worker threads for kernel evaluation (0 = available parallelism)
    pub num_threads: usize,
    /// Maximum number of cached kernel elements
    pub cache_size: usize,
    /// Every this many iterations the working set is chosen pseudo-randomly
    pub random_selection_period: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            positive_cost_ratio: 1.0,
            bias: true,
            qp_size: 10,
            new_vars_in_qp: None,
            epsilon: 1e-3,
            initial_epsilon: None,
            shrinking: true,
            shrinking_threshold: 100,
            shrink_history: 64,
            shrink_batch_floor: 100,
            max_iterations: 100_000,
            stall_iterations: 10_000,
            max_train_time_secs: None,
            num_threads: 0,
            cache_size: 4 * 1024 * 1024,
            random_selection_period: 101,
        }
    }
}

impl SolverConfig {
    /// Load a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SolverConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check parameter ranges
    pub fn validate(&self) -> Result<()> {
        if !(self.c > 0.0) || !self.c.is_finite() {
            return Err(SolverError::InvalidParameter(format!(
                "C must be positive and finite, got {}",
                self.c
            )));
        }
        if !(self.positive_cost_ratio > 0.0) || !self.positive_cost_ratio.is_finite() {
            return Err(SolverError::InvalidParameter(format!(
                "positive_cost_ratio must be positive and finite, got {}",
                self.positive_cost_ratio
            )));
        }
        if !(self.epsilon > 0.0) {
            return Err(SolverError::InvalidParameter(format!(
                "epsilon must be positive, got {}",
                self.epsilon
            )));
        }
        if let Some(initial) = self.initial_epsilon {
            if initial < self.epsilon {
                return Err(SolverError::InvalidParameter(format!(
                    "initial_epsilon ({initial}) must not be below epsilon ({})",
                    self.epsilon
                )));
            }
        }
        if self.qp_size < 2 {
            return Err(SolverError::InvalidParameter(format!(
                "qp_size must be at least 2, got {}",
                self.qp_size
            )));
        }
        if let Some(new_vars) = self.new_vars_in_qp {
            if new_vars == 0 || new_vars > self.qp_size {
                return Err(SolverError::InvalidParameter(format!(
                    "new_vars_in_qp must be in 1..={}, got {new_vars}",
                    self.qp_size
                )));
            }
        }
        if self.max_iterations == 0 {
            return Err(SolverError::InvalidParameter(
                "max_iterations must be positive".to_string(),
            ));
        }
        if self.stall_iterations == 0 {
            return Err(SolverError::InvalidParameter(
                "stall_iterations must be positive".to_string(),
            ));
        }
        if self.shrinking && self.shrink_history == 0 {
            return Err(SolverError::InvalidParameter(
                "shrink_history must be positive when shrinking is enabled".to_string(),
            ));
        }
        if let Some(secs) = self.max_train_time_secs {
            if !(secs >= 0.0) || !secs.is_finite() {
                return Err(SolverError::InvalidParameter(format!(
                    "max_train_time_secs must be a non-negative number, got {secs}"
                )));
            }
        }
        self.max_train_time()?;
        if self.random_selection_period == 0 {
            return Err(SolverError::InvalidParameter(
                "random_selection_period must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective number of new variables per iteration
    ///
    /// A single new variable cannot move under the equality constraint, so
    /// anything below 2 falls back to the full subproblem size.
    pub fn new_vars(&self) -> usize {
        let new_vars = self
            .new_vars_in_qp
            .unwrap_or_else(|| self.qp_size.saturating_sub(1));
        if new_vars < 2 || new_vars > self.qp_size {
            self.qp_size
        } else {
            new_vars
        }
    }

    /// Wall-clock budget as a duration
    pub fn max_train_time(&self) -> Result<Option<Duration>> {
        self.max_train_time_secs
            .map(|secs| {
                Duration::try_from_secs_f64(secs).map_err(|e| {
                    SolverError::InvalidParameter(format!(
                        "max_train_time_secs {secs} is not a valid duration: {e}"
                    ))
                })
            })
            .transpose()
    }

    /// Upper bound of the dual variable for an example with the given label and weight
    pub fn cost_for(&self, label: f64, weight: f64) -> f64 {
        let ratio = if label > 0.0 {
            self.positive_cost_ratio
        } else {
            1.0
        };
        self.c * ratio * weight
    }
}

/// Trained decision function `f(x) = Σ coef_k K(x, sv_k) + bias`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Support-vector indices in ascending order
    pub support_vectors: Vec<usize>,
    /// Signed dual coefficients (alpha·label), aligned with `support_vectors`
    pub coefficients: Vec<f64>,
    pub bias: f64,
}

impl Model {
    pub fn n_support_vectors(&self) -> usize {
        self.support_vectors.len()
    }

    /// Decision value for a point given its kernel values against the training set
    pub fn decision_value<F>(&self, kernel_to: F) -> f64
    where
        F: Fn(usize) -> f64,
    {
        self.support_vectors
            .iter()
            .zip(&self.coefficients)
            .map(|(&sv, &coef)| coef * kernel_to(sv))
            .sum::<f64>()
            + self.bias
    }
}

/// Why the outer loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    Converged,
    /// No improvement of the best violation; tolerance was relaxed
    Stalled,
    MaxIterations,
    Cancelled,
    TimedOut,
}

impl Termination {
    /// Cancellation and timeout stop early without being errors
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Termination::Cancelled | Termination::TimedOut)
    }
}

/// Summary of one training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Final value of the minimized dual objective
    pub objective: f64,
    pub iterations: usize,
    pub n_support_vectors: usize,
    pub n_at_upper_bound: usize,
    pub max_violation: f64,
    /// Working tolerance at termination
    pub epsilon: f64,
    pub termination: Termination,
    pub misclassified: usize,
    pub cache: CacheStats,
    pub qp_degraded: usize,
    pub qp_resets: usize,
    pub mkl_weights: Option<Vec<f64>>,
    pub elapsed_secs: f64,
}

/// Everything a training run produces
#[derive(Debug, Clone)]
pub struct TrainingResult {
    pub model: Model,
    pub alpha: Vec<f64>,
    /// Gradient ("linear component") Σ_k alpha_k y_k K(i, k) for every example
    pub gradient: Vec<f64>,
    pub diagnostics: Diagnostics,
}

/// Per-iteration progress handed to observers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationReport {
    pub iteration: usize,
    pub objective: f64,
    pub max_violation: f64,
    pub working_set_size: usize,
    pub active: usize,
    pub epsilon: f64,
}
