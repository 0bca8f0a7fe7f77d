//! Training problem: borrowed kernel and labels plus optional per-example data

use crate::core::{Labels, Result, SolverConfig, SolverError};
use crate::kernel::Kernel;
use crate::solver::state::ExampleState;

/// Everything the solver needs to know about one training problem
///
/// The problem only borrows its collaborators; the solver must not outlive them.
pub struct Problem<'a, K: ?Sized, L: ?Sized> {
    kernel: &'a K,
    labels: &'a L,
    weights: Option<&'a [f64]>,
    linear_term: Option<&'a [f64]>,
    initial_alpha: Option<&'a [f64]>,
}

impl<'a, K, L> Problem<'a, K, L>
where
    K: Kernel + ?Sized,
    L: Labels + ?Sized,
{
    pub fn new(kernel: &'a K, labels: &'a L) -> Self {
        Self {
            kernel,
            labels,
            weights: None,
            linear_term: None,
            initial_alpha: None,
        }
    }

    /// Per-example multipliers of the regularization constant
    pub fn with_weights(mut self, weights: &'a [f64]) -> Self {
        self.weights = Some(weights);
        self
    }

    /// Replace the default linear term (-1 for every example)
    pub fn with_linear_term(mut self, linear_term: &'a [f64]) -> Self {
        self.linear_term = Some(linear_term);
        self
    }

    /// Warm start from the given alphas (clipped into the box)
    pub fn with_initial_alpha(mut self, alpha: &'a [f64]) -> Self {
        self.initial_alpha = Some(alpha);
        self
    }

    pub fn kernel(&self) -> &'a K {
        self.kernel
    }

    pub fn has_initial_alpha(&self) -> bool {
        self.initial_alpha.is_some()
    }

    /// Validate the problem against the configuration and build the
    /// per-example arrays. The gradient starts at zero.
    pub(crate) fn build_state(&self, config: &SolverConfig) -> Result<ExampleState> {
        if !self.kernel.is_initialized() {
            return Err(SolverError::KernelUnavailable(
                "kernel has no vectors to train on".to_string(),
            ));
        }
        let n = self.kernel.num_vectors();
        if self.labels.is_empty() {
            return Err(SolverError::EmptyDataset);
        }
        if self.labels.len() != n {
            return Err(SolverError::DimensionMismatch {
                expected: n,
                actual: self.labels.len(),
            });
        }
        let labels = self.labels.to_checked_vec()?;

        let weights = match self.weights {
            Some(w) => {
                check_len(w, n)?;
                if let Some(bad) = w.iter().find(|v| !(**v >= 0.0) || !v.is_finite()) {
                    return Err(SolverError::InvalidParameter(format!(
                        "example weights must be non-negative and finite, got {bad}"
                    )));
                }
                w.to_vec()
            }
            None => vec![1.0; n],
        };
        let cost: Vec<f64> = labels
            .iter()
            .zip(&weights)
            .map(|(&y, &w)| config.cost_for(y, w))
            .collect();

        let linear_term = match self.linear_term {
            Some(p) => {
                check_len(p, n)?;
                check_finite(p, "linear term")?;
                p.to_vec()
            }
            None => vec![-1.0; n],
        };

        let alpha = match self.initial_alpha {
            Some(a) => {
                check_len(a, n)?;
                check_finite(a, "initial alpha")?;
                a.iter()
                    .zip(&cost)
                    .map(|(&a, &c)| a.clamp(0.0, c))
                    .collect()
            }
            None => vec![0.0; n],
        };

        let inconsistent: Vec<bool> = cost.iter().map(|&c| c <= 0.0).collect();

        if config.bias {
            let has_class = |sign: f64| {
                labels
                    .iter()
                    .zip(&inconsistent)
                    .any(|(&y, &skip)| y == sign && !skip)
            };
            if !has_class(1.0) || !has_class(-1.0) {
                return Err(SolverError::InconsistentLabels(
                    "the equality constraint needs trainable examples of both classes"
                        .to_string(),
                ));
            }
        }

        Ok(ExampleState {
            labels,
            cost,
            linear_term,
            alpha,
            gradient: vec![0.0; n],
            inconsistent,
        })
    }
}

fn check_len(values: &[f64], n: usize) -> Result<()> {
    if values.len() != n {
        return Err(SolverError::DimensionMismatch {
            expected: n,
            actual: values.len(),
        });
    }
    Ok(())
}

fn check_finite(values: &[f64], what: &str) -> Result<()> {
    if values.iter().any(|v| !v.is_finite()) {
        return Err(SolverError::InvalidParameter(format!(
            "{what} contains non-finite values"
        )));
    }
    Ok(())
}
