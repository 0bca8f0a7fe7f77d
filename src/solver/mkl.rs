//! Multiple kernel learning hook
//!
//! With a combined kernel `K = Σ_d β_d K_d` the solver keeps one gradient
//! column per sub-kernel, `W[d][j] = Σ_i a_i y_i K_d(i, j)`. After every
//! iteration the per-kernel contributions to the dual objective are handed
//! to a [`MklWeightUpdater`], which returns new weights. The gradient is then
//! rebuilt as `Σ_d β_d W[d]` and cached kernel rows are invalidated.

use crate::core::{Result, SolverError};
use crate::kernel::Kernel;
use crate::parallel::ParallelKernelEvaluator;
use crate::solver::state::ExampleState;
use log::debug;

/// New sub-kernel weights proposed by an updater
#[derive(Debug, Clone, PartialEq)]
pub struct MklUpdate {
    pub weights: Vec<f64>,
    /// The outer MKL problem has converged
    pub converged: bool,
}

/// Computes sub-kernel weights from the current SVM solution
pub trait MklWeightUpdater {
    /// # Arguments
    /// * `contributions` - `½ Σ_ij a_i a_j y_i y_j K_d(i, j)` for each sub-kernel d
    /// * `alpha_sum` - `Σ_i a_i`
    /// * `current` - Weights used for the current solution
    fn update_weights(
        &mut self,
        contributions: &[f64],
        alpha_sum: f64,
        current: &[f64],
    ) -> Result<MklUpdate>;
}

/// Closed-form p-norm MKL step with a small regularizing shift towards
/// uniform weights
#[derive(Debug, Clone)]
pub struct DirectPNormMkl {
    norm: f64,
    epsilon: f64,
    rho: f64,
    gap: f64,
}

impl DirectPNormMkl {
    /// Fraction of the RMS weight change added back to every weight
    const REGULARIZATION: f64 = 0.01;

    /// # Arguments
    /// * `norm` - The p of the weight norm constraint, at least 1
    /// * `epsilon` - Relative duality gap at which MKL is considered converged
    pub fn new(norm: f64, epsilon: f64) -> Result<Self> {
        if !(norm >= 1.0) || !norm.is_finite() {
            return Err(SolverError::InvalidParameter(format!(
                "MKL norm must be a finite value >= 1, got {norm}"
            )));
        }
        if !(epsilon > 0.0) {
            return Err(SolverError::InvalidParameter(format!(
                "MKL epsilon must be positive, got {epsilon}"
            )));
        }
        Ok(Self {
            norm,
            epsilon,
            rho: 0.0,
            gap: f64::INFINITY,
        })
    }

    pub fn norm(&self) -> f64 {
        self.norm
    }

    /// Relative gap between the last two MKL objectives
    pub fn gap(&self) -> f64 {
        self.gap
    }

    fn normalize(&self, beta: &mut [f64]) -> Result<()> {
        let z = beta.iter().map(|b| b.powf(self.norm)).sum::<f64>().powf(-1.0 / self.norm);
        if !z.is_finite() {
            return Err(SolverError::Mkl(
                "sub-kernel weights collapsed to zero".to_string(),
            ));
        }
        beta.iter_mut().for_each(|b| *b *= z);
        Ok(())
    }
}

impl MklWeightUpdater for DirectPNormMkl {
    fn update_weights(
        &mut self,
        contributions: &[f64],
        alpha_sum: f64,
        current: &[f64],
    ) -> Result<MklUpdate> {
        let p = self.norm;
        let objective = -alpha_sum
            + current
                .iter()
                .zip(contributions)
                .map(|(b, w)| b * w)
                .sum::<f64>();

        let mut beta: Vec<f64> = current
            .iter()
            .zip(contributions)
            .map(|(&old, &w)| {
                if w >= 0.0 && old >= 0.0 {
                    (w * old * old / p).powf(1.0 / (p + 1.0))
                } else {
                    0.0
                }
            })
            .collect();
        self.normalize(&mut beta)?;

        let spread: f64 = current
            .iter()
            .zip(&beta)
            .map(|(old, new)| (old - new) * (old - new))
            .sum();
        let shift = (spread / p).sqrt() * Self::REGULARIZATION;
        beta.iter_mut().for_each(|b| *b += shift);
        self.normalize(&mut beta)?;
        beta.iter_mut().for_each(|b| *b = b.min(1.0));

        self.rho = -alpha_sum
            + contributions
                .iter()
                .zip(&beta)
                .map(|(w, b)| w * b)
                .sum::<f64>();
        self.gap = (1.0 - self.rho / objective).abs();
        debug!("mkl objective {objective:.6e}, gap {:.3e}", self.gap);

        Ok(MklUpdate {
            weights: beta,
            converged: self.gap < self.epsilon,
        })
    }
}

/// Per-sub-kernel gradient columns and the current weights
#[derive(Debug, Clone)]
pub(crate) struct MklState {
    columns: Vec<Vec<f64>>,
    weights: Vec<f64>,
    converged: bool,
}

impl MklState {
    pub(crate) fn new<K: Kernel + ?Sized>(kernel: &K) -> Result<Self> {
        let d = kernel.num_subkernels();
        let weights = kernel.subkernel_weights();
        if d == 0 {
            return Err(SolverError::Mkl("kernel has no sub-kernels".to_string()));
        }
        if weights.len() != d {
            return Err(SolverError::DimensionMismatch {
                expected: d,
                actual: weights.len(),
            });
        }
        Ok(Self {
            columns: vec![vec![0.0; kernel.num_vectors()]; d],
            weights,
            converged: false,
        })
    }

    pub(crate) fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub(crate) fn is_converged(&self) -> bool {
        self.converged
    }

    /// Add `Σ coef_i K_d(i, ·)` to every column
    pub(crate) fn accumulate<K: Kernel + ?Sized>(
        &mut self,
        evaluator: &ParallelKernelEvaluator<'_>,
        kernel: &K,
        changes: &[(usize, f64)],
    ) {
        evaluator.accumulate_subkernels(kernel, changes, &mut self.columns);
    }

    /// `½ Σ_i a_i y_i W[d][i]` for each sub-kernel
    pub(crate) fn contributions(&self, state: &ExampleState) -> Vec<f64> {
        self.columns
            .iter()
            .map(|column| {
                0.5 * column
                    .iter()
                    .enumerate()
                    .map(|(i, w)| state.alpha[i] * state.labels[i] * w)
                    .sum::<f64>()
            })
            .collect()
    }

    /// Validate and adopt new weights, returning whether they changed
    pub(crate) fn apply(&mut self, update: MklUpdate) -> Result<bool> {
        if update.weights.len() != self.weights.len() {
            return Err(SolverError::Mkl(format!(
                "updater returned {} weights for {} sub-kernels",
                update.weights.len(),
                self.weights.len()
            )));
        }
        if let Some(bad) = update.weights.iter().find(|w| !(**w >= 0.0) || !w.is_finite()) {
            return Err(SolverError::Mkl(format!(
                "sub-kernel weights must be finite and non-negative, got {bad}"
            )));
        }
        self.converged = update.converged;
        let changed = update.weights != self.weights;
        self.weights = update.weights;
        Ok(changed)
    }

    /// Rebuild `gradient = Σ_d β_d W[d]`
    pub(crate) fn write_gradient(&self, gradient: &mut [f64]) {
        for (j, g) in gradient.iter_mut().enumerate() {
            *g = self
                .columns
                .iter()
                .zip(&self.weights)
                .map(|(column, beta)| beta * column[j])
                .sum();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::KernelCache;
    use crate::kernel::{CombinedKernel, GaussianKernel, LinearKernel};
    use approx::assert_relative_eq;

    #[test]
    fn test_direct_update_is_normalized() {
        let mut mkl = DirectPNormMkl::new(2.0, 1e-3).unwrap();
        let current = [0.5f64.sqrt(), 0.5f64.sqrt()];
        let update = mkl.update_weights(&[1.0, 4.0], 3.0, &current).unwrap();

        assert_eq!(update.weights.len(), 2);
        assert!(update.weights[1] > update.weights[0]);
        let norm: f64 = update.weights.iter().map(|b| b * b).sum::<f64>().sqrt();
        assert_relative_eq!(norm, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_direct_update_converges() {
        let mut mkl = DirectPNormMkl::new(2.0, 1e-4).unwrap();
        let contributions = [1.0, 3.0, 0.5];
        let mut weights = vec![3f64.sqrt().recip(); 3];
        let mut converged = false;
        for _ in 0..200 {
            let update = mkl.update_weights(&contributions, 2.0, &weights).unwrap();
            weights = update.weights;
            if update.converged {
                converged = true;
                break;
            }
        }
        assert!(converged);
        assert!(mkl.gap() < 1e-4);
        // fixed point of the 2-norm update is proportional to the contributions
        assert!(weights[1] > weights[0] && weights[0] > weights[2]);
    }

    #[test]
    fn test_negative_contributions_collapse() {
        let mut mkl = DirectPNormMkl::new(1.0, 1e-3).unwrap();
        let result = mkl.update_weights(&[-1.0, -2.0], 1.0, &[0.5, 0.5]);
        assert!(matches!(result, Err(SolverError::Mkl(_))));
    }

    #[test]
    fn test_invalid_norm_rejected() {
        assert!(DirectPNormMkl::new(0.5, 1e-3).is_err());
        assert!(DirectPNormMkl::new(2.0, 0.0).is_err());
    }

    #[test]
    fn test_state_columns_and_gradient() {
        let points = vec![vec![1.0], vec![-0.5], vec![2.0]];
        let kernel = CombinedKernel::with_weights(
            vec![
                Box::new(LinearKernel::new(points.clone()).unwrap()),
                Box::new(GaussianKernel::new(points, 1.0).unwrap()),
            ],
            vec![0.25, 0.75],
        )
        .unwrap();
        let cache = KernelCache::with_rows(3, 0);
        let evaluator = ParallelKernelEvaluator::new(2, &cache).unwrap();
        let mut mkl = MklState::new(&kernel).unwrap();
        assert_eq!(mkl.weights(), &[0.25, 0.75]);

        let state = ExampleState {
            labels: vec![1.0, -1.0, 1.0],
            cost: vec![1.0; 3],
            linear_term: vec![-1.0; 3],
            alpha: vec![0.5, 0.5, 0.0],
            gradient: vec![0.0; 3],
            inconsistent: vec![false; 3],
        };
        mkl.accumulate(&evaluator, &kernel, &[(0, 0.5), (1, -0.5)]);

        let mut gradient = vec![0.0; 3];
        mkl.write_gradient(&mut gradient);
        for (j, g) in gradient.iter().enumerate() {
            let expected = 0.5 * kernel.compute(0, j) - 0.5 * kernel.compute(1, j);
            assert_relative_eq!(*g, expected, epsilon = 1e-12);
        }

        let contributions = mkl.contributions(&state);
        let total: f64 = contributions
            .iter()
            .zip(mkl.weights())
            .map(|(c, b)| c * b)
            .sum();
        assert_relative_eq!(total, 0.5 * 0.5 * gradient[0] - 0.5 * 0.5 * gradient[1], epsilon = 1e-12);
    }

    #[test]
    fn test_apply_validates_weights() {
        let kernel = LinearKernel::new(vec![vec![1.0]]).unwrap();
        let mut mkl = MklState::new(&kernel).unwrap();
        let bad = MklUpdate {
            weights: vec![f64::NAN],
            converged: false,
        };
        assert!(matches!(mkl.apply(bad), Err(SolverError::Mkl(_))));
        let short = MklUpdate {
            weights: Vec::new(),
            converged: true,
        };
        assert!(mkl.apply(short).is_err());
        let same = MklUpdate {
            weights: vec![1.0],
            converged: true,
        };
        assert!(!mkl.apply(same).unwrap());
        assert!(mkl.is_converged());
    }
}
