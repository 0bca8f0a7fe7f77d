//! Weighted sum of sub-kernels, K = Σ_d β_d K_d

use crate::core::{Result, SolverError};
use crate::kernel::{Kernel, KernelProperty};

/// Linear combination of kernels defined on the same vectors
pub struct CombinedKernel {
    kernels: Vec<Box<dyn Kernel>>,
    weights: Vec<f64>,
}

impl CombinedKernel {
    /// Combine kernels with uniform weights 1/D
    pub fn new(kernels: Vec<Box<dyn Kernel>>) -> Result<Self> {
        let d = kernels.len();
        Self::with_weights(kernels, vec![1.0 / d.max(1) as f64; d])
    }

    pub fn with_weights(kernels: Vec<Box<dyn Kernel>>, weights: Vec<f64>) -> Result<Self> {
        let first = kernels.first().ok_or_else(|| {
            SolverError::KernelUnavailable("combined kernel has no sub-kernels".to_string())
        })?;
        let n = first.num_vectors();
        if let Some(bad) = kernels.iter().find(|k| k.num_vectors() != n) {
            return Err(SolverError::DimensionMismatch {
                expected: n,
                actual: bad.num_vectors(),
            });
        }
        if weights.len() != kernels.len() {
            return Err(SolverError::DimensionMismatch {
                expected: kernels.len(),
                actual: weights.len(),
            });
        }
        if weights.iter().any(|w| !(*w >= 0.0) || !w.is_finite()) {
            return Err(SolverError::InvalidParameter(
                "sub-kernel weights must be non-negative and finite".to_string(),
            ));
        }
        Ok(Self { kernels, weights })
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}

impl std::fmt::Debug for CombinedKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombinedKernel")
            .field("num_subkernels", &self.kernels.len())
            .field("weights", &self.weights)
            .finish()
    }
}

impl Kernel for CombinedKernel {
    fn num_vectors(&self) -> usize {
        self.kernels[0].num_vectors()
    }

    fn compute(&self, i: usize, j: usize) -> f64 {
        self.kernels
            .iter()
            .zip(&self.weights)
            .filter(|(_, &w)| w != 0.0)
            .map(|(k, &w)| w * k.compute(i, j))
            .sum()
    }

    fn has_property(&self, property: KernelProperty) -> bool {
        property == KernelProperty::LinearCombination
    }

    fn num_subkernels(&self) -> usize {
        self.kernels.len()
    }

    fn compute_subkernel(&self, d: usize, i: usize, j: usize) -> f64 {
        self.kernels[d].compute(i, j)
    }

    fn subkernel_weights(&self) -> Vec<f64> {
        self.weights.clone()
    }
}
