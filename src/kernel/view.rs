//! Kernel as seen by one training run
//!
//! When the solver learns mixture weights, the weights live here rather than
//! in the borrowed kernel, so the kernel itself is never mutated.

use crate::kernel::Kernel;

/// Borrowed kernel plus optional solver-owned sub-kernel weights
pub struct KernelView<'k, K: ?Sized> {
    kernel: &'k K,
    weights: Option<Vec<f64>>,
}

impl<'k, K: Kernel + ?Sized> KernelView<'k, K> {
    /// Evaluate the kernel as it is
    pub fn plain(kernel: &'k K) -> Self {
        Self {
            kernel,
            weights: None,
        }
    }

    /// Evaluate Σ_d w_d K_d with the given weights
    pub fn weighted(kernel: &'k K, weights: Vec<f64>) -> Self {
        Self {
            kernel,
            weights: Some(weights),
        }
    }

    pub fn kernel(&self) -> &'k K {
        self.kernel
    }

    pub fn weights(&self) -> Option<&[f64]> {
        self.weights.as_deref()
    }

    pub fn set_weights(&mut self, weights: Vec<f64>) {
        self.weights = Some(weights);
    }

    pub fn num_vectors(&self) -> usize {
        self.kernel.num_vectors()
    }

    pub fn compute(&self, i: usize, j: usize) -> f64 {
        match &self.weights {
            Some(weights) => weights
                .iter()
                .enumerate()
                .filter(|(_, &w)| w != 0.0)
                .map(|(d, &w)| w * self.kernel.compute_subkernel(d, i, j))
                .sum(),
            None => self.kernel.compute(i, j),
        }
    }

    /// Full row K(i, 0..n)
    pub fn full_row(&self, i: usize) -> Vec<f64> {
        let n = self.num_vectors();
        match &self.weights {
            Some(_) => (0..n).map(|j| self.compute(i, j)).collect(),
            None => {
                let indices: Vec<usize> = (0..n).collect();
                self.kernel.compute_row(i, &indices)
            }
        }
    }
}
