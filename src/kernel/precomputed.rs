//! Kernel backed by a dense, precomputed Gram matrix

use crate::core::{Result, SolverError};
use crate::kernel::Kernel;

/// Symmetric n×n kernel matrix stored row-major
#[derive(Debug, Clone)]
pub struct PrecomputedKernel {
    n: usize,
    values: Vec<f64>,
}

impl PrecomputedKernel {
    /// Build from a square matrix given as rows
    ///
    /// Fails if the matrix is not square or contains non-finite values.
    /// Symmetry is checked up to a small relative tolerance.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let n = rows.len();
        let mut values = Vec::with_capacity(n * n);
        for row in rows {
            if row.len() != n {
                return Err(SolverError::DimensionMismatch {
                    expected: n,
                    actual: row.len(),
                });
            }
            values.extend(row);
        }
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(SolverError::InvalidParameter(format!(
                "kernel matrix contains non-finite value {bad}"
            )));
        }
        for i in 0..n {
            for j in (i + 1)..n {
                let (a, b) = (values[i * n + j], values[j * n + i]);
                if (a - b).abs() > 1e-9 * (1.0 + a.abs().max(b.abs())) {
                    return Err(SolverError::InvalidParameter(format!(
                        "kernel matrix is not symmetric at ({i}, {j}): {a} vs {b}"
                    )));
                }
            }
        }
        Ok(Self { n, values })
    }

    /// Materialize any kernel function over `n` vectors
    pub fn from_fn<F>(n: usize, f: F) -> Self
    where
        F: Fn(usize, usize) -> f64,
    {
        let mut values = vec![0.0; n * n];
        for i in 0..n {
            for j in i..n {
                let v = f(i, j);
                values[i * n + j] = v;
                values[j * n + i] = v;
            }
        }
        Self { n, values }
    }

    /// Materialize another kernel
    pub fn from_kernel<K: Kernel + ?Sized>(kernel: &K) -> Self {
        Self::from_fn(kernel.num_vectors(), |i, j| kernel.compute(i, j))
    }
}

impl Kernel for PrecomputedKernel {
    fn num_vectors(&self) -> usize {
        self.n
    }

    fn compute(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.n + j]
    }

    fn compute_row(&self, i: usize, indices: &[usize]) -> Vec<f64> {
        let row = &self.values[i * self.n..(i + 1) * self.n];
        indices.iter().map(|&j| row[j]).collect()
    }
}
