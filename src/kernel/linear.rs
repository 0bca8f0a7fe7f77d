//! Linear kernel over dense feature rows

use crate::core::{Result, SolverError};
use crate::kernel::{Kernel, KernelProperty};

/// Linear kernel: K(i, j) = x_i^T * x_j
#[derive(Debug, Clone)]
pub struct LinearKernel {
    points: Vec<Vec<f64>>,
}

impl LinearKernel {
    /// Create a linear kernel over the given feature rows
    ///
    /// # Arguments
    /// * `points` - One feature row per training example, all of equal length
    pub fn new(points: Vec<Vec<f64>>) -> Result<Self> {
        check_rectangular(&points)?;
        Ok(Self { points })
    }

    pub fn points(&self) -> &[Vec<f64>] {
        &self.points
    }
}

impl Kernel for LinearKernel {
    fn num_vectors(&self) -> usize {
        self.points.len()
    }

    fn compute(&self, i: usize, j: usize) -> f64 {
        dot(&self.points[i], &self.points[j])
    }

    fn has_property(&self, property: KernelProperty) -> bool {
        property == KernelProperty::Linear
    }
}

pub(crate) fn dot(x: &[f64], y: &[f64]) -> f64 {
    x.iter().zip(y).map(|(a, b)| a * b).sum()
}

/// All rows must share one dimensionality
pub(crate) fn check_rectangular(points: &[Vec<f64>]) -> Result<()> {
    if let Some(first) = points.first() {
        let dim = first.len();
        if let Some(bad) = points.iter().find(|p| p.len() != dim) {
            return Err(SolverError::DimensionMismatch {
                expected: dim,
                actual: bad.len(),
            });
        }
    }
    Ok(())
}
