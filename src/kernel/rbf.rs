//! Gaussian (RBF) kernel over dense feature rows
//!
//! K(i, j) = exp(-γ * ||x_i - x_j||²)

use crate::core::{Result, SolverError};
use crate::kernel::linear::{check_rectangular, dot};
use crate::kernel::Kernel;

/// Gaussian kernel with squared norms precomputed per row
#[derive(Debug, Clone)]
pub struct GaussianKernel {
    points: Vec<Vec<f64>>,
    norms_sq: Vec<f64>,
    gamma: f64,
}

impl GaussianKernel {
    /// # Arguments
    /// * `points` - One feature row per training example
    /// * `gamma` - Width parameter, must be positive
    pub fn new(points: Vec<Vec<f64>>, gamma: f64) -> Result<Self> {
        if !(gamma > 0.0) || !gamma.is_finite() {
            return Err(SolverError::InvalidParameter(format!(
                "Gamma must be positive, got: {gamma}"
            )));
        }
        check_rectangular(&points)?;
        let norms_sq = points.iter().map(|p| dot(p, p)).collect();
        Ok(Self {
            points,
            norms_sq,
            gamma,
        })
    }

    /// Gamma = 1 / n_features, a common starting point
    pub fn with_auto_gamma(points: Vec<Vec<f64>>) -> Result<Self> {
        let n_features = points.first().map_or(1, |p| p.len().max(1));
        Self::new(points, 1.0 / n_features as f64)
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }
}

impl Kernel for GaussianKernel {
    fn num_vectors(&self) -> usize {
        self.points.len()
    }

    fn compute(&self, i: usize, j: usize) -> f64 {
        // ||x - y||² = ||x||² + ||y||² - 2*x^T*y, clamped against rounding
        let squared_distance =
            (self.norms_sq[i] + self.norms_sq[j] - 2.0 * dot(&self.points[i], &self.points[j]))
                .max(0.0);
        (-self.gamma * squared_distance).exp()
    }
}
