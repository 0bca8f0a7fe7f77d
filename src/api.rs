//! High-level training API
//!
//! [`SVM`] is a builder over [`SolverConfig`] that hands a borrowed kernel
//! and label set to the chunking solver.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use chunksvm::api::SVM;
//! use chunksvm::kernel::LinearKernel;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let kernel = LinearKernel::new(vec![vec![2.0, 0.0], vec![-2.0, 0.0]])?;
//! let labels = vec![1.0, -1.0];
//!
//! let result = SVM::new()
//!     .with_c(1.0)
//!     .with_epsilon(0.001)
//!     .train(&kernel, &labels)?;
//!
//! println!("bias: {:.4}", result.model.bias);
//! println!("support vectors: {:?}", result.model.support_vectors);
//! # Ok(())
//! # }
//! ```

use crate::core::{IterationReport, Labels, Result, SolverConfig, TrainingResult};
use crate::kernel::Kernel;
use crate::solver::{CancelFlag, ChunkingSolver, MklWeightUpdater, Problem};
use std::path::Path;
use std::time::Duration;

/// Training configuration with a builder interface
#[derive(Debug, Clone, Default)]
pub struct SVM {
    config: SolverConfig,
    cancel: Option<CancelFlag>,
}

impl SVM {
    /// Default parameters
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration
    pub fn with_config(config: SolverConfig) -> Self {
        Self {
            config,
            cancel: None,
        }
    }

    /// Load the configuration from a JSON file
    pub fn from_config_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::with_config(SolverConfig::from_json_file(path)?))
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Set regularization parameter C
    pub fn with_c(mut self, c: f64) -> Self {
        self.config.c = c;
        self
    }

    /// Set the ratio C+/C- applied to positive examples
    pub fn with_positive_cost_ratio(mut self, ratio: f64) -> Self {
        self.config.positive_cost_ratio = ratio;
        self
    }

    /// Set convergence tolerance
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.config.epsilon = epsilon;
        self
    }

    /// Start with a coarse tolerance that is tightened towards epsilon
    pub fn with_initial_epsilon(mut self, epsilon: f64) -> Self {
        self.config.initial_epsilon = Some(epsilon);
        self
    }

    /// Enable or disable the equality constraint (biased hyperplane)
    pub fn with_bias(mut self, bias: bool) -> Self {
        self.config.bias = bias;
        self
    }

    /// Set the maximum QP subproblem size
    pub fn with_qp_size(mut self, qp_size: usize) -> Self {
        self.config.qp_size = qp_size;
        self
    }

    /// Set the number of new variables entering the working set per iteration
    pub fn with_new_vars(mut self, new_vars: usize) -> Self {
        self.config.new_vars_in_qp = Some(new_vars);
        self
    }

    pub fn with_shrinking(mut self, shrinking: bool) -> Self {
        self.config.shrinking = shrinking;
        self
    }

    /// Iterations an example must stay settled before it may be shrunk
    pub fn with_shrinking_threshold(mut self, iterations: usize) -> Self {
        self.config.shrinking_threshold = iterations;
        self
    }

    /// Set maximum number of iterations
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// Set the wall-clock budget
    pub fn with_max_train_time(mut self, limit: Duration) -> Self {
        self.config.max_train_time_secs = Some(limit.as_secs_f64());
        self
    }

    /// Set the worker pool size (0 = available parallelism)
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.config.num_threads = num_threads;
        self
    }

    /// Set kernel cache size in kernel elements
    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.config.cache_size = cache_size;
        self
    }

    /// Stop training early once `cancel` is raised
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn solver<'a>(&self) -> Result<ChunkingSolver<'a>> {
        let solver = ChunkingSolver::new(self.config.clone())?;
        Ok(match &self.cancel {
            Some(cancel) => solver.with_cancel_flag(cancel.clone()),
            None => solver,
        })
    }

    /// Train on a kernel and its labels
    pub fn train<K, L>(&self, kernel: &K, labels: &L) -> Result<TrainingResult>
    where
        K: Kernel + ?Sized,
        L: Labels + ?Sized,
    {
        self.solver()?.solve(kernel, labels)
    }

    /// Train on a problem with per-example weights, linear term or warm start
    pub fn train_problem<K, L>(&self, problem: &Problem<'_, K, L>) -> Result<TrainingResult>
    where
        K: Kernel + ?Sized,
        L: Labels + ?Sized,
    {
        self.solver()?.solve_problem(problem)
    }

    /// Train while reporting every outer iteration to `observer`
    pub fn train_with_observer<K, L, F>(
        &self,
        kernel: &K,
        labels: &L,
        observer: F,
    ) -> Result<TrainingResult>
    where
        K: Kernel + ?Sized,
        L: Labels + ?Sized,
        F: FnMut(&IterationReport),
    {
        self.solver()?.with_observer(observer).solve(kernel, labels)
    }

    /// Train and learn the sub-kernel weights of a combined kernel
    pub fn train_with_mkl<K, L>(
        &self,
        kernel: &K,
        labels: &L,
        updater: &mut dyn MklWeightUpdater,
    ) -> Result<TrainingResult>
    where
        K: Kernel + ?Sized,
        L: Labels + ?Sized,
    {
        self.solver()?.with_mkl(updater).solve(kernel, labels)
    }
}

/// Convenience functions for one-off training
pub mod quick {
    use super::*;

    /// Train with default parameters and the given C
    pub fn train<K, L>(kernel: &K, labels: &L, c: f64) -> Result<TrainingResult>
    where
        K: Kernel + ?Sized,
        L: Labels + ?Sized,
    {
        SVM::new().with_c(c).train(kernel, labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{SolverError, Termination};
    use crate::kernel::{CombinedKernel, GaussianKernel, LinearKernel};
    use crate::solver::DirectPNormMkl;
    use approx::assert_relative_eq;

    fn separable() -> (LinearKernel, Vec<f64>) {
        let kernel = LinearKernel::new(vec![
            vec![2.0, 1.0],
            vec![3.0, 2.0],
            vec![2.5, 0.0],
            vec![-2.0, -1.0],
            vec![-3.0, 0.0],
            vec![-2.5, -2.0],
        ])
        .unwrap();
        (kernel, vec![1.0, 1.0, 1.0, -1.0, -1.0, -1.0])
    }

    #[test]
    fn test_builder_sets_config() {
        let svm = SVM::new()
            .with_c(2.0)
            .with_epsilon(1e-4)
            .with_initial_epsilon(0.1)
            .with_bias(false)
            .with_qp_size(6)
            .with_new_vars(3)
            .with_shrinking(false)
            .with_shrinking_threshold(20)
            .with_max_iterations(50)
            .with_max_train_time(Duration::from_secs(5))
            .with_threads(1)
            .with_cache_size(1000)
            .with_positive_cost_ratio(2.0);

        let config = svm.config();
        assert_eq!(config.c, 2.0);
        assert_eq!(config.epsilon, 1e-4);
        assert_eq!(config.initial_epsilon, Some(0.1));
        assert!(!config.bias);
        assert_eq!(config.qp_size, 6);
        assert_eq!(config.new_vars(), 3);
        assert!(!config.shrinking);
        assert_eq!(config.shrinking_threshold, 20);
        assert_eq!(config.max_iterations, 50);
        assert_eq!(config.max_train_time_secs, Some(5.0));
        assert_eq!(config.num_threads, 1);
        assert_eq!(config.cache_size, 1000);
        assert_eq!(config.positive_cost_ratio, 2.0);
    }

    #[test]
    fn test_train_separable() {
        let (kernel, labels) = separable();
        let result = SVM::new().with_c(100.0).train(&kernel, &labels).unwrap();

        assert_eq!(result.diagnostics.termination, Termination::Converged);
        assert_eq!(result.diagnostics.misclassified, 0);
        for (i, &y) in labels.iter().enumerate() {
            let f = result.model.decision_value(|sv| kernel.compute(i, sv));
            assert!(y * f >= 1.0 - 1e-2, "example {i}: y f = {}", y * f);
        }
    }

    #[test]
    fn test_invalid_parameter_surfaces() {
        let (kernel, labels) = separable();
        let result = SVM::new().with_c(-1.0).train(&kernel, &labels);
        assert!(matches!(result, Err(SolverError::InvalidParameter(_))));
    }

    #[test]
    fn test_observer_and_quick_agree() {
        let (kernel, labels) = separable();
        let mut last = None;
        let observed = SVM::new()
            .with_c(1.0)
            .train_with_observer(&kernel, &labels, |report| last = Some(*report))
            .unwrap();
        let plain = quick::train(&kernel, &labels, 1.0).unwrap();

        assert_relative_eq!(
            observed.diagnostics.objective,
            plain.diagnostics.objective,
            epsilon = 1e-9
        );
        let last = last.unwrap();
        assert_eq!(last.iteration, observed.diagnostics.iterations);
    }

    #[test]
    fn test_train_with_mkl() {
        let points = vec![vec![1.0], vec![1.5], vec![-1.0], vec![-1.2]];
        let kernel = CombinedKernel::new(vec![
            Box::new(LinearKernel::new(points.clone()).unwrap()),
            Box::new(GaussianKernel::new(points, 0.5).unwrap()),
        ])
        .unwrap();
        let labels = vec![1.0, 1.0, -1.0, -1.0];
        let mut updater = DirectPNormMkl::new(2.0, 1e-3).unwrap();
        let result = SVM::new()
            .with_max_iterations(300)
            .train_with_mkl(&kernel, &labels, &mut updater)
            .unwrap();

        let weights = result.diagnostics.mkl_weights.unwrap();
        let norm: f64 = weights.iter().map(|w| w * w).sum::<f64>().sqrt();
        assert_relative_eq!(norm, 1.0, epsilon = 0.05);
    }

    #[test]
    fn test_cancel_flag_is_forwarded() {
        let (kernel, labels) = separable();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let result = SVM::new()
            .with_cancel_flag(cancel)
            .train(&kernel, &labels)
            .unwrap();
        assert_eq!(result.diagnostics.termination, Termination::Cancelled);
    }
}
