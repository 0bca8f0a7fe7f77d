//! Chunking decomposition solver for kernel support vector machines
//!
//! Based on "Making Large-Scale SVM Learning Practical" by Thorsten Joachims:
//! working-set selection, an interior point QP subproblem solver, shrinking
//! with gradient reconstruction, a shared kernel row cache and a rayon pool
//! for the data-parallel phases. Sub-kernel weights of a combined kernel can
//! be learned alongside the dual variables (MKL).

pub mod api;
pub mod cache;
pub mod core;
pub mod kernel;
pub mod parallel;
pub mod persistence;
pub mod solver;

// Re-export main types for convenience
pub use crate::api::SVM;
pub use crate::cache::{CacheStats, KernelCache};
pub use crate::core::traits::*;
pub use crate::core::types::*;
pub use crate::core::{Result, SolverError};
pub use crate::kernel::{
    CombinedKernel, GaussianKernel, Kernel, KernelProperty, LinearKernel, PrecomputedKernel,
};
pub use crate::parallel::ParallelKernelEvaluator;
pub use crate::solver::{CancelFlag, ChunkingSolver, DirectPNormMkl, MklWeightUpdater, Problem};

// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
