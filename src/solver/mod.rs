//! Decomposition solver for the SVM dual
//!
//! [`ChunkingSolver`] drives the outer loop; the remaining modules are its
//! components and can be used on their own.

pub mod chunking;
pub mod convergence;
pub mod interior_point;
pub mod mkl;
pub mod model;
pub mod problem;
pub mod qp;
pub mod selection;
pub mod shrinking;
pub mod state;

pub use self::chunking::ChunkingSolver;
pub use self::convergence::{CancelFlag, ConvergenceMonitor, ConvergenceStatus};
pub use self::mkl::{DirectPNormMkl, MklUpdate, MklWeightUpdater};
pub use self::model::ModelBuilder;
pub use self::problem::Problem;
pub use self::qp::{QpOutcome, QpProblem, QpSolution, QpSubproblemSolver};
pub use self::selection::WorkingSetSelector;
pub use self::shrinking::{KktReport, ShrinkMode, ShrinkingManager};
pub use self::state::{ExampleState, EPSILON_A};
