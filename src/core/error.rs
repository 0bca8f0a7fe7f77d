//! Error types for the chunking solver

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Kernel unavailable: {0}")]
    KernelUnavailable(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid label at index {index}: expected -1 or +1, got {value}")]
    InvalidLabel { index: usize, value: f64 },

    #[error("Inconsistent labels: {0}")]
    InconsistentLabels(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Empty dataset")]
    EmptyDataset,

    #[error("QP subproblem did not converge: {0}")]
    QpNonConvergence(String),

    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    #[error("MKL weight update failed: {0}")]
    Mkl(String),

    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl From<serde_json::Error> for SolverError {
    fn from(err: serde_json::Error) -> Self {
        SolverError::ParseError(err.to_string())
    }
}

impl From<rayon::ThreadPoolBuildError> for SolverError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        SolverError::ThreadPool(err.to_string())
    }
}

impl SolverError {
    /// Whether the solver recovers from this error internally instead of
    /// surfacing it to the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SolverError::QpNonConvergence(_) | SolverError::NumericalInstability(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SolverError>;
