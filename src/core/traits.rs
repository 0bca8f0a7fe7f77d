//! Collaborator traits consumed by the solver

use crate::core::{Result, SolverError};

/// Label container abstraction
///
/// The solver borrows labels for the duration of one training run and
/// never mutates them.
pub trait Labels: Sync {
    /// Number of labelled examples
    fn len(&self) -> usize;

    /// Label of example `i`, expected to be +1 or -1
    ///
    /// # Panics
    /// May panic if `i >= len()`
    fn label(&self, i: usize) -> f64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy labels out, checking that each one is ±1
    fn to_checked_vec(&self) -> Result<Vec<f64>> {
        (0..self.len())
            .map(|i| {
                let value = self.label(i);
                if value == 1.0 || value == -1.0 {
                    Ok(value)
                } else {
                    Err(SolverError::InvalidLabel { index: i, value })
                }
            })
            .collect()
    }
}

impl Labels for [f64] {
    fn len(&self) -> usize {
        <[f64]>::len(self)
    }

    fn label(&self, i: usize) -> f64 {
        self[i]
    }
}

impl Labels for Vec<f64> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn label(&self, i: usize) -> f64 {
        self[i]
    }
}
