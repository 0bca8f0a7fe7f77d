//! Termination control for the outer loop
//!
//! The working KKT tolerance starts loose and is tightened towards the
//! target as the solver converges. A watchdog stops the run when the best
//! violation seen has not improved for a configured number of iterations.

use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative cancellation shared between the solver and its callers
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Decision taken after one outer iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    Continue,
    Converged,
    /// The working tolerance was relaxed after repeated unproductive subproblems
    Relax,
    /// Converged at the working tolerance, which was tightened; keep going without shrinking
    Refine,
    Stalled,
    Cancelled,
    TimedOut,
}

impl ConvergenceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConvergenceStatus::Converged
                | ConvergenceStatus::Stalled
                | ConvergenceStatus::Cancelled
                | ConvergenceStatus::TimedOut
        )
    }
}

#[derive(Debug, Clone)]
pub struct ConvergenceMonitor {
    target_epsilon: f64,
    working_epsilon: f64,
    best_violation: f64,
    best_iteration: usize,
    stall_iterations: usize,
    relax_pending: bool,
    started: Instant,
    time_limit: Option<Duration>,
    cancel: Option<CancelFlag>,
}

impl ConvergenceMonitor {
    /// # Arguments
    /// * `target_epsilon` - Final KKT tolerance
    /// * `initial_epsilon` - Starting working tolerance (raised to the target if smaller)
    /// * `stall_iterations` - Iterations without a new best violation before giving up
    pub fn new(target_epsilon: f64, initial_epsilon: f64, stall_iterations: usize) -> Self {
        Self {
            target_epsilon,
            working_epsilon: initial_epsilon.max(target_epsilon),
            best_violation: f64::INFINITY,
            best_iteration: 1,
            stall_iterations,
            relax_pending: false,
            started: Instant::now(),
            time_limit: None,
            cancel: None,
        }
    }

    pub fn with_time_limit(mut self, limit: Option<Duration>) -> Self {
        self.time_limit = limit;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: Option<CancelFlag>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn working_epsilon(&self) -> f64 {
        self.working_epsilon
    }

    pub fn target_epsilon(&self) -> f64 {
        self.target_epsilon
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Ask for the working tolerance to be relaxed at the next check
    pub fn request_relax(&mut self) {
        self.relax_pending = true;
    }

    /// Restart the stall watchdog from `violation`
    pub fn reset_watchdog(&mut self, violation: f64, iteration: usize) {
        self.best_violation = violation;
        self.best_iteration = iteration;
    }

    /// Cancellation or time limit, checked before an iteration starts
    pub fn interruption(&self) -> Option<ConvergenceStatus> {
        if self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled) {
            return Some(ConvergenceStatus::Cancelled);
        }
        match self.time_limit {
            Some(limit) if self.started.elapsed() > limit => Some(ConvergenceStatus::TimedOut),
            _ => None,
        }
    }

    /// Evaluate the maximum KKT violation of this iteration
    pub fn check(&mut self, max_violation: f64, iteration: usize) -> ConvergenceStatus {
        if let Some(status) = self.interruption() {
            return status;
        }

        if max_violation < self.best_violation {
            self.best_violation = max_violation;
            self.best_iteration = iteration;
        }
        if iteration > self.best_iteration + self.stall_iterations {
            self.working_epsilon = self.working_epsilon.max(max_violation);
            warn!(
                "relaxing KKT conditions due to slow progress at iteration {iteration} \
                 (best violation {:.6} at iteration {}), terminating",
                self.best_violation, self.best_iteration
            );
            return ConvergenceStatus::Stalled;
        }

        if self.relax_pending {
            self.relax_pending = false;
            self.working_epsilon *= 10.0;
            info!("relaxed KKT tolerance to {:.3e}", self.working_epsilon);
            return ConvergenceStatus::Relax;
        }

        if max_violation > self.working_epsilon {
            return ConvergenceStatus::Continue;
        }

        self.working_epsilon = self.working_epsilon.min(max_violation);
        if self.working_epsilon > self.target_epsilon {
            self.working_epsilon /= 4.0;
            self.working_epsilon = self.working_epsilon.max(self.target_epsilon);
            return ConvergenceStatus::Refine;
        }
        self.working_epsilon = self.working_epsilon.max(self.target_epsilon);
        ConvergenceStatus::Converged
    }
}
