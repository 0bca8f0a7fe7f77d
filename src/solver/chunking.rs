//! Chunking decomposition solver
//!
//! Each outer iteration selects a working set, fetches its kernel rows
//! through the cache, solves the restricted dual with the interior point
//! method, applies the alpha changes to the gradient in parallel, and then
//! checks the KKT conditions over the active set. Shrinking, reactivation,
//! the tolerance schedule and the optional MKL weight update are driven
//! from here.

use crate::cache::KernelCache;
use crate::core::{
    Diagnostics, IterationReport, Labels, Result, SolverConfig, SolverError, Termination,
    TrainingResult,
};
use crate::kernel::{Kernel, KernelProperty, KernelView};
use crate::parallel::ParallelKernelEvaluator;
use crate::solver::convergence::{CancelFlag, ConvergenceMonitor, ConvergenceStatus};
use crate::solver::mkl::{MklState, MklWeightUpdater};
use crate::solver::model::ModelBuilder;
use crate::solver::problem::Problem;
use crate::solver::qp::{QpOutcome, QpProblem, QpSubproblemSolver};
use crate::solver::selection::WorkingSetSelector;
use crate::solver::shrinking::{ShrinkMode, ShrinkingManager};
use crate::solver::state::ExampleState;
use log::{debug, info, warn};
use std::sync::Arc;

/// Shrinking is attempted every this many iterations
const SHRINK_INTERVAL: usize = 10;

/// Decomposition solver for the SVM dual
///
/// The solver borrows an optional MKL updater and observer for its lifetime
/// `'a`; the kernel and labels are borrowed per call.
pub struct ChunkingSolver<'a> {
    config: SolverConfig,
    mkl: Option<&'a mut dyn MklWeightUpdater>,
    cancel: Option<CancelFlag>,
    observer: Option<Box<dyn FnMut(&IterationReport) + 'a>>,
}

impl<'a> ChunkingSolver<'a> {
    /// Create a solver, rejecting out-of-range parameters
    pub fn new(config: SolverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            mkl: None,
            cancel: None,
            observer: None,
        })
    }

    /// Learn the sub-kernel weights of a `LinearCombination` kernel with `updater`
    pub fn with_mkl(mut self, updater: &'a mut dyn MklWeightUpdater) -> Self {
        self.mkl = Some(updater);
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Call `observer` after every outer iteration
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: FnMut(&IterationReport) + 'a,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Train on `kernel` and `labels` with default per-example data
    pub fn solve<K, L>(&mut self, kernel: &K, labels: &L) -> Result<TrainingResult>
    where
        K: Kernel + ?Sized,
        L: Labels + ?Sized,
    {
        self.solve_problem(&Problem::new(kernel, labels))
    }

    /// Train on a fully specified problem
    pub fn solve_problem<K, L>(&mut self, problem: &Problem<'_, K, L>) -> Result<TrainingResult>
    where
        K: Kernel + ?Sized,
        L: Labels + ?Sized,
    {
        let config = self.config.clone();
        let kernel = problem.kernel();
        let mut state = problem.build_state(&config)?;
        let n = state.len();

        if self.mkl.is_some() && !kernel.has_property(KernelProperty::LinearCombination) {
            return Err(SolverError::Mkl(
                "weight learning needs a kernel with the LinearCombination property".to_string(),
            ));
        }
        let mut mkl_state = match self.mkl {
            Some(_) => Some(MklState::new(kernel)?),
            None => None,
        };
        let mut view = match &mkl_state {
            Some(mkl) => KernelView::weighted(kernel, mkl.weights().to_vec()),
            None => KernelView::plain(kernel),
        };

        let cache = KernelCache::new(n, config.cache_size);
        let evaluator = ParallelKernelEvaluator::new(config.num_threads, &cache)?;
        info!(
            "training on {} examples: C={}, qp_size={}, epsilon={}, {} threads, {} cached rows",
            n,
            config.c,
            config.qp_size,
            config.epsilon,
            evaluator.num_threads(),
            cache.capacity_rows()
        );

        if problem.has_initial_alpha() {
            let sources = weighted_alphas(&state);
            if !sources.is_empty() {
                let all: Vec<usize> = (0..n).collect();
                state.gradient = evaluator.weighted_sums(&view, &sources, &all);
                if let Some(mkl) = mkl_state.as_mut() {
                    mkl.accumulate(&evaluator, kernel, &sources);
                }
                debug!("warm start with {} nonzero alphas", sources.len());
            }
        }

        let mode = if kernel.has_property(KernelProperty::Linear) {
            ShrinkMode::Running
        } else {
            ShrinkMode::History
        };
        let shrinking_enabled = config.shrinking && mkl_state.is_none();
        let mut shrinking =
            ShrinkingManager::new(&state, mode, config.shrinking_threshold, config.shrink_history);
        let mut selector = WorkingSetSelector::new(
            n,
            config.qp_size,
            config.new_vars(),
            config.random_selection_period,
        );
        let mut qp_solver = QpSubproblemSolver::new();
        let mut monitor = ConvergenceMonitor::new(
            config.epsilon,
            config.initial_epsilon.unwrap_or(config.epsilon),
            config.stall_iterations,
        )
        .with_time_limit(config.max_train_time()?)
        .with_cancel_flag(self.cancel.clone());
        let mut model = ModelBuilder::new(&state, config.bias);

        let mut objective = state.objective();
        let mut threshold = model.threshold();
        let mut max_violation = f64::INFINITY;
        let mut iteration = 0;
        let mut termination = Termination::MaxIterations;

        while iteration < config.max_iterations {
            if let Some(status) = monitor.interruption() {
                termination = interrupted(status);
                break;
            }
            iteration += 1;
            cache.set_time(iteration as u64);
            let mut noshrink = false;

            let working = selector
                .select(
                    &state,
                    shrinking.active_indices(),
                    shrinking.active_mask(),
                    iteration,
                    &cache,
                )
                .to_vec();
            let rows = evaluator.fetch_rows(&view, &working);
            let qp = QpProblem::assemble(&working, &rows, &state, config.bias);
            let solution = qp_solver.solve(&qp, monitor.working_epsilon());
            if solution.reduce_qp_size {
                let size = selector.reduce_qp_size();
                debug!("subproblem size reduced to {size}");
            }
            if solution.relax_tolerance {
                monitor.request_relax();
            }
            if solution.outcome == QpOutcome::Reset {
                debug!("iteration {iteration}: subproblem reset to previous alphas");
            }

            let mut row_changes: Vec<(Arc<[f64]>, f64)> = Vec::with_capacity(working.len());
            let mut index_changes = Vec::with_capacity(working.len());
            for ((&i, row), &new_alpha) in working.iter().zip(&rows).zip(&solution.alpha) {
                let delta = new_alpha - state.alpha[i];
                if delta != 0.0 {
                    let coef = delta * state.labels[i];
                    row_changes.push((row.clone(), coef));
                    index_changes.push((i, coef));
                }
                state.alpha[i] = new_alpha;
            }
            objective += solution.objective_delta();
            evaluator.update_gradient(&row_changes, shrinking.active_indices(), &mut state.gradient);

            if let (Some(mkl), Some(updater)) = (mkl_state.as_mut(), self.mkl.as_mut()) {
                mkl.accumulate(&evaluator, kernel, &index_changes);
                let contributions = mkl.contributions(&state);
                let update =
                    updater.update_weights(&contributions, state.alpha_sum(), mkl.weights())?;
                if mkl.apply(update)? {
                    mkl.write_gradient(&mut state.gradient);
                    view.set_weights(mkl.weights().to_vec());
                    cache.invalidate();
                    objective = state.objective();
                    debug!("iteration {iteration}: kernel weights {:?}", mkl.weights());
                }
            }

            threshold = model.update(
                &state,
                &working,
                &qp.start,
                shrinking.active_indices(),
                solution.threshold,
            );

            let report = shrinking.check_optimality(
                &state,
                threshold,
                iteration,
                monitor.working_epsilon(),
                monitor.target_epsilon(),
            );
            max_violation = report.max_violation;

            if mkl_state.is_none()
                && max_violation <= monitor.working_epsilon()
                && shrinking.has_inactive()
            {
                max_violation = shrinking.reactivate(&evaluator, &view, &mut state, threshold);
                monitor.reset_watchdog(max_violation, iteration);
                noshrink = true;
                debug!(
                    "iteration {iteration}: reactivation check, max violation {max_violation:.6e}"
                );
            }

            let status = monitor.check(max_violation, iteration);
            debug!(
                "iteration {iteration}: {} in working set, {} active, objective {objective:.8e}, \
                 max violation {max_violation:.6e}, {status:?}",
                working.len(),
                shrinking.num_active()
            );
            if let Some(observer) = self.observer.as_mut() {
                observer(&IterationReport {
                    iteration,
                    objective,
                    max_violation,
                    working_set_size: working.len(),
                    active: shrinking.num_active(),
                    epsilon: monitor.working_epsilon(),
                });
            }

            match status {
                ConvergenceStatus::Continue => {}
                ConvergenceStatus::Relax | ConvergenceStatus::Refine => noshrink = true,
                ConvergenceStatus::Converged => {
                    if mkl_state.as_ref().map_or(true, MklState::is_converged) {
                        termination = Termination::Converged;
                        break;
                    }
                }
                ConvergenceStatus::Stalled => {
                    termination = Termination::Stalled;
                    break;
                }
                ConvergenceStatus::Cancelled | ConvergenceStatus::TimedOut => {
                    termination = interrupted(status);
                    break;
                }
            }

            if shrinking_enabled && !noshrink && iteration % SHRINK_INTERVAL == 0 {
                if shrinking.needs_compaction() {
                    shrinking.reactivate(&evaluator, &view, &mut state, threshold);
                }
                let min_batch = (shrinking.num_active() / 10)
                    .max(n / 500)
                    .max(config.shrink_batch_floor);
                shrinking.shrink(&state, iteration, min_batch);
            }
        }

        match termination {
            Termination::MaxIterations => warn!(
                "stopped after {iteration} iterations with max violation {max_violation:.6e}"
            ),
            Termination::Cancelled => warn!("training cancelled at iteration {iteration}"),
            Termination::TimedOut => warn!("training time limit reached at iteration {iteration}"),
            Termination::Converged | Termination::Stalled => {}
        }

        if shrinking.has_inactive() {
            shrinking.reactivate(&evaluator, &view, &mut state, threshold);
        }
        let (final_violation, misclassified) = kkt_summary(&state, threshold);
        let objective = state.objective();
        let cache_stats = cache.stats();
        let diagnostics = Diagnostics {
            objective,
            iterations: iteration,
            n_support_vectors: model.n_support_vectors(),
            n_at_upper_bound: model.n_at_upper_bound(),
            max_violation: final_violation,
            epsilon: monitor.working_epsilon(),
            termination,
            misclassified,
            cache: cache_stats,
            qp_degraded: qp_solver.degraded_count(),
            qp_resets: qp_solver.reset_count(),
            mkl_weights: mkl_state.as_ref().map(|mkl| mkl.weights().to_vec()),
            elapsed_secs: monitor.elapsed().as_secs_f64(),
        };
        info!(
            "finished after {} iterations ({:?}): objective {:.8e}, {} support vectors \
             ({} at upper bound), max violation {:.6e}, cache hit rate {:.1}%",
            diagnostics.iterations,
            diagnostics.termination,
            diagnostics.objective,
            diagnostics.n_support_vectors,
            diagnostics.n_at_upper_bound,
            diagnostics.max_violation,
            100.0 * cache_stats.hit_rate()
        );

        Ok(TrainingResult {
            model: model.finish(&state),
            alpha: state.alpha,
            gradient: state.gradient,
            diagnostics,
        })
    }
}

fn interrupted(status: ConvergenceStatus) -> Termination {
    match status {
        ConvergenceStatus::TimedOut => Termination::TimedOut,
        _ => Termination::Cancelled,
    }
}

/// `(i, alpha_i * y_i)` for every nonzero alpha
fn weighted_alphas(state: &ExampleState) -> Vec<(usize, f64)> {
    (0..state.len())
        .filter(|&i| state.alpha[i] != 0.0)
        .map(|i| (i, state.alpha[i] * state.labels[i]))
        .collect()
}

/// Maximum KKT violation and misclassification count over all consistent examples
fn kkt_summary(state: &ExampleState, threshold: f64) -> (f64, usize) {
    (0..state.len())
        .filter(|&i| !state.inconsistent[i])
        .fold((0.0f64, 0), |(worst, wrong), i| {
            let wrong = if state.margin(i, threshold) <= 0.0 {
                wrong + 1
            } else {
                wrong
            };
            (worst.max(state.violation(i, threshold)), wrong)
        })
}
