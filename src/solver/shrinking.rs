//! Shrinking heuristic
//!
//! Examples that have sat at a bound and on the optimal side of the margin
//! for many iterations are unlikely to become support vectors. They are
//! removed from the active set so that selection and gradient updates skip
//! them. Their gradients go stale while inactive and are brought up to date
//! when they are reactivated.
//!
//! Two bookkeeping modes exist. For general kernels a bounded history of
//! alpha snapshots is kept, one per shrink event, and each inactive example
//! is repaired from the snapshot taken when it was shrunk. For linear
//! kernels the alphas and gradients at the last reactivation are kept and
//! every inactive example is repaired from that single reference point.

use crate::kernel::{Kernel, KernelView};
use crate::parallel::ParallelKernelEvaluator;
use crate::solver::state::ExampleState;
use log::debug;

/// How stale gradients are repaired on reactivation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShrinkMode {
    History,
    Running,
}

#[derive(Debug, Clone)]
enum Snapshots {
    History {
        alphas: Vec<Vec<f64>>,
        capacity: usize,
    },
    Running {
        last_alpha: Vec<f64>,
        last_gradient: Vec<f64>,
    },
}

/// Result of a KKT check over the active set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KktReport {
    pub max_violation: f64,
    pub misclassified: usize,
}

/// Tracks the active set and the data needed to undo shrinking
#[derive(Debug, Clone)]
pub struct ShrinkingManager {
    active: Vec<bool>,
    active_indices: Vec<usize>,
    /// Snapshot index at which an inactive example was shrunk
    inactive_since: Vec<usize>,
    last_suboptimal_at: Vec<usize>,
    epsilon_shrink: f64,
    last_max_violation: f64,
    iterations_to_shrink: usize,
    snapshots: Snapshots,
    shrink_events: usize,
}

impl ShrinkingManager {
    /// # Arguments
    /// * `state` - Example state at the start of training (alphas and gradients current)
    /// * `mode` - Snapshot bookkeeping mode
    /// * `iterations_to_shrink` - Iterations an example must stay settled before it is shrunk
    /// * `history_capacity` - Maximum number of alpha snapshots in history mode
    pub fn new(
        state: &ExampleState,
        mode: ShrinkMode,
        iterations_to_shrink: usize,
        history_capacity: usize,
    ) -> Self {
        let n = state.len();
        let snapshots = match mode {
            ShrinkMode::History => Snapshots::History {
                alphas: Vec::new(),
                capacity: history_capacity.max(1),
            },
            ShrinkMode::Running => Snapshots::Running {
                last_alpha: state.alpha.clone(),
                last_gradient: state.gradient.clone(),
            },
        };
        Self {
            active: vec![true; n],
            active_indices: (0..n).collect(),
            inactive_since: vec![0; n],
            last_suboptimal_at: vec![1; n],
            epsilon_shrink: 2.0,
            last_max_violation: 1.0,
            iterations_to_shrink,
            snapshots,
            shrink_events: 0,
        }
    }

    pub fn mode(&self) -> ShrinkMode {
        match self.snapshots {
            Snapshots::History { .. } => ShrinkMode::History,
            Snapshots::Running { .. } => ShrinkMode::Running,
        }
    }

    pub fn is_active(&self, i: usize) -> bool {
        self.active[i]
    }

    pub fn active_mask(&self) -> &[bool] {
        &self.active
    }

    pub fn active_indices(&self) -> &[usize] {
        &self.active_indices
    }

    pub fn num_active(&self) -> usize {
        self.active_indices.len()
    }

    pub fn num_inactive(&self) -> usize {
        self.active.len() - self.active_indices.len()
    }

    pub fn has_inactive(&self) -> bool {
        self.num_inactive() > 0
    }

    pub fn shrink_events(&self) -> usize {
        self.shrink_events
    }

    /// History mode has used up its snapshot budget
    pub fn needs_compaction(&self) -> bool {
        match &self.snapshots {
            Snapshots::History { alphas, capacity } => alphas.len() >= *capacity,
            Snapshots::Running { .. } => false,
        }
    }

    /// Check the KKT conditions over the active set and record which
    /// examples are still suboptimal
    ///
    /// `working_epsilon` and `target_epsilon` are the current and the final
    /// KKT tolerance; they set the shrink slack in running mode.
    pub fn check_optimality(
        &mut self,
        state: &ExampleState,
        threshold: f64,
        iteration: usize,
        working_epsilon: f64,
        target_epsilon: f64,
    ) -> KktReport {
        self.epsilon_shrink = match self.snapshots {
            Snapshots::Running { .. } => target_epsilon - working_epsilon,
            Snapshots::History { .. } => {
                0.7 * self.epsilon_shrink + 0.3 * self.last_max_violation
            }
        };

        let mut report = KktReport {
            max_violation: 0.0,
            misclassified: 0,
        };
        for &i in &self.active_indices {
            if state.inconsistent[i] {
                continue;
            }
            if state.margin(i, threshold) <= 0.0 {
                report.misclassified += 1;
            }
            report.max_violation = report.max_violation.max(state.violation(i, threshold));
            if !state.settled_at_bound(i, threshold, self.epsilon_shrink) {
                self.last_suboptimal_at[i] = iteration;
            }
        }
        self.last_max_violation = report.max_violation;
        report
    }

    /// Deactivate examples that have been settled for long enough
    ///
    /// Nothing happens unless at least `min_batch` examples qualify or the
    /// history has no room left. Returns the number of examples shrunk.
    pub fn shrink(&mut self, state: &ExampleState, iteration: usize, min_batch: usize) -> usize {
        let candidates: Vec<usize> = self
            .active_indices
            .iter()
            .copied()
            .filter(|&i| {
                iteration.saturating_sub(self.last_suboptimal_at[i]) > self.iterations_to_shrink
                    || state.inconsistent[i]
            })
            .collect();
        if candidates.len() < min_batch.max(1) || self.needs_compaction() {
            return 0;
        }

        let since = match &mut self.snapshots {
            Snapshots::History { alphas, .. } => {
                alphas.push(state.alpha.clone());
                alphas.len() - 1
            }
            Snapshots::Running { .. } => 0,
        };
        for &i in &candidates {
            self.active[i] = false;
            self.inactive_since[i] = since;
        }
        self.rebuild_index();
        self.shrink_events += 1;
        debug!(
            "shrunk {} examples, {} remain active",
            candidates.len(),
            self.active_indices.len()
        );
        candidates.len()
    }

    /// Bring the gradients of inactive examples up to date and reactivate
    /// those that are no longer settled at a bound
    ///
    /// Examples are never deactivated here. The history is compacted to a
    /// single snapshot of the current alphas. Returns the maximum KKT
    /// violation over all consistent examples.
    pub fn reactivate<K>(
        &mut self,
        evaluator: &ParallelKernelEvaluator<'_>,
        view: &KernelView<'_, K>,
        state: &mut ExampleState,
        threshold: f64,
    ) -> f64
    where
        K: Kernel + ?Sized,
    {
        let n = state.len();
        match &mut self.snapshots {
            Snapshots::History { alphas, .. } => {
                for (t, snapshot) in alphas.iter().enumerate().rev() {
                    let targets: Vec<usize> = (0..n)
                        .filter(|&i| !self.active[i] && self.inactive_since[i] == t)
                        .collect();
                    if targets.is_empty() {
                        continue;
                    }
                    let sources = changes_since(state, snapshot);
                    let sums = evaluator.weighted_sums(view, &sources, &targets);
                    for (&j, delta) in targets.iter().zip(sums) {
                        state.gradient[j] += delta;
                    }
                }
                alphas.clear();
                alphas.push(state.alpha.clone());
            }
            Snapshots::Running {
                last_alpha,
                last_gradient,
            } => {
                let targets: Vec<usize> = (0..n).filter(|&i| !self.active[i]).collect();
                let sources = changes_since(state, last_alpha);
                let sums = evaluator.weighted_sums(view, &sources, &targets);
                for (&j, delta) in targets.iter().zip(sums) {
                    state.gradient[j] = last_gradient[j] + delta;
                }
                last_gradient.copy_from_slice(&state.gradient);
                last_alpha.copy_from_slice(&state.alpha);
            }
        }

        let mut max_violation: f64 = 0.0;
        for i in 0..n {
            self.inactive_since[i] = 0;
            if state.inconsistent[i] {
                continue;
            }
            max_violation = max_violation.max(state.violation(i, threshold));
            if !state.settled_at_bound(i, threshold, self.epsilon_shrink) {
                self.active[i] = true;
            }
        }
        self.last_max_violation = max_violation;
        let before = self.active_indices.len();
        self.rebuild_index();
        debug!(
            "reactivated {} examples, {} still inactive",
            self.active_indices.len() - before,
            self.num_inactive()
        );
        max_violation
    }

    fn rebuild_index(&mut self) {
        self.active_indices = (0..self.active.len()).filter(|&i| self.active[i]).collect();
    }
}

/// `(i, (alpha_i - old_i) * y_i)` for every example whose alpha moved
fn changes_since(state: &ExampleState, old: &[f64]) -> Vec<(usize, f64)> {
    (0..state.len())
        .filter(|&i| state.alpha[i] != old[i])
        .map(|i| (i, (state.alpha[i] - old[i]) * state.labels[i]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::KernelCache;
    use crate::kernel::{GaussianKernel, LinearKernel};
    use approx::assert_relative_eq;

    fn points() -> Vec<Vec<f64>> {
        vec![
            vec![0.0, 0.0],
            vec![1.0, 0.5],
            vec![2.0, 2.0],
            vec![-1.0, 1.0],
            vec![0.5, -2.0],
            vec![3.0, 1.0],
        ]
    }

    /// State whose gradient is exact for `alpha` under `kernel`
    fn consistent_state<K: Kernel>(kernel: &K, alpha: Vec<f64>) -> ExampleState {
        let n = kernel.num_vectors();
        let labels: Vec<f64> = (0..n).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let gradient = (0..n)
            .map(|i| (0..n).map(|j| alpha[j] * labels[j] * kernel.compute(i, j)).sum())
            .collect();
        ExampleState {
            labels,
            cost: vec![1.0; n],
            linear_term: vec![-1.0; n],
            alpha,
            gradient,
            inconsistent: vec![false; n],
        }
    }

    fn exact_gradient<K: Kernel>(kernel: &K, state: &ExampleState, i: usize) -> f64 {
        (0..state.len())
            .map(|j| state.alpha[j] * state.labels[j] * kernel.compute(i, j))
            .sum()
    }

    /// Apply an alpha change to the gradients of active examples only
    fn move_alpha<K: Kernel>(
        kernel: &K,
        state: &mut ExampleState,
        manager: &ShrinkingManager,
        i: usize,
        value: f64,
    ) {
        let coef = (value - state.alpha[i]) * state.labels[i];
        state.alpha[i] = value;
        for &j in manager.active_indices() {
            state.gradient[j] += coef * kernel.compute(i, j);
        }
    }

    #[test]
    fn test_check_optimality_tracks_suboptimal() {
        let kernel = LinearKernel::new(points()).unwrap();
        let state = consistent_state(&kernel, vec![0.0; 6]);
        let mut manager = ShrinkingManager::new(&state, ShrinkMode::History, 100, 8);

        let report = manager.check_optimality(&state, 0.0, 7, 1e-3, 1e-3);
        // every margin is 0 < 1 at the lower bound
        assert_relative_eq!(report.max_violation, 1.0);
        assert_eq!(report.misclassified, 6);
        assert!(manager.last_suboptimal_at.iter().all(|&t| t == 7));
    }

    #[test]
    fn test_shrink_requires_batch_and_age() {
        let kernel = LinearKernel::new(points()).unwrap();
        let state = consistent_state(&kernel, vec![0.0; 6]);
        let mut manager = ShrinkingManager::new(&state, ShrinkMode::History, 5, 8);

        assert_eq!(manager.shrink(&state, 3, 1), 0);
        assert_eq!(manager.shrink(&state, 10, 7), 0);
        assert_eq!(manager.shrink(&state, 10, 2), 6);
        assert!(manager.has_inactive());
        assert_eq!(manager.num_active(), 0);
        assert_eq!(manager.shrink_events(), 1);
    }

    #[test]
    fn test_inconsistent_examples_always_shrinkable() {
        let kernel = LinearKernel::new(points()).unwrap();
        let mut state = consistent_state(&kernel, vec![0.0; 6]);
        state.inconsistent[2] = true;
        let mut manager = ShrinkingManager::new(&state, ShrinkMode::History, 100, 8);

        assert_eq!(manager.shrink(&state, 2, 1), 1);
        assert!(!manager.is_active(2));
    }

    fn check_reactivation_repairs_gradients(mode: ShrinkMode) {
        let kernel = GaussianKernel::new(points(), 0.5).unwrap();
        let mut state = consistent_state(&kernel, vec![0.2, 0.2, 0.0, 0.0, 0.0, 0.0]);
        let mut manager = ShrinkingManager::new(&state, mode, 0, 8);
        let cache = KernelCache::with_rows(6, 2);
        let evaluator = ParallelKernelEvaluator::new(2, &cache).unwrap();
        let view = KernelView::plain(&kernel);

        // shrink 2..6 in two separate events
        manager.last_suboptimal_at = vec![100, 100, 100, 100, 1, 1];
        assert_eq!(manager.shrink(&state, 10, 1), 2);
        move_alpha(&kernel, &mut state, &manager, 0, 0.5);
        manager.last_suboptimal_at = vec![100, 100, 1, 1, 100, 100];
        assert_eq!(manager.shrink(&state, 10, 1), 2);
        move_alpha(&kernel, &mut state, &manager, 1, 0.7);
        move_alpha(&kernel, &mut state, &manager, 0, 0.6);

        manager.reactivate(&evaluator, &view, &mut state, 0.0);
        for i in 0..6 {
            assert_relative_eq!(
                state.gradient[i],
                exact_gradient(&kernel, &state, i),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn test_history_reactivation_repairs_gradients() {
        check_reactivation_repairs_gradients(ShrinkMode::History);
    }

    #[test]
    fn test_running_reactivation_repairs_gradients() {
        check_reactivation_repairs_gradients(ShrinkMode::Running);
    }

    #[test]
    fn test_reactivation_compacts_history() {
        let kernel = LinearKernel::new(points()).unwrap();
        let state = consistent_state(&kernel, vec![0.0; 6]);
        let mut state = state;
        let mut manager = ShrinkingManager::new(&state, ShrinkMode::History, 0, 2);
        let cache = KernelCache::with_rows(6, 0);
        let evaluator = ParallelKernelEvaluator::new(1, &cache).unwrap();
        let view = KernelView::plain(&kernel);

        manager.last_suboptimal_at = vec![100, 100, 100, 100, 1, 1];
        manager.shrink(&state, 10, 1);
        manager.last_suboptimal_at = vec![100, 100, 1, 1, 100, 100];
        manager.shrink(&state, 10, 1);
        assert!(manager.needs_compaction());
        assert_eq!(manager.shrink(&state, 10, 1), 0);

        manager.reactivate(&evaluator, &view, &mut state, 0.0);
        assert!(!manager.needs_compaction());
        // everything violates at alpha = 0, so all examples come back
        assert!(!manager.has_inactive());
    }

    #[test]
    fn test_settled_examples_stay_inactive() {
        let kernel = LinearKernel::new(points()).unwrap();
        let mut state = consistent_state(&kernel, vec![0.0; 6]);
        let mut manager = ShrinkingManager::new(&state, ShrinkMode::Running, 0, 8);
        let cache = KernelCache::with_rows(6, 0);
        let evaluator = ParallelKernelEvaluator::new(1, &cache).unwrap();
        let view = KernelView::plain(&kernel);

        manager.last_suboptimal_at = vec![100, 100, 100, 100, 100, 1];
        assert_eq!(manager.shrink(&state, 10, 1), 1);
        // example 5 (label -1) far on the optimal side of the margin
        let max_violation = manager.reactivate(&evaluator, &view, &mut state, 5.0);
        assert!(!manager.is_active(5));
        assert!(max_violation > 0.0);
    }

    #[test]
    fn test_shrunk_examples_satisfy_kkt_when_deactivated() {
        let kernel = LinearKernel::new(points()).unwrap();
        // all alphas at zero: positives sit far above the margin, negatives violate
        for (mode, threshold) in [(ShrinkMode::Running, -3.0), (ShrinkMode::History, -10.0)] {
            let state = consistent_state(&kernel, vec![0.0; 6]);
            let mut manager = ShrinkingManager::new(&state, mode, 2, 8);
            assert_eq!(manager.mode(), mode);

            for iteration in 1..=5 {
                manager.check_optimality(&state, threshold, iteration, 0.1, 0.001);
            }
            assert_eq!(manager.shrink(&state, 5, 1), 3);

            for i in 0..6 {
                if manager.is_active(i) {
                    assert!(state.violation(i, threshold) > 0.0);
                } else {
                    assert!(state.settled_at_bound(i, threshold, manager.epsilon_shrink));
                    assert!(state.violation(i, threshold) <= (-manager.epsilon_shrink).max(0.0));
                }
            }
            assert_eq!(manager.active_indices(), &[1, 3, 5]);
        }
    }
}
