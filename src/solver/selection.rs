//! Working-set selection
//!
//! Picks the variables optimized by the next QP subproblem using the
//! feasible-direction (steepest violation) rule, with a pseudo-random
//! selection every few iterations to escape cycles caused by numerical
//! degeneracy in the subproblem solver.

use crate::cache::KernelCache;
use crate::solver::state::{ExampleState, EPSILON_A};

/// Chooses and tracks the working set across outer iterations
#[derive(Debug, Clone)]
pub struct WorkingSetSelector {
    qp_size: usize,
    new_vars: usize,
    random_period: usize,
    /// How many consecutive iterations each example has been in the working set
    chosen: Vec<usize>,
    working: Vec<usize>,
}

impl WorkingSetSelector {
    /// # Arguments
    /// * `n` - Number of examples
    /// * `qp_size` - Maximum size of the QP subproblem
    /// * `new_vars` - Maximum number of variables entering per iteration
    /// * `random_period` - Every `random_period`-th iteration selects pseudo-randomly
    pub fn new(n: usize, qp_size: usize, new_vars: usize, random_period: usize) -> Self {
        let qp_size = qp_size.max(2);
        Self {
            qp_size,
            new_vars: if (2..=qp_size).contains(&new_vars) {
                new_vars
            } else {
                qp_size
            },
            random_period: random_period.max(1),
            chosen: vec![0; n],
            working: Vec::with_capacity(qp_size),
        }
    }

    pub fn qp_size(&self) -> usize {
        self.qp_size
    }

    pub fn working_set(&self) -> &[usize] {
        &self.working
    }

    /// Reduce the subproblem size by one (not below 2)
    pub fn reduce_qp_size(&mut self) -> usize {
        if self.qp_size > 2 {
            self.qp_size -= 1;
            self.new_vars = self.new_vars.min(self.qp_size);
        }
        self.qp_size
    }

    /// Select the working set for `iteration`
    ///
    /// Variables kept from the previous iteration are evicted once they have
    /// been chosen `qp_size / new_vars` times in a row. Newly selected rows
    /// are touched in `cache` so they survive until the subproblem is built.
    pub fn select(
        &mut self,
        state: &ExampleState,
        active: &[usize],
        is_active: &[bool],
        iteration: usize,
        cache: &KernelCache,
    ) -> &[usize] {
        let limit = self.qp_size / self.qp_size.min(self.new_vars);
        let chosen = &mut self.chosen;
        self.working.retain(|&j| {
            if chosen[j] >= limit || state.inconsistent[j] || !is_active[j] {
                chosen[j] = 0;
                false
            } else {
                chosen[j] += 1;
                true
            }
        });
        while self.working.len() > self.qp_size {
            if let Some(j) = self.working.pop() {
                self.chosen[j] = 0;
            }
        }

        let kept = self.working.len();
        if iteration % self.random_period != 0 {
            let mut from_cache = 0;
            let budget = self.new_vars.min(self.qp_size - self.working.len());
            if budget >= 4 && cache.capacity_rows() > 0 {
                from_cache = self.select_by_gradient(state, active, budget / 2, Some(cache));
            }
            let budget = (self.qp_size - self.working.len())
                .min(self.new_vars.saturating_sub(from_cache));
            self.select_by_gradient(state, active, budget, None);
        } else {
            let budget = self.new_vars.min(self.qp_size - self.working.len());
            self.select_pseudo_random(state, active, budget, iteration);
        }

        for &j in &self.working[kept..] {
            cache.touch(j);
        }
        &self.working
    }

    /// Steepest feasible direction: up to half the budget for variables
    /// moving against their label, the remainder for variables moving with it.
    fn select_by_gradient(
        &mut self,
        state: &ExampleState,
        active: &[usize],
        budget: usize,
        cache_only: Option<&KernelCache>,
    ) -> usize {
        let half = budget / 2;
        let mut added = 0;
        for direction in [-1.0, 1.0] {
            let limit = if direction < 0.0 { half } else { budget };
            let candidates: Vec<(f64, usize)> = active
                .iter()
                .copied()
                .filter(|&j| cache_only.map_or(true, |cache| cache.contains(j)))
                .filter(|&j| self.is_candidate(state, j, direction * state.labels[j]))
                .map(|j| {
                    let y = state.labels[j];
                    let score = y * state.linear_term[j] + state.gradient[j];
                    (-direction * score, j)
                })
                .collect();
            added += self.take_top(candidates, limit - added);
        }
        added
    }

    /// Same feasibility gate as the greedy rule, ordered by
    /// `(j + iteration) mod n` instead of the gradient.
    fn select_pseudo_random(
        &mut self,
        state: &ExampleState,
        active: &[usize],
        budget: usize,
        iteration: usize,
    ) -> usize {
        let n = state.len().max(1);
        let half = budget / 2;
        let mut added = 0;
        for direction in [-1.0, 1.0] {
            let limit = if direction < 0.0 { half } else { budget };
            let candidates: Vec<(f64, usize)> = active
                .iter()
                .copied()
                .filter(|&j| self.is_candidate(state, j, direction * state.labels[j]))
                .map(|j| (((j + iteration) % n) as f64, j))
                .collect();
            added += self.take_top(candidates, limit - added);
        }
        added
    }

    /// `step` is the sign of the change of alpha_j along the search direction
    fn is_candidate(&self, state: &ExampleState, j: usize, step: f64) -> bool {
        let a = state.alpha[j];
        self.chosen[j] == 0
            && !state.inconsistent[j]
            && !(a <= EPSILON_A && step < 0.0)
            && !(a >= state.cost[j] - EPSILON_A && step > 0.0)
    }

    /// Add up to `take` of the highest-scoring candidates. Ties go to the
    /// lower index.
    fn take_top(&mut self, mut candidates: Vec<(f64, usize)>, take: usize) -> usize {
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        let mut added = 0;
        for (_, j) in candidates.into_iter().take(take) {
            self.chosen[j] = 1;
            self.working.push(j);
            added += 1;
        }
        added
    }
}
