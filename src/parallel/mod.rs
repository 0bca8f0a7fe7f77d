//! Parallel kernel evaluation
//!
//! Runs the data-parallel phases of the solver on a fixed rayon pool:
//! filling kernel rows for a working set, applying alpha changes to the
//! gradient, recomputing gradients of reactivated examples, and accumulating
//! per-sub-kernel columns for MKL. Every phase writes disjoint output slots
//! and returns only after all workers have joined.

use crate::cache::KernelCache;
use crate::core::Result;
use crate::kernel::{Kernel, KernelView};
use log::debug;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;

/// Kernel evaluator backed by a fixed-size worker pool and a shared row cache
pub struct ParallelKernelEvaluator<'c> {
    pool: ThreadPool,
    cache: &'c KernelCache,
}

impl<'c> ParallelKernelEvaluator<'c> {
    /// # Arguments
    /// * `num_threads` - Pool size, 0 for the available hardware parallelism
    /// * `cache` - Row cache shared by all workers
    pub fn new(num_threads: usize, cache: &'c KernelCache) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("chunksvm-kernel-{i}"))
            .build()?;
        debug!(
            "kernel evaluator pool started with {} threads",
            pool.current_num_threads()
        );
        Ok(Self { pool, cache })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn cache(&self) -> &'c KernelCache {
        self.cache
    }

    /// Kernel rows for `indices`, filled through the cache in parallel
    pub fn fetch_rows<K>(&self, view: &KernelView<'_, K>, indices: &[usize]) -> Vec<Arc<[f64]>>
    where
        K: Kernel + ?Sized,
    {
        let cache = self.cache;
        self.pool.install(|| {
            indices
                .par_iter()
                .map(|&i| cache.get_row(i, || view.full_row(i)))
                .collect()
        })
    }

    /// `gradient[j] += Σ coef * row[j]` for every target j
    ///
    /// `changes` pairs a full kernel row K(i, ·) with the coefficient
    /// Δalpha_i · y_i.
    pub fn update_gradient(
        &self,
        changes: &[(Arc<[f64]>, f64)],
        targets: &[usize],
        gradient: &mut [f64],
    ) {
        if changes.is_empty() || targets.is_empty() {
            return;
        }
        let deltas: Vec<f64> = self.pool.install(|| {
            targets
                .par_iter()
                .map(|&j| changes.iter().map(|(row, coef)| coef * row[j]).sum())
                .collect()
        });
        for (&j, delta) in targets.iter().zip(deltas) {
            gradient[j] += delta;
        }
    }

    /// `Σ_s coef_s K(s, t)` for every target t
    ///
    /// Rows already resident in the cache are reused; everything else is
    /// evaluated directly without polluting the cache.
    pub fn weighted_sums<K>(
        &self,
        view: &KernelView<'_, K>,
        sources: &[(usize, f64)],
        targets: &[usize],
    ) -> Vec<f64>
    where
        K: Kernel + ?Sized,
    {
        if sources.is_empty() {
            return vec![0.0; targets.len()];
        }
        let cached: Vec<Option<Arc<[f64]>>> =
            sources.iter().map(|&(s, _)| self.cache.peek(s)).collect();
        self.pool.install(|| {
            targets
                .par_iter()
                .map(|&t| {
                    sources
                        .iter()
                        .zip(&cached)
                        .map(|(&(s, coef), row)| match row {
                            Some(row) => coef * row[t],
                            None => coef * view.compute(s, t),
                        })
                        .sum()
                })
                .collect()
        })
    }

    /// `columns[d][j] += Σ_i coef_i K_d(i, j)`, one task per sub-kernel
    pub fn accumulate_subkernels<K>(
        &self,
        kernel: &K,
        changes: &[(usize, f64)],
        columns: &mut [Vec<f64>],
    ) where
        K: Kernel + ?Sized,
    {
        if changes.is_empty() {
            return;
        }
        self.pool.install(|| {
            columns.par_iter_mut().enumerate().for_each(|(d, column)| {
                for (j, value) in column.iter_mut().enumerate() {
                    *value += changes
                        .iter()
                        .map(|&(i, coef)| coef * kernel.compute_subkernel(d, i, j))
                        .sum::<f64>();
                }
            })
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{CombinedKernel, GaussianKernel, LinearKernel};
    use approx::assert_relative_eq;

    fn kernel() -> LinearKernel {
        LinearKernel::new(vec![
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 1.0],
            vec![2.0, -1.0],
        ])
        .unwrap()
    }

    #[test]
    fn test_fetch_rows_fills_cache() {
        let kernel = kernel();
        let view = KernelView::plain(&kernel);
        let cache = KernelCache::with_rows(4, 4);
        let evaluator = ParallelKernelEvaluator::new(2, &cache).unwrap();

        let rows = evaluator.fetch_rows(&view, &[2, 0]);
        assert_eq!(&rows[0][..], &[1.0, 1.0, 2.0, 1.0]);
        assert_eq!(&rows[1][..], &[1.0, 0.0, 1.0, 2.0]);
        assert!(cache.contains(0));
        assert!(cache.contains(2));
        assert_eq!(evaluator.cache().stats().misses, 2);
        assert_eq!(evaluator.num_threads(), 2);
    }

    #[test]
    fn test_update_gradient_matches_direct_sum() {
        let kernel = kernel();
        let view = KernelView::plain(&kernel);
        let cache = KernelCache::with_rows(4, 1);
        let evaluator = ParallelKernelEvaluator::new(3, &cache).unwrap();

        let rows = evaluator.fetch_rows(&view, &[0, 3]);
        let changes = vec![(rows[0].clone(), 0.5), (rows[1].clone(), -1.0)];
        let mut gradient = vec![10.0; 4];
        evaluator.update_gradient(&changes, &[1, 2, 3], &mut gradient);

        assert_eq!(gradient[0], 10.0);
        for j in 1..4 {
            let expected = 10.0 + 0.5 * kernel.compute(0, j) - kernel.compute(3, j);
            assert_relative_eq!(gradient[j], expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_weighted_sums_mixes_cached_and_direct() {
        let kernel = GaussianKernel::new(
            vec![vec![0.0], vec![0.5], vec![1.0], vec![3.0]],
            0.7,
        )
        .unwrap();
        let view = KernelView::plain(&kernel);
        let cache = KernelCache::with_rows(4, 4);
        let evaluator = ParallelKernelEvaluator::new(2, &cache).unwrap();
        evaluator.fetch_rows(&view, &[1]);

        let sources = vec![(1, 2.0), (3, -0.5)];
        let sums = evaluator.weighted_sums(&view, &sources, &[0, 2]);
        for (k, &t) in [0usize, 2].iter().enumerate() {
            let expected = 2.0 * kernel.compute(1, t) - 0.5 * kernel.compute(3, t);
            assert_relative_eq!(sums[k], expected, epsilon = 1e-12);
        }
        // direct evaluations are not stored
        assert!(!cache.contains(3));
    }

    #[test]
    fn test_accumulate_subkernels() {
        let points = vec![vec![1.0], vec![2.0], vec![-1.0]];
        let combined = CombinedKernel::new(vec![
            Box::new(LinearKernel::new(points.clone()).unwrap()),
            Box::new(GaussianKernel::new(points, 1.0).unwrap()),
        ])
        .unwrap();
        let cache = KernelCache::with_rows(3, 0);
        let evaluator = ParallelKernelEvaluator::new(2, &cache).unwrap();

        let mut columns = vec![vec![0.0; 3]; 2];
        evaluator.accumulate_subkernels(&combined, &[(0, 1.0), (2, -2.0)], &mut columns);
        for d in 0..2 {
            for j in 0..3 {
                let expected = combined.compute_subkernel(d, 0, j)
                    - 2.0 * combined.compute_subkernel(d, 2, j);
                assert_relative_eq!(columns[d][j], expected, epsilon = 1e-12);
            }
        }
    }
}
