//! Kernel row cache
//!
//! Caches full kernel rows K(i, ·) so that repeated working-set selections of
//! the same example do not re-evaluate the kernel. Eviction is approximate
//! LRU: every row carries the outer-iteration timestamp of its last use, and
//! the row with the oldest timestamp goes first.
//!
//! The cache is shared by the worker threads of the kernel evaluator. At most
//! one thread fills a given row; other threads asking for the same row wait
//! on a condition variable until the fill is published. Rows are handed out
//! as `Arc<[f64]>`, so a caller keeps a valid row even if it is evicted later.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
enum Slot {
    Empty,
    Filling,
    Ready { row: Arc<[f64]>, last_used: u64 },
}

#[derive(Debug)]
struct CacheState {
    slots: Vec<Slot>,
    /// Indices whose slot is `Ready`
    resident: Vec<usize>,
    /// `Ready` plus `Filling` slots
    occupied: usize,
    time: u64,
    generation: u64,
    hits: u64,
    misses: u64,
    invalidations: u64,
}

/// Bounded cache of kernel rows with single-writer fills
#[derive(Debug)]
pub struct KernelCache {
    num_vectors: usize,
    capacity: usize,
    state: Mutex<CacheState>,
    filled: Condvar,
}

impl KernelCache {
    /// Create a cache holding at most `max_elements` kernel values
    ///
    /// # Arguments
    /// * `num_vectors` - Length of one kernel row
    /// * `max_elements` - Element budget; the row capacity is `max_elements / num_vectors`
    pub fn new(num_vectors: usize, max_elements: usize) -> Self {
        let rows = max_elements.checked_div(num_vectors).unwrap_or(0);
        Self::with_rows(num_vectors, rows)
    }

    /// Create a cache holding at most `rows` kernel rows
    pub fn with_rows(num_vectors: usize, rows: usize) -> Self {
        let capacity = rows.min(num_vectors);
        Self {
            num_vectors,
            capacity,
            state: Mutex::new(CacheState {
                slots: vec![Slot::Empty; num_vectors],
                resident: Vec::with_capacity(capacity),
                occupied: 0,
                time: 0,
                generation: 0,
                hits: 0,
                misses: 0,
                invalidations: 0,
            }),
            filled: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn num_vectors(&self) -> usize {
        self.num_vectors
    }

    /// Maximum number of resident rows
    pub fn capacity_rows(&self) -> usize {
        self.capacity
    }

    /// Advance the eviction clock (called once per outer iteration)
    pub fn set_time(&self, time: u64) {
        self.lock().time = time;
    }

    /// Get row `i`, computing it with `fill` on a miss
    ///
    /// If another thread is already filling row `i`, this blocks until that
    /// fill completes and returns the published row.
    pub fn get_row<F>(&self, i: usize, fill: F) -> Arc<[f64]>
    where
        F: FnOnce() -> Vec<f64>,
    {
        let mut state = self.lock();
        loop {
            let now = state.time;
            let in_flight = match &mut state.slots[i] {
                Slot::Ready { row, last_used } => {
                    *last_used = now;
                    let row = Arc::clone(row);
                    state.hits += 1;
                    return row;
                }
                Slot::Filling => true,
                Slot::Empty => false,
            };
            if !in_flight {
                break;
            }
            state = self
                .filled
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        state.misses += 1;
        if self.capacity == 0 || (state.occupied >= self.capacity && !Self::evict_lru(&mut state)) {
            drop(state);
            return Arc::from(fill());
        }

        state.slots[i] = Slot::Filling;
        state.occupied += 1;
        let generation = state.generation;
        drop(state);

        let mut guard = FillGuard {
            cache: self,
            index: i,
            armed: true,
        };
        let row: Arc<[f64]> = Arc::from(fill());
        guard.armed = false;

        let mut state = self.lock();
        if state.generation == generation {
            let last_used = state.time;
            state.slots[i] = Slot::Ready {
                row: Arc::clone(&row),
                last_used,
            };
            state.resident.push(i);
        } else {
            // invalidated while filling; the row may be stale
            state.slots[i] = Slot::Empty;
            state.occupied -= 1;
        }
        drop(state);
        self.filled.notify_all();
        row
    }

    /// Cached row `i` without touching statistics or timestamps
    pub fn peek(&self, i: usize) -> Option<Arc<[f64]>> {
        match &self.lock().slots[i] {
            Slot::Ready { row, .. } => Some(Arc::clone(row)),
            _ => None,
        }
    }

    /// Whether row `i` is resident
    pub fn contains(&self, i: usize) -> bool {
        matches!(self.lock().slots[i], Slot::Ready { .. })
    }

    /// Mark row `i` as used in the current iteration
    pub fn touch(&self, i: usize) {
        let mut state = self.lock();
        let now = state.time;
        if let Slot::Ready { last_used, .. } = &mut state.slots[i] {
            *last_used = now;
        }
    }

    /// Drop every resident row
    ///
    /// Fills that are in flight complete for their callers but are not stored.
    pub fn invalidate(&self) {
        let mut state = self.lock();
        let resident = std::mem::take(&mut state.resident);
        for i in resident {
            state.slots[i] = Slot::Empty;
        }
        state.occupied = state
            .slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Filling))
            .count();
        state.generation += 1;
        state.invalidations += 1;
        drop(state);
        self.filled.notify_all();
    }

    /// Number of resident rows
    pub fn len(&self) -> usize {
        self.lock().resident.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hit_rate(&self) -> f64 {
        self.stats().hit_rate()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            capacity: self.capacity,
            size: state.resident.len(),
            invalidations: state.invalidations,
        }
    }

    /// Evict the least recently used resident row. Returns false if every
    /// occupied slot is still being filled.
    fn evict_lru(state: &mut CacheState) -> bool {
        let victim = state
            .resident
            .iter()
            .enumerate()
            .filter_map(|(pos, &i)| match state.slots[i] {
                Slot::Ready { last_used, .. } => Some((pos, i, last_used)),
                _ => None,
            })
            .min_by_key(|&(_, i, last_used)| (last_used, i));

        match victim {
            Some((pos, i, _)) => {
                state.resident.swap_remove(pos);
                state.slots[i] = Slot::Empty;
                state.occupied -= 1;
                true
            }
            None => false,
        }
    }
}

/// Releases a `Filling` slot if the fill function unwinds
struct FillGuard<'a> {
    cache: &'a KernelCache,
    index: usize,
    armed: bool,
}

impl Drop for FillGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.cache.lock();
            if matches!(state.slots[self.index], Slot::Filling) {
                state.slots[self.index] = Slot::Empty;
                state.occupied -= 1;
            }
            drop(state);
            self.cache.filled.notify_all();
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Capacity in rows
    pub capacity: usize,
    /// Resident rows
    pub size: usize,
    pub invalidations: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
