//! Worker assignment for new services.
//!
//! Round-robin over a fixed pool, driven by one atomic counter. Workers that
//! were dedicated to a single service (`is_shared() == false`) are skipped
//! while any shared worker remains.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::traits::Worker;

/// Fixed, ordered worker pool with round-robin selection.
pub struct WorkerSelector {
    workers: Vec<Arc<dyn Worker>>,
    next: AtomicUsize,
}

impl WorkerSelector {
    #[must_use]
    pub fn new(workers: Vec<Arc<dyn Worker>>) -> Self {
        Self {
            workers,
            next: AtomicUsize::new(0),
        }
    }

    /// Number of workers in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Returns `true` if `worker` indexes into the pool.
    #[must_use]
    pub fn workerid_valid(&self, worker: usize) -> bool {
        worker < self.workers.len()
    }

    /// The worker at `index`, if [`workerid_valid`](Self::workerid_valid).
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Arc<dyn Worker>> {
        self.workerid_valid(index).then(|| &self.workers[index])
    }

    /// Picks the next worker in round-robin order.
    ///
    /// Scans at most one full cycle for a shared worker; when every worker is
    /// exclusive the plain round-robin pick is returned. `None` only for an
    /// empty pool.
    #[must_use]
    pub fn next_worker(&self) -> Option<(usize, &Arc<dyn Worker>)> {
        let count = self.workers.len();
        if count == 0 {
            return None;
        }

        let start = self.next.fetch_add(1, Ordering::Relaxed);
        let shared = (0..count)
            .map(|offset| start.wrapping_add(offset) % count)
            .find(|&index| self.workers[index].is_shared());

        let index = shared.unwrap_or(start % count);
        Some((index, &self.workers[index]))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
