//! Live service-id tracking and id allocation.
//!
//! The registry is the single source of truth for "is this id routable".
//! It is guarded by one reader/writer lock that is never held across a
//! call into a worker.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use switchyard_core::ServiceId;

// ---------------------------------------------------------------------------
// ServiceIdRegistry
// ---------------------------------------------------------------------------

/// Thread-safe set of live service ids.
#[derive(Debug, Default)]
pub struct ServiceIdRegistry {
    ids: RwLock<HashSet<ServiceId>>,
}

impl ServiceIdRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `id` iff it is not live yet. Returns whether it was inserted.
    ///
    /// `ServiceId::NONE` is never accepted.
    pub fn try_add(&self, id: ServiceId) -> bool {
        if id.is_none() {
            return false;
        }
        self.ids.write().insert(id)
    }

    /// Point-in-time membership check; the answer may be stale immediately.
    #[must_use]
    pub fn has(&self, id: ServiceId) -> bool {
        self.ids.read().contains(&id)
    }

    /// Removes `id`. Removing an absent id is a no-op; the return value only
    /// reports whether something was removed.
    pub fn remove(&self, id: ServiceId) -> bool {
        self.ids.write().remove(&id)
    }

    /// Number of live ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.read().is_empty()
    }

    /// Copies the live ids out of the lock, for iteration that must not
    /// race with concurrent creations and removals.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ServiceId> {
        self.ids.read().iter().copied().collect()
    }
}

// ---------------------------------------------------------------------------
// IdAllocator
// ---------------------------------------------------------------------------

/// Hands out candidate ids from per-worker sequence counters.
///
/// Sequences wrap inside `1..=ServiceId::MAX_SEQUENCE`, so ids are reused
/// only after a worker has issued that many. Candidates are not reserved:
/// the caller confirms each one with [`ServiceIdRegistry::try_add`].
#[derive(Debug)]
pub struct IdAllocator {
    counters: Vec<AtomicU32>,
}

impl IdAllocator {
    /// Creates counters for `worker_count` workers.
    #[must_use]
    pub fn new(worker_count: usize) -> Self {
        Self {
            counters: (0..worker_count).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    /// Next candidate id owned by `worker_index`, or `None` for an index
    /// outside the pool.
    #[must_use]
    pub fn allocate(&self, worker_index: usize) -> Option<ServiceId> {
        let counter = self.counters.get(worker_index)?;
        let sequence = counter.fetch_add(1, Ordering::Relaxed) % ServiceId::MAX_SEQUENCE + 1;
        ServiceId::new(worker_index, sequence)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
