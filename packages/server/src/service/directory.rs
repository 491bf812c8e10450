//! Process-wide directories: the environment store and unique-service names.
//!
//! Each directory has its own sharded locking (`DashMap`) and shares no lock
//! with the id registry, so directory traffic never serializes routing.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use switchyard_core::ServiceId;

// ---------------------------------------------------------------------------
// EnvStore
// ---------------------------------------------------------------------------

/// Shared string configuration, last write wins.
///
/// Values are handed out as `Arc<str>` snapshots: a reader keeps the value it
/// got even if the key is overwritten afterwards.
#[derive(Debug, Default)]
pub struct EnvStore {
    entries: DashMap<String, Arc<str>>,
}

impl EnvStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of `name` at call time, or `None` if never set.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<str>> {
        self.entries.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Replaces the value of `name`.
    pub fn set(&self, name: &str, value: &str) {
        self.entries.insert(name.to_owned(), Arc::from(value));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted copy of every entry.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().to_string()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// UniqueServiceDirectory
// ---------------------------------------------------------------------------

/// Logical name -> service id, at most one id per name.
#[derive(Debug, Default)]
pub struct UniqueServiceDirectory {
    bindings: DashMap<String, ServiceId>,
}

impl UniqueServiceDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Id bound to `name`, or `ServiceId::NONE`.
    #[must_use]
    pub fn get(&self, name: &str) -> ServiceId {
        self.bindings
            .get(name)
            .map_or(ServiceId::NONE, |entry| *entry.value())
    }

    /// Binds `name` to `id`, replacing any previous binding. Binding to
    /// `ServiceId::NONE` removes the name.
    pub fn set(&self, name: &str, id: ServiceId) {
        if id.is_none() {
            self.bindings.remove(name);
        } else {
            self.bindings.insert(name.to_owned(), id);
        }
    }

    /// Binds `name` to `id` only if the name is free. Returns whether the
    /// binding was made.
    pub fn try_bind(&self, name: &str, id: ServiceId) -> bool {
        if id.is_none() {
            return false;
        }
        match self.bindings.entry(name.to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(id);
                true
            }
        }
    }

    /// Drops every binding that points at `id`. Returns how many were dropped.
    pub fn unbind_service(&self, id: ServiceId) -> usize {
        let mut dropped = 0;
        self.bindings.retain(|_, bound| {
            let keep = *bound != id;
            if !keep {
                dropped += 1;
            }
            keep
        });
        dropped
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Sorted copy of every binding.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, ServiceId> {
        self.bindings
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
