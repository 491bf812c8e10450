use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::traits::ServiceFactory;

// ---------------------------------------------------------------------------
// ServiceTypeRegistry
// ---------------------------------------------------------------------------

/// Registry of service factories keyed by type name.
///
/// Registration is first-come: a second registration under the same name is
/// rejected and the first factory stays in place. Lookups hand out a
/// shared handle, so the registry lock is released before the factory runs.
#[derive(Default)]
pub struct ServiceTypeRegistry {
    factories: DashMap<String, Arc<dyn ServiceFactory>>,
}

impl ServiceTypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `service_type`.
    ///
    /// Returns `false`, leaving the registry unchanged, if the name is taken.
    pub fn register(&self, service_type: &str, factory: Arc<dyn ServiceFactory>) -> bool {
        match self.factories.entry(service_type.to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(factory);
                true
            }
        }
    }

    /// Retrieve the factory registered under `service_type`.
    #[must_use]
    pub fn get(&self, service_type: &str) -> Option<Arc<dyn ServiceFactory>> {
        self.factories
            .get(service_type)
            .map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn contains(&self, service_type: &str) -> bool {
        self.factories.contains_key(service_type)
    }

    /// Registered type names in sorted order.
    #[must_use]
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
