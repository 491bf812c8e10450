//! Service lifecycle and message routing.
//!
//! The [`Router`] composes the building blocks below:
//!
//! 1. **Ids** (`ids`): live-id set with atomic test-and-insert, per-worker id allocation
//! 2. **Selector** (`selector`): explicit or round-robin worker assignment
//! 3. **Registry** (`registry`): service type name -> factory
//! 4. **Directory** (`directory`): environment store and unique-service names
//! 5. **Commands** (`command`): control-plane command parsing for `runcmd`
//! 6. **Workers** (`worker`): thread-per-worker reference implementation

pub mod command;
pub mod config;
pub mod context;
pub mod directory;
pub mod error;
pub mod ids;
pub mod registry;
pub mod router;
pub mod selector;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types for convenient access.
pub use command::{Command, CommandError, Target};
pub use config::RouterConfig;
pub use context::{Service, ServiceContext};
pub use directory::{EnvStore, UniqueServiceDirectory};
pub use error::RouterError;
pub use ids::{IdAllocator, ServiceIdRegistry};
pub use registry::ServiceTypeRegistry;
pub use router::{NewService, Router, RouterStats};
pub use selector::WorkerSelector;
pub use worker::{LocalWorker, WorkerPool};
