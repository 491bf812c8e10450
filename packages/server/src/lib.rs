//! Switchyard Server: the service router of an actor-style runtime.
//!
//! A fixed pool of workers hosts many lightweight services. The [`Router`]
//! is the one object every worker shares: it creates and removes services,
//! keeps the environment and unique-service directories, and routes
//! point-to-point and broadcast messages to whichever worker owns the
//! receiver.

pub mod logging;
pub mod service;
pub mod shutdown;
pub mod traits;

pub use service::{
    LocalWorker, NewService, Router, RouterConfig, RouterError, RouterStats, Service,
    ServiceContext, WorkerPool,
};
pub use shutdown::{ShutdownController, ShutdownState};
pub use traits::{ConstructRequest, ConstructionError, ServiceFactory, Worker};
