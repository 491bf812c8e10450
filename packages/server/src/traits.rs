use std::sync::{Arc, Weak};

use switchyard_core::{Message, ServiceId};

use crate::service::{Router, Service};

/// Produces fresh service instances for one service type.
///
/// Registered with the router under a type name. Any
/// `Fn() -> Box<dyn Service>` closure is a factory.
pub trait ServiceFactory: Send + Sync {
    /// Build a new, uninitialized service.
    fn create(&self) -> Box<dyn Service>;
}

impl<F> ServiceFactory for F
where
    F: Fn() -> Box<dyn Service> + Send + Sync,
{
    fn create(&self) -> Box<dyn Service> {
        self()
    }
}

/// Everything a worker needs to construct and start one service.
pub struct ConstructRequest {
    /// Id already reserved for the service by the router.
    pub id: ServiceId,
    /// Registered type name the factory was found under.
    pub service_type: String,
    pub factory: Arc<dyn ServiceFactory>,
    /// Opaque configuration handed to `Service::init`.
    pub config: String,
    /// `false` asks the worker to dedicate itself to this service.
    pub share_thread: bool,
}

impl std::fmt::Debug for ConstructRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstructRequest")
            .field("id", &self.id)
            .field("service_type", &self.service_type)
            .field("config", &self.config)
            .field("share_thread", &self.share_thread)
            .finish_non_exhaustive()
    }
}

/// Worker-side failure while constructing a service.
#[derive(Debug, thiserror::Error)]
pub enum ConstructionError {
    #[error("service {id} failed to initialize: {source}")]
    Init {
        id: ServiceId,
        #[source]
        source: anyhow::Error,
    },
    #[error("worker {worker} is not running")]
    WorkerStopped { worker: usize },
}

/// An execution context hosting services, as seen by the router.
///
/// Implementations own their message queue. Every method must return
/// without waiting on the worker's own loop: the router calls these from
/// arbitrary threads, including other workers.
pub trait Worker: Send + Sync {
    /// Gives the worker a handle back to the router it serves.
    ///
    /// Called once, while the router is being built; the handle cannot be
    /// upgraded until construction finishes.
    fn attach(&self, _router: Weak<Router>) {}

    /// Enqueue a message for asynchronous delivery to one of this worker's services.
    fn post(&self, msg: Message);

    /// Construct, initialize and schedule the start of a service.
    ///
    /// # Errors
    ///
    /// Returns an error if the service fails to initialize or the worker
    /// is no longer running. The router rolls back the reserved id.
    fn construct_service(&self, request: ConstructRequest) -> Result<(), ConstructionError>;

    /// Tear a service down. Unknown ids are ignored.
    fn remove_service(&self, id: ServiceId, crashed: bool);

    /// Whether round-robin assignment may place new services here.
    fn is_shared(&self) -> bool {
        true
    }

    /// Handle to the async runtime driving this worker, when it has one.
    fn runtime_handle(&self) -> Option<tokio::runtime::Handle>;
}
