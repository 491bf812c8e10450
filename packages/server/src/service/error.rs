use switchyard_core::ServiceId;

use crate::traits::ConstructionError;

/// Errors from router lifecycle operations.
///
/// `Router::new_service` collapses all of these into `ServiceId::NONE`;
/// `Router::try_new_service` returns them as-is.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("unknown service type: {service_type}")]
    UnknownServiceType { service_type: String },
    #[error("unique service name `{name}` is already bound to {existing}")]
    DuplicateUniqueService { name: String, existing: ServiceId },
    #[error("no free service id on worker {worker} after {attempts} attempts")]
    IdExhausted { worker: usize, attempts: u32 },
    #[error("invalid worker {worker}: pool has {count} workers")]
    InvalidWorker { worker: usize, count: usize },
    #[error("failed to construct service of type {service_type}")]
    ConstructionFailed {
        service_type: String,
        #[source]
        source: ConstructionError,
    },
    #[error("worker pool of {count} is outside 1..={max}")]
    WorkerPool { count: usize, max: usize },
}
