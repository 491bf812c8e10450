use std::sync::{Arc, Weak};

use bytes::Bytes;
use switchyard_core::{Message, MessageType, ServiceId};

use super::router::Router;

// ---------------------------------------------------------------------------
// ServiceContext
// ---------------------------------------------------------------------------

/// Context handed to a service for every lifecycle call.
///
/// Carries the service's identity and a weak handle to the router, so a
/// service can send messages without keeping the router alive.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    id: ServiceId,
    service_type: Arc<str>,
    router: Weak<Router>,
}

impl ServiceContext {
    #[must_use]
    pub fn new(id: ServiceId, service_type: impl Into<Arc<str>>, router: Weak<Router>) -> Self {
        Self {
            id,
            service_type: service_type.into(),
            router,
        }
    }

    #[must_use]
    pub fn id(&self) -> ServiceId {
        self.id
    }

    /// Registered type name the service was created from.
    #[must_use]
    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    /// The router, unless it has already been dropped.
    #[must_use]
    pub fn router(&self) -> Option<Arc<Router>> {
        self.router.upgrade()
    }

    /// Sends a message from this service. Returns `false` if it was not
    /// handed to a worker.
    pub fn send(
        &self,
        receiver: ServiceId,
        header: &str,
        payload: impl Into<Bytes>,
        response_id: i32,
        mtype: MessageType,
    ) -> bool {
        self.router().is_some_and(|router| {
            router.send(self.id, receiver, payload.into(), header, response_id, mtype)
        })
    }

    /// Answers `request` with a `Response` correlated by its response id.
    pub fn respond(&self, request: &Message, header: &str, content: &str) -> bool {
        let reply = Message::new(MessageType::Response)
            .with_sender(self.id)
            .with_receiver(request.sender)
            .with_header(header)
            .with_payload(content.to_owned())
            .with_response_id(request.response_id);
        self.router()
            .is_some_and(|router| router.send_message(reply))
    }

    /// Asks the router to remove this service.
    pub fn exit(&self) {
        if let Some(router) = self.router() {
            router.remove_service(self.id, ServiceId::NONE, 0, false);
        }
    }
}

// ---------------------------------------------------------------------------
// Service trait
// ---------------------------------------------------------------------------

/// A lightweight actor hosted by a worker.
///
/// `init` runs once when the service is constructed; a failure aborts the
/// creation. All other calls happen on the owning worker, one at a time.
pub trait Service: Send {
    /// Initialize the service with its creation config.
    ///
    /// Runs on the thread that called [`Router::new_service`], not on the
    /// owning worker. A `tokio::spawn` issued here does not run on the
    /// worker's runtime; spawn worker-local tasks from [`Service::start`] or
    /// through [`Router::runtime_handle`].
    ///
    /// # Errors
    ///
    /// Returning an error fails the creation and releases the reserved id.
    fn init(&mut self, ctx: &ServiceContext, config: &str) -> anyhow::Result<()>;

    /// Called on the worker once the service is installed, before any message.
    fn start(&mut self, _ctx: &ServiceContext) {}

    /// Handle one delivered message.
    fn handle(&mut self, ctx: &ServiceContext, msg: Message);

    /// Called on the worker when the service is removed.
    fn exit(&mut self, _ctx: &ServiceContext) {}
}
