//! Test doubles shared by the service module's unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use switchyard_core::{Message, ServiceId};

use super::context::{Service, ServiceContext};
use super::router::Router;
use crate::traits::{ConstructRequest, ConstructionError, Worker};

/// Worker that records every call instead of running services.
pub(crate) struct RecordingWorker {
    posted: Mutex<Vec<Message>>,
    constructed: Mutex<Vec<ServiceId>>,
    removed: Mutex<Vec<(ServiceId, bool)>>,
    shared: AtomicBool,
    router: Mutex<Weak<Router>>,
}

impl RecordingWorker {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            posted: Mutex::new(Vec::new()),
            constructed: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            shared: AtomicBool::new(true),
            router: Mutex::new(Weak::new()),
        })
    }

    /// Builds `count` workers, returned both concretely and as trait objects.
    pub(crate) fn pool(count: usize) -> (Vec<Arc<RecordingWorker>>, Vec<Arc<dyn Worker>>) {
        let concrete: Vec<_> = (0..count).map(|_| RecordingWorker::new()).collect();
        let dynamic = concrete
            .iter()
            .map(|w| Arc::clone(w) as Arc<dyn Worker>)
            .collect();
        (concrete, dynamic)
    }

    pub(crate) fn set_shared(&self, shared: bool) {
        self.shared.store(shared, Ordering::SeqCst);
    }

    pub(crate) fn posted(&self) -> Vec<Message> {
        self.posted.lock().clone()
    }

    pub(crate) fn take_posted(&self) -> Vec<Message> {
        std::mem::take(&mut *self.posted.lock())
    }

    pub(crate) fn constructed(&self) -> Vec<ServiceId> {
        self.constructed.lock().clone()
    }

    pub(crate) fn removed(&self) -> Vec<(ServiceId, bool)> {
        self.removed.lock().clone()
    }
}

impl Worker for RecordingWorker {
    fn attach(&self, router: Weak<Router>) {
        *self.router.lock() = router;
    }

    fn post(&self, msg: Message) {
        self.posted.lock().push(msg);
    }

    fn construct_service(&self, request: ConstructRequest) -> Result<(), ConstructionError> {
        let router = self.router.lock().clone();
        let ctx = ServiceContext::new(request.id, request.service_type.as_str(), router);
        let mut service = request.factory.create();
        service
            .init(&ctx, &request.config)
            .map_err(|source| ConstructionError::Init {
                id: request.id,
                source,
            })?;
        if !request.share_thread {
            self.shared.store(false, Ordering::SeqCst);
        }
        self.constructed.lock().push(request.id);
        Ok(())
    }

    fn remove_service(&self, id: ServiceId, crashed: bool) {
        self.removed.lock().push((id, crashed));
    }

    fn is_shared(&self) -> bool {
        self.shared.load(Ordering::SeqCst)
    }

    fn runtime_handle(&self) -> Option<tokio::runtime::Handle> {
        None
    }
}

/// Service that accepts everything and does nothing.
pub(crate) struct NoopService;

impl Service for NoopService {
    fn init(&mut self, _ctx: &ServiceContext, _config: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn handle(&mut self, _ctx: &ServiceContext, _msg: Message) {}
}

/// Service whose initialization always fails.
pub(crate) struct FailingService;

impl Service for FailingService {
    fn init(&mut self, _ctx: &ServiceContext, config: &str) -> anyhow::Result<()> {
        anyhow::bail!("refusing to start with config `{config}`")
    }

    fn handle(&mut self, _ctx: &ServiceContext, _msg: Message) {}
}

pub(crate) fn noop_factory() -> impl Fn() -> Box<dyn Service> + Send + Sync + 'static {
    || Box::new(NoopService) as Box<dyn Service>
}

pub(crate) fn failing_factory() -> impl Fn() -> Box<dyn Service> + Send + Sync + 'static {
    || Box::new(FailingService) as Box<dyn Service>
}
