//! Thread-per-worker execution contexts.
//!
//! Each [`LocalWorker`] owns one OS thread driving a current-thread tokio
//! runtime. A single unbounded FIFO queue feeds the thread, which is what
//! keeps delivery ordered between any pair of services. Services never move
//! between workers.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use switchyard_core::{Message, MessageType, ServiceId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::config::RouterConfig;
use super::context::{Service, ServiceContext};
use super::router::Router;
use crate::traits::{ConstructRequest, ConstructionError, Worker};

// ---------------------------------------------------------------------------
// WorkerTask
// ---------------------------------------------------------------------------

/// Work items processed by a worker thread, strictly in arrival order.
enum WorkerTask {
    /// Adopt an initialized service and call its `start`.
    Install {
        ctx: ServiceContext,
        service: Box<dyn Service>,
        exclusive: bool,
    },
    /// Deliver a message to one hosted service.
    Deliver(Message),
    /// Tear a hosted service down.
    Remove { id: ServiceId, crashed: bool },
}

// ---------------------------------------------------------------------------
// LocalWorker
// ---------------------------------------------------------------------------

/// Worker backed by a dedicated thread and a current-thread tokio runtime.
pub struct LocalWorker {
    index: usize,
    tx: mpsc::UnboundedSender<WorkerTask>,
    router: Arc<OnceLock<Weak<Router>>>,
    /// Live services created with `share_thread == false`.
    exclusive: Arc<AtomicUsize>,
    hosted: Arc<AtomicUsize>,
    runtime: tokio::runtime::Handle,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl LocalWorker {
    /// Starts the worker thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be built or the thread cannot
    /// be spawned.
    pub fn spawn(index: usize, thread_name: String) -> std::io::Result<Arc<Self>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();

        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let router = Arc::new(OnceLock::new());
        let exclusive = Arc::new(AtomicUsize::new(0));
        let hosted = Arc::new(AtomicUsize::new(0));

        let mut event_loop = WorkerLoop {
            index,
            services: HashMap::new(),
            router: Arc::clone(&router),
            exclusive: Arc::clone(&exclusive),
            hosted: Arc::clone(&hosted),
        };
        let thread = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || runtime.block_on(event_loop.run(rx, shutdown_rx)))?;

        debug!(worker = index, "worker started");
        Ok(Arc::new(Self {
            index,
            tx,
            router,
            exclusive,
            hosted,
            runtime: handle,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            thread: Mutex::new(Some(thread)),
        }))
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of services installed on this worker.
    #[must_use]
    pub fn service_count(&self) -> usize {
        self.hosted.load(Ordering::Acquire)
    }

    /// Stops the worker: every hosted service gets `exit`, then the thread
    /// ends. Waits for the thread unless called from the worker itself.
    pub fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        if thread.thread().id() == std::thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            error!(worker = self.index, "worker thread panicked");
        }
    }

    fn router(&self) -> Weak<Router> {
        self.router.get().cloned().unwrap_or_default()
    }
}

impl Worker for LocalWorker {
    fn attach(&self, router: Weak<Router>) {
        if self.router.set(router).is_err() {
            warn!(worker = self.index, "worker already attached to a router");
        }
    }

    fn post(&self, msg: Message) {
        if let Err(err) = self.tx.send(WorkerTask::Deliver(msg)) {
            if let WorkerTask::Deliver(msg) = err.0 {
                reject(self.index, self.router().upgrade().as_deref(), &msg);
            }
        }
    }

    fn construct_service(&self, request: ConstructRequest) -> Result<(), ConstructionError> {
        if self.tx.is_closed() {
            return Err(ConstructionError::WorkerStopped { worker: self.index });
        }

        let ConstructRequest {
            id,
            service_type,
            factory,
            config,
            share_thread,
        } = request;
        let ctx = ServiceContext::new(id, service_type, self.router());

        let built = catch_unwind(AssertUnwindSafe(|| {
            let mut service = factory.create();
            service.init(&ctx, &config).map(|()| service)
        }));
        let service = match built {
            Ok(Ok(service)) => service,
            Ok(Err(source)) => return Err(ConstructionError::Init { id, source }),
            Err(panic) => {
                return Err(ConstructionError::Init {
                    id,
                    source: anyhow::anyhow!(
                        "service panicked during init: {}",
                        panic_message(panic.as_ref())
                    ),
                })
            }
        };

        let exclusive = !share_thread;
        if exclusive {
            self.exclusive.fetch_add(1, Ordering::AcqRel);
        }
        let installed = self.tx.send(WorkerTask::Install {
            ctx,
            service,
            exclusive,
        });
        if installed.is_err() {
            if exclusive {
                self.exclusive.fetch_sub(1, Ordering::AcqRel);
            }
            return Err(ConstructionError::WorkerStopped { worker: self.index });
        }
        Ok(())
    }

    fn remove_service(&self, id: ServiceId, crashed: bool) {
        if self.tx.send(WorkerTask::Remove { id, crashed }).is_err() {
            debug!(worker = self.index, service_id = %id, "worker stopped, removal skipped");
        }
    }

    fn is_shared(&self) -> bool {
        self.exclusive.load(Ordering::Acquire) == 0
    }

    fn runtime_handle(&self) -> Option<tokio::runtime::Handle> {
        Some(self.runtime.clone())
    }
}

impl Drop for LocalWorker {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.get_mut().take() {
            let _ = tx.send(());
        }
    }
}

impl std::fmt::Debug for LocalWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWorker")
            .field("index", &self.index)
            .field("services", &self.service_count())
            .field("shared", &self.is_shared())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// WorkerLoop
// ---------------------------------------------------------------------------

struct Hosted {
    ctx: ServiceContext,
    service: Box<dyn Service>,
    exclusive: bool,
}

/// State owned by the worker thread.
struct WorkerLoop {
    index: usize,
    services: HashMap<ServiceId, Hosted>,
    router: Arc<OnceLock<Weak<Router>>>,
    exclusive: Arc<AtomicUsize>,
    hosted: Arc<AtomicUsize>,
}

impl WorkerLoop {
    async fn run(
        &mut self,
        mut rx: mpsc::UnboundedReceiver<WorkerTask>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown_rx => break,
                task = rx.recv() => match task {
                    Some(task) => self.process(task),
                    None => break,
                },
            }
        }
        // Tasks accepted before the queue closed still settle: installs are
        // torn down with the rest, requests get their failure replies.
        rx.close();
        while let Ok(task) = rx.try_recv() {
            match task {
                WorkerTask::Install {
                    ctx,
                    service,
                    exclusive,
                } => self.adopt(Hosted {
                    ctx,
                    service,
                    exclusive,
                }),
                WorkerTask::Deliver(msg) => self.undeliverable(&msg),
                WorkerTask::Remove { id, crashed } => self.remove(id, crashed),
            }
        }
        self.shutdown();
    }

    fn adopt(&mut self, hosted: Hosted) {
        self.services.insert(hosted.ctx.id(), hosted);
        self.hosted.store(self.services.len(), Ordering::Release);
    }

    /// Drops the bookkeeping of a service that left the worker.
    fn forget(&mut self, id: ServiceId) -> Option<Hosted> {
        let hosted = self.services.remove(&id)?;
        self.hosted.store(self.services.len(), Ordering::Release);
        if hosted.exclusive {
            self.exclusive.fetch_sub(1, Ordering::AcqRel);
        }
        Some(hosted)
    }

    fn router(&self) -> Option<Arc<Router>> {
        self.router.get().and_then(Weak::upgrade)
    }

    fn process(&mut self, task: WorkerTask) {
        match task {
            WorkerTask::Install {
                ctx,
                mut service,
                exclusive,
            } => {
                let id = ctx.id();
                let started = catch_unwind(AssertUnwindSafe(|| service.start(&ctx)));
                self.adopt(Hosted {
                    ctx,
                    service,
                    exclusive,
                });
                if let Err(panic) = started {
                    self.crash(id, "start", &panic_message(panic.as_ref()));
                }
            }
            WorkerTask::Deliver(msg) => self.deliver(msg),
            WorkerTask::Remove { id, crashed } => self.remove(id, crashed),
        }
    }

    fn deliver(&mut self, msg: Message) {
        let receiver = msg.receiver;
        let Some(hosted) = self.services.get_mut(&receiver) else {
            self.undeliverable(&msg);
            return;
        };
        let Hosted { ctx, service, .. } = hosted;
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| service.handle(ctx, msg))) {
            self.crash(receiver, "handle", &panic_message(panic.as_ref()));
        }
    }

    /// The receiver left between the router's check and delivery.
    fn undeliverable(&self, msg: &Message) {
        reject(self.index, self.router().as_deref(), msg);
    }

    /// Drops a panicked service without calling `exit` and reports it.
    fn crash(&mut self, id: ServiceId, stage: &str, reason: &str) {
        error!(worker = self.index, service_id = %id, stage, reason, "service panicked");
        self.forget(id);
        if let Some(router) = self.router() {
            router.remove_service(id, ServiceId::NONE, 0, true);
        }
    }

    fn remove(&mut self, id: ServiceId, crashed: bool) {
        if let Some(Hosted { ctx, mut service, .. }) = self.forget(id) {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| service.exit(&ctx))) {
                let reason = panic_message(panic.as_ref());
                error!(worker = self.index, service_id = %id, reason, "service panicked during exit");
            }
            debug!(worker = self.index, service_id = %id, crashed, "service torn down");
        }
        if let Some(router) = self.router() {
            router.on_service_remove(id);
        }
    }

    fn shutdown(&mut self) {
        let ids: Vec<ServiceId> = self.services.keys().copied().collect();
        for id in ids {
            self.remove(id, false);
        }
        debug!(worker = self.index, "worker stopped");
    }
}

/// Drops a message whose receiver is not hosted, answering requests with a
/// single `Error` reply. Broadcast copies and replies are dropped silently.
fn reject(worker: usize, router: Option<&Router>, msg: &Message) {
    metrics::counter!("switchyard_messages_dropped_total").increment(1);
    debug!(worker, receiver = %msg.receiver, header = %msg.header, "receiver gone, message dropped");

    if msg.broadcast || msg.sender.is_none() || msg.mtype.is_reply() || !msg.wants_response() {
        return;
    }
    if let Some(router) = router {
        router.make_response(
            msg.sender,
            "router.send",
            &format!("receiver {} not found", msg.receiver),
            msg.response_id,
            MessageType::Error,
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else {
        "unknown panic".to_owned()
    }
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

/// A fixed set of [`LocalWorker`]s, sized by [`RouterConfig`].
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<Arc<LocalWorker>>,
}

impl WorkerPool {
    /// Spawns `config.effective_worker_count()` workers.
    ///
    /// # Errors
    ///
    /// Returns an error if any worker thread cannot be started; workers
    /// already running are stopped again.
    pub fn spawn(config: &RouterConfig) -> std::io::Result<Self> {
        let count = config.effective_worker_count();
        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let name = format!("{}-{index}", config.thread_name_prefix);
            match LocalWorker::spawn(index, name) {
                Ok(worker) => workers.push(worker),
                Err(err) => {
                    Self { workers }.stop_all();
                    return Err(err);
                }
            }
        }
        info!(workers = count, "worker pool started");
        Ok(Self { workers })
    }

    /// The pool as router-facing trait objects, in index order.
    #[must_use]
    pub fn workers(&self) -> Vec<Arc<dyn Worker>> {
        self.workers
            .iter()
            .map(|worker| Arc::clone(worker) as Arc<dyn Worker>)
            .collect()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Arc<LocalWorker>> {
        self.workers.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Stops every worker and waits for their threads. Blocking.
    pub fn stop_all(&self) {
        for worker in &self.workers {
            worker.stop();
        }
        info!(workers = self.workers.len(), "worker pool stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
