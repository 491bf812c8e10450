//! The router: service lifecycle, directories and message routing.
//!
//! Every worker shares one `Arc<Router>`. Each internal map has its own
//! lock, no operation holds two of them at once, and no lock is held while
//! calling into a worker.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use serde::Serialize;
use switchyard_core::{Message, MessageType, ServiceId};
use tracing::{debug, info, warn};

use super::command::{self, Command, Target};
use super::config::RouterConfig;
use super::directory::{EnvStore, UniqueServiceDirectory};
use super::error::RouterError;
use super::ids::{IdAllocator, ServiceIdRegistry};
use super::registry::ServiceTypeRegistry;
use super::selector::WorkerSelector;
use crate::traits::{ConstructRequest, ServiceFactory, Worker};

const SERVICES_CREATED: &str = "switchyard_services_created_total";
const SERVICES_REMOVED: &str = "switchyard_services_removed_total";
const SERVICES_LIVE: &str = "switchyard_services_live";
const MESSAGES_SENT: &str = "switchyard_messages_sent_total";
const MESSAGES_DROPPED: &str = "switchyard_messages_dropped_total";

// ---------------------------------------------------------------------------
// NewService
// ---------------------------------------------------------------------------

/// Parameters of a service creation.
#[derive(Debug, Clone)]
pub struct NewService {
    /// Registered type to instantiate.
    pub service_type: String,
    /// Bind the new id in the unique-service directory.
    pub unique: bool,
    /// Name to bind under when `unique`; defaults to the type name.
    pub alias: Option<String>,
    /// `false` dedicates the chosen worker to this service.
    pub share_thread: bool,
    /// Explicit worker index; round-robin when `None`.
    pub worker: Option<usize>,
    /// Opaque configuration passed to `Service::init`.
    pub config: String,
}

impl NewService {
    #[must_use]
    pub fn new(service_type: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            unique: false,
            alias: None,
            share_thread: true,
            worker: None,
            config: String::new(),
        }
    }

    /// Register the service under its type name.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Register the service under `alias` instead of its type name.
    #[must_use]
    pub fn unique_as(mut self, alias: impl Into<String>) -> Self {
        self.unique = true;
        self.alias = Some(alias.into());
        self
    }

    /// Keep the chosen worker for this service alone.
    #[must_use]
    pub fn exclusive(mut self) -> Self {
        self.share_thread = false;
        self
    }

    #[must_use]
    pub fn on_worker(mut self, worker: usize) -> Self {
        self.worker = Some(worker);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: impl Into<String>) -> Self {
        self.config = config.into();
        self
    }

    /// Name used in the unique-service directory.
    #[must_use]
    pub fn unique_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.service_type)
    }
}

// ---------------------------------------------------------------------------
// RouterStats
// ---------------------------------------------------------------------------

/// Point-in-time counters, served by the `router.stats` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub services: usize,
    pub workers: usize,
    pub service_types: Vec<String>,
    pub unique_services: BTreeMap<String, ServiceId>,
    pub env_entries: usize,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

struct StopHook(Box<dyn Fn() + Send + Sync>);

/// Central directory and message router shared by all workers.
pub struct Router {
    config: RouterConfig,
    workers: WorkerSelector,
    ids: ServiceIdRegistry,
    allocator: IdAllocator,
    types: ServiceTypeRegistry,
    env: EnvStore,
    unique: UniqueServiceDirectory,
    stop: ArcSwapOption<StopHook>,
}

impl Router {
    /// Builds a router over a fixed worker pool and attaches every worker to it.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::WorkerPool` if the pool is empty or larger than
    /// `ServiceId::MAX_WORKERS`.
    pub fn new(workers: Vec<Arc<dyn Worker>>, config: RouterConfig) -> Result<Arc<Self>, RouterError> {
        let count = workers.len();
        if count == 0 || count > ServiceId::MAX_WORKERS {
            return Err(RouterError::WorkerPool {
                count,
                max: ServiceId::MAX_WORKERS,
            });
        }

        let router = Arc::new_cyclic(|weak| {
            for worker in &workers {
                worker.attach(weak.clone());
            }
            Self {
                config,
                workers: WorkerSelector::new(workers),
                ids: ServiceIdRegistry::new(),
                allocator: IdAllocator::new(count),
                types: ServiceTypeRegistry::new(),
                env: EnvStore::new(),
                unique: UniqueServiceDirectory::new(),
                stop: ArcSwapOption::empty(),
            }
        });
        info!(workers = count, "router started");
        Ok(router)
    }

    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Number of live services.
    #[must_use]
    pub fn servicenum(&self) -> usize {
        self.ids.len()
    }

    /// Size of the worker pool.
    #[must_use]
    pub fn workernum(&self) -> usize {
        self.workers.len()
    }

    /// The worker at `index`.
    #[must_use]
    pub fn worker(&self, index: usize) -> Option<&Arc<dyn Worker>> {
        self.workers.get(index)
    }

    /// Whether `id` is currently routable.
    #[must_use]
    pub fn has_service(&self, id: ServiceId) -> bool {
        self.ids.has(id)
    }

    /// Runtime of the worker owning a live service (for direct scheduling).
    #[must_use]
    pub fn runtime_handle(&self, id: ServiceId) -> Option<tokio::runtime::Handle> {
        if !self.ids.has(id) {
            return None;
        }
        self.owning_worker(id)?.runtime_handle()
    }

    fn owning_worker(&self, id: ServiceId) -> Option<&Arc<dyn Worker>> {
        id.worker_index().and_then(|index| self.workers.get(index))
    }

    // -- service types -------------------------------------------------------

    /// Register a factory for `service_type`. Returns `false` if the name is
    /// already taken; the existing factory is kept.
    pub fn register_service<F>(&self, service_type: &str, factory: F) -> bool
    where
        F: ServiceFactory + 'static,
    {
        self.register_factory(service_type, Arc::new(factory))
    }

    /// Same as [`Router::register_service`] for an already shared factory.
    pub fn register_factory(&self, service_type: &str, factory: Arc<dyn ServiceFactory>) -> bool {
        let registered = self.types.register(service_type, factory);
        if registered {
            debug!(service_type, "service type registered");
        } else {
            warn!(service_type, "service type already registered");
        }
        registered
    }

    // -- lifecycle -----------------------------------------------------------

    /// Creates a service, returning its id or `ServiceId::NONE` on failure.
    ///
    /// The failure reason is logged; use [`Router::try_new_service`] to
    /// receive it.
    pub fn new_service(&self, request: NewService) -> ServiceId {
        let service_type = request.service_type.clone();
        match self.try_new_service(request) {
            Ok(id) => id,
            Err(err) => {
                warn!(service_type = %service_type, error = %err, "service creation failed");
                ServiceId::NONE
            }
        }
    }

    /// Creates a service.
    ///
    /// # Errors
    ///
    /// - `UnknownServiceType` if the type was never registered
    /// - `InvalidWorker` if an explicit worker index is out of range
    /// - `DuplicateUniqueService` if a unique name is already bound
    /// - `IdExhausted` if no free id was found on the chosen worker
    /// - `ConstructionFailed` if the worker could not build the service;
    ///   the reserved id is released
    pub fn try_new_service(&self, request: NewService) -> Result<ServiceId, RouterError> {
        let factory = self.types.get(&request.service_type).ok_or_else(|| {
            RouterError::UnknownServiceType {
                service_type: request.service_type.clone(),
            }
        })?;

        let (index, worker) = match request.worker {
            Some(index) => {
                let worker = self
                    .workers
                    .get(index)
                    .ok_or(RouterError::InvalidWorker {
                        worker: index,
                        count: self.workers.len(),
                    })?;
                (index, worker)
            }
            None => self
                .workers
                .next_worker()
                .ok_or(RouterError::WorkerPool {
                    count: 0,
                    max: ServiceId::MAX_WORKERS,
                })?,
        };

        let unique_name = request.unique.then(|| request.unique_name().to_owned());
        if let Some(name) = &unique_name {
            let existing = self.unique.get(name);
            if !existing.is_none() {
                return Err(RouterError::DuplicateUniqueService {
                    name: name.clone(),
                    existing,
                });
            }
        }

        let id = self.allocate_id(index)?;

        let construct = ConstructRequest {
            id,
            service_type: request.service_type.clone(),
            factory,
            config: request.config,
            share_thread: request.share_thread,
        };
        if let Err(source) = worker.construct_service(construct) {
            self.ids.remove(id);
            return Err(RouterError::ConstructionFailed {
                service_type: request.service_type,
                source,
            });
        }

        if let Some(name) = unique_name {
            if !self.unique.try_bind(&name, id) {
                // Lost a race against a concurrent creation of the same name.
                worker.remove_service(id, false);
                self.ids.remove(id);
                return Err(RouterError::DuplicateUniqueService {
                    existing: self.unique.get(&name),
                    name,
                });
            }
            // The worker may have torn the service down (a stop) before the
            // bind landed; its teardown hook has already run.
            if !self.ids.has(id) {
                self.unique.unbind_service(id);
            }
        }

        metrics::counter!(SERVICES_CREATED).increment(1);
        self.record_live_services();
        info!(
            service_id = %id,
            worker = index,
            service_type = %request.service_type,
            unique = request.unique,
            "service created"
        );
        Ok(id)
    }

    fn allocate_id(&self, worker: usize) -> Result<ServiceId, RouterError> {
        let attempts = self.config.max_id_attempts;
        for _ in 0..attempts {
            let candidate = self.allocator.allocate(worker).ok_or(RouterError::InvalidWorker {
                worker,
                count: self.workers.len(),
            })?;
            if self.ids.try_add(candidate) {
                return Ok(candidate);
            }
        }
        Err(RouterError::IdExhausted { worker, attempts })
    }

    /// Removes a service and, unless `respid == 0`, reports back to `sender`.
    ///
    /// The id stops being routable before this returns; the owning worker
    /// tears the service down asynchronously. Removing an id that is not
    /// live leaves the registry untouched and answers with an `Error`.
    pub fn remove_service(&self, serviceid: ServiceId, sender: ServiceId, respid: i32, crashed: bool) {
        let removed = self.ids.remove(serviceid);
        self.unique.unbind_service(serviceid);

        if !removed {
            debug!(service_id = %serviceid, "remove of unknown service ignored");
            if respid != 0 {
                self.make_response(
                    sender,
                    "router.remove_service",
                    "service not found",
                    respid,
                    MessageType::Error,
                );
            }
            return;
        }

        if let Some(worker) = self.owning_worker(serviceid) {
            worker.remove_service(serviceid, crashed);
        }

        metrics::counter!(SERVICES_REMOVED).increment(1);
        self.record_live_services();
        if crashed {
            warn!(service_id = %serviceid, "service removed after crash");
        } else {
            info!(service_id = %serviceid, "service removed");
        }

        if respid != 0 {
            let header = if crashed {
                "service.crashed"
            } else {
                "service.removed"
            };
            self.make_response(
                sender,
                header,
                &serviceid.to_string(),
                respid,
                MessageType::Response,
            );
        }
    }

    /// Hook for workers: a service finished tearing down.
    ///
    /// Idempotent. Covers services that left on their own (exit, crash,
    /// worker shutdown) without going through [`Router::remove_service`].
    pub fn on_service_remove(&self, serviceid: ServiceId) {
        let released = self.ids.remove(serviceid);
        let unbound = self.unique.unbind_service(serviceid);
        if released {
            metrics::counter!(SERVICES_REMOVED).increment(1);
            self.record_live_services();
        }
        debug!(service_id = %serviceid, released, unbound, "service teardown complete");
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_live_services(&self) {
        metrics::gauge!(SERVICES_LIVE).set(self.ids.len() as f64);
    }

    // -- messaging -----------------------------------------------------------

    /// Routes a message built from parts. See [`Router::send_message`].
    pub fn send(
        &self,
        sender: ServiceId,
        receiver: ServiceId,
        payload: Bytes,
        header: &str,
        respid: i32,
        mtype: MessageType,
    ) -> bool {
        let msg = Message::new(mtype)
            .with_sender(sender)
            .with_receiver(receiver)
            .with_header(header)
            .with_payload(payload)
            .with_response_id(respid);
        self.send_message(msg)
    }

    /// Hands `msg` to the worker owning its receiver.
    ///
    /// Returns `false` if the receiver is not live. In that case, when the
    /// message asks for a response, exactly one `Error` message correlated by
    /// the same response id is routed back to the sender. Replies never
    /// trigger further failure replies.
    pub fn send_message(&self, msg: Message) -> bool {
        let receiver = msg.receiver;
        if self.ids.has(receiver) {
            if let Some(worker) = self.owning_worker(receiver) {
                worker.post(msg);
                metrics::counter!(MESSAGES_SENT).increment(1);
                return true;
            }
        }

        metrics::counter!(MESSAGES_DROPPED).increment(1);
        debug!(sender = %msg.sender, receiver = %receiver, header = %msg.header, "receiver not live");

        if msg.wants_response() && !msg.sender.is_none() && !msg.mtype.is_reply() {
            self.make_response(
                msg.sender,
                "router.send",
                &format!("receiver {receiver} not found"),
                msg.response_id,
                MessageType::Error,
            );
        }
        false
    }

    /// Delivers a copy of `msg` to every live service except `sender`.
    ///
    /// Iterates a snapshot of the live ids; services removed meanwhile are
    /// skipped here or dropped by their worker. Returns the number of copies
    /// handed to workers.
    pub fn broadcast(&self, sender: ServiceId, msg: &Message) -> usize {
        let mut posted = 0;
        for id in self.ids.snapshot() {
            if id == sender || !self.ids.has(id) {
                continue;
            }
            let Some(worker) = self.owning_worker(id) else {
                continue;
            };
            let mut copy = msg.clone();
            copy.sender = sender;
            copy.receiver = id;
            copy.broadcast = true;
            worker.post(copy);
            posted += 1;
        }
        metrics::counter!(MESSAGES_SENT).increment(posted as u64);
        debug!(sender = %sender, receivers = posted, "broadcast");
        posted
    }

    /// Routes a reply to `sender`, correlated by `respid`.
    pub fn make_response(
        &self,
        sender: ServiceId,
        header: &str,
        content: &str,
        respid: i32,
        mtype: MessageType,
    ) -> bool {
        let msg = Message::new(mtype)
            .with_receiver(sender)
            .with_header(header)
            .with_payload(content.to_owned())
            .with_response_id(respid);
        self.send_message(msg)
    }

    /// Runs a control-plane command on behalf of `sender`.
    ///
    /// Router queries are answered directly; service commands are forwarded
    /// as `Control` messages. Answers and failures are only sent when
    /// `respid != 0`.
    pub fn runcmd(&self, sender: ServiceId, cmd: &str, respid: i32) {
        let command = match command::parse(cmd) {
            Ok(command) => command,
            Err(err) => {
                warn!(sender = %sender, cmd, error = %err, "invalid command");
                self.reply(sender, "router.runcmd", &err.to_string(), respid, MessageType::Error);
                return;
            }
        };

        match command {
            Command::ServiceCount => {
                let count = self.servicenum().to_string();
                self.reply(sender, "router.services", &count, respid, MessageType::Response);
            }
            Command::WorkerCount => {
                let count = self.workernum().to_string();
                self.reply(sender, "router.workers", &count, respid, MessageType::Response);
            }
            Command::Stats => match serde_json::to_string(&self.stats()) {
                Ok(json) => self.reply(sender, "router.stats", &json, respid, MessageType::Response),
                Err(err) => {
                    self.reply(sender, "router.stats", &err.to_string(), respid, MessageType::Error);
                }
            },
            Command::Env(key) => match self.get_env(key) {
                Some(value) => self.reply(sender, "router.env", &value, respid, MessageType::Response),
                None => {
                    let content = format!("env `{key}` not set");
                    self.reply(sender, "router.env", &content, respid, MessageType::Error);
                }
            },
            Command::Service {
                target,
                action,
                args,
            } => {
                let receiver = match target {
                    Target::Id(id) => id,
                    Target::Name(name) => self.get_unique_service(name),
                };
                if receiver.is_none() {
                    let content = format!("unknown command target in `{cmd}`");
                    self.reply(sender, "router.runcmd", &content, respid, MessageType::Error);
                    return;
                }
                let msg = Message::new(MessageType::Control)
                    .with_sender(sender)
                    .with_receiver(receiver)
                    .with_header(action)
                    .with_payload(args.to_owned())
                    .with_response_id(respid);
                self.send_message(msg);
            }
        }
    }

    fn reply(&self, sender: ServiceId, header: &str, content: &str, respid: i32, mtype: MessageType) {
        if respid != 0 {
            self.make_response(sender, header, content, respid, mtype);
        }
    }

    // -- directories ---------------------------------------------------------

    /// Snapshot of the environment value `name`.
    #[must_use]
    pub fn get_env(&self, name: &str) -> Option<Arc<str>> {
        self.env.get(name)
    }

    pub fn set_env(&self, name: &str, value: &str) {
        self.env.set(name, value);
    }

    /// Id bound to `name`, or `ServiceId::NONE`.
    #[must_use]
    pub fn get_unique_service(&self, name: &str) -> ServiceId {
        self.unique.get(name)
    }

    /// Binds `name` to `id`, overwriting any previous binding.
    pub fn set_unique_service(&self, name: &str, id: ServiceId) {
        self.unique.set(name, id);
    }

    /// Sorted copy of the environment.
    #[must_use]
    pub fn env_snapshot(&self) -> BTreeMap<String, String> {
        self.env.snapshot()
    }

    /// Sorted copy of the unique-service directory.
    #[must_use]
    pub fn unique_snapshot(&self) -> BTreeMap<String, ServiceId> {
        self.unique.snapshot()
    }

    /// Point-in-time statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            services: self.servicenum(),
            workers: self.workernum(),
            service_types: self.types.type_names(),
            unique_services: self.unique.snapshot(),
            env_entries: self.env.len(),
        }
    }

    // -- shutdown ------------------------------------------------------------

    /// Installs the process-wide stop callback. The last call wins.
    pub fn set_stop<F>(&self, stop: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.stop.store(Some(Arc::new(StopHook(Box::new(stop)))));
    }

    /// Invokes the stop callback. Returns `false` if none is installed.
    pub fn stop_server(&self) -> bool {
        match self.stop.load_full() {
            Some(hook) => {
                info!("stop requested");
                (hook.0)();
                true
            }
            None => {
                warn!("stop requested but no stop handler is installed");
                false
            }
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("workers", &self.workers.len())
            .field("services", &self.ids.len())
            .field("service_types", &self.types.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
