//! End-to-end routing over real worker threads.

use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use switchyard_core::{Message, MessageType, ServiceId};
use switchyard_server::{
    NewService, Router, RouterConfig, Service, ServiceContext, ShutdownController, WorkerPool,
};

const TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Event {
    Received { by: ServiceId, msg: Message },
    Exited(ServiceId),
}

/// Records everything it receives; answers `Text` requests with a `pong`,
/// exits on `Control/exit`, stops the server on `Control/stop`.
struct Recorder {
    events: Sender<Event>,
}

impl Service for Recorder {
    fn init(&mut self, _ctx: &ServiceContext, _config: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn handle(&mut self, ctx: &ServiceContext, msg: Message) {
        match (msg.mtype, msg.header.as_str()) {
            (MessageType::Control, "exit") => ctx.exit(),
            (MessageType::Control, "stop") => {
                if let Some(router) = ctx.router() {
                    router.stop_server();
                }
            }
            (MessageType::Text, _) if msg.wants_response() => {
                ctx.respond(&msg, "pong", msg.payload_str().unwrap_or_default());
            }
            _ => {}
        }
        let _ = self.events.send(Event::Received { by: ctx.id(), msg });
    }

    fn exit(&mut self, ctx: &ServiceContext) {
        let _ = self.events.send(Event::Exited(ctx.id()));
    }
}

struct Harness {
    pool: WorkerPool,
    router: Arc<Router>,
    events: Receiver<Event>,
}

impl Harness {
    fn new(workers: usize) -> Self {
        let config = RouterConfig {
            worker_count: workers,
            ..RouterConfig::default()
        };
        let pool = WorkerPool::spawn(&config).unwrap();
        let router = Router::new(pool.workers(), config).unwrap();

        let (tx, events) = mpsc::channel();
        assert!(router.register_service("recorder", move || {
            Box::new(Recorder { events: tx.clone() }) as Box<dyn Service>
        }));
        Self {
            pool,
            router,
            events,
        }
    }

    fn spawn_recorder(&self) -> ServiceId {
        let id = self.router.new_service(NewService::new("recorder"));
        assert!(!id.is_none());
        id
    }

    fn next(&self) -> Event {
        self.events.recv_timeout(TIMEOUT).unwrap()
    }

    /// Drains events until the queue stays quiet for a short while.
    fn settle(&self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.recv_timeout(Duration::from_millis(100)) {
            events.push(event);
        }
        events
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.pool.stop_all();
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn unique_echo_request_response_and_removal() {
    let harness = Harness::new(2);
    let router = &harness.router;

    let echo = router.new_service(NewService::new("recorder").unique_as("echo"));
    assert_eq!(router.get_unique_service("echo"), echo);
    let client = harness.spawn_recorder();

    assert!(router.send(client, echo, Bytes::from_static(b"hello"), "ping", 9, MessageType::Text));

    let mut reply = None;
    while reply.is_none() {
        if let Event::Received { by, msg } = harness.next() {
            if by == client {
                reply = Some(msg);
            }
        }
    }
    let reply = reply.unwrap();
    assert_eq!(reply.mtype, MessageType::Response);
    assert_eq!(reply.sender, echo);
    assert_eq!(reply.response_id, 9);
    assert_eq!(reply.payload_str(), Some("hello"));

    router.remove_service(echo, ServiceId::NONE, 0, false);
    assert!(!router.has_service(echo));
    assert_eq!(router.get_unique_service("echo"), ServiceId::NONE);
}

#[test]
fn text_request_built_from_message_gets_correlated_reply() {
    let harness = Harness::new(2);
    let router = &harness.router;
    let client = harness.spawn_recorder();
    let echo = harness.spawn_recorder();

    let request = Message::text(client, echo, "hello there")
        .with_header("ping")
        .with_response_id(21);
    assert!(router.send_message(request));

    let reply = loop {
        if let Event::Received { by, msg } = harness.next() {
            if by == client {
                break msg;
            }
        }
    };
    assert_eq!(reply.mtype, MessageType::Response);
    assert_eq!(reply.sender, echo);
    assert_eq!(reply.header, "pong");
    assert_eq!(reply.response_id, 21);
    assert_eq!(reply.payload_str(), Some("hello there"));
}

#[test]
fn dead_receiver_yields_exactly_one_error() {
    let harness = Harness::new(2);
    let router = &harness.router;
    let client = harness.spawn_recorder();
    let victim = harness.spawn_recorder();
    router.remove_service(victim, ServiceId::NONE, 0, false);

    assert!(!router.send(client, victim, Bytes::new(), "ping", 5, MessageType::Text));

    let errors: Vec<Message> = harness
        .settle()
        .into_iter()
        .filter_map(|event| match event {
            Event::Received { by, msg } if by == client => Some(msg),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].mtype, MessageType::Error);
    assert_eq!(errors[0].response_id, 5);
}

#[test]
fn broadcast_reaches_each_peer_once_despite_concurrent_removal() {
    let harness = Harness::new(3);
    let router = &harness.router;
    let a = harness.spawn_recorder();
    let b = harness.spawn_recorder();
    let c = harness.spawn_recorder();
    let d = harness.spawn_recorder();

    let msg = Message::new(MessageType::Text).with_header("news");
    std::thread::scope(|scope| {
        scope.spawn(|| router.remove_service(d, ServiceId::NONE, 0, false));
        scope.spawn(|| router.broadcast(a, &msg));
    });

    let events = harness.settle();
    let copies = |who: ServiceId| {
        events
            .iter()
            .filter(|event| matches!(event, Event::Received { by, msg } if *by == who && msg.broadcast))
            .count()
    };
    assert_eq!(copies(a), 0);
    assert_eq!(copies(b), 1);
    assert_eq!(copies(c), 1);
    assert!(copies(d) <= 1);

    // Nothing reaches d once its teardown has run.
    let exited_at = events
        .iter()
        .position(|event| matches!(event, Event::Exited(id) if *id == d))
        .unwrap();
    assert!(!events[exited_at..]
        .iter()
        .any(|event| matches!(event, Event::Received { by, .. } if *by == d)));
}

#[test]
fn control_exit_removes_service() {
    let harness = Harness::new(1);
    let router = &harness.router;
    let admin = harness.spawn_recorder();
    let target = harness.spawn_recorder();

    router.runcmd(admin, &format!("{target}.exit"), 0);

    wait_until(|| !router.has_service(target));
    assert!(router.has_service(admin));
    assert!(harness
        .settle()
        .iter()
        .any(|event| matches!(event, Event::Exited(id) if *id == target)));
}

#[test]
fn concurrent_lifecycle_keeps_ids_unique() {
    let harness = Harness::new(4);
    let router = &harness.router;

    let kept: Vec<ServiceId> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    let mut kept = Vec::new();
                    for i in 0..100 {
                        let id = router.new_service(NewService::new("recorder"));
                        assert!(!id.is_none());
                        if i % 2 == 0 {
                            router.remove_service(id, ServiceId::NONE, 0, false);
                            assert!(!router.has_service(id));
                        } else {
                            kept.push(id);
                        }
                    }
                    kept
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    let unique: HashSet<ServiceId> = kept.iter().copied().collect();
    assert_eq!(unique.len(), kept.len());
    assert_eq!(router.servicenum(), 400);
    assert!(kept.iter().all(|id| router.has_service(*id)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_command_from_a_service_triggers_shutdown() {
    let harness = Harness::new(2);
    let shutdown = Arc::new(ShutdownController::new());
    harness.router.set_stop({
        let shutdown = Arc::clone(&shutdown);
        move || shutdown.trigger_shutdown()
    });
    let admin = harness.spawn_recorder();

    harness.router.runcmd(ServiceId::NONE, &format!("{admin}.stop"), 0);

    tokio::time::timeout(TIMEOUT, shutdown.wait_for_shutdown())
        .await
        .unwrap();
    assert!(shutdown.is_shutting_down());
}
