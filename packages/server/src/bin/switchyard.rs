//! Demo process: an `echo` unique service and a `pinger` that exchanges a
//! few request/response pairs with it, queries router stats, then stops the
//! process through `Router::stop_server`.

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use switchyard_core::{Message, MessageType};
use switchyard_server::logging::{init_tracing, LogFormat};
use switchyard_server::{
    NewService, Router, RouterConfig, Service, ServiceContext, ShutdownController, WorkerPool,
};
use tracing::{info, warn};

const STATS_RESPID: i32 = -1;

#[derive(Parser, Debug)]
#[command(name = "switchyard", about = "Run the switchyard echo demo", long_about = None)]
struct Args {
    /// Number of worker threads (defaults to available parallelism).
    #[arg(long, env = "SWITCHYARD_WORKERS")]
    workers: Option<usize>,

    /// Log output format.
    #[arg(long, env = "SWITCHYARD_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_filter: String,

    /// Requests the pinger sends before stopping.
    #[arg(long, default_value_t = 3)]
    pings: u32,
}

// ---------------------------------------------------------------------------
// Demo services
// ---------------------------------------------------------------------------

struct Echo;

impl Service for Echo {
    fn init(&mut self, ctx: &ServiceContext, _config: &str) -> anyhow::Result<()> {
        info!(service_id = %ctx.id(), "echo ready");
        Ok(())
    }

    fn handle(&mut self, ctx: &ServiceContext, msg: Message) {
        match msg.mtype {
            MessageType::Control if msg.header == "exit" => ctx.exit(),
            MessageType::Text => {
                let content = msg.payload_str().unwrap_or_default().to_owned();
                ctx.respond(&msg, "pong", &content);
            }
            _ => {}
        }
    }

    fn exit(&mut self, ctx: &ServiceContext) {
        info!(service_id = %ctx.id(), "echo exiting");
    }
}

struct Pinger {
    pings: u32,
    outstanding: u32,
}

impl Pinger {
    fn stop(ctx: &ServiceContext) {
        if let Some(router) = ctx.router() {
            router.stop_server();
        }
    }
}

impl Service for Pinger {
    fn init(&mut self, _ctx: &ServiceContext, config: &str) -> anyhow::Result<()> {
        self.pings = config
            .parse()
            .with_context(|| format!("invalid ping count `{config}`"))?;
        Ok(())
    }

    fn start(&mut self, ctx: &ServiceContext) {
        let Some(router) = ctx.router() else {
            return;
        };
        let echo = router.get_unique_service("echo");
        if echo.is_none() {
            warn!("no echo service registered");
            router.stop_server();
            return;
        }

        for seq in 1..=self.pings {
            let respid = i32::try_from(seq).unwrap_or(i32::MAX);
            let ping = Message::text(ctx.id(), echo, format!("ping #{seq}"))
                .with_header("ping")
                .with_response_id(respid);
            if router.send_message(ping) {
                self.outstanding += 1;
            }
        }
        if self.outstanding == 0 {
            router.runcmd(ctx.id(), "router.stats", STATS_RESPID);
        }
    }

    fn handle(&mut self, ctx: &ServiceContext, msg: Message) {
        match (msg.mtype, msg.header.as_str()) {
            (MessageType::Response, "pong") => {
                info!(response_id = msg.response_id, payload = msg.payload_str().unwrap_or_default(), "pong");
                self.outstanding = self.outstanding.saturating_sub(1);
                if self.outstanding == 0 {
                    if let Some(router) = ctx.router() {
                        router.runcmd(ctx.id(), "router.stats", STATS_RESPID);
                    }
                }
            }
            (MessageType::Response, "router.stats") => {
                info!(stats = msg.payload_str().unwrap_or_default(), "router stats");
                Self::stop(ctx);
            }
            (MessageType::Error, header) => {
                warn!(header, response_id = msg.response_id, error = msg.payload_str().unwrap_or_default(), "request failed");
                Self::stop(ctx);
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format, &args.log_filter)?;

    let mut config = RouterConfig::default();
    if let Some(workers) = args.workers {
        config.worker_count = workers;
    }

    let pool = WorkerPool::spawn(&config).context("failed to start worker pool")?;
    let router = Router::new(pool.workers(), config)?;

    let shutdown = Arc::new(ShutdownController::new());
    router.set_stop({
        let shutdown = Arc::clone(&shutdown);
        move || shutdown.trigger_shutdown()
    });

    router.register_service("echo", || Box::new(Echo) as Box<dyn Service>);
    router.register_service("pinger", || {
        Box::new(Pinger {
            pings: 0,
            outstanding: 0,
        }) as Box<dyn Service>
    });

    let echo = router.try_new_service(NewService::new("echo").unique())?;
    let pinger = router.try_new_service(NewService::new("pinger").with_config(args.pings.to_string()))?;
    info!(%echo, %pinger, workers = router.workernum(), "demo started");

    tokio::select! {
        () = shutdown.wait_for_shutdown() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("interrupt received");
            shutdown.trigger_shutdown();
        }
    }

    tokio::task::spawn_blocking(move || pool.stop_all()).await?;
    shutdown.mark_stopped();

    let remaining = router.servicenum();
    if remaining != 0 {
        warn!(remaining, "services still registered after stop");
    }
    info!("switchyard stopped");
    Ok(())
}
