//! taviblockd - the taviblock enforcement daemon
//!
//! Wires together all the components:
//! - Configuration loading
//! - Store initialization (with corrupt-store recovery)
//! - Scheduler, hosts reconciler, active enforcer
//! - Control channel (unix socket)
//!
//! The event loop is single-writer: scheduler ticks and control requests
//! are serialised here, so a CLI request and a tick never mutate the store
//! at the same time. The enforcer runs as its own task because platform
//! calls are slow; it reads the published blocked set and reaches the store
//! only by queueing control requests back into this loop.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use taviblock_api::{RequestError, Response};
use taviblock_core::{
    ActiveEnforcer, ControlInterface, ControlRequest, CoreEvent, HostsReconciler, Scheduler,
};
use taviblock_ipc::{IpcServer, ServerMessage};
use taviblock_platform::NullPlatform;
use taviblock_store::{SqliteStore, Store};
use taviblock_util::{RateLimiter, SystemClock};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// taviblockd - fail-closed domain blocker
#[derive(Parser, Debug)]
#[command(name = "taviblockd")]
#[command(about = "Fail-closed domain blocker enforcement daemon", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value_os_t = taviblock_util::default_config_path())]
    config: PathBuf,

    /// Control socket override (or set TAVIBLOCK_SOCKET)
    #[arg(short, long, env = "TAVIBLOCK_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set TAVIBLOCK_DATA_DIR)
    #[arg(short, long, env = "TAVIBLOCK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Hosts file override (or set TAVIBLOCK_HOSTS)
    #[arg(long, env = "TAVIBLOCK_HOSTS")]
    hosts: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

struct Service {
    control: ControlInterface,
    scheduler: Scheduler,
    reconciler: HostsReconciler,
    ipc: Arc<IpcServer>,
    rate_limiter: RateLimiter,
    enforcer: ActiveEnforcer,
    events_tx: mpsc::UnboundedSender<CoreEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<CoreEvent>>,
    control_rx: mpsc::UnboundedReceiver<ControlRequest>,
    blocked_rx: tokio::sync::watch::Receiver<taviblock_core::BlockedSet>,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        // Load configuration; validation failures prevent startup
        let config = taviblock_config::load_config(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        info!(
            config_path = %args.config.display(),
            targets = config.targets.len(),
            profiles = config.profiles.len(),
            "Configuration loaded"
        );

        let socket_path = args
            .socket
            .clone()
            .unwrap_or_else(taviblock_util::default_socket_path);
        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(taviblock_util::default_data_dir);
        let hosts_path = args
            .hosts
            .clone()
            .unwrap_or_else(taviblock_util::default_hosts_path);

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join("state.db");
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open_or_recreate(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );
        info!(db_path = %db_path.display(), "Store initialized");

        let config = Arc::new(RwLock::new(config));
        let clock = Arc::new(SystemClock);
        let adapter = Arc::new(NullPlatform);

        let (scheduler, blocked_rx) = Scheduler::new(store.clone(), clock.clone(), config.clone());
        let reconciler = HostsReconciler::new(&hosts_path);

        let control = ControlInterface::new(
            store,
            config.clone(),
            adapter.clone(),
            clock,
            args.config.clone(),
        );

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let enforcer = ActiveEnforcer::new(adapter, config, control_tx);

        let mut ipc = IpcServer::new(&socket_path);
        ipc.start().await?;

        // Rate limiter: 30 requests per second per client
        let rate_limiter = RateLimiter::new(30, Duration::from_secs(1));

        Ok(Self {
            control,
            scheduler,
            reconciler,
            ipc: Arc::new(ipc),
            rate_limiter,
            enforcer,
            events_tx,
            events_rx: Some(events_rx),
            control_rx,
            blocked_rx,
        })
    }

    async fn run(self) -> Result<()> {
        let Service {
            control,
            mut scheduler,
            reconciler,
            ipc,
            mut rate_limiter,
            enforcer,
            events_tx,
            mut events_rx,
            mut control_rx,
            blocked_rx,
        } = self;

        // Fail closed before anything else runs: the hosts file carries the
        // full blocked set until the first tick relaxes it
        scheduler.publish_full_set();
        if let Err(e) = reconciler.reconcile(&scheduler.blocked_set()) {
            error!(error = %e, "Initial hosts reconciliation failed");
        }

        let mut ipc_messages = ipc
            .take_message_receiver()
            .await
            .expect("Message receiver should be available");

        // IPC accept task
        let ipc_accept = ipc.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "Control channel error");
            }
        });

        // Enforcer task
        let enforcer_events = events_rx.take().expect("events receiver");
        let enforcer_handle = tokio::spawn(enforcer.run(blocked_rx, enforcer_events));

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

        let mut tick_timer = tokio::time::interval(Duration::from_secs(1));
        tick_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("taviblockd running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down");
                    break;
                }

                // SIGHUP rereads configuration
                _ = sighup.recv() => {
                    match control.execute(taviblock_api::Command::Reload).await {
                        Ok(_) => info!("Configuration reloaded on SIGHUP"),
                        Err(e) => warn!(error = %e, "SIGHUP reload rejected"),
                    }
                }

                // The scheduler tick: lifecycle transitions, then make the
                // hosts file match the published set
                _ = tick_timer.tick() => {
                    let events = scheduler.tick();
                    for event in events {
                        let _ = events_tx.send(event);
                    }
                    if let Err(e) = reconciler.reconcile(&scheduler.blocked_set()) {
                        // Retried next tick; never aborts the loop
                        warn!(error = %e, "Hosts reconciliation failed");
                    }
                }

                // Control requests queued by the enforcer (extensions)
                Some(request) = control_rx.recv() => {
                    let result = control.execute(request.command).await;
                    let _ = request.respond_to.send(result);
                }

                // CLI requests
                Some(msg) = ipc_messages.recv() => {
                    handle_ipc_message(&control, &ipc, &mut rate_limiter, msg).await;
                }
            }
        }

        // Fail closed on exit: full blocked set, zero active sessions
        info!("Restoring full blocking before shutdown");
        scheduler.publish_full_set();
        if let Err(e) = reconciler.reconcile(&scheduler.blocked_set()) {
            error!(error = %e, "Fail-closed reconciliation failed");
        }

        drop(events_tx);
        enforcer_handle.abort();
        ipc.shutdown();

        info!("Shutdown complete");
        Ok(())
    }
}

async fn handle_ipc_message(
    control: &ControlInterface,
    ipc: &Arc<IpcServer>,
    rate_limiter: &mut RateLimiter,
    msg: ServerMessage,
) {
    match msg {
        ServerMessage::Request { client_id, request } => {
            if !rate_limiter.check(&client_id) {
                let response = Response::error(request.request_id, RequestError::RateLimited);
                let _ = ipc.send_response(&client_id, response).await;
                return;
            }

            let response = match control.execute(request.command).await {
                Ok(payload) => Response::success(request.request_id, payload),
                Err(error) => Response::error(request.request_id, error),
            };

            let _ = ipc.send_response(&client_id, response).await;
        }

        ServerMessage::ClientDisconnected { client_id } => {
            rate_limiter.remove_client(&client_id);
            ipc.forget_client(&client_id).await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "taviblockd starting");

    let service = Service::new(&args).await?;
    service.run().await
}
