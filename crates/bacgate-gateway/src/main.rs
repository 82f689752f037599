//! The bacgate host process.
//!
//! Bring-up order and exit codes: configuration (1), snapshot store
//! connect (2), BACnet/IP bind (3), event-log connect (4). After that,
//! the device is rebuilt from the snapshot store, the wire thread and
//! one worker per subscription are spawned, and the process waits for
//! SIGINT/SIGTERM to trigger a cooperative shutdown.

mod config;

use bacgate_device::udp::UdpTransport;
use bacgate_device::{CovEngine, CovNotifier, DeviceServer, ObjectRegistry};
use bacgate_engine::coordinator::DEFAULT_POLL_INTERVAL;
use bacgate_engine::{Coordinator, EventLog, RedisEventLog};
use bacgate_store::{RedisOptions, RedisStore, SnapshotStore};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const EXIT_CONFIG: i32 = 1;
const EXIT_STORE: i32 = 2;
const EXIT_BIND: i32 = 3;
const EXIT_EVENT_LOG: i32 = 4;

#[derive(Parser, Debug)]
#[command(name = "bacgate", about = "Event-sourced BACnet gateway")]
struct Args {
    /// Path to the gateway configuration file.
    #[arg(long, default_value = "/etc/bacgate/gateway.json")]
    config: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();
    let args = Args::parse();
    std::process::exit(run(args).await);
}

async fn run(args: Args) -> i32 {
    log::info!("loading configuration from {}", args.config.display());
    let config = match config::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            log::error!("configuration failed: {err}");
            return EXIT_CONFIG;
        }
    };
    let subscriptions = config.enabled_subscriptions();

    log::info!("connecting to snapshot store at {}", config.store.url);
    let store = match RedisStore::connect(
        &config.store.url,
        RedisOptions {
            key_prefix: config.store.key_prefix.clone(),
            database: config.store.database,
            password: config.store.password.clone(),
            connect_timeout: Duration::from_millis(config.store.connect_timeout_ms),
            command_timeout: Duration::from_millis(config.store.command_timeout_ms),
        },
    ) {
        Ok(store) => Arc::new(store) as Arc<dyn SnapshotStore>,
        Err(err) => {
            log::error!("snapshot store connect failed: {err}");
            return EXIT_STORE;
        }
    };

    log::info!(
        "binding BACnet/IP on port {} (device instance {})",
        config.network.udp_port,
        config.device.instance
    );
    let transport = match UdpTransport::bind(config.network.interface, config.network.udp_port) {
        Ok(transport) => Arc::new(transport),
        Err(err) => {
            log::error!("BACnet/IP bind failed: {err}");
            return EXIT_BIND;
        }
    };

    log::info!("connecting to event log at {}", config.event_log.url);
    let event_log = match RedisEventLog::connect(
        &config.event_log.url,
        Duration::from_millis(config.event_log.connect_timeout_ms),
        Duration::from_millis(config.event_log.read_timeout_ms),
    ) {
        Ok(event_log) => Arc::new(event_log) as Arc<dyn EventLog>,
        Err(err) => {
            log::error!("event log connect failed: {err}");
            return EXIT_EVENT_LOG;
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let registry = Arc::new(ObjectRegistry::new(config.device_info()));
    let cov = Arc::new(CovEngine::new(
        config.device.instance,
        config.cov.max_subscriptions,
        config.cov.default_lifetime,
        Arc::clone(&transport) as Arc<dyn CovNotifier>,
    ));

    let mut coordinator = Coordinator::new(
        store,
        Arc::clone(&registry),
        Arc::clone(&cov),
        event_log,
        Arc::clone(&shutdown),
        DEFAULT_POLL_INTERVAL,
    );
    if let Err(err) = coordinator.recover() {
        log::warn!("snapshot recovery incomplete: {err}");
    }

    let server = DeviceServer::new(registry, cov, transport);
    let wire_thread = match server.spawn(Arc::clone(&shutdown)) {
        Ok(handle) => handle,
        Err(err) => {
            log::error!("failed to start the BACnet wire thread: {err}");
            return EXIT_BIND;
        }
    };

    if let Err(err) = coordinator.start(subscriptions) {
        log::error!("failed to start subscription workers: {err}");
        shutdown.store(true, Ordering::SeqCst);
        coordinator.join();
        let _ = wire_thread.join();
        return EXIT_EVENT_LOG;
    }

    log::info!("gateway running; press Ctrl+C to stop");
    wait_for_signal().await;

    log::info!("shutting down");
    shutdown.store(true, Ordering::SeqCst);
    coordinator.join();
    if wire_thread.join().is_err() {
        log::error!("wire thread panicked during shutdown");
    }
    0
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(err) => {
            log::warn!("SIGTERM handler unavailable: {err}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
