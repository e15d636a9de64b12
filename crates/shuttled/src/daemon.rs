use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use shuttled_core::config::{self, Config};
use shuttled_core::ipc;
use shuttled_core::state::DaemonState;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::coordinator::DeviceInputCoordinator;
use crate::device::{DeviceHub, DriverLink};
use crate::dispatch::ActionDispatcher;
use crate::engine::{self, Components, EngineChannels};
use crate::host::SystemHost;
use crate::playback::{FileStore, PlaybackTracker, PowerSupplyGate};
use crate::{config_watcher, ipc_server, mpris};

const EVENT_CAPACITY: usize = 64;

/// Run the daemon with the given log level.
pub fn run(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("shuttled v{} starting", env!("CARGO_PKG_VERSION"));

    let config_path = Config::default_path().context("failed to resolve XDG config directory")?;
    match config::bootstrap_config(&config_path) {
        Ok(true) => info!("created default config at {}", config_path.display()),
        Ok(false) => {}
        Err(e) => warn!("failed to bootstrap config: {e}"),
    }

    let config = Config::load(&config_path).context("failed to load config")?;
    info!("loaded config from {}", config_path.display());
    match config.to_toml() {
        Ok(toml) => info!("active config:\n{toml}"),
        Err(e) => warn!("failed to serialize config for logging: {e}"),
    }

    let state_path = DaemonState::default_path().context("failed to resolve XDG state directory")?;

    let rt = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
    let result = rt.block_on(async_main(config, config_path, state_path));
    // The driver reaper and subscriber tasks may still be parked; don't wait on them.
    rt.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn async_main(config: Config, config_path: PathBuf, state_path: PathBuf) -> Result<()> {
    let cancel = CancellationToken::new();

    let socket_path = ipc::default_socket_path();
    ipc_server::cleanup_stale_socket(&socket_path).await?;

    let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
    let (ipc_request_tx, ipc_request_rx) = mpsc::channel(8);
    let (session_tx, session_rx) = mpsc::channel(16);

    let session_bus = match zbus::Connection::session().await {
        Ok(conn) => Some(conn),
        Err(e) => {
            warn!("session bus unavailable (media tracking and go_home fallback disabled): {e}");
            None
        }
    };

    // Media session watcher (tokio task)
    let mpris_handle = session_bus.clone().map(|conn| {
        let mpris_cancel = cancel.clone();
        tokio::spawn(async move {
            mpris::run(conn, session_tx, mpris_cancel).await;
        })
    });

    // IPC server (tokio task)
    let ipc_cancel = cancel.clone();
    let ipc_events = events_tx.clone();
    let ipc_socket = socket_path.clone();
    let ipc_handle = tokio::spawn(async move {
        if let Err(e) = ipc_server::run(ipc_socket, ipc_request_tx, ipc_events, ipc_cancel).await {
            error!("IPC server failed: {e}");
        }
    });

    // Config watcher (tokio task)
    let (config_reload_tx, config_reload_rx) = mpsc::channel(4);
    let (config_self_write_tx, config_self_write_rx) = mpsc::channel::<()>(4);
    let config_dir = config_path
        .parent()
        .context("config path has no parent directory")?
        .to_owned();
    let config_filename = config_path
        .file_name()
        .and_then(|f| f.to_str())
        .context("config file name is not valid UTF-8")?
        .to_owned();
    let watcher_cancel = cancel.clone();
    tokio::spawn(async move {
        config_watcher::run(
            config_dir,
            config_filename,
            config_reload_tx,
            config_self_write_rx,
            watcher_cancel,
        )
        .await;
    });

    // Signal handling
    let mut sigterm = signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to register SIGINT handler")?;
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
            _ = signal_cancel.cancelled() => return,
        }
        signal_cancel.cancel();
    });

    let hub = DeviceHub::new();
    let link = DriverLink::new(hub.clone(), &config.device);
    let host = SystemHost::new(config.host.clone(), session_bus, events_tx.clone());
    let components = Components {
        coordinator: DeviceInputCoordinator::new(link, &hub),
        dispatcher: ActionDispatcher::new(host, &config.host),
        tracker: PlaybackTracker::new(
            FileStore::open(state_path),
            PowerSupplyGate::new(config.playback.require_host_power),
        ),
        hub,
    };
    let channels = EngineChannels {
        ipc_request_rx,
        config_reload_rx,
        config_self_write_tx,
        session_rx,
        events_tx,
    };

    // Run the engine (blocks until shutdown)
    engine::run(config, config_path, components, channels, cancel.clone()).await;

    info!("engine stopped, shutting down subsystems");
    cancel.cancel();

    let _ = tokio::time::timeout(Duration::from_millis(200), async {
        let _ = ipc_handle.await;
        if let Some(handle) = mpris_handle {
            let _ = handle.await;
        }
    })
    .await;

    let _ = tokio::fs::remove_file(&socket_path).await;

    info!("shutdown complete");
    Ok(())
}
