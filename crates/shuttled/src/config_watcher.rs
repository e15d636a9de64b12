use std::path::PathBuf;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Writes by the daemon itself within this window don't trigger a reload.
const SELF_WRITE_WINDOW: Duration = Duration::from_millis(100);
/// Editors often write several times in quick succession.
const DEBOUNCE: Duration = Duration::from_millis(50);

/// Watch the config directory and request a reload when the file changes.
///
/// The directory is watched rather than the file so editors that save by
/// rename are still seen.
pub async fn run(
    config_dir: PathBuf,
    config_filename: String,
    reload_tx: mpsc::Sender<()>,
    mut self_write_rx: mpsc::Receiver<()>,
    cancel: CancellationToken,
) {
    let (tx, mut rx) = mpsc::channel(16);

    let watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                if touches_config(&event, &config_filename) {
                    // Full channel means a reload is already queued.
                    let _ = tx.blocking_send(());
                }
            }
        },
        notify::Config::default(),
    );
    let mut watcher = match watcher {
        Ok(w) => w,
        Err(e) => {
            error!("failed to create config file watcher: {e}");
            return;
        }
    };

    if let Err(e) = watcher.watch(&config_dir, RecursiveMode::NonRecursive) {
        error!(
            "failed to watch config directory {}: {e}",
            config_dir.display()
        );
        return;
    }

    info!("watching config directory: {}", config_dir.display());

    let mut last_self_write: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            Some(()) = self_write_rx.recv() => {
                last_self_write = Some(Instant::now());
            }

            Some(()) = rx.recv() => {
                if last_self_write.is_some_and(|t| t.elapsed() < SELF_WRITE_WINDOW) {
                    debug!("suppressing self-triggered config reload");
                    continue;
                }

                tokio::time::sleep(DEBOUNCE).await;
                // Collapse the burst into one reload.
                while rx.try_recv().is_ok() {}

                debug!("config file changed, triggering reload");
                let _ = reload_tx.send(()).await;
            }
        }
    }

    drop(watcher);
}

/// A create or modify event naming the config file.
fn touches_config(event: &Event, filename: &str) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name().and_then(|f| f.to_str()) == Some(filename))
}
