//! Config-file watcher.
//!
//! Filesystem events on `config.json` are debounced into `ConfigUpdated`
//! messages on the manager's reload channel — the same channel an admin
//! surface signals after writing the file, so both paths share one
//! idempotent reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fleet_domain::error::{Error, Result};

use crate::loader::CONFIG_FILE;

/// Quiet window after the last event before a reload fires.
const DEBOUNCE: Duration = Duration::from_millis(500);

/// Watch `config_dir` for changes to the config file, sending one unit on
/// `reload_tx` per settled burst of events.
pub fn spawn_config_watcher(
    config_dir: PathBuf,
    reload_tx: mpsc::Sender<()>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    let (raw_tx, mut raw_rx) = mpsc::channel::<()>(16);

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => {
                if event.paths.iter().any(|p| is_config_file(p)) {
                    // Full channel means a reload is already queued.
                    let _ = raw_tx.try_send(());
                }
            }
            Err(e) => tracing::warn!(error = %e, "config watch error"),
        }
    })
    .map_err(|e| Error::Io(std::io::Error::other(e)))?;

    watcher
        .watch(&config_dir, RecursiveMode::NonRecursive)
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;
    tracing::info!(dir = %config_dir.display(), "watching config for changes");

    Ok(tokio::spawn(async move {
        // Keep the watcher alive for the lifetime of the task.
        let _watcher = watcher;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = raw_rx.recv() => {
                    if event.is_none() {
                        return;
                    }
                    // Debounce: swallow the burst until it goes quiet.
                    loop {
                        match tokio::time::timeout(DEBOUNCE, raw_rx.recv()).await {
                            Ok(Some(())) => continue,
                            Ok(None) => return,
                            Err(_) => break,
                        }
                    }
                    tracing::info!("config change detected");
                    if reload_tx.send(()).await.is_err() {
                        return;
                    }
                }
            }
        }
    }))
}

fn is_config_file(path: &Path) -> bool {
    path.file_name()
        .map(|name| name == CONFIG_FILE)
        .unwrap_or(false)
}
