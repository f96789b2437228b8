//! Watch-and-reload loop.
//!
//! Change notifications, manual refresh requests and the initial load all
//! arrive as [`ReloadTrigger`]s. Each trigger waits out the debounce delay,
//! then reads the file, retrying with the same delay for as long as the
//! read fails, and finally rebuilds the record store from what it read.
//! Shutdown is observed at every wait.

use super::coordinator::Shared;
use super::state::NotificationGate;
use crate::error::SyncError;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadTrigger {
    /// The file changed on disk.
    External,
    /// Someone asked for a refresh; always reloads.
    Manual,
}

/// Outcome of one trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    Reloaded(usize),
    /// The file holds exactly what our last persist pass wrote.
    OwnWrite,
}

/// Forward change events for `path` to `triggers`.
///
/// The parent directory is watched rather than the file itself so editors
/// that replace the file by renaming are still seen.
pub(crate) fn watch_file(
    path: &Path,
    gate: NotificationGate,
    triggers: mpsc::Sender<ReloadTrigger>,
) -> Result<RecommendedWatcher, SyncError> {
    let watch_error = |source: notify::Error| SyncError::Watch {
        path: path.to_path_buf(),
        source,
    };
    let file_name = path.file_name().map(|n| n.to_os_string());

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| {
            let Ok(event) = res else {
                return;
            };
            if matches!(event.kind, EventKind::Access(_)) || !gate.is_open() {
                return;
            }
            if event
                .paths
                .iter()
                .any(|p| p.file_name() == file_name.as_deref())
            {
                // A full queue already holds a pending reload.
                let _ = triggers.try_send(ReloadTrigger::External);
            }
        },
        Config::default(),
    )
    .map_err(watch_error)?;

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(watch_error)?;

    Ok(watcher)
}

/// Sleep for `delay`. Returns false if shutdown was signalled first.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = shutdown.changed() => return false,
    }
    !*shutdown.borrow()
}

/// Read the file, retrying until it succeeds, then reconcile.
///
/// Returns `None` if shutdown interrupted the retries.
pub(crate) async fn reload_with_retry(
    shared: &Shared,
    trigger: ReloadTrigger,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<ReloadOutcome> {
    loop {
        {
            let mut state = shared.state.lock().await;
            match shared.file.read_lines().await {
                Ok(contents) => {
                    if trigger == ReloadTrigger::External && state.is_own_write(&contents.digest) {
                        debug!("[watcher] Ignoring change event for our own write");
                        return Some(ReloadOutcome::OwnWrite);
                    }
                    let count = shared.reconcile(&mut state, &contents.lines).await;
                    return Some(ReloadOutcome::Reloaded(count));
                }
                Err(e) if e.is_busy() => {
                    debug!("[watcher] Hosts file busy, retrying: {}", e);
                }
                Err(e) => {
                    warn!("[watcher] Failed to read hosts file, retrying: {}", e);
                }
            }
        }
        if !wait_or_shutdown(shared.config.debounce(), shutdown).await {
            return None;
        }
    }
}

/// Serve reload triggers until shutdown or until every sender is gone.
pub(crate) async fn run_watch_loop(
    shared: Arc<Shared>,
    mut triggers: mpsc::Receiver<ReloadTrigger>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let mut trigger = tokio::select! {
            received = triggers.recv() => match received {
                Some(trigger) => trigger,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        if !wait_or_shutdown(shared.config.debounce(), &mut shutdown).await {
            break;
        }
        // Everything that arrived during the debounce is served by this read.
        while let Ok(next) = triggers.try_recv() {
            if next == ReloadTrigger::Manual {
                trigger = ReloadTrigger::Manual;
            }
        }

        if reload_with_retry(&shared, trigger, &mut shutdown)
            .await
            .is_none()
        {
            break;
        }
    }
    debug!("[watcher] Watch loop stopped");
}
