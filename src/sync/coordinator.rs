//! Synchronization coordinator.
//!
//! Owns the record store, the backing file and the exclusive lock that
//! serializes whole-store replacement and file reads/writes between the
//! watch loop and the persist engine. Record edits go straight to the
//! store and are not serialized against either loop.

use super::persist::{persist_pass, run_persist_loop, PersistReport};
use super::state::{NotificationGate, SyncState, SyncStatus};
use super::watcher::{run_watch_loop, watch_file, ReloadTrigger};
use crate::codec::LineCodec;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::gateway::HostsFile;
use crate::record::HostRecord;
use crate::store::RecordStore;
use chrono::Utc;
use notify::RecommendedWatcher;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

const TRIGGER_CAPACITY: usize = 16;

/// State shared by the coordinator and its background tasks.
pub(crate) struct Shared {
    pub(crate) config: SyncConfig,
    pub(crate) file: HostsFile,
    pub(crate) codec: LineCodec,
    pub(crate) store: Arc<RecordStore>,
    /// The exclusive reconciliation lock.
    pub(crate) state: Mutex<SyncState>,
    pub(crate) gate: NotificationGate,
}

impl Shared {
    /// Replace the store with the valid records found in `lines`.
    ///
    /// Callers must hold `state`; taking it as `&mut` enforces that.
    pub(crate) async fn reconcile(&self, state: &mut SyncState, lines: &[String]) -> usize {
        let records: Vec<HostRecord> = lines
            .iter()
            .enumerate()
            .filter_map(|(ix, line)| self.codec.parse(line, ix))
            .filter(HostRecord::is_valid)
            .collect();
        let count = records.len();

        self.store.replace_all(records).await;
        state.last_reload = Some(Utc::now());
        state.last_blocked.clear();

        info!(
            "[watcher] Loaded {} records from {:?}",
            count,
            self.file.path()
        );
        count
    }
}

/// Keeps a [`RecordStore`] and a hosts file in step.
///
/// Build with [`new`](Self::new) to drive reloads and persist passes by
/// hand, or [`start`](Self::start) to also watch the file and persist on a
/// timer. Call [`shutdown`](Self::shutdown) to stop the background tasks and
/// flush pending edits.
pub struct HostsSync {
    shared: Arc<Shared>,
    triggers: mpsc::Sender<ReloadTrigger>,
    trigger_rx: Option<mpsc::Receiver<ReloadTrigger>>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    watcher: Option<RecommendedWatcher>,
}

impl HostsSync {
    pub fn new(config: SyncConfig) -> Result<Self, SyncError> {
        let file = HostsFile::new(config.hosts_path()?);
        let (triggers, trigger_rx) = mpsc::channel(TRIGGER_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            codec: config.codec(),
            config,
            file,
            store: Arc::new(RecordStore::new()),
            state: Mutex::new(SyncState::new()),
            gate: NotificationGate::new(),
        });

        Ok(Self {
            shared,
            triggers,
            trigger_rx: Some(trigger_rx),
            shutdown,
            tasks: Vec::new(),
            watcher: None,
        })
    }

    /// Create and start watching, with an initial load queued.
    pub fn start(config: SyncConfig) -> Result<Self, SyncError> {
        let mut sync = Self::new(config)?;
        sync.spawn()?;
        Ok(sync)
    }

    /// Start the file watcher, the watch loop and the persist loop.
    pub fn spawn(&mut self) -> Result<(), SyncError> {
        let trigger_rx = self.trigger_rx.take().ok_or(SyncError::AlreadyStarted)?;

        self.watcher = Some(watch_file(
            self.shared.file.path(),
            self.shared.gate.clone(),
            self.triggers.clone(),
        )?);

        self.tasks.push(tokio::spawn(run_watch_loop(
            self.shared.clone(),
            trigger_rx,
            self.shutdown.subscribe(),
        )));
        self.tasks.push(tokio::spawn(run_persist_loop(
            self.shared.clone(),
            self.shutdown.subscribe(),
        )));

        info!("[watcher] Watching {:?}", self.shared.file.path());
        self.request_manual_refresh();
        Ok(())
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.shared.store
    }

    /// Queue a reload through the watch loop. Requests made before
    /// [`spawn`](Self::spawn) are served once the loop starts.
    pub fn request_manual_refresh(&self) {
        if self.triggers.try_send(ReloadTrigger::Manual).is_err() {
            // Queue full: a reload is already pending and will pick this up.
            tracing::debug!("[watcher] Refresh already queued");
        }
    }

    /// Reload now with a single read, bypassing the debounce and the retry
    /// policy of the watch loop.
    pub async fn reload_now(&self) -> Result<usize, SyncError> {
        let mut state = self.shared.state.lock().await;
        let contents = self.shared.file.read_lines().await?;
        Ok(self.shared.reconcile(&mut state, &contents.lines).await)
    }

    /// Run one persist pass now.
    pub async fn persist(&self) -> Result<PersistReport, SyncError> {
        persist_pass(&self.shared).await
    }

    pub async fn status(&self) -> SyncStatus {
        let records = self.shared.store.snapshot().await;
        let state = self.shared.state.lock().await;
        SyncStatus {
            hosts_path: self.shared.file.path().to_path_buf(),
            records: records.len(),
            pending: records.iter().filter(|r| r.is_pending()).count(),
            blocked: state.last_blocked.clone(),
            last_reload: state.last_reload,
            last_persist: state.last_persist,
            watching: self.watcher.is_some(),
        }
    }

    /// Stop the background tasks, then run a final persist pass.
    pub async fn shutdown(mut self) -> Result<PersistReport, SyncError> {
        let _ = self.shutdown.send(true);
        drop(self.watcher.take());

        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                warn!("[watcher] Background task ended abnormally: {}", e);
            }
        }

        let report = persist_pass(&self.shared).await?;
        info!("[persist] Final persist complete");
        Ok(report)
    }
}

impl Drop for HostsSync {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
