//! Shared bookkeeping between the watch loop and the persist engine.
//!
//! `SyncState` lives behind the coordinator's exclusive lock and tracks
//! what we last wrote, so the watch loop can recognize the echo of its own
//! persist pass. `NotificationGate` is the switch the persist engine flips
//! while it writes, so file events raised by that write are dropped at the
//! source.

use crate::store::InvalidRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct SyncState {
    /// Digest of the content our last persist pass wrote.
    pub last_written_digest: Option<String>,
    pub last_reload: Option<DateTime<Utc>>,
    pub last_persist: Option<DateTime<Utc>>,
    /// Records the last persist pass held back; used to report changes only.
    pub last_blocked: Vec<InvalidRecord>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether content with this digest is exactly what we last wrote.
    pub fn is_own_write(&self, digest: &str) -> bool {
        self.last_written_digest.as_deref() == Some(digest)
    }
}

/// Point-in-time summary for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub hosts_path: PathBuf,
    pub records: usize,
    pub pending: usize,
    pub blocked: Vec<InvalidRecord>,
    pub last_reload: Option<DateTime<Utc>>,
    pub last_persist: Option<DateTime<Utc>>,
    pub watching: bool,
}

/// Lets file events through unless a write is in progress.
#[derive(Debug, Clone)]
pub struct NotificationGate {
    open: Arc<AtomicBool>,
}

impl NotificationGate {
    pub fn new() -> Self {
        Self {
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Close the gate until the returned guard is dropped.
    pub fn pause(&self) -> GatePause {
        self.open.store(false, Ordering::SeqCst);
        GatePause {
            open: self.open.clone(),
        }
    }
}

impl Default for NotificationGate {
    fn default() -> Self {
        Self::new()
    }
}

#[must_use = "notifications resume as soon as the guard is dropped"]
pub struct GatePause {
    open: Arc<AtomicBool>,
}

impl Drop for GatePause {
    fn drop(&mut self) {
        self.open.store(true, Ordering::SeqCst);
    }
}
