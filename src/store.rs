//! The in-memory working set of host records.
//!
//! Field edits, insertions and deletion marks only take the store's own
//! short-lived lock, never the coordinator's reconciliation lock, so a UI
//! can call them at any time. Their effect survives until the next persist
//! pass, unless a reload replaces the whole store first.

use crate::error::SyncError;
use crate::record::{FieldEdit, HostRecord, RecordId, ValidationError};
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;

const EVENT_CAPACITY: usize = 256;

/// A dirty record the last persist pass could not write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidRecord {
    pub id: RecordId,
    pub reason: ValidationError,
}

/// Change notifications for observers of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// The store was rebuilt from the file; all previous ids are gone.
    Reloaded { count: usize },
    Added(RecordId),
    Changed(RecordId),
    Removed(RecordId),
    /// A persist pass wrote the file.
    Persisted { written: usize, removed: usize },
    /// Dirty records that are held back until they are corrected.
    PersistBlocked(Vec<InvalidRecord>),
}

/// Outcome of a persist pass for one record that was written to the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenRecord {
    pub id: RecordId,
    /// Revision the record had when it was formatted.
    pub revision: u64,
    pub line: usize,
    pub text: String,
}

pub struct RecordStore {
    records: RwLock<Vec<HostRecord>>,
    events: broadcast::Sender<StoreEvent>,
}

impl RecordStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            records: RwLock::new(Vec::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Change notifications as a stream. Lagging observers see a
    /// `BroadcastStreamRecvError` and should re-read [`snapshot`](Self::snapshot).
    pub fn stream(&self) -> BroadcastStream<StoreEvent> {
        BroadcastStream::new(self.events.subscribe())
    }

    pub(crate) fn emit(&self, event: StoreEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Copy of all records in display order.
    pub async fn snapshot(&self) -> Vec<HostRecord> {
        self.records.read().await.clone()
    }

    pub async fn get(&self, id: RecordId) -> Option<HostRecord> {
        self.records
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Whether any record is dirty or marked deleted.
    pub async fn has_pending(&self) -> bool {
        self.records.read().await.iter().any(HostRecord::is_pending)
    }

    /// Append a new blank record.
    pub async fn create_record(&self) -> RecordId {
        self.push(HostRecord::new()).await
    }

    /// Append a record as a new, never-written entry.
    pub async fn push(&self, mut record: HostRecord) -> RecordId {
        record.source_line = None;
        record.source_text = None;
        record.dirty = true;
        let id = record.id;
        self.records.write().await.push(record);
        self.emit(StoreEvent::Added(id));
        id
    }

    /// Insert a new blank record directly after `after` in display order.
    ///
    /// Display position is not persisted: the new record is appended to the
    /// end of the file on the next persist pass.
    pub async fn insert_record_after(&self, after: RecordId) -> Result<RecordId, SyncError> {
        let record = HostRecord::new();
        let id = record.id;
        {
            let mut records = self.records.write().await;
            let position = records
                .iter()
                .position(|r| r.id == after)
                .ok_or(SyncError::UnknownRecord(after))?;
            records.insert(position + 1, record);
        }
        self.emit(StoreEvent::Added(id));
        Ok(id)
    }

    pub async fn edit_field(&self, id: RecordId, edit: FieldEdit) -> Result<(), SyncError> {
        self.update(id, |record| record.apply(edit)).await
    }

    pub async fn set_enabled(&self, id: RecordId, enabled: bool) -> Result<(), SyncError> {
        self.edit_field(id, FieldEdit::Enabled(enabled)).await
    }

    /// Mark or unmark a record for removal on the next persist pass.
    pub async fn mark_deleted(&self, id: RecordId, deleted: bool) -> Result<(), SyncError> {
        self.update(id, |record| record.deleted = deleted).await
    }

    async fn update<F>(&self, id: RecordId, f: F) -> Result<(), SyncError>
    where
        F: FnOnce(&mut HostRecord),
    {
        {
            let mut records = self.records.write().await;
            let record = records
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or(SyncError::UnknownRecord(id))?;
            f(record);
        }
        self.emit(StoreEvent::Changed(id));
        Ok(())
    }

    /// Discard every record and take `records` in their place.
    pub(crate) async fn replace_all(&self, records: Vec<HostRecord>) {
        let count = records.len();
        *self.records.write().await = records;
        self.emit(StoreEvent::Reloaded { count });
    }

    /// Record the effects of a successful file write.
    ///
    /// A written record is only marked clean if it was not edited again
    /// while the pass was running; either way it now owns its line.
    pub(crate) async fn commit_persist(&self, written: &[WrittenRecord], removed: &[RecordId]) {
        let mut records = self.records.write().await;
        for w in written {
            if let Some(record) = records.iter_mut().find(|r| r.id == w.id) {
                record.source_line = Some(w.line);
                record.source_text = Some(w.text.clone());
                if record.revision == w.revision {
                    record.dirty = false;
                }
            }
        }
        // Only drop records that are still marked; an undelete during the
        // pass wins.
        let dropped: Vec<RecordId> = records
            .iter()
            .filter(|r| r.deleted && removed.contains(&r.id))
            .map(|r| r.id)
            .collect();
        records.retain(|r| !dropped.contains(&r.id));
        drop(records);

        for id in dropped {
            self.emit(StoreEvent::Removed(id));
        }
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(address: &str, name: &str, line: usize) -> HostRecord {
        let mut record = HostRecord::with_mapping(address, name, None);
        record.source_line = Some(line);
        record.dirty = false;
        record
    }

    #[tokio::test]
    async fn test_stream_yields_changes_in_order() {
        use tokio_stream::StreamExt;

        let store = RecordStore::new();
        let mut events = store.stream();

        let id = store.create_record().await;
        store
            .edit_field(id, FieldEdit::Name("db".to_string()))
            .await
            .unwrap();
        store.mark_deleted(id, true).await.unwrap();

        assert!(matches!(events.next().await, Some(Ok(StoreEvent::Added(a))) if a == id));
        assert!(matches!(events.next().await, Some(Ok(StoreEvent::Changed(c))) if c == id));
        assert!(matches!(events.next().await, Some(Ok(StoreEvent::Changed(c))) if c == id));
    }

    #[tokio::test]
    async fn test_create_and_insert_after() {
        let store = RecordStore::new();
        store
            .replace_all(vec![clean("10.0.0.1", "a", 0), clean("10.0.0.2", "b", 1)])
            .await;
        let first = store.snapshot().await[0].id;

        let inserted = store.insert_record_after(first).await.unwrap();
        let appended = store.create_record().await;

        let ids: Vec<_> = store.snapshot().await.iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), 4);
        assert_eq!(ids[1], inserted);
        assert_eq!(ids[3], appended);

        let record = store.get(inserted).await.unwrap();
        assert!(record.dirty);
        assert_eq!(record.source_line, None);
    }

    #[tokio::test]
    async fn test_edits_flag_pending_and_notify() {
        let store = RecordStore::new();
        store.replace_all(vec![clean("10.0.0.1", "a", 0)]).await;
        assert!(!store.has_pending().await);

        let mut events = store.subscribe();
        let id = store.snapshot().await[0].id;
        store.set_enabled(id, false).await.unwrap();

        assert!(store.has_pending().await);
        assert_eq!(events.recv().await.unwrap(), StoreEvent::Changed(id));
        assert!(!store.get(id).await.unwrap().enabled);
    }

    #[tokio::test]
    async fn test_unknown_record() {
        let store = RecordStore::new();
        let stale = RecordId::new();
        assert!(matches!(
            store.mark_deleted(stale, true).await,
            Err(SyncError::UnknownRecord(id)) if id == stale
        ));
        assert!(store.insert_record_after(stale).await.is_err());
    }

    #[tokio::test]
    async fn test_commit_keeps_records_edited_mid_pass_dirty() {
        let store = RecordStore::new();
        let a = store
            .push(HostRecord::with_mapping("10.0.0.1", "a", None))
            .await;
        let b = store
            .push(HostRecord::with_mapping("10.0.0.2", "b", None))
            .await;

        // Edited after the pass formatted it at revision 0.
        store
            .edit_field(b, FieldEdit::Name("b2".to_string()))
            .await
            .unwrap();

        let written = vec![
            WrittenRecord {
                id: a,
                revision: 0,
                line: 0,
                text: "10.0.0.1 a".to_string(),
            },
            WrittenRecord {
                id: b,
                revision: 0,
                line: 1,
                text: "10.0.0.2 b".to_string(),
            },
        ];
        store.commit_persist(&written, &[]).await;

        let a = store.get(a).await.unwrap();
        assert!(!a.dirty);
        assert_eq!(a.source_line, Some(0));

        let b = store.get(b).await.unwrap();
        assert!(b.dirty);
        assert_eq!(b.source_line, Some(1));
    }

    #[tokio::test]
    async fn test_commit_removes_only_still_deleted() {
        let store = RecordStore::new();
        let gone = store.create_record().await;
        let kept = store.create_record().await;
        store.mark_deleted(gone, true).await.unwrap();

        store.commit_persist(&[], &[gone, kept]).await;

        assert!(store.get(gone).await.is_none());
        assert!(store.get(kept).await.is_some());
    }
}
