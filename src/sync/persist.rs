//! Persist engine: writes pending record changes back into the hosts file.
//!
//! A pass reads the current file, then
//! 1. overwrites the lines of dirty records that already have one,
//! 2. appends dirty records that were never written,
//! 3. removes the lines of deleted records.
//!
//! Invalid dirty records are held back and stay dirty. Removing a line
//! shifts every line below it, so a pass that removes anything finishes
//! with a full reload instead of renumbering records in place.

use super::coordinator::Shared;
use super::state::SyncState;
use crate::codec::LineCodec;
use crate::error::SyncError;
use crate::gateway::LineOrigin;
use crate::record::{HostRecord, RecordId};
use crate::store::{InvalidRecord, StoreEvent, WrittenRecord};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// What a persist pass would do to a set of file lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistPlan {
    /// The file lines after all three passes.
    pub lines: Vec<String>,
    /// Where each entry of `lines` came from in the input.
    pub origins: Vec<LineOrigin>,
    /// Records written by passes 1 and 2, with the line they now occupy.
    pub written: Vec<WrittenRecord>,
    /// Deleted records that were never written; they just leave the store.
    pub removed: Vec<RecordId>,
    /// Number of lines removed by pass 3.
    pub removed_lines: usize,
    pub blocked: Vec<InvalidRecord>,
    /// Records whose line no longer holds what we loaded from it.
    pub collisions: Vec<RecordId>,
    pub must_reload: bool,
}

impl PersistPlan {
    pub fn changes_file(&self) -> bool {
        !self.written.is_empty() || self.removed_lines > 0
    }
}

/// Result of one persist pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistReport {
    /// Nothing needed writing, the file was not touched.
    pub skipped: bool,
    pub updated: usize,
    pub appended: usize,
    pub removed: usize,
    pub blocked: Vec<InvalidRecord>,
    pub collisions: Vec<RecordId>,
    pub reloaded: bool,
}

/// Whether the record gives a persist pass something to write.
fn needs_write(record: &HostRecord) -> bool {
    record.deleted || (record.dirty && record.is_valid())
}

fn blocked_records(records: &[HostRecord]) -> Vec<InvalidRecord> {
    records
        .iter()
        .filter(|r| r.dirty && !r.deleted)
        .filter_map(|r| {
            r.validate().err().map(|reason| InvalidRecord {
                id: r.id,
                reason,
            })
        })
        .collect()
}

/// Whether `line` still holds the text the record was loaded from.
fn owns_line(record: &HostRecord, lines: &[String], line: usize) -> bool {
    match lines.get(line) {
        Some(current) => record
            .source_text
            .as_deref()
            .map_or(true, |text| current.trim() == text),
        None => false,
    }
}

/// Apply pending records to `lines`.
pub fn plan_persist(records: &[HostRecord], lines: Vec<String>, codec: &LineCodec) -> PersistPlan {
    let mut plan = PersistPlan {
        origins: (0..lines.len()).map(LineOrigin::Kept).collect(),
        lines,
        blocked: blocked_records(records),
        ..PersistPlan::default()
    };
    let writable = |r: &&HostRecord| r.dirty && !r.deleted && r.is_valid();

    for record in records.iter().filter(writable) {
        let Some(line) = record.source_line else {
            continue;
        };
        if !owns_line(record, &plan.lines, line) {
            plan.collisions.push(record.id);
            continue;
        }
        let text = codec.format(record);
        plan.lines[line] = text.clone();
        plan.origins[line] = match plan.origins[line] {
            LineOrigin::Kept(src) => LineOrigin::Replaced(src),
            origin => origin,
        };
        plan.written.push(WrittenRecord {
            id: record.id,
            revision: record.revision,
            line,
            text,
        });
    }

    for record in records
        .iter()
        .filter(writable)
        .filter(|r| r.source_line.is_none())
    {
        let text = codec.format(record);
        plan.lines.push(text.clone());
        plan.origins.push(LineOrigin::New);
        plan.written.push(WrittenRecord {
            id: record.id,
            revision: record.revision,
            line: plan.lines.len() - 1,
            text,
        });
    }

    let mut doomed = Vec::new();
    for record in records.iter().filter(|r| r.deleted) {
        match record.source_line {
            Some(line) if owns_line(record, &plan.lines, line) => doomed.push(line),
            Some(_) => plan.collisions.push(record.id),
            None => plan.removed.push(record.id),
        }
    }
    doomed.sort_unstable();
    doomed.dedup();
    // Highest first so earlier removals do not shift later ones.
    for line in doomed.iter().rev() {
        plan.lines.remove(*line);
        plan.origins.remove(*line);
    }
    plan.removed_lines = doomed.len();

    // A collision means the file changed under us; reload rather than keep
    // writing against line numbers that are known to be stale.
    plan.must_reload = plan.removed_lines > 0 || !plan.collisions.is_empty();
    plan
}

/// Announce held-back records when the set changes.
fn report_blocked(shared: &Shared, state: &mut SyncState, blocked: &[InvalidRecord]) {
    if state.last_blocked == blocked {
        return;
    }
    for invalid in blocked {
        warn!(
            "[persist] Not writing record {}: {}",
            invalid.id, invalid.reason
        );
    }
    state.last_blocked = blocked.to_vec();
    shared
        .store
        .emit(StoreEvent::PersistBlocked(blocked.to_vec()));
}

/// Run one persist pass.
///
/// On a read or write failure nothing is committed to the store, so the
/// next pass retries the same work.
pub(crate) async fn persist_pass(shared: &Shared) -> Result<PersistReport, SyncError> {
    let records = shared.store.snapshot().await;
    if !records.iter().any(needs_write) {
        let blocked = blocked_records(&records);
        let mut state = shared.state.lock().await;
        report_blocked(shared, &mut state, &blocked);
        return Ok(PersistReport {
            skipped: true,
            blocked,
            ..PersistReport::default()
        });
    }

    let mut state = shared.state.lock().await;
    let current = shared.file.read_lines().await?;
    // Snapshot again: edits may have landed while we waited for the lock.
    let records = shared.store.snapshot().await;
    let plan = plan_persist(&records, current.lines.clone(), &shared.codec);

    if plan.changes_file() {
        let pause = shared.gate.pause();
        let digest = shared
            .file
            .write_lines(&current.rebuild(plan.lines.clone(), &plan.origins))
            .await?;
        drop(pause);
        state.last_written_digest = Some(digest);
        state.last_persist = Some(Utc::now());
    }

    shared.store.commit_persist(&plan.written, &plan.removed).await;
    report_blocked(shared, &mut state, &plan.blocked);

    let appended = plan
        .written
        .iter()
        .filter(|w| w.line >= current.lines.len())
        .count();
    let report = PersistReport {
        skipped: false,
        updated: plan.written.len() - appended,
        appended,
        removed: plan.removed_lines + plan.removed.len(),
        blocked: plan.blocked.clone(),
        collisions: plan.collisions.clone(),
        reloaded: plan.must_reload,
    };

    if plan.changes_file() {
        info!(
            "[persist] Wrote {:?}: {} updated, {} appended, {} removed",
            shared.file.path(),
            report.updated,
            report.appended,
            plan.removed_lines
        );
        shared.store.emit(StoreEvent::Persisted {
            written: plan.written.len(),
            removed: report.removed,
        });
    }
    if !plan.collisions.is_empty() {
        warn!(
            "[persist] {} record(s) no longer match their line in {:?}; reloading",
            plan.collisions.len(),
            shared.file.path()
        );
    }
    if plan.must_reload {
        // Reconcile from what was just written rather than waiting for a
        // file event, which the gate may have swallowed.
        shared.reconcile(&mut state, &plan.lines).await;
    }

    Ok(report)
}

/// Run persist passes on a fixed cadence until shutdown.
pub(crate) async fn run_persist_loop(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(shared.config.persist_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = persist_pass(&shared).await {
                    warn!("[persist] Persist pass failed, retrying next tick: {}", e);
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!("[persist] Persist loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse_line;
    use crate::record::FieldEdit;

    fn lines(text: &[&str]) -> Vec<String> {
        text.iter().map(|s| s.to_string()).collect()
    }

    fn load(file: &[String]) -> Vec<HostRecord> {
        file.iter()
            .enumerate()
            .filter_map(|(ix, line)| parse_line(line, ix))
            .filter(HostRecord::is_valid)
            .collect()
    }

    #[test]
    fn test_overwrites_dirty_line_in_place() {
        let file = lines(&["127.0.0.1 localhost", "", "10.0.0.1 db"]);
        let mut records = load(&file);
        records[1].apply(FieldEdit::Enabled(false));

        let plan = plan_persist(&records, file, &LineCodec::new(0, 0));
        assert_eq!(plan.lines, lines(&["127.0.0.1 localhost", "", "#10.0.0.1 db"]));
        assert_eq!(plan.written.len(), 1);
        assert_eq!(plan.written[0].line, 2);
        assert_eq!(
            plan.origins,
            vec![LineOrigin::Kept(0), LineOrigin::Kept(1), LineOrigin::Replaced(2)]
        );
        assert!(!plan.must_reload);
    }

    #[test]
    fn test_skips_invalid_dirty_record() {
        let file = lines(&["127.0.0.1 localhost"]);
        let mut records = load(&file);
        records[0].apply(FieldEdit::Address("not-an-ip".to_string()));
        records.push(HostRecord::with_mapping("also-bad", "x", None));

        let plan = plan_persist(&records, file.clone(), &LineCodec::default());
        assert_eq!(plan.lines, file);
        assert!(plan.written.is_empty());
        assert_eq!(plan.blocked.len(), 2);
        assert!(!plan.changes_file());
    }

    #[test]
    fn test_appends_new_record() {
        let file = lines(&["127.0.0.1 localhost", "::1 ip6-localhost"]);
        let mut records = load(&file);
        records.push(HostRecord::with_mapping("10.0.0.9", "new", None));

        let plan = plan_persist(&records, file, &LineCodec::new(0, 0));
        assert_eq!(plan.lines.len(), 3);
        assert_eq!(plan.lines[2], "10.0.0.9 new");
        assert_eq!(plan.written[0].line, 2);
        assert!(!plan.must_reload);
    }

    #[test]
    fn test_removes_deleted_lines_highest_first() {
        let file = lines(&["10.0.0.1 a", "10.0.0.2 b", "10.0.0.3 c", "10.0.0.4 d"]);
        let mut records = load(&file);
        records[1].deleted = true;
        records[2].deleted = true;

        let plan = plan_persist(&records, file, &LineCodec::default());
        assert_eq!(plan.lines, lines(&["10.0.0.1 a", "10.0.0.4 d"]));
        assert_eq!(plan.origins, vec![LineOrigin::Kept(0), LineOrigin::Kept(3)]);
        assert_eq!(plan.removed_lines, 2);
        assert!(plan.must_reload);
    }

    #[test]
    fn test_deleted_unwritten_record_leaves_file_alone() {
        let file = lines(&["10.0.0.1 a"]);
        let mut records = load(&file);
        let mut fresh = HostRecord::with_mapping("10.0.0.2", "b", None);
        fresh.deleted = true;
        let fresh_id = fresh.id;
        records.push(fresh);

        let plan = plan_persist(&records, file.clone(), &LineCodec::default());
        assert_eq!(plan.lines, file);
        assert_eq!(plan.removed, vec![fresh_id]);
        assert!(plan.written.is_empty());
        assert!(!plan.must_reload);
    }

    #[test]
    fn test_deletion_wins_over_edit() {
        let file = lines(&["10.0.0.1 a", "10.0.0.2 b"]);
        let mut records = load(&file);
        records[0].apply(FieldEdit::Name("renamed".to_string()));
        records[0].deleted = true;

        let plan = plan_persist(&records, file, &LineCodec::default());
        assert_eq!(plan.lines, lines(&["10.0.0.2 b"]));
        assert!(plan.written.is_empty());
    }

    #[test]
    fn test_line_changed_underneath_is_a_collision() {
        let loaded = lines(&["10.0.0.1 a", "10.0.0.2 b"]);
        let mut records = load(&loaded);
        records[1].apply(FieldEdit::Name("b2".to_string()));

        // Someone inserted a line above b since we loaded.
        let current = lines(&["10.0.0.0 z", "10.0.0.1 a", "10.0.0.2 b"]);
        let plan = plan_persist(&records, current.clone(), &LineCodec::default());
        assert_eq!(plan.lines, current);
        assert_eq!(plan.collisions, vec![records[1].id]);
        assert!(plan.must_reload);
    }

    #[test]
    fn test_line_beyond_end_is_a_collision() {
        let loaded = lines(&["10.0.0.1 a", "10.0.0.2 b"]);
        let mut records = load(&loaded);
        records[1].deleted = true;

        let plan = plan_persist(&records, lines(&["10.0.0.1 a"]), &LineCodec::default());
        assert_eq!(plan.removed_lines, 0);
        assert_eq!(plan.collisions, vec![records[1].id]);
    }
}
