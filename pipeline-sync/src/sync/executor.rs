//! Batch executor: applies a change set to the entity store.
//!
//! Operations run one at a time, deletes first, then updates, then creates,
//! so a row position is freed before another record moves into it. A failing
//! row is recorded and the batch moves on.

use anyhow::anyhow;
use chrono::Utc;

use super::models::{ArchivedRecord, ChangeSet, PendingUpdate, PipelineRecord};
use super::store::{EntityStore, is_transient_store_error};
use crate::resilience::RetryPolicy;

/// Reason stored on archive snapshots written by a sync
pub const REMOVED_FROM_SHEET: &str = "removed from sheet";

/// Result of one phase of a two-phase delete
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseResult {
    Succeeded,
    Failed(String),
    /// Not attempted
    Skipped,
}

impl PhaseResult {
    pub fn succeeded(&self) -> bool {
        matches!(self, PhaseResult::Succeeded)
    }
}

/// Per-phase outcome of deleting one record
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOutcome {
    pub record_id: Option<i64>,
    pub natural_key: String,
    /// Snapshot write (row and children read, archive insert)
    pub archived: PhaseResult,
    /// Removal of the live record
    pub deleted: PhaseResult,
}

impl DeleteOutcome {
    /// Removed, but no snapshot exists to recover it from
    pub fn deleted_without_backup(&self) -> bool {
        self.deleted.succeeded() && !self.archived.succeeded()
    }

    pub fn fully_archived(&self) -> bool {
        self.deleted.succeeded() && self.archived.succeeded()
    }
}

/// Counts and row-level errors from applying a change set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub errors: Vec<String>,
    pub deletions: Vec<DeleteOutcome>,
}

impl ExecutionReport {
    pub fn deleted_without_backup(&self) -> Vec<&DeleteOutcome> {
        self.deletions
            .iter()
            .filter(|d| d.deleted_without_backup())
            .collect()
    }
}

pub struct BatchExecutor<'a> {
    store: &'a dyn EntityStore,
    retry: &'a RetryPolicy,
    run_id: &'a str,
}

impl<'a> BatchExecutor<'a> {
    pub fn new(store: &'a dyn EntityStore, retry: &'a RetryPolicy, run_id: &'a str) -> Self {
        Self {
            store,
            retry,
            run_id,
        }
    }

    pub async fn apply(&self, changes: &ChangeSet) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        for record in &changes.to_delete {
            let outcome = self.delete(record).await;
            if outcome.deleted.succeeded() {
                report.deleted += 1;
            }
            if let PhaseResult::Failed(e) = &outcome.archived {
                let suffix = if outcome.deleted.succeeded() {
                    ", deleted without backup"
                } else {
                    ""
                };
                report.errors.push(format!(
                    "archive {} (row {}): {}{}",
                    outcome.natural_key, record.row_number, e, suffix
                ));
            }
            if let PhaseResult::Failed(e) = &outcome.deleted {
                report.errors.push(format!(
                    "delete {} (row {}): {}",
                    outcome.natural_key, record.row_number, e
                ));
            }
            report.deletions.push(outcome);
        }

        for update in &changes.to_update {
            match self.update(update).await {
                Ok(()) => report.updated += 1,
                Err(e) => {
                    log::warn!("Update of record {} failed: {:#}", update.id, e);
                    report.errors.push(format!(
                        "update {} (row {}): {:#}",
                        update.incoming.natural_key, update.incoming.row_number, e
                    ));
                }
            }
        }

        for record in &changes.to_create {
            match self.create(record).await {
                Ok(id) => {
                    log::debug!("Created record {} for row {}", id, record.row_number);
                    report.created += 1;
                }
                Err(e) => {
                    log::warn!("Create for row {} failed: {:#}", record.row_number, e);
                    report.errors.push(format!(
                        "create {} (row {}): {:#}",
                        record.natural_key, record.row_number, e
                    ));
                }
            }
        }

        log::info!(
            "Applied change set: {} created, {} updated, {} deleted, {} errors",
            report.created,
            report.updated,
            report.deleted,
            report.errors.len()
        );
        let unbacked = report.deleted_without_backup().len();
        if unbacked > 0 {
            log::warn!("{} record(s) deleted without an archive snapshot", unbacked);
        }

        report
    }

    async fn create(&self, record: &PipelineRecord) -> anyhow::Result<i64> {
        let label = format!("insert row {}", record.row_number);
        self.retry
            .execute(&label, is_transient_store_error, || {
                self.store.insert_record(record)
            })
            .await
    }

    async fn update(&self, update: &PendingUpdate) -> anyhow::Result<()> {
        log::debug!(
            "Updating record {} ({}): {:?}",
            update.id,
            update.reason,
            update.changed
        );
        let label = format!("update record {}", update.id);
        self.retry
            .execute(&label, is_transient_store_error, || {
                self.store
                    .update_record(update.id, &update.incoming, &update.changed)
            })
            .await
    }

    /// Snapshot then delete. The delete is attempted even if the snapshot
    /// could not be written.
    async fn delete(&self, record: &PipelineRecord) -> DeleteOutcome {
        let natural_key = record.natural_key.clone();

        let id = match record.id {
            Some(id) => id,
            None => {
                return DeleteOutcome {
                    record_id: None,
                    natural_key,
                    archived: PhaseResult::Skipped,
                    deleted: PhaseResult::Failed("record has no store id".to_string()),
                };
            }
        };

        let archived = match self.archive(id, record).await {
            Ok(archive_id) => {
                log::debug!("Archived record {} as snapshot {}", id, archive_id);
                PhaseResult::Succeeded
            }
            Err(e) => {
                log::warn!("Archive snapshot for record {} failed: {:#}", id, e);
                PhaseResult::Failed(format!("{:#}", e))
            }
        };

        let label = format!("delete record {}", id);
        let deleted = match self
            .retry
            .execute(&label, is_transient_store_error, || {
                self.store.delete_record(id)
            })
            .await
        {
            Ok(()) => PhaseResult::Succeeded,
            Err(e) => {
                log::warn!("Delete of record {} failed: {:#}", id, e);
                PhaseResult::Failed(format!("{:#}", e))
            }
        };

        DeleteOutcome {
            record_id: Some(id),
            natural_key,
            archived,
            deleted,
        }
    }

    async fn archive(&self, id: i64, record: &PipelineRecord) -> anyhow::Result<i64> {
        let snapshot = self
            .retry
            .execute(
                &format!("snapshot record {}", id),
                is_transient_store_error,
                || self.store.get_record_snapshot(id),
            )
            .await?
            .ok_or_else(|| anyhow!("record {} no longer exists", id))?;

        let children = self
            .retry
            .execute(
                &format!("list children of record {}", id),
                is_transient_store_error,
                || self.store.list_children(id),
            )
            .await?;

        let archived = ArchivedRecord {
            id: None,
            source_id: record.source_id,
            original_id: id,
            natural_key: record.natural_key.clone(),
            record: snapshot,
            children,
            reason: REMOVED_FROM_SHEET.to_string(),
            run_id: self.run_id.to_string(),
            archived_at: Utc::now(),
        };

        self.retry
            .execute(
                &format!("archive record {}", id),
                is_transient_store_error,
                || self.store.insert_archive(&archived),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::RetryConfig;
    use crate::sync::models::{Field, MatchReason, MonthlyForecast};
    use crate::sync::testing::{Fail, MemoryStore};

    fn record(row: u32, key: &str) -> PipelineRecord {
        let mut r = PipelineRecord::new(1, row);
        r.natural_key = key.to_string();
        r.status = "Verbal".to_string();
        r.owner = "Kim".to_string();
        r.advertiser = "Acme".to_string();
        r.refresh_derived();
        r
    }

    fn no_retry() -> RetryPolicy {
        RetryPolicy::new(RetryConfig::disabled())
    }

    #[tokio::test]
    async fn test_delete_archives_snapshot_with_children() {
        let store = MemoryStore::new();
        let id = store.seed_record(record(3, "K1"));
        store.seed_child(
            id,
            MonthlyForecast {
                month: "2026-07".to_string(),
                amount: 400.0,
            },
        );
        let stored = store.records_for(1);

        let changes = ChangeSet {
            to_delete: stored,
            ..ChangeSet::default()
        };
        let retry = no_retry();
        let report = BatchExecutor::new(&store, &retry, "run-1").apply(&changes).await;

        assert_eq!(report.deleted, 1);
        assert!(report.errors.is_empty());
        assert!(report.deletions[0].fully_archived());
        assert!(store.records_for(1).is_empty());

        let archives = store.archives();
        assert_eq!(archives.len(), 1);
        assert_eq!(archives[0].original_id, id);
        assert_eq!(archives[0].run_id, "run-1");
        assert_eq!(archives[0].reason, REMOVED_FROM_SHEET);
        assert_eq!(archives[0].children.len(), 1);
        assert_eq!(archives[0].record["natural_key"], "K1");
    }

    #[tokio::test]
    async fn test_unreadable_row_means_no_snapshot() {
        let store = MemoryStore::new();
        store.seed_record(record(3, "K1"));
        store.fail_on(Fail::RecordSnapshot);

        let changes = ChangeSet {
            to_delete: store.records_for(1),
            ..ChangeSet::default()
        };
        let retry = no_retry();
        let report = BatchExecutor::new(&store, &retry, "run-1").apply(&changes).await;

        assert!(store.archives().is_empty());
        assert!(report.deletions[0].deleted_without_backup());
        assert!(report.errors[0].starts_with("archive K1 (row 3): injected failure"));
    }

    #[tokio::test]
    async fn test_archive_failure_still_deletes_and_reports() {
        let store = MemoryStore::new();
        store.seed_record(record(3, "K1"));
        store.fail_on(Fail::InsertArchive);

        let changes = ChangeSet {
            to_delete: store.records_for(1),
            ..ChangeSet::default()
        };
        let retry = no_retry();
        let report = BatchExecutor::new(&store, &retry, "run-1").apply(&changes).await;

        assert_eq!(report.deleted, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("deleted without backup"));
        assert_eq!(report.deleted_without_backup().len(), 1);
        assert!(store.records_for(1).is_empty());
    }

    #[tokio::test]
    async fn test_row_failures_do_not_stop_the_batch() {
        let store = MemoryStore::new();
        let keep = store.seed_record(record(2, "A"));
        store.fail_on(Fail::InsertRow(5));

        let mut edited = record(2, "A");
        edited.owner = "Lee".to_string();
        edited.refresh_derived();
        edited.id = Some(keep);

        let changes = ChangeSet {
            to_create: vec![record(4, "B"), record(5, "C"), record(6, "D")],
            to_update: vec![PendingUpdate {
                id: keep,
                incoming: edited,
                reason: MatchReason::Position,
                changed: vec![Field::Owner],
            }],
            ..ChangeSet::default()
        };
        let retry = no_retry();
        let report = BatchExecutor::new(&store, &retry, "run-2").apply(&changes).await;

        assert_eq!(report.created, 2);
        assert_eq!(report.updated, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("create C (row 5)"));
        assert_eq!(store.records_for(1).len(), 3);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let store = MemoryStore::new();
        store.fail_transiently(2);

        let changes = ChangeSet {
            to_create: vec![record(2, "A")],
            ..ChangeSet::default()
        };
        let retry = RetryPolicy::new(RetryConfig {
            max_attempts: 3,
            ..RetryConfig::disabled()
        });
        let report = BatchExecutor::new(&store, &retry, "run-3").apply(&changes).await;

        assert_eq!(report.created, 1);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_deletes_run_before_creates_on_same_row() {
        let store = MemoryStore::new();
        store.seed_record(record(3, "OLD"));

        let changes = ChangeSet {
            to_create: vec![record(3, "NEW")],
            to_delete: store.records_for(1),
            ..ChangeSet::default()
        };
        let retry = no_retry();
        let report = BatchExecutor::new(&store, &retry, "run-4").apply(&changes).await;

        assert!(report.errors.is_empty(), "{:?}", report.errors);
        let remaining = store.records_for(1);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].natural_key, "NEW");
    }
}
