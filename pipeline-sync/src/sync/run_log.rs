//! Run logger: persists the sync run record and the source's sync state.
//!
//! Failures here are logged and swallowed. A broken audit write must never
//! replace the outcome of the sync itself.

use super::models::{SourceSyncState, SyncRunRecord};
use super::store::EntityStore;

/// Longest error summary stored on a source
const MAX_SUMMARY_CHARS: usize = 500;

pub struct RunLogger<'a> {
    store: &'a dyn EntityStore,
}

impl<'a> RunLogger<'a> {
    pub fn new(store: &'a dyn EntityStore) -> Self {
        Self { store }
    }

    /// Write the run record, then stamp the source. Returns whether both
    /// writes went through.
    pub async fn record(&self, run: &SyncRunRecord) -> bool {
        let mut persisted = true;

        if let Err(e) = self.store.insert_run(run).await {
            log::error!(
                "Failed to write sync run {} for source {}: {:#}",
                run.id,
                run.source_id,
                e
            );
            persisted = false;
        }

        let state = SourceSyncState {
            last_synced_at: run.finished_at,
            outcome: run.outcome,
            error_summary: summarize_errors(&run.errors),
        };
        if let Err(e) = self
            .store
            .update_source_sync_state(run.source_id, &state)
            .await
        {
            log::error!(
                "Failed to update sync state of source {}: {:#}",
                run.source_id,
                e
            );
            persisted = false;
        }

        log::info!(
            "Sync run {} for source {}: {} ({} created, {} updated, {} deleted, {} skipped, {} errors) in {}ms",
            run.id,
            run.source_id,
            run.outcome,
            run.created,
            run.updated,
            run.deleted,
            run.skipped,
            run.errors.len(),
            run.duration_ms
        );

        persisted
    }
}

/// First error plus a count of the rest, bounded in length
pub fn summarize_errors(errors: &[String]) -> Option<String> {
    let first = errors.first()?;
    let summary = match errors.len() {
        1 => first.clone(),
        n => format!("{} (and {} more)", first, n - 1),
    };

    if summary.chars().count() > MAX_SUMMARY_CHARS {
        let truncated: String = summary.chars().take(MAX_SUMMARY_CHARS - 3).collect();
        Some(format!("{}...", truncated))
    } else {
        Some(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::models::{RunOutcome, SyncMode};
    use crate::sync::testing::{Fail, MemoryStore, source};
    use chrono::Utc;

    fn run(errors: Vec<String>) -> SyncRunRecord {
        let now = Utc::now();
        SyncRunRecord {
            id: "run-1".to_string(),
            source_id: 1,
            mode: SyncMode::Full,
            outcome: RunOutcome::from_errors(&errors),
            total: 4,
            created: 1,
            updated: 1,
            deleted: 0,
            skipped: 0,
            errors,
            warnings: Vec::new(),
            error_kind: None,
            duration_ms: 12,
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn test_summarize_errors() {
        assert_eq!(summarize_errors(&[]), None);
        assert_eq!(
            summarize_errors(&["a".to_string()]),
            Some("a".to_string())
        );
        assert_eq!(
            summarize_errors(&["a".to_string(), "b".to_string(), "c".to_string()]),
            Some("a (and 2 more)".to_string())
        );
        let long = "x".repeat(800);
        assert_eq!(
            summarize_errors(&[long]).unwrap().chars().count(),
            MAX_SUMMARY_CHARS
        );
    }

    #[tokio::test]
    async fn test_record_writes_run_and_source_state() {
        let store = MemoryStore::new();
        store.seed_source(source(1));

        let ok = RunLogger::new(&store)
            .record(&run(vec!["create D-1 (row 4): boom".to_string()]))
            .await;

        assert!(ok);
        assert_eq!(store.runs().len(), 1);
        let source = store.source(1).unwrap();
        assert_eq!(source.last_sync_outcome, Some(RunOutcome::Partial));
        assert_eq!(
            source.last_sync_error.as_deref(),
            Some("create D-1 (row 4): boom")
        );
        assert!(source.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn test_write_failures_are_swallowed() {
        let store = MemoryStore::new();
        store.seed_source(source(1));
        store.fail_on(Fail::InsertRun);

        let ok = RunLogger::new(&store).record(&run(Vec::new())).await;

        assert!(!ok);
        // Source state is still updated after the run insert failed
        assert_eq!(
            store.source(1).unwrap().last_sync_outcome,
            Some(RunOutcome::Success)
        );
    }
}
