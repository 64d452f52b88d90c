//! Sync orchestrator
//!
//! One run: check the source is active, take the per-source lease, read the
//! sheet, sanitize, transform, load stored records, reconcile, apply, log.
//! The lease is released whatever the outcome.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::executor::BatchExecutor;
use super::models::{PipelineRecord, RunOutcome, SourceDescriptor, SyncMode, SyncRunRecord};
use super::reconcile::reconcile;
use super::run_log::RunLogger;
use super::sanitize::{sanitize_record, sanitize_row};
use super::schema::{GroupSchema, SchemaRegistry};
use super::store::{EntityStore, LeaseAttempt, is_transient_store_error};
use super::transform::{TransformContext, transform_rows};
use crate::error::SyncError;
use crate::resilience::{RetryConfig, RetryPolicy};
use crate::sheets::{SheetSource, normalize_row_request};

/// Engine tunables, usually taken from the config file
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Rows above the data range
    pub header_rows: u32,
    pub lease_ttl: Duration,
    /// Pause between sources in a batch run
    pub source_delay: Duration,
    pub retry: RetryConfig,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            header_rows: 1,
            lease_ttl: Duration::from_secs(900),
            source_delay: Duration::from_millis(2000),
            retry: RetryConfig::default(),
        }
    }
}

/// Trigger for one run. `row_numbers` selects an incremental run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRequest {
    pub source_id: i64,
    pub row_numbers: Option<Vec<u32>>,
}

impl SyncRequest {
    pub fn full(source_id: i64) -> Self {
        Self {
            source_id,
            row_numbers: None,
        }
    }

    pub fn rows(source_id: i64, rows: Vec<u32>) -> Self {
        Self {
            source_id,
            row_numbers: Some(rows),
        }
    }
}

/// What the caller gets back from a run that reached the executor
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSummary {
    pub run_id: String,
    pub source_id: i64,
    pub mode: SyncMode,
    /// No row-level errors
    pub success: bool,
    pub outcome: RunOutcome,
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub duration_ms: u64,
}

pub struct SyncEngine {
    reader: Arc<dyn SheetSource>,
    store: Arc<dyn EntityStore>,
    schemas: SchemaRegistry,
    settings: SyncSettings,
    retry: RetryPolicy,
}

/// Bookkeeping shared by every exit path of a locked run
struct RunContext<'a> {
    run_id: String,
    source: &'a SourceDescriptor,
    mode: SyncMode,
    started_at: chrono::DateTime<Utc>,
    clock: Instant,
}

impl RunContext<'_> {
    fn finish(&self, outcome: RunOutcome) -> SyncRunRecord {
        SyncRunRecord {
            id: self.run_id.clone(),
            source_id: self.source.id,
            mode: self.mode,
            outcome,
            total: 0,
            created: 0,
            updated: 0,
            deleted: 0,
            skipped: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            error_kind: None,
            duration_ms: self.clock.elapsed().as_millis() as u64,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

impl SyncEngine {
    pub fn new(
        reader: Arc<dyn SheetSource>,
        store: Arc<dyn EntityStore>,
        schemas: SchemaRegistry,
        settings: SyncSettings,
    ) -> Self {
        let retry = RetryPolicy::new(settings.retry.clone());
        Self {
            reader,
            store,
            schemas,
            settings,
            retry,
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Run one sync. Precondition failures and unreadable sources return
    /// `Err`; everything past the read returns a summary, with row-level
    /// failures listed in it.
    pub async fn run(&self, request: SyncRequest) -> Result<SyncSummary, SyncError> {
        let source = self
            .store
            .get_source(request.source_id)
            .await
            .map_err(SyncError::Store)?
            .ok_or(SyncError::SourceNotFound(request.source_id))?;

        if !source.sync_status.is_active() {
            return Err(SyncError::SourceNotActive {
                id: source.id,
                status: source.sync_status,
            });
        }

        let schema = self
            .schemas
            .get(&source.group_name)
            .ok_or_else(|| SyncError::UnknownGroup {
                source_id: source.id,
                group: source.group_name.clone(),
            })?;

        let run_id = Uuid::new_v4().to_string();
        match self
            .store
            .acquire_lease(source.id, &run_id, self.settings.lease_ttl)
            .await
            .map_err(SyncError::Store)?
        {
            LeaseAttempt::Acquired => {
                log::debug!("Run {} acquired lease on source {}", run_id, source.id)
            }
            LeaseAttempt::Held { holder, expires_at } => {
                return Err(SyncError::LeaseHeld {
                    source_id: source.id,
                    holder,
                    expires_at,
                });
            }
        }

        let result = self
            .run_locked(&source, schema, request.row_numbers.as_deref(), run_id.clone())
            .await;

        if let Err(e) = self.store.release_lease(source.id, &run_id).await {
            // The lease expires on its own after the TTL
            log::error!("Failed to release lease on source {}: {:#}", source.id, e);
        }

        result
    }

    async fn run_locked(
        &self,
        source: &SourceDescriptor,
        schema: &GroupSchema,
        rows: Option<&[u32]>,
        run_id: String,
    ) -> Result<SyncSummary, SyncError> {
        let ctx = RunContext {
            run_id,
            source,
            mode: if rows.is_some() {
                SyncMode::Incremental
            } else {
                SyncMode::Full
            },
            started_at: Utc::now(),
            clock: Instant::now(),
        };
        let first_row = self.settings.header_rows + 1;

        log::info!(
            "Starting {} sync {} of source {} ({} / '{}', group {})",
            ctx.mode.as_str(),
            ctx.run_id,
            source.id,
            source.spreadsheet_id,
            source.sheet_name,
            source.group_name
        );

        let requested: Option<Vec<u32>> = rows.map(|r| normalize_row_request(r, first_row));
        let read = match &requested {
            None => self.reader.fetch_range(source, first_row).await,
            Some(rows) => self.reader.fetch_rows(source, rows).await,
        };
        let raw = match read {
            Ok(raw) => raw,
            Err(e) => {
                log::error!("Reading source {} failed: {}", source.id, e);
                return Err(self.fail(&ctx, e.into()).await);
            }
        };

        let raw: Vec<_> = raw.into_iter().map(sanitize_row).collect();
        let transform_ctx = TransformContext {
            source_id: source.id,
            fiscal_year: source.fiscal_year,
            schema,
        };
        let batch = transform_rows(&raw, &transform_ctx);

        let stored = match self.load_stored(source.id, requested.as_deref()).await {
            Ok(stored) => stored,
            Err(e) => {
                log::error!("Loading stored records for source {} failed: {:#}", source.id, e);
                return Err(self.fail(&ctx, SyncError::Store(e)).await);
            }
        };

        let changes = reconcile(&batch.records, &stored);
        if changes.is_empty() {
            log::info!("Source {} is already in step with its sheet", source.id);
        }
        let report = BatchExecutor::new(self.store.as_ref(), &self.retry, &ctx.run_id)
            .apply(&changes)
            .await;

        let mut warnings = batch.warnings;
        warnings.extend(changes.warnings);

        let outcome = RunOutcome::from_errors(&report.errors);
        let run = SyncRunRecord {
            total: batch.records.len() + batch.skipped,
            created: report.created,
            updated: report.updated,
            deleted: report.deleted,
            skipped: batch.skipped,
            errors: report.errors,
            warnings,
            ..ctx.finish(outcome)
        };

        RunLogger::new(self.store.as_ref()).record(&run).await;

        Ok(SyncSummary {
            run_id: run.id,
            source_id: run.source_id,
            mode: run.mode,
            success: outcome == RunOutcome::Success,
            outcome,
            total: run.total,
            created: run.created,
            updated: run.updated,
            deleted: run.deleted,
            skipped: run.skipped,
            errors: run.errors,
            warnings: run.warnings,
            duration_ms: run.duration_ms,
        })
    }

    /// Stored records to reconcile against. An incremental run only sees
    /// records sitting on the requested rows.
    async fn load_stored(
        &self,
        source_id: i64,
        rows: Option<&[u32]>,
    ) -> anyhow::Result<Vec<PipelineRecord>> {
        let mut stored = self
            .retry
            .execute(
                &format!("list records of source {}", source_id),
                is_transient_store_error,
                || self.store.list_records(source_id),
            )
            .await?;

        if let Some(rows) = rows {
            let wanted: HashSet<u32> = rows.iter().copied().collect();
            stored.retain(|r| wanted.contains(&r.row_number));
        }

        stored.iter_mut().for_each(sanitize_record);
        log::info!("Loaded {} stored records for source {}", stored.len(), source_id);
        Ok(stored)
    }

    /// Log a failed run and hand the error back
    async fn fail(&self, ctx: &RunContext<'_>, error: SyncError) -> SyncError {
        let run = SyncRunRecord {
            errors: vec![error.to_string()],
            error_kind: Some(error.kind().to_string()),
            ..ctx.finish(RunOutcome::Failed)
        };
        RunLogger::new(self.store.as_ref()).record(&run).await;
        error
    }

    /// Sync several sources one after another, pausing `delay` between
    /// sources that were actually read. One source failing never stops the
    /// batch.
    pub async fn run_all(
        &self,
        source_ids: &[i64],
        delay: Duration,
    ) -> Vec<(i64, Result<SyncSummary, SyncError>)> {
        let mut results = Vec::with_capacity(source_ids.len());
        let mut previous_ran = false;

        for &source_id in source_ids {
            if previous_ran && !delay.is_zero() {
                log::debug!("Waiting {:?} before syncing source {}", delay, source_id);
                tokio::time::sleep(delay).await;
            }

            let result = self.run(SyncRequest::full(source_id)).await;
            previous_ran = match &result {
                Ok(_) => true,
                Err(e) => !e.is_precondition(),
            };

            match &result {
                Ok(summary) => log::info!(
                    "Source {}: {} ({} created, {} updated, {} deleted)",
                    source_id,
                    summary.outcome,
                    summary.created,
                    summary.updated,
                    summary.deleted
                ),
                Err(e) if e.is_precondition() => log::info!("Skipping source {}: {}", source_id, e),
                Err(e) => log::warn!("Source {} failed: {}", source_id, e),
            }
            results.push((source_id, result));
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheets::{RawCell, RawRow, SourceError, SourceErrorKind};
    use crate::sync::models::SyncStatus;
    use crate::sync::testing::{Fail, MemoryStore, StaticSheet, source};

    fn text(s: &str) -> RawCell {
        RawCell::Text(s.to_string())
    }

    fn deal(row: u32, key: &str, revenue: f64) -> RawRow {
        RawRow::new(
            row,
            vec![
                text(key),
                text("Acme"),
                RawCell::Empty,
                text("Video"),
                text("Verbal"),
                text("Dana Reyes"),
                RawCell::Empty,
                RawCell::Number(revenue),
            ],
        )
    }

    fn header() -> RawRow {
        RawRow::new(1, vec![text("Deal ID"), text("Advertiser"), text("Agency")])
    }

    struct Harness {
        sheet: Arc<StaticSheet>,
        store: Arc<MemoryStore>,
        engine: SyncEngine,
    }

    fn harness(rows: Vec<RawRow>) -> Harness {
        let sheet = Arc::new(StaticSheet::new(rows));
        let store = Arc::new(MemoryStore::new());
        store.seed_source(source(1));
        let settings = SyncSettings {
            retry: RetryConfig::disabled(),
            ..SyncSettings::default()
        };
        let engine = SyncEngine::new(
            sheet.clone(),
            store.clone(),
            SchemaRegistry::builtin(),
            settings,
        );
        Harness {
            sheet,
            store,
            engine,
        }
    }

    #[tokio::test]
    async fn test_full_sync_creates_then_is_idempotent() {
        let h = harness(vec![header(), deal(2, "D-1", 100.0), deal(3, "D-2", 200.0)]);

        let first = h.engine.run(SyncRequest::full(1)).await.unwrap();
        assert!(first.success);
        assert_eq!(first.created, 2);
        assert_eq!(first.total, 2);
        assert_eq!(h.store.records_for(1).len(), 2);

        let second = h.engine.run(SyncRequest::full(1)).await.unwrap();
        assert_eq!(
            (second.created, second.updated, second.deleted),
            (0, 0, 0)
        );

        let runs = h.store.runs();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].outcome, RunOutcome::Success);
        assert_ne!(runs[0].id, runs[1].id);
        assert!(!h.store.has_lease(1));
    }

    #[tokio::test]
    async fn test_edit_move_and_removal() {
        let h = harness(vec![
            header(),
            deal(2, "D-1", 100.0),
            deal(3, "D-2", 200.0),
            deal(4, "D-3", 300.0),
        ]);
        h.engine.run(SyncRequest::full(1)).await.unwrap();

        // D-1 edited, D-2 removed, D-3 moved down two rows
        h.sheet.set_rows(vec![
            header(),
            deal(2, "D-1", 150.0),
            RawRow::new(3, Vec::new()),
            RawRow::new(4, Vec::new()),
            RawRow::new(5, Vec::new()),
            deal(6, "D-3", 300.0),
        ]);
        let summary = h.engine.run(SyncRequest::full(1)).await.unwrap();

        assert_eq!(summary.updated, 2);
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.created, 0);

        let records = h.store.records_for(1);
        let d3 = records.iter().find(|r| r.natural_key == "D-3").unwrap();
        assert_eq!(d3.row_number, 6);
        let d1 = records.iter().find(|r| r.natural_key == "D-1").unwrap();
        assert_eq!(d1.forecast_revenue, Some(150.0));

        let archives = h.store.archives();
        assert_eq!(archives.len(), 1);
        assert_eq!(archives[0].natural_key, "D-2");
        assert_eq!(archives[0].run_id, summary.run_id);
    }

    #[tokio::test]
    async fn test_paused_source_fails_before_any_io() {
        let h = harness(vec![header(), deal(2, "D-1", 100.0)]);
        let mut paused = source(1);
        paused.sync_status = SyncStatus::Paused;
        h.store.seed_source(paused);

        let err = h.engine.run(SyncRequest::full(1)).await.unwrap_err();
        assert!(matches!(err, SyncError::SourceNotActive { .. }));
        assert!(h.store.runs().is_empty());
        assert!(h.store.records_for(1).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_source() {
        let h = harness(Vec::new());
        let err = h.engine.run(SyncRequest::full(99)).await.unwrap_err();
        assert!(matches!(err, SyncError::SourceNotFound(99)));
    }

    #[tokio::test]
    async fn test_read_failure_logs_failed_run() {
        let h = harness(Vec::new());
        h.sheet.fail_with(SourceError::new(
            SourceErrorKind::PermissionDenied,
            "HTTP 403: caller does not have permission",
        ));

        let err = h.engine.run(SyncRequest::full(1)).await.unwrap_err();
        assert_eq!(err.kind(), "permission_denied");

        let runs = h.store.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].outcome, RunOutcome::Failed);
        assert_eq!(runs[0].error_kind.as_deref(), Some("permission_denied"));
        assert_eq!(
            h.store.source(1).unwrap().last_sync_outcome,
            Some(RunOutcome::Failed)
        );
        assert!(!h.store.has_lease(1));
    }

    #[tokio::test]
    async fn test_held_lease_fails_fast() {
        let h = harness(vec![header(), deal(2, "D-1", 100.0)]);
        h.store.seed_lease(1, "other-run", chrono::Duration::minutes(5));

        let err = h.engine.run(SyncRequest::full(1)).await.unwrap_err();
        match err {
            SyncError::LeaseHeld { holder, .. } => assert_eq!(holder, "other-run"),
            other => panic!("unexpected error: {}", other),
        }
        assert!(h.store.records_for(1).is_empty());
        // The other holder's lease is left in place
        assert!(h.store.has_lease(1));
    }

    #[tokio::test]
    async fn test_expired_lease_is_taken_over() {
        let h = harness(vec![header(), deal(2, "D-1", 100.0)]);
        h.store.seed_lease(1, "crashed-run", chrono::Duration::minutes(-1));

        let summary = h.engine.run(SyncRequest::full(1)).await.unwrap();
        assert_eq!(summary.created, 1);
    }

    #[tokio::test]
    async fn test_row_errors_make_run_partial() {
        let h = harness(vec![header(), deal(2, "D-1", 100.0), deal(3, "D-2", 200.0)]);
        h.store.fail_on(Fail::InsertRow(3));

        let summary = h.engine.run(SyncRequest::full(1)).await.unwrap();

        assert!(!summary.success);
        assert_eq!(summary.outcome, RunOutcome::Partial);
        assert_eq!(summary.created, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(h.store.runs()[0].outcome, RunOutcome::Partial);
    }

    #[tokio::test]
    async fn test_incremental_sync_only_touches_requested_rows() {
        let h = harness(vec![
            header(),
            deal(2, "D-1", 100.0),
            deal(3, "D-2", 200.0),
            deal(4, "D-3", 300.0),
        ]);
        h.engine.run(SyncRequest::full(1)).await.unwrap();

        // Row 2 edited, row 3 cleared, row 4 also cleared but not requested
        h.sheet.set_rows(vec![header(), deal(2, "D-1", 175.0)]);
        let summary = h
            .engine
            .run(SyncRequest::rows(1, vec![3, 2, 2, 1]))
            .await
            .unwrap();

        assert_eq!(summary.mode, SyncMode::Incremental);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.deleted, 1);
        let remaining: Vec<String> = h
            .store
            .records_for(1)
            .into_iter()
            .map(|r| r.natural_key)
            .collect();
        assert_eq!(remaining, vec!["D-1".to_string(), "D-3".to_string()]);
    }

    #[tokio::test]
    async fn test_skipped_rows_are_warnings_not_errors() {
        let h = harness(vec![
            header(),
            deal(2, "D-1", 100.0),
            RawRow::new(3, vec![text("D-2"), text("Acme")]),
        ]);

        let summary = h.engine.run(SyncRequest::full(1)).await.unwrap();
        assert!(summary.success);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_run_all_continues_past_failures() {
        let h = harness(vec![header(), deal(2, "D-1", 100.0)]);
        let mut paused = source(2);
        paused.sync_status = SyncStatus::Paused;
        h.store.seed_source(paused);
        h.store.seed_source(source(3));

        let results = h.engine.run_all(&[1, 2, 3, 4], Duration::ZERO).await;

        assert_eq!(results.len(), 4);
        assert!(results[0].1.is_ok());
        assert!(matches!(
            results[1].1,
            Err(SyncError::SourceNotActive { .. })
        ));
        assert!(results[2].1.is_ok());
        assert!(matches!(results[3].1, Err(SyncError::SourceNotFound(4))));
    }

    #[tokio::test]
    async fn test_store_failure_loading_records_fails_run() {
        let h = harness(vec![header(), deal(2, "D-1", 100.0)]);
        h.store.fail_on(Fail::ListRecords);

        let err = h.engine.run(SyncRequest::full(1)).await.unwrap_err();
        assert_eq!(err.kind(), "store");
        assert_eq!(h.store.runs()[0].outcome, RunOutcome::Failed);
    }
}
