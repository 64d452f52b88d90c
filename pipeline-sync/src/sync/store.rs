//! Entity store seam used by the engine, executor and run logger

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use super::models::{
    ArchivedRecord, Field, MonthlyForecast, PipelineRecord, SourceDescriptor, SourceSyncState,
    SyncRunRecord,
};

/// Outcome of trying to take the per-source run lease
#[derive(Debug, Clone, PartialEq)]
pub enum LeaseAttempt {
    Acquired,
    /// Someone else holds an unexpired lease
    Held {
        holder: String,
        expires_at: DateTime<Utc>,
    },
}

/// Persistence operations consumed by a sync run. Each call is independent:
/// a failed call leaves no partial state behind for the next one.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_source(&self, source_id: i64) -> Result<Option<SourceDescriptor>>;

    /// Live records of a source, ordered by id
    async fn list_records(&self, source_id: i64) -> Result<Vec<PipelineRecord>>;

    /// Insert a record, returning its new id
    async fn insert_record(&self, record: &PipelineRecord) -> Result<i64>;

    /// Write `fields` from `record` onto record `id`, along with its row
    /// number and composite key. Columns not owned by the sheet are left
    /// alone.
    async fn update_record(&self, id: i64, record: &PipelineRecord, fields: &[Field])
    -> Result<()>;

    async fn delete_record(&self, id: i64) -> Result<()>;

    /// Every persisted column of a record, untouched by sanitization, keyed
    /// by column name. `None` if the record no longer exists.
    async fn get_record_snapshot(&self, id: i64) -> Result<Option<serde_json::Value>>;

    /// Child rows owned by a record (monthly forecast breakdown)
    async fn list_children(&self, record_id: i64) -> Result<Vec<MonthlyForecast>>;

    async fn insert_archive(&self, archived: &ArchivedRecord) -> Result<i64>;

    async fn insert_run(&self, run: &SyncRunRecord) -> Result<()>;

    async fn update_source_sync_state(&self, source_id: i64, state: &SourceSyncState)
    -> Result<()>;

    /// Take the run lease for a source unless another holder's lease is
    /// still live
    async fn acquire_lease(&self, source_id: i64, holder: &str, ttl: Duration)
    -> Result<LeaseAttempt>;

    /// Drop the lease if `holder` still owns it
    async fn release_lease(&self, source_id: i64, holder: &str) -> Result<()>;
}

/// Whether a store failure is worth retrying: busy/locked database, pool
/// exhaustion, or an I/O hiccup.
pub fn is_transient_store_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| match cause.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::PoolTimedOut) | Some(sqlx::Error::Io(_)) => true,
        Some(sqlx::Error::Database(db)) => {
            let message = db.message().to_lowercase();
            message.contains("locked") || message.contains("busy")
        }
        _ => false,
    })
}
