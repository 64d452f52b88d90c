//! SQLite-backed entity store

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::time::Duration;

use super::{archive, leases, records, runs, sources};
use crate::sync::models::{
    ArchivedRecord, Field, MonthlyForecast, PipelineRecord, SourceDescriptor, SourceSyncState,
    SyncRunRecord,
};
use crate::sync::store::{EntityStore, LeaseAttempt};

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl EntityStore for SqliteStore {
    async fn get_source(&self, source_id: i64) -> Result<Option<SourceDescriptor>> {
        sources::get_source(&self.pool, source_id).await
    }

    async fn list_records(&self, source_id: i64) -> Result<Vec<PipelineRecord>> {
        records::list_records(&self.pool, source_id).await
    }

    async fn insert_record(&self, record: &PipelineRecord) -> Result<i64> {
        records::insert_record(&self.pool, record).await
    }

    async fn update_record(
        &self,
        id: i64,
        record: &PipelineRecord,
        fields: &[Field],
    ) -> Result<()> {
        records::update_record(&self.pool, id, record, fields).await
    }

    async fn delete_record(&self, id: i64) -> Result<()> {
        records::delete_record(&self.pool, id).await
    }

    async fn get_record_snapshot(&self, id: i64) -> Result<Option<serde_json::Value>> {
        records::get_record_snapshot(&self.pool, id).await
    }

    async fn list_children(&self, record_id: i64) -> Result<Vec<MonthlyForecast>> {
        records::list_children(&self.pool, record_id).await
    }

    async fn insert_archive(&self, archived: &ArchivedRecord) -> Result<i64> {
        archive::insert_archive(&self.pool, archived).await
    }

    async fn insert_run(&self, run: &SyncRunRecord) -> Result<()> {
        runs::insert_run(&self.pool, run).await
    }

    async fn update_source_sync_state(
        &self,
        source_id: i64,
        state: &SourceSyncState,
    ) -> Result<()> {
        sources::update_sync_state(&self.pool, source_id, state).await
    }

    async fn acquire_lease(
        &self,
        source_id: i64,
        holder: &str,
        ttl: Duration,
    ) -> Result<LeaseAttempt> {
        leases::acquire_lease(&self.pool, source_id, holder, ttl).await
    }

    async fn release_lease(&self, source_id: i64, holder: &str) -> Result<()> {
        leases::release_lease(&self.pool, source_id, holder).await?;
        Ok(())
    }
}
