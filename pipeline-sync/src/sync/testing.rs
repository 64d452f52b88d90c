//! In-memory fakes for engine and executor tests

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use super::models::{
    ArchivedRecord, Field, MonthlyForecast, PipelineRecord, SourceDescriptor, SourceKind,
    SourceSyncState, SyncRunRecord, SyncStatus,
};
use super::store::{EntityStore, LeaseAttempt};
use crate::sheets::{RawRow, SheetSource, SourceError};

/// Store calls that can be made to fail
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fail {
    ListRecords,
    /// Insert of the record at this row number
    InsertRow(u32),
    UpdateRecord(i64),
    DeleteRecord(i64),
    ListChildren,
    RecordSnapshot,
    InsertArchive,
    InsertRun,
    UpdateSourceState,
}

#[derive(Default)]
struct State {
    next_id: i64,
    sources: HashMap<i64, SourceDescriptor>,
    records: BTreeMap<i64, PipelineRecord>,
    children: HashMap<i64, Vec<MonthlyForecast>>,
    archives: Vec<ArchivedRecord>,
    runs: Vec<SyncRunRecord>,
    leases: HashMap<i64, (String, chrono::DateTime<Utc>)>,
    failures: HashSet<Fail>,
    transient_failures: u32,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_source(&self, source: SourceDescriptor) {
        let mut state = self.state.lock().unwrap();
        state.sources.insert(source.id, source);
    }

    pub fn seed_record(&self, mut record: PipelineRecord) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        record.id = Some(id);
        state.records.insert(id, record);
        id
    }

    pub fn seed_child(&self, record_id: i64, child: MonthlyForecast) {
        let mut state = self.state.lock().unwrap();
        state.children.entry(record_id).or_default().push(child);
    }

    pub fn seed_lease(&self, source_id: i64, holder: &str, ttl: chrono::Duration) {
        let mut state = self.state.lock().unwrap();
        state
            .leases
            .insert(source_id, (holder.to_string(), Utc::now() + ttl));
    }

    pub fn fail_on(&self, fail: Fail) {
        self.state.lock().unwrap().failures.insert(fail);
    }

    /// The next `count` write calls fail with a retryable pool timeout
    pub fn fail_transiently(&self, count: u32) {
        self.state.lock().unwrap().transient_failures = count;
    }

    pub fn records_for(&self, source_id: i64) -> Vec<PipelineRecord> {
        let state = self.state.lock().unwrap();
        state
            .records
            .values()
            .filter(|r| r.source_id == source_id)
            .cloned()
            .collect()
    }

    pub fn archives(&self) -> Vec<ArchivedRecord> {
        self.state.lock().unwrap().archives.clone()
    }

    pub fn runs(&self) -> Vec<SyncRunRecord> {
        self.state.lock().unwrap().runs.clone()
    }

    pub fn source(&self, id: i64) -> Option<SourceDescriptor> {
        self.state.lock().unwrap().sources.get(&id).cloned()
    }

    pub fn has_lease(&self, source_id: i64) -> bool {
        self.state.lock().unwrap().leases.contains_key(&source_id)
    }

    fn check(state: &mut State, fail: Fail) -> Result<()> {
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(anyhow::Error::new(sqlx::Error::PoolTimedOut));
        }
        if state.failures.contains(&fail) {
            return Err(anyhow!("injected failure: {:?}", fail));
        }
        Ok(())
    }

    fn position_taken(state: &State, record: &PipelineRecord, except: Option<i64>) -> bool {
        state.records.iter().any(|(id, r)| {
            Some(*id) != except
                && r.source_id == record.source_id
                && r.row_number == record.row_number
        })
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get_source(&self, source_id: i64) -> Result<Option<SourceDescriptor>> {
        Ok(self.source(source_id))
    }

    async fn list_records(&self, source_id: i64) -> Result<Vec<PipelineRecord>> {
        if self.state.lock().unwrap().failures.contains(&Fail::ListRecords) {
            return Err(anyhow!("injected failure: ListRecords"));
        }
        Ok(self.records_for(source_id))
    }

    async fn insert_record(&self, record: &PipelineRecord) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        Self::check(&mut state, Fail::InsertRow(record.row_number))?;
        if Self::position_taken(&state, record, None) {
            return Err(anyhow!(
                "UNIQUE constraint failed: pipeline_records.source_id, pipeline_records.row_number"
            ));
        }
        state.next_id += 1;
        let id = state.next_id;
        let mut record = record.clone();
        record.id = Some(id);
        state.records.insert(id, record);
        Ok(id)
    }

    async fn update_record(
        &self,
        id: i64,
        record: &PipelineRecord,
        fields: &[Field],
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::check(&mut state, Fail::UpdateRecord(id))?;
        if Self::position_taken(&state, record, Some(id)) {
            return Err(anyhow!("UNIQUE constraint failed: row {}", record.row_number));
        }
        let existing = state
            .records
            .get_mut(&id)
            .ok_or_else(|| anyhow!("record {} not found", id))?;
        for field in fields {
            existing.set(*field, record.get(*field));
        }
        existing.row_number = record.row_number;
        existing.composite_key = record.composite_key.clone();
        Ok(())
    }

    async fn delete_record(&self, id: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::check(&mut state, Fail::DeleteRecord(id))?;
        state
            .records
            .remove(&id)
            .ok_or_else(|| anyhow!("record {} not found", id))?;
        state.children.remove(&id);
        Ok(())
    }

    async fn get_record_snapshot(&self, id: i64) -> Result<Option<serde_json::Value>> {
        let state = self.state.lock().unwrap();
        if state.failures.contains(&Fail::RecordSnapshot) {
            return Err(anyhow!("injected failure: RecordSnapshot"));
        }
        state
            .records
            .get(&id)
            .map(|r| serde_json::to_value(r).map_err(anyhow::Error::from))
            .transpose()
    }

    async fn list_children(&self, record_id: i64) -> Result<Vec<MonthlyForecast>> {
        let state = self.state.lock().unwrap();
        if state.failures.contains(&Fail::ListChildren) {
            return Err(anyhow!("injected failure: ListChildren"));
        }
        Ok(state.children.get(&record_id).cloned().unwrap_or_default())
    }

    async fn insert_archive(&self, archived: &ArchivedRecord) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        Self::check(&mut state, Fail::InsertArchive)?;
        let mut archived = archived.clone();
        let id = state.archives.len() as i64 + 1;
        archived.id = Some(id);
        state.archives.push(archived);
        Ok(id)
    }

    async fn insert_run(&self, run: &SyncRunRecord) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failures.contains(&Fail::InsertRun) {
            return Err(anyhow!("injected failure: InsertRun"));
        }
        state.runs.push(run.clone());
        Ok(())
    }

    async fn update_source_sync_state(
        &self,
        source_id: i64,
        sync_state: &SourceSyncState,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failures.contains(&Fail::UpdateSourceState) {
            return Err(anyhow!("injected failure: UpdateSourceState"));
        }
        let source = state
            .sources
            .get_mut(&source_id)
            .ok_or_else(|| anyhow!("source {} not found", source_id))?;
        source.last_synced_at = Some(sync_state.last_synced_at);
        source.last_sync_outcome = Some(sync_state.outcome);
        source.last_sync_error = sync_state.error_summary.clone();
        Ok(())
    }

    async fn acquire_lease(
        &self,
        source_id: i64,
        holder: &str,
        ttl: Duration,
    ) -> Result<LeaseAttempt> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        if let Some((current, expires_at)) = state.leases.get(&source_id) {
            if *expires_at > now {
                return Ok(LeaseAttempt::Held {
                    holder: current.clone(),
                    expires_at: *expires_at,
                });
            }
        }
        let ttl = chrono::Duration::from_std(ttl)?;
        state
            .leases
            .insert(source_id, (holder.to_string(), now + ttl));
        Ok(LeaseAttempt::Acquired)
    }

    async fn release_lease(&self, source_id: i64, holder: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state
            .leases
            .get(&source_id)
            .is_some_and(|(current, _)| current == holder)
        {
            state.leases.remove(&source_id);
        }
        Ok(())
    }
}

/// A spreadsheet served from memory
pub struct StaticSheet {
    rows: Mutex<Vec<RawRow>>,
    failure: Mutex<Option<SourceError>>,
}

impl StaticSheet {
    pub fn new(rows: Vec<RawRow>) -> Self {
        Self {
            rows: Mutex::new(rows),
            failure: Mutex::new(None),
        }
    }

    pub fn set_rows(&self, rows: Vec<RawRow>) {
        *self.rows.lock().unwrap() = rows;
    }

    pub fn fail_with(&self, error: SourceError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    fn check(&self) -> Result<(), SourceError> {
        match self.failure.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SheetSource for StaticSheet {
    async fn fetch_range(
        &self,
        _source: &SourceDescriptor,
        first_row: u32,
    ) -> Result<Vec<RawRow>, SourceError> {
        self.check()?;
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.row_number >= first_row)
            .cloned()
            .collect())
    }

    async fn fetch_rows(
        &self,
        _source: &SourceDescriptor,
        rows: &[u32],
    ) -> Result<Vec<RawRow>, SourceError> {
        self.check()?;
        let all = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .map(|n| {
                all.iter()
                    .find(|r| r.row_number == *n)
                    .cloned()
                    .unwrap_or_else(|| RawRow::new(*n, Vec::new()))
            })
            .collect())
    }
}

/// An active `direct` group workbook source
pub fn source(id: i64) -> SourceDescriptor {
    SourceDescriptor {
        id,
        kind: SourceKind::Workbook,
        spreadsheet_id: "pipeline.xlsx".to_string(),
        sheet_name: "Q3".to_string(),
        group_name: "direct".to_string(),
        fiscal_year: 2026,
        period: "FY2026-Q3".to_string(),
        sync_status: SyncStatus::Active,
        last_synced_at: None,
        last_sync_outcome: None,
        last_sync_error: None,
    }
}
