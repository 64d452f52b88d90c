//! Spreadsheet-to-store reconciliation
//!
//! Stages, leaves first: sanitize -> transform -> reconcile -> execute ->
//! log. [`engine::SyncEngine`] strings them together around a source reader
//! and an [`store::EntityStore`].

pub mod engine;
pub mod executor;
pub mod models;
pub mod reconcile;
pub mod run_log;
pub mod sanitize;
pub mod schema;
pub mod store;
pub mod transform;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{SyncEngine, SyncRequest, SyncSettings, SyncSummary};
pub use executor::{BatchExecutor, DeleteOutcome, ExecutionReport, PhaseResult};
pub use models::{
    ChangeSet, MatchReason, PipelineRecord, RunOutcome, SourceDescriptor, SyncMode, SyncStatus,
};
pub use reconcile::reconcile;
pub use schema::{GroupSchema, SchemaRegistry};
pub use store::{EntityStore, LeaseAttempt};
