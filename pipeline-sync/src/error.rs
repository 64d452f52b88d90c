//! Errors returned by a sync run before or instead of a summary

use chrono::{DateTime, Utc};

use crate::sheets::{SourceError, SourceErrorKind};
use crate::sync::models::SyncStatus;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("source {0} not found")]
    SourceNotFound(i64),

    #[error("source {id} is {status}, only active sources can be synced")]
    SourceNotActive { id: i64, status: SyncStatus },

    #[error("no column mapping for group '{group}' (source {source_id})")]
    UnknownGroup { source_id: i64, group: String },

    #[error("source {source_id} is already being synced by run {holder} (lease expires {expires_at})")]
    LeaseHeld {
        source_id: i64,
        holder: String,
        expires_at: DateTime<Utc>,
    },

    #[error("spreadsheet unavailable ({kind}): {message}")]
    SourceUnavailable {
        kind: SourceErrorKind,
        message: String,
    },

    #[error("entity store: {0:#}")]
    Store(anyhow::Error),
}

impl SyncError {
    /// Stable classification stored on failed run records
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceNotFound(_) => "source_not_found",
            Self::SourceNotActive { .. } => "source_not_active",
            Self::UnknownGroup { .. } => "unknown_group",
            Self::LeaseHeld { .. } => "lease_held",
            Self::SourceUnavailable { kind, .. } => kind.as_str(),
            Self::Store(_) => "store",
        }
    }

    /// Failed before touching the spreadsheet or the store's records
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::SourceNotFound(_)
                | Self::SourceNotActive { .. }
                | Self::UnknownGroup { .. }
                | Self::LeaseHeld { .. }
        )
    }
}

impl From<SourceError> for SyncError {
    fn from(err: SourceError) -> Self {
        Self::SourceUnavailable {
            kind: err.kind,
            message: err.message,
        }
    }
}
