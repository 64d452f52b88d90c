//! Registered spreadsheet sources

use anyhow::{Context, Result, anyhow};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{format_timestamp, parse_timestamp};
use crate::sync::models::{
    NewSource, RunOutcome, SourceDescriptor, SourceKind, SourceSyncState, SyncStatus,
};

const SOURCE_COLUMNS: &str = "id, kind, spreadsheet_id, sheet_name, group_name, fiscal_year, period,
     sync_status, last_synced_at, last_sync_outcome, last_sync_error";

fn source_from_row(row: &SqliteRow) -> Result<SourceDescriptor> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("sync_status")?;
    let last_synced_at: Option<String> = row.try_get("last_synced_at")?;
    let last_outcome: Option<String> = row.try_get("last_sync_outcome")?;

    Ok(SourceDescriptor {
        id: row.try_get("id")?,
        kind: SourceKind::parse(&kind).ok_or_else(|| anyhow!("Unknown source kind '{}'", kind))?,
        spreadsheet_id: row.try_get("spreadsheet_id")?,
        sheet_name: row.try_get("sheet_name")?,
        group_name: row.try_get("group_name")?,
        fiscal_year: row.try_get("fiscal_year")?,
        period: row.try_get("period")?,
        sync_status: SyncStatus::parse(&status)
            .ok_or_else(|| anyhow!("Unknown sync status '{}'", status))?,
        last_synced_at: last_synced_at.as_deref().map(parse_timestamp).transpose()?,
        last_sync_outcome: last_outcome.as_deref().and_then(RunOutcome::parse),
        last_sync_error: row.try_get("last_sync_error")?,
    })
}

/// Register a source, returning its id
pub async fn add_source(pool: &SqlitePool, source: &NewSource) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO sync_sources (kind, spreadsheet_id, sheet_name, group_name, fiscal_year, period)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(source.kind.as_str())
    .bind(&source.spreadsheet_id)
    .bind(&source.sheet_name)
    .bind(&source.group_name)
    .bind(source.fiscal_year)
    .bind(&source.period)
    .execute(pool)
    .await
    .with_context(|| {
        format!(
            "Failed to register source {} / '{}' ({})",
            source.spreadsheet_id, source.sheet_name, source.period
        )
    })?;

    Ok(result.last_insert_rowid())
}

pub async fn get_source(pool: &SqlitePool, id: i64) -> Result<Option<SourceDescriptor>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM sync_sources WHERE id = ?",
        SOURCE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("Failed to get source {}", id))?;

    row.as_ref().map(source_from_row).transpose()
}

pub async fn list_sources(pool: &SqlitePool) -> Result<Vec<SourceDescriptor>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM sync_sources ORDER BY fiscal_year DESC, period, group_name, id",
        SOURCE_COLUMNS
    ))
    .fetch_all(pool)
    .await
    .context("Failed to list sources")?;

    rows.iter().map(source_from_row).collect()
}

/// Ids of sources that may be synced, oldest registration first
pub async fn list_active_source_ids(pool: &SqlitePool) -> Result<Vec<i64>> {
    let ids: Vec<(i64,)> =
        sqlx::query_as("SELECT id FROM sync_sources WHERE sync_status = ? ORDER BY id")
            .bind(SyncStatus::Active.as_str())
            .fetch_all(pool)
            .await
            .context("Failed to list active sources")?;

    Ok(ids.into_iter().map(|(id,)| id).collect())
}

/// Change a source's status. Returns false if the source does not exist.
pub async fn set_sync_status(pool: &SqlitePool, id: i64, status: SyncStatus) -> Result<bool> {
    let result = sqlx::query("UPDATE sync_sources SET sync_status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(id)
        .execute(pool)
        .await
        .with_context(|| format!("Failed to set status of source {}", id))?;

    Ok(result.rows_affected() > 0)
}

/// Stamp the outcome of the latest run onto the source
pub async fn update_sync_state(
    pool: &SqlitePool,
    id: i64,
    state: &SourceSyncState,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE sync_sources
         SET last_synced_at = ?, last_sync_outcome = ?, last_sync_error = ?
         WHERE id = ?",
    )
    .bind(format_timestamp(state.last_synced_at))
    .bind(state.outcome.as_str())
    .bind(state.error_summary.as_deref())
    .bind(id)
    .execute(pool)
    .await
    .with_context(|| format!("Failed to update sync state of source {}", id))?;

    if result.rows_affected() == 0 {
        return Err(anyhow!("Source {} not found", id));
    }
    Ok(())
}
