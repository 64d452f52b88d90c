//! Sync run history

use anyhow::{Context, Result, anyhow};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{format_timestamp, parse_timestamp};
use crate::sync::models::{RunOutcome, SyncMode, SyncRunRecord};

fn count(row: &SqliteRow, column: &str) -> Result<usize> {
    let value: i64 = row.try_get(column)?;
    usize::try_from(value).with_context(|| format!("Negative {} count {}", column, value))
}

fn run_from_row(row: &SqliteRow) -> Result<SyncRunRecord> {
    let mode: String = row.try_get("mode")?;
    let outcome: String = row.try_get("outcome")?;
    let errors_json: String = row.try_get("errors_json")?;
    let warnings_json: String = row.try_get("warnings_json")?;
    let duration_ms: i64 = row.try_get("duration_ms")?;
    let started_at: String = row.try_get("started_at")?;
    let finished_at: String = row.try_get("finished_at")?;

    Ok(SyncRunRecord {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        mode: SyncMode::parse(&mode).ok_or_else(|| anyhow!("Unknown sync mode '{}'", mode))?,
        outcome: RunOutcome::parse(&outcome)
            .ok_or_else(|| anyhow!("Unknown run outcome '{}'", outcome))?,
        total: count(row, "total")?,
        created: count(row, "created")?,
        updated: count(row, "updated")?,
        deleted: count(row, "deleted")?,
        skipped: count(row, "skipped")?,
        errors: serde_json::from_str(&errors_json).context("Failed to parse run errors")?,
        warnings: serde_json::from_str(&warnings_json).context("Failed to parse run warnings")?,
        error_kind: row.try_get("error_kind")?,
        duration_ms: u64::try_from(duration_ms).unwrap_or_default(),
        started_at: parse_timestamp(&started_at)?,
        finished_at: parse_timestamp(&finished_at)?,
    })
}

pub async fn insert_run(pool: &SqlitePool, run: &SyncRunRecord) -> Result<()> {
    let errors_json = serde_json::to_string(&run.errors).context("Failed to serialize run errors")?;
    let warnings_json =
        serde_json::to_string(&run.warnings).context("Failed to serialize run warnings")?;

    sqlx::query(
        "INSERT INTO sync_runs
         (id, source_id, mode, outcome, total, created, updated, deleted, skipped,
          errors_json, warnings_json, error_kind, duration_ms, started_at, finished_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&run.id)
    .bind(run.source_id)
    .bind(run.mode.as_str())
    .bind(run.outcome.as_str())
    .bind(run.total as i64)
    .bind(run.created as i64)
    .bind(run.updated as i64)
    .bind(run.deleted as i64)
    .bind(run.skipped as i64)
    .bind(errors_json)
    .bind(warnings_json)
    .bind(run.error_kind.as_deref())
    .bind(i64::try_from(run.duration_ms).unwrap_or(i64::MAX))
    .bind(format_timestamp(run.started_at))
    .bind(format_timestamp(run.finished_at))
    .execute(pool)
    .await
    .with_context(|| format!("Failed to record sync run {}", run.id))?;

    Ok(())
}

/// Latest runs first. `source_id` of `None` lists every source.
pub async fn list_runs(
    pool: &SqlitePool,
    source_id: Option<i64>,
    limit: u32,
) -> Result<Vec<SyncRunRecord>> {
    let rows = sqlx::query(
        "SELECT id, source_id, mode, outcome, total, created, updated, deleted, skipped,
                errors_json, warnings_json, error_kind, duration_ms, started_at, finished_at
         FROM sync_runs
         WHERE ?1 IS NULL OR source_id = ?1
         ORDER BY finished_at DESC
         LIMIT ?2",
    )
    .bind(source_id)
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await
    .context("Failed to list sync runs")?;

    rows.iter().map(run_from_row).collect()
}

pub async fn get_run(pool: &SqlitePool, id: &str) -> Result<Option<SyncRunRecord>> {
    let row = sqlx::query(
        "SELECT id, source_id, mode, outcome, total, created, updated, deleted, skipped,
                errors_json, warnings_json, error_kind, duration_ms, started_at, finished_at
         FROM sync_runs
         WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("Failed to get sync run {}", id))?;

    row.as_ref().map(run_from_row).transpose()
}
