//! Snapshots of records removed by sync

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{format_timestamp, parse_timestamp};
use crate::sync::models::ArchivedRecord;

fn archive_from_row(row: &SqliteRow) -> Result<ArchivedRecord> {
    let record_json: String = row.try_get("record_json")?;
    let children_json: String = row.try_get("children_json")?;
    let archived_at: String = row.try_get("archived_at")?;

    Ok(ArchivedRecord {
        id: Some(row.try_get("id")?),
        source_id: row.try_get("source_id")?,
        original_id: row.try_get("original_id")?,
        natural_key: row.try_get("natural_key")?,
        record: serde_json::from_str(&record_json).context("Failed to parse archived record")?,
        children: serde_json::from_str(&children_json)
            .context("Failed to parse archived monthly forecasts")?,
        reason: row.try_get("reason")?,
        run_id: row.try_get("run_id")?,
        archived_at: parse_timestamp(&archived_at)?,
    })
}

pub async fn insert_archive(pool: &SqlitePool, archive: &ArchivedRecord) -> Result<i64> {
    let record_json =
        serde_json::to_string(&archive.record).context("Failed to serialize record snapshot")?;
    let children_json = serde_json::to_string(&archive.children)
        .context("Failed to serialize monthly forecasts")?;

    let result = sqlx::query(
        "INSERT INTO archived_records
         (source_id, original_id, natural_key, record_json, children_json, reason, run_id, archived_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(archive.source_id)
    .bind(archive.original_id)
    .bind(&archive.natural_key)
    .bind(record_json)
    .bind(children_json)
    .bind(&archive.reason)
    .bind(&archive.run_id)
    .bind(format_timestamp(archive.archived_at))
    .execute(pool)
    .await
    .with_context(|| format!("Failed to archive record {}", archive.original_id))?;

    Ok(result.last_insert_rowid())
}

/// Most recent snapshots of a source first
pub async fn list_archives(
    pool: &SqlitePool,
    source_id: i64,
    limit: u32,
) -> Result<Vec<ArchivedRecord>> {
    let rows = sqlx::query(
        "SELECT id, source_id, original_id, natural_key, record_json, children_json, reason, run_id, archived_at
         FROM archived_records
         WHERE source_id = ?
         ORDER BY archived_at DESC, id DESC
         LIMIT ?",
    )
    .bind(source_id)
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await
    .with_context(|| format!("Failed to list archived records of source {}", source_id))?;

    rows.iter().map(archive_from_row).collect()
}
