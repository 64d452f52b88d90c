//! Per-source run leases
//!
//! A lease row names the run currently allowed to sync a source. Taking a
//! lease is a single upsert that only overwrites an expired row, so two
//! processes racing for the same source cannot both win.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::time::Duration;

use super::{format_timestamp, parse_timestamp};
use crate::sync::store::LeaseAttempt;

/// A live or stale lease row
#[derive(Debug, Clone, PartialEq)]
pub struct Lease {
    pub source_id: i64,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

pub async fn acquire_lease(
    pool: &SqlitePool,
    source_id: i64,
    holder: &str,
    ttl: Duration,
) -> Result<LeaseAttempt> {
    let now = Utc::now();
    let ttl = chrono::Duration::from_std(ttl).context("Lease TTL out of range")?;

    let result = sqlx::query(
        "INSERT INTO sync_leases (source_id, holder, acquired_at, expires_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(source_id) DO UPDATE SET
             holder = excluded.holder,
             acquired_at = excluded.acquired_at,
             expires_at = excluded.expires_at
         WHERE sync_leases.expires_at <= excluded.acquired_at",
    )
    .bind(source_id)
    .bind(holder)
    .bind(format_timestamp(now))
    .bind(format_timestamp(now + ttl))
    .execute(pool)
    .await
    .with_context(|| format!("Failed to acquire lease on source {}", source_id))?;

    if result.rows_affected() > 0 {
        return Ok(LeaseAttempt::Acquired);
    }

    match current_lease(pool, source_id).await? {
        Some(lease) => Ok(LeaseAttempt::Held {
            holder: lease.holder,
            expires_at: lease.expires_at,
        }),
        // Released between the upsert and the read; the caller can retry
        None => Ok(LeaseAttempt::Held {
            holder: String::new(),
            expires_at: now,
        }),
    }
}

/// Drop the lease if `holder` still owns it. Returns whether a row was removed.
pub async fn release_lease(pool: &SqlitePool, source_id: i64, holder: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM sync_leases WHERE source_id = ? AND holder = ?")
        .bind(source_id)
        .bind(holder)
        .execute(pool)
        .await
        .with_context(|| format!("Failed to release lease on source {}", source_id))?;

    Ok(result.rows_affected() > 0)
}

pub async fn current_lease(pool: &SqlitePool, source_id: i64) -> Result<Option<Lease>> {
    let row: Option<(String, String, String)> = sqlx::query_as(
        "SELECT holder, acquired_at, expires_at FROM sync_leases WHERE source_id = ?",
    )
    .bind(source_id)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("Failed to read lease on source {}", source_id))?;

    row.map(|(holder, acquired_at, expires_at)| {
        Ok(Lease {
            source_id,
            holder,
            acquired_at: parse_timestamp(&acquired_at)?,
            expires_at: parse_timestamp(&expires_at)?,
        })
    })
    .transpose()
}
