//! Pipeline records and their monthly forecast children

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, Utc};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Row, Sqlite, SqlitePool, TypeInfo, ValueRef};

use super::format_timestamp;
use crate::sync::models::{Field, FieldValue, MonthlyForecast, PipelineRecord};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

const RECORD_COLUMNS: &str = "id, source_id, row_number, composite_key, natural_key, status, owner, team,
     advertiser, agency, description, forecast_revenue, probability, weighted_revenue,
     impressions, proposal_date, won_date, lost_date, is_renewal, notes, fiscal_year, group_name";

fn record_from_row(row: &SqliteRow) -> Result<PipelineRecord> {
    let row_number: i64 = row.try_get("row_number")?;

    Ok(PipelineRecord {
        id: Some(row.try_get("id")?),
        source_id: row.try_get("source_id")?,
        row_number: u32::try_from(row_number)
            .with_context(|| format!("Invalid row number {}", row_number))?,
        composite_key: row.try_get("composite_key")?,
        natural_key: row.try_get("natural_key")?,
        status: row.try_get("status")?,
        owner: row.try_get("owner")?,
        team: row.try_get("team")?,
        advertiser: row.try_get("advertiser")?,
        agency: row.try_get("agency")?,
        description: row.try_get("description")?,
        forecast_revenue: row.try_get("forecast_revenue")?,
        probability: row.try_get("probability")?,
        weighted_revenue: row.try_get("weighted_revenue")?,
        impressions: row.try_get("impressions")?,
        proposal_date: row.try_get::<Option<NaiveDate>, _>("proposal_date")?,
        won_date: row.try_get::<Option<NaiveDate>, _>("won_date")?,
        lost_date: row.try_get::<Option<NaiveDate>, _>("lost_date")?,
        is_renewal: row.try_get("is_renewal")?,
        notes: row.try_get("notes")?,
        fiscal_year: row.try_get("fiscal_year")?,
        group_name: row.try_get("group_name")?,
    })
}

/// Bind one field's value. Text columns declared NOT NULL get an empty
/// string instead of NULL.
fn bind_field<'q>(query: SqliteQuery<'q>, record: &PipelineRecord, field: Field) -> SqliteQuery<'q> {
    match (field, record.get(field)) {
        (
            Field::NaturalKey | Field::Status | Field::Owner | Field::Advertiser | Field::GroupName,
            value,
        ) => query.bind(value.as_text().unwrap_or_default()),
        (_, FieldValue::Empty) => query.bind(None::<String>),
        (_, FieldValue::Text(s)) => query.bind(s),
        (_, FieldValue::Decimal(d)) => query.bind(d),
        (_, FieldValue::Integer(i)) => query.bind(i),
        (_, FieldValue::Date(d)) => query.bind(d),
        (_, FieldValue::Boolean(b)) => query.bind(b),
    }
}

/// Live records of a source in id order
pub async fn list_records(pool: &SqlitePool, source_id: i64) -> Result<Vec<PipelineRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM pipeline_records WHERE source_id = ? ORDER BY id",
        RECORD_COLUMNS
    ))
    .bind(source_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("Failed to list records of source {}", source_id))?;

    rows.iter().map(record_from_row).collect()
}

pub async fn get_record(pool: &SqlitePool, id: i64) -> Result<Option<PipelineRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM pipeline_records WHERE id = ?",
        RECORD_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("Failed to get record {}", id))?;

    row.as_ref().map(record_from_row).transpose()
}

/// The stored row with every column, as persisted, keyed by column name
pub async fn get_record_snapshot(pool: &SqlitePool, id: i64) -> Result<Option<serde_json::Value>> {
    let row = sqlx::query("SELECT * FROM pipeline_records WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("Failed to read record {} for archiving", id))?;

    row.as_ref().map(row_to_json).transpose()
}

/// Column values by their SQLite storage class
fn row_to_json(row: &SqliteRow) -> Result<serde_json::Value> {
    let mut object = serde_json::Map::new();

    for column in row.columns() {
        let index = column.ordinal();
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            serde_json::Value::Null
        } else {
            let storage = raw.type_info().name().to_string();
            match storage.as_str() {
                "INTEGER" => serde_json::Value::from(row.try_get::<i64, _>(index)?),
                "REAL" => serde_json::Value::from(row.try_get::<f64, _>(index)?),
                "BLOB" => serde_json::Value::from(row.try_get::<Vec<u8>, _>(index)?),
                _ => serde_json::Value::from(row.try_get::<String, _>(index)?),
            }
        };
        object.insert(column.name().to_string(), value);
    }

    Ok(serde_json::Value::Object(object))
}

pub async fn insert_record(pool: &SqlitePool, record: &PipelineRecord) -> Result<i64> {
    let columns: Vec<&str> = Field::SYNCABLE.iter().map(|f| f.column()).collect();
    let sql = format!(
        "INSERT INTO pipeline_records (source_id, row_number, composite_key, {}, created_at, updated_at)
         VALUES (?, ?, ?, {}, ?, ?)",
        columns.join(", "),
        vec!["?"; columns.len()].join(", ")
    );

    let now = format_timestamp(Utc::now());
    let mut query = sqlx::query(&sql)
        .bind(record.source_id)
        .bind(i64::from(record.row_number))
        .bind(&record.composite_key);
    for field in Field::SYNCABLE {
        query = bind_field(query, record, *field);
    }

    let result = query
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await
        .with_context(|| {
            format!(
                "Failed to insert record {} at row {}",
                record.natural_key, record.row_number
            )
        })?;

    Ok(result.last_insert_rowid())
}

/// Write the given sheet-owned fields plus row number and composite key.
/// Application columns (kanban stage/position) are never part of the SET.
pub async fn update_record(
    pool: &SqlitePool,
    id: i64,
    record: &PipelineRecord,
    fields: &[Field],
) -> Result<()> {
    let mut assignments: Vec<String> = fields
        .iter()
        .map(|f| format!("{} = ?", f.column()))
        .collect();
    assignments.extend(
        ["row_number = ?", "composite_key = ?", "updated_at = ?"]
            .iter()
            .map(|s| s.to_string()),
    );
    let sql = format!(
        "UPDATE pipeline_records SET {} WHERE id = ?",
        assignments.join(", ")
    );

    let mut query = sqlx::query(&sql);
    for field in fields {
        query = bind_field(query, record, *field);
    }

    let result = query
        .bind(i64::from(record.row_number))
        .bind(&record.composite_key)
        .bind(format_timestamp(Utc::now()))
        .bind(id)
        .execute(pool)
        .await
        .with_context(|| format!("Failed to update record {}", id))?;

    if result.rows_affected() == 0 {
        return Err(anyhow!("Record {} not found", id));
    }
    Ok(())
}

/// Delete a record; its monthly forecasts go with it
pub async fn delete_record(pool: &SqlitePool, id: i64) -> Result<()> {
    let result = sqlx::query("DELETE FROM pipeline_records WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .with_context(|| format!("Failed to delete record {}", id))?;

    if result.rows_affected() == 0 {
        return Err(anyhow!("Record {} not found", id));
    }
    Ok(())
}

pub async fn list_children(pool: &SqlitePool, record_id: i64) -> Result<Vec<MonthlyForecast>> {
    let rows: Vec<(String, f64)> = sqlx::query_as(
        "SELECT month, amount FROM pipeline_monthly_forecasts
         WHERE record_id = ?
         ORDER BY month",
    )
    .bind(record_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("Failed to list monthly forecasts of record {}", record_id))?;

    Ok(rows
        .into_iter()
        .map(|(month, amount)| MonthlyForecast { month, amount })
        .collect())
}

/// Insert or replace one month of a record's forecast breakdown
pub async fn set_monthly_forecast(
    pool: &SqlitePool,
    record_id: i64,
    forecast: &MonthlyForecast,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO pipeline_monthly_forecasts (record_id, month, amount)
         VALUES (?, ?, ?)
         ON CONFLICT(record_id, month) DO UPDATE SET amount = excluded.amount",
    )
    .bind(record_id)
    .bind(&forecast.month)
    .bind(forecast.amount)
    .execute(pool)
    .await
    .with_context(|| {
        format!(
            "Failed to set {} forecast of record {}",
            forecast.month, record_id
        )
    })?;

    Ok(())
}
