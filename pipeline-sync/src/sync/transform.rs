//! Row transformer
//!
//! Turns a sanitized raw row into a [`PipelineRecord`] by evaluating the
//! group's column table with one decode routine. Bad cells degrade to empty
//! values with a warning; only rows below the group's populated-column
//! minimum are rejected outright.

use chrono::{Datelike, Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

use super::models::{FieldValue, PipelineRecord};
use super::schema::{ColumnSpec, GroupSchema, ValueKind};
use crate::sheets::{RawCell, RawRow};

const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 2100;

/// Leading cells that must all be empty for a row to count as a spacer
const LEADING_IDENTITY_CELLS: usize = 3;

const UNNAMED_ADVERTISER: &str = "(unnamed)";
const UNASSIGNED_OWNER: &str = "Unassigned";

static ORDINAL_SUFFIX: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})(st|nd|rd|th)\b").ok());

/// Free-text date layouts tried in order after ISO
const DATE_FORMATS: &[&str] = &[
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m/%d/%y",
    "%d-%b-%Y",
    "%d-%b-%y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%b %d %Y",
    "%B %d %Y",
    "%d %b %Y",
    "%d %B %Y",
    "%a, %b %d, %Y",
    "%A, %B %d, %Y",
];

/// What the transformer needs to know about the source
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    pub source_id: i64,
    pub fiscal_year: i32,
    pub schema: &'a GroupSchema,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error(
        "row {row}: {populated} populated columns, group '{group}' requires at least {required}"
    )]
    InsufficientColumns {
        row: u32,
        populated: usize,
        required: usize,
        group: String,
    },
}

/// A decoded record and the data-quality notes raised while decoding it
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedRow {
    pub record: PipelineRecord,
    pub warnings: Vec<String>,
}

/// Result of transforming a whole sheet read
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformBatch {
    pub records: Vec<PipelineRecord>,
    pub warnings: Vec<String>,
    /// Rows rejected by validation
    pub skipped: usize,
    /// Spacer rows ignored without comment
    pub blank: usize,
}

/// Transform one row. `Ok(None)` means a blank spacer row.
pub fn transform_row(
    row: &RawRow,
    ctx: &TransformContext<'_>,
) -> Result<Option<TransformedRow>, TransformError> {
    if (0..LEADING_IDENTITY_CELLS).all(|i| row.cell(i).is_empty()) {
        return Ok(None);
    }

    let populated = row.populated();
    if populated < ctx.schema.min_columns {
        return Err(TransformError::InsufficientColumns {
            row: row.row_number,
            populated,
            required: ctx.schema.min_columns,
            group: ctx.schema.group.clone(),
        });
    }

    let mut record = PipelineRecord::new(ctx.source_id, row.row_number);
    let mut warnings = Vec::new();

    for column in &ctx.schema.columns {
        let value = decode_column(row, column, &mut warnings);
        if value.is_empty() && column.required {
            warnings.push(format!(
                "row {}: required field {} is empty",
                row.row_number, column.field
            ));
        }
        record.set(column.field, value);
    }

    apply_status(&mut record, ctx.schema, &mut warnings);
    apply_fallbacks(&mut record);

    record.fiscal_year = ctx.fiscal_year;
    record.group_name = ctx.schema.group.clone();
    record.refresh_derived();

    Ok(Some(TransformedRow { record, warnings }))
}

/// Transform every row of a read, collecting warnings and skip counts
pub fn transform_rows(rows: &[RawRow], ctx: &TransformContext<'_>) -> TransformBatch {
    let mut batch = TransformBatch::default();

    for row in rows {
        match transform_row(row, ctx) {
            Ok(Some(transformed)) => {
                batch.warnings.extend(transformed.warnings);
                batch.records.push(transformed.record);
            }
            Ok(None) => batch.blank += 1,
            Err(e) => {
                log::warn!("Skipping {}", e);
                batch.skipped += 1;
                batch.warnings.push(e.to_string());
            }
        }
    }

    log::info!(
        "Transformed {} rows for group '{}' ({} skipped, {} blank)",
        batch.records.len(),
        ctx.schema.group,
        batch.skipped,
        batch.blank
    );
    batch
}

fn decode_column(row: &RawRow, column: &ColumnSpec, warnings: &mut Vec<String>) -> FieldValue {
    let cell = row.cell(column.index);

    let defaulted;
    let cell = match (&column.default, cell.is_empty()) {
        (Some(default), true) => {
            defaulted = RawCell::Text(default.clone());
            &defaulted
        }
        _ => cell,
    };

    match decode_cell(cell, column.kind) {
        Ok(value) => value,
        Err(reason) => {
            log::debug!(
                "Row {} column {}: {} ({:?})",
                row.row_number,
                column.index,
                reason,
                cell
            );
            warnings.push(format!(
                "row {}: {} for {}, left empty",
                row.row_number, reason, column.field
            ));
            FieldValue::Empty
        }
    }
}

/// Decode a single cell according to its value kind
pub fn decode_cell(cell: &RawCell, kind: ValueKind) -> Result<FieldValue, String> {
    if cell.is_empty() {
        return Ok(FieldValue::Empty);
    }

    match kind {
        ValueKind::Text => Ok(match cell {
            RawCell::Text(s) => FieldValue::Text(s.clone()),
            RawCell::Number(n) => FieldValue::Text(format_number(*n)),
            RawCell::Bool(b) => FieldValue::Text(b.to_string()),
            RawCell::Empty => FieldValue::Empty,
        }),
        ValueKind::Decimal => match cell {
            RawCell::Number(n) => Ok(FieldValue::Decimal(*n)),
            RawCell::Text(s) => parse_decimal(s)
                .map(|(value, _)| FieldValue::Decimal(value))
                .ok_or_else(|| format!("unparseable number '{}'", s)),
            _ => Err("expected a number".to_string()),
        },
        ValueKind::Integer => match cell {
            RawCell::Number(n) => Ok(FieldValue::Integer(n.round() as i64)),
            RawCell::Text(s) => parse_decimal(s)
                .map(|(value, _)| FieldValue::Integer(value.round() as i64))
                .ok_or_else(|| format!("unparseable number '{}'", s)),
            _ => Err("expected a number".to_string()),
        },
        ValueKind::Percent => match cell {
            RawCell::Number(n) => Ok(FieldValue::Decimal(scale_fraction(*n))),
            RawCell::Text(s) => match parse_decimal(s) {
                Some((value, true)) => Ok(FieldValue::Decimal(value)),
                Some((value, false)) => Ok(FieldValue::Decimal(scale_fraction(value))),
                None => Err(format!("unparseable percentage '{}'", s)),
            },
            _ => Err("expected a percentage".to_string()),
        },
        ValueKind::Date => match cell {
            RawCell::Number(n) => serial_to_date(*n)
                .map(FieldValue::Date)
                .ok_or_else(|| format!("serial date {} out of range", n)),
            RawCell::Text(s) => parse_date(s)
                .map(FieldValue::Date)
                .ok_or_else(|| format!("unparseable date '{}'", s)),
            _ => Err("expected a date".to_string()),
        },
        ValueKind::Boolean => match cell {
            RawCell::Bool(b) => Ok(FieldValue::Boolean(*b)),
            RawCell::Number(n) => Ok(FieldValue::Boolean(*n != 0.0)),
            RawCell::Text(s) => parse_bool(s)
                .map(FieldValue::Boolean)
                .ok_or_else(|| format!("unrecognized yes/no value '{}'", s)),
            RawCell::Empty => Ok(FieldValue::Empty),
        },
    }
}

/// Parse a number as typed into a sheet. Returns the value and whether a
/// trailing percent sign was present. Accepts comma grouping, currency
/// symbols and accounting-style parentheses for negatives.
pub fn parse_decimal(text: &str) -> Option<(f64, bool)> {
    let mut s = text.trim();

    let negative_parens = s.starts_with('(') && s.ends_with(')') && s.len() > 2;
    if negative_parens {
        s = &s[1..s.len() - 1];
    }

    let percent = s.ends_with('%');
    let cleaned: String = s
        .trim_end_matches('%')
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | '€' | '£' | '¥' | ' ' | '\u{a0}'))
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    let value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() {
        return None;
    }

    Some((if negative_parens { -value } else { value }, percent))
}

/// Percent-formatted cells arrive as fractions (0.4 for 40%)
fn scale_fraction(value: f64) -> f64 {
    if (0.0..=1.0).contains(&value) {
        value * 100.0
    } else {
        value
    }
}

/// Convert a spreadsheet serial day number (days since 1899-12-30)
pub fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    let date = epoch.checked_add_signed(Duration::days(serial.floor() as i64))?;
    in_year_range(date)
}

/// Parse ISO, free-text, or numeric-serial date text
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let s = text.trim();
    if s.is_empty() {
        return None;
    }

    // ISO date, optionally followed by a time part
    if let Some(prefix) = s.get(..10) {
        if let Ok(date) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return in_year_range(date);
        }
    }

    if let Ok(serial) = s.parse::<f64>() {
        return serial_to_date(serial);
    }

    let ordinal = ORDINAL_SUFFIX.as_ref()?;
    let cleaned = ordinal.replace_all(s, "$1");

    DATE_FORMATS
        .iter()
        .find_map(|fmt| {
            NaiveDate::parse_from_str(&cleaned, fmt)
                .ok()
                .and_then(in_year_range)
        })
}

fn in_year_range(date: NaiveDate) -> Option<NaiveDate> {
    (MIN_YEAR..=MAX_YEAR).contains(&date.year()).then_some(date)
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "yes" | "y" | "true" | "1" | "x" => Some(true),
        "no" | "n" | "false" | "0" => Some(false),
        _ => None,
    }
}

/// Integral numbers render without a trailing `.0`
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn apply_status(record: &mut PipelineRecord, schema: &GroupSchema, warnings: &mut Vec<String>) {
    match schema.canonical_status(&record.status) {
        Some(canonical) => record.status = canonical.to_string(),
        None => {
            if !record.status.is_empty() {
                log::warn!(
                    "Row {}: status '{}' not valid for group '{}', using '{}'",
                    record.row_number,
                    record.status,
                    schema.group,
                    schema.default_status
                );
                warnings.push(format!(
                    "row {}: invalid status '{}' replaced with '{}'",
                    record.row_number, record.status, schema.default_status
                ));
            }
            record.status = schema.default_status.clone();
        }
    }
}

fn apply_fallbacks(record: &mut PipelineRecord) {
    if record.advertiser.is_empty() {
        record.advertiser = record
            .agency
            .clone()
            .unwrap_or_else(|| UNNAMED_ADVERTISER.to_string());
    }
    if record.owner.is_empty() {
        record.owner = UNASSIGNED_OWNER.to_string();
    }
    if record.natural_key.is_empty() {
        record.natural_key = format!("ROW-{}", record.row_number);
    }
}
