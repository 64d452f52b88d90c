//! Local `.xlsx` workbook reader
//!
//! Used for sources registered with kind `workbook`, where the spreadsheet id
//! is a file path (exported tracking sheets, fixtures).

use async_trait::async_trait;
use calamine::{Data, Reader, Xlsx, open_workbook};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::{RawCell, RawRow, SheetSource, SourceError, SourceErrorKind, normalize_row_request};
use crate::sync::models::SourceDescriptor;

#[derive(Debug, Default, Clone)]
pub struct WorkbookReader;

impl WorkbookReader {
    pub fn new() -> Self {
        Self
    }
}

/// Convert an Excel cell to a raw cell. Date cells become serial day numbers
/// so they decode the same way as Sheets API values.
fn cell_to_raw(cell: &Data) -> RawCell {
    match cell {
        Data::Empty => RawCell::Empty,
        Data::String(s) if s.is_empty() => RawCell::Empty,
        Data::String(s) => RawCell::Text(s.clone()),
        Data::Int(i) => RawCell::Number(*i as f64),
        Data::Float(f) => RawCell::Number(*f),
        Data::Bool(b) => RawCell::Bool(*b),
        Data::DateTime(dt) => RawCell::Number(dt.as_f64()),
        Data::DateTimeIso(s) => RawCell::Text(s.clone()),
        Data::DurationIso(s) => RawCell::Text(s.clone()),
        Data::Error(_) => RawCell::Empty,
    }
}

/// Read every row of a sheet, keyed by 1-based row number
fn read_sheet(path: &Path, sheet_name: &str) -> Result<Vec<RawRow>, SourceError> {
    if !path.exists() {
        return Err(SourceError::new(
            SourceErrorKind::NotFound,
            format!("workbook not found: {}", path.display()),
        ));
    }

    let mut workbook: Xlsx<_> = open_workbook(path).map_err(|e| {
        SourceError::new(
            SourceErrorKind::Malformed,
            format!("failed to open workbook {}: {}", path.display(), e),
        )
    })?;

    if !workbook.sheet_names().iter().any(|n| n == sheet_name) {
        return Err(SourceError::new(
            SourceErrorKind::NotFound,
            format!("sheet '{}' not found in {}", sheet_name, path.display()),
        ));
    }

    let range = workbook.worksheet_range(sheet_name).map_err(|e| {
        SourceError::new(
            SourceErrorKind::Malformed,
            format!("failed to read sheet '{}': {}", sheet_name, e),
        )
    })?;

    // The range starts at the first used cell, not at A1
    let (start_row, start_col) = match range.start() {
        Some(start) => start,
        None => return Ok(Vec::new()),
    };

    let rows = range
        .rows()
        .enumerate()
        .map(|(idx, row)| {
            let mut cells = vec![RawCell::Empty; start_col as usize];
            cells.extend(row.iter().map(cell_to_raw));
            RawRow::new(start_row + idx as u32 + 1, cells)
        })
        .collect();

    Ok(rows)
}

async fn read_sheet_blocking(path: PathBuf, sheet_name: String) -> Result<Vec<RawRow>, SourceError> {
    tokio::task::spawn_blocking(move || read_sheet(&path, &sheet_name))
        .await
        .map_err(|e| SourceError::new(SourceErrorKind::Other, format!("reader task failed: {}", e)))?
}

#[async_trait]
impl SheetSource for WorkbookReader {
    async fn fetch_range(
        &self,
        source: &SourceDescriptor,
        first_row: u32,
    ) -> Result<Vec<RawRow>, SourceError> {
        let rows = read_sheet_blocking(
            PathBuf::from(&source.spreadsheet_id),
            source.sheet_name.clone(),
        )
        .await?;

        let rows: Vec<RawRow> = rows
            .into_iter()
            .filter(|r| r.row_number >= first_row)
            .collect();

        log::info!(
            "Read {} rows from workbook {} / '{}'",
            rows.len(),
            source.spreadsheet_id,
            source.sheet_name
        );
        Ok(rows)
    }

    async fn fetch_rows(
        &self,
        source: &SourceDescriptor,
        rows: &[u32],
    ) -> Result<Vec<RawRow>, SourceError> {
        let wanted = normalize_row_request(rows, 1);
        let mut by_number: HashMap<u32, RawRow> = read_sheet_blocking(
            PathBuf::from(&source.spreadsheet_id),
            source.sheet_name.clone(),
        )
        .await?
        .into_iter()
        .map(|r| (r.row_number, r))
        .collect();

        Ok(wanted
            .into_iter()
            .map(|n| by_number.remove(&n).unwrap_or_else(|| RawRow::new(n, Vec::new())))
            .collect())
    }
}
