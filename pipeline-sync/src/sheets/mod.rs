//! Spreadsheet readers
//!
//! Fetches raw cell matrices from the authoritative spreadsheet, either the
//! whole data range or a specific set of rows. Readers never retry; failures
//! are classified and handed back to the caller.

pub mod google;
pub mod workbook;

use async_trait::async_trait;
use std::sync::Arc;

use crate::sync::models::{SourceDescriptor, SourceKind};

pub use google::GoogleSheetsReader;
pub use workbook::WorkbookReader;

/// A single cell, with the spreadsheet's encodings normalized away
#[derive(Debug, Clone, PartialEq)]
pub enum RawCell {
    Empty,
    Text(String),
    /// Numbers, including date cells as serial day numbers
    Number(f64),
    Bool(bool),
}

impl RawCell {
    pub fn is_empty(&self) -> bool {
        match self {
            RawCell::Empty => true,
            RawCell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Convert a JSON cell value as returned by the Sheets API
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => RawCell::Empty,
            serde_json::Value::Bool(b) => RawCell::Bool(*b),
            serde_json::Value::Number(n) => n.as_f64().map(RawCell::Number).unwrap_or(RawCell::Empty),
            serde_json::Value::String(s) if s.is_empty() => RawCell::Empty,
            serde_json::Value::String(s) => RawCell::Text(s.clone()),
            other => RawCell::Text(other.to_string()),
        }
    }
}

/// A spreadsheet row and its 1-based row number
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub row_number: u32,
    pub cells: Vec<RawCell>,
}

impl RawRow {
    pub fn new(row_number: u32, cells: Vec<RawCell>) -> Self {
        Self { row_number, cells }
    }

    pub fn cell(&self, index: usize) -> &RawCell {
        self.cells.get(index).unwrap_or(&RawCell::Empty)
    }

    /// Number of non-empty cells
    pub fn populated(&self) -> usize {
        self.cells.iter().filter(|c| !c.is_empty()).count()
    }
}

/// Classification of a failed spreadsheet read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    NotFound,
    PermissionDenied,
    RateLimited,
    Network,
    Malformed,
    Other,
}

impl SourceErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::RateLimited => "rate_limited",
            Self::Network => "network",
            Self::Malformed => "malformed",
            Self::Other => "other",
        }
    }

    /// Classify an HTTP status from the spreadsheet service
    pub fn from_status(status: u16) -> Self {
        match status {
            404 => Self::NotFound,
            401 | 403 => Self::PermissionDenied,
            429 => Self::RateLimited,
            500..=599 => Self::Network,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for SourceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A failed spreadsheet read
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct SourceError {
    pub kind: SourceErrorKind,
    pub message: String,
}

impl SourceError {
    pub fn new(kind: SourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Read-only access to the spreadsheet backing a source
#[async_trait]
pub trait SheetSource: Send + Sync {
    /// Read every data row starting at `first_row` (1-based, header rows
    /// already excluded by the caller)
    async fn fetch_range(
        &self,
        source: &SourceDescriptor,
        first_row: u32,
    ) -> Result<Vec<RawRow>, SourceError>;

    /// Read only the given rows, in one batched request. Rows that are blank
    /// or beyond the end of the sheet come back with no cells.
    async fn fetch_rows(
        &self,
        source: &SourceDescriptor,
        rows: &[u32],
    ) -> Result<Vec<RawRow>, SourceError>;
}

/// Dispatches reads to the reader matching the source's kind
pub struct SheetRouter {
    google: Arc<dyn SheetSource>,
    workbook: Arc<dyn SheetSource>,
}

impl SheetRouter {
    pub fn new(google: Arc<dyn SheetSource>, workbook: Arc<dyn SheetSource>) -> Self {
        Self { google, workbook }
    }

    fn reader_for(&self, source: &SourceDescriptor) -> &Arc<dyn SheetSource> {
        match source.kind {
            SourceKind::GoogleSheets => &self.google,
            SourceKind::Workbook => &self.workbook,
        }
    }
}

#[async_trait]
impl SheetSource for SheetRouter {
    async fn fetch_range(
        &self,
        source: &SourceDescriptor,
        first_row: u32,
    ) -> Result<Vec<RawRow>, SourceError> {
        self.reader_for(source).fetch_range(source, first_row).await
    }

    async fn fetch_rows(
        &self,
        source: &SourceDescriptor,
        rows: &[u32],
    ) -> Result<Vec<RawRow>, SourceError> {
        self.reader_for(source).fetch_rows(source, rows).await
    }
}

/// Sorted, de-duplicated row list, dropping rows inside the header
pub fn normalize_row_request(rows: &[u32], first_data_row: u32) -> Vec<u32> {
    let mut rows: Vec<u32> = rows
        .iter()
        .copied()
        .filter(|r| *r >= first_data_row)
        .collect();
    rows.sort_unstable();
    rows.dedup();
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cell_from_json() {
        assert_eq!(RawCell::from_json(&json!("Acme")), RawCell::Text("Acme".to_string()));
        assert_eq!(RawCell::from_json(&json!("")), RawCell::Empty);
        assert_eq!(RawCell::from_json(&json!(45292)), RawCell::Number(45292.0));
        assert_eq!(RawCell::from_json(&json!(true)), RawCell::Bool(true));
        assert_eq!(RawCell::from_json(&json!(null)), RawCell::Empty);
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(SourceErrorKind::from_status(404), SourceErrorKind::NotFound);
        assert_eq!(SourceErrorKind::from_status(403), SourceErrorKind::PermissionDenied);
        assert_eq!(SourceErrorKind::from_status(429), SourceErrorKind::RateLimited);
        assert_eq!(SourceErrorKind::from_status(503), SourceErrorKind::Network);
        assert_eq!(SourceErrorKind::from_status(418), SourceErrorKind::Other);
    }

    #[test]
    fn test_populated_ignores_blank_text() {
        let row = RawRow::new(
            2,
            vec![
                RawCell::Text("x".to_string()),
                RawCell::Text("   ".to_string()),
                RawCell::Empty,
                RawCell::Number(0.0),
            ],
        );
        assert_eq!(row.populated(), 2);
        assert_eq!(row.cell(10), &RawCell::Empty);
    }

    #[test]
    fn test_normalize_row_request() {
        assert_eq!(normalize_row_request(&[9, 1, 3, 9, 2], 2), vec![2, 3, 9]);
    }
}
