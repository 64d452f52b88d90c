//! Text cleanup applied to every cell before comparison or storage
//!
//! Line breaks, tabs and any other whitespace run collapse to a single space,
//! control characters are dropped, and the result is trimmed. Applying the
//! cleanup twice yields the same text as applying it once.

use crate::sheets::{RawCell, RawRow};

use super::models::PipelineRecord;

/// Byte-order mark and zero-width characters that spreadsheets leak into cells
const INVISIBLE: &[char] = &['\u{feff}', '\u{200b}', '\u{200c}', '\u{200d}', '\u{2060}'];

/// Strip control characters and normalize whitespace
pub fn sanitize_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_space = false;

    for c in input.chars() {
        if c.is_whitespace() {
            pending_space = true;
        } else if c.is_control() || INVISIBLE.contains(&c) {
            continue;
        } else {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        }
    }

    out
}

/// Sanitize an optional text field, mapping blank results to `None`
pub fn sanitize_optional(value: Option<&str>) -> Option<String> {
    value.map(sanitize_text).filter(|s| !s.is_empty())
}

/// Sanitize every text cell of a raw row. Cells that end up blank become
/// [`RawCell::Empty`].
pub fn sanitize_row(row: RawRow) -> RawRow {
    let cells = row
        .cells
        .into_iter()
        .map(|cell| match cell {
            RawCell::Text(text) => {
                let clean = sanitize_text(&text);
                if clean.is_empty() {
                    RawCell::Empty
                } else {
                    RawCell::Text(clean)
                }
            }
            other => other,
        })
        .collect();

    RawRow {
        row_number: row.row_number,
        cells,
    }
}

/// Sanitize the text fields of a record loaded from the store, so legacy data
/// containing control characters compares equal to freshly read sheet data.
pub fn sanitize_record(record: &mut PipelineRecord) {
    record.natural_key = sanitize_text(&record.natural_key);
    record.status = sanitize_text(&record.status);
    record.owner = sanitize_text(&record.owner);
    record.advertiser = sanitize_text(&record.advertiser);
    record.group_name = sanitize_text(&record.group_name);
    record.composite_key = sanitize_text(&record.composite_key);
    record.team = sanitize_optional(record.team.as_deref());
    record.agency = sanitize_optional(record.agency.as_deref());
    record.description = sanitize_optional(record.description.as_deref());
    record.notes = sanitize_optional(record.notes.as_deref());
}
