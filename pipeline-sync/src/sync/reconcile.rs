//! Reconciler: classifies sheet records against stored records.
//!
//! Matching runs in two passes so that position always wins:
//! 1. Position pass - every sheet record whose row number is held by a stored
//!    record is paired with it.
//! 2. Composite pass - remaining sheet records are paired with the first
//!    still-unmatched stored record carrying the same composite key (a row
//!    that moved).
//!
//! Unpaired sheet records become creates, unpaired stored records deletes.
//! Paired records become updates only when a syncable field differs under
//! normalized equality or the row moved.

use std::collections::HashMap;

use super::models::{ChangeSet, MatchReason, PendingUpdate, PipelineRecord};

/// Stored records keyed by row number and by composite key
struct StoredLookup<'a> {
    by_position: HashMap<u32, usize>,
    by_composite: HashMap<&'a str, Vec<usize>>,
}

impl<'a> StoredLookup<'a> {
    fn build(stored: &'a [PipelineRecord], warnings: &mut Vec<String>) -> Self {
        let mut by_position = HashMap::new();
        let mut by_composite: HashMap<&str, Vec<usize>> = HashMap::new();

        for (idx, record) in stored.iter().enumerate() {
            if let Some(&owner) = by_position.get(&record.row_number) {
                let owner: &PipelineRecord = &stored[owner];
                log::warn!(
                    "Stored records {:?} and {:?} share row {}, first one keeps the position",
                    owner.id,
                    record.id,
                    record.row_number
                );
                warnings.push(format!(
                    "row {}: stored records {} and {} share a position",
                    record.row_number,
                    display_id(owner),
                    display_id(record)
                ));
            } else {
                by_position.insert(record.row_number, idx);
            }

            by_composite
                .entry(record.composite_key.as_str())
                .or_default()
                .push(idx);
        }

        Self {
            by_position,
            by_composite,
        }
    }
}

/// Sheet records keyed the same way. Only used to flag duplicated business
/// keys inside the sheet itself.
fn sheet_composite_counts(sheet: &[PipelineRecord]) -> HashMap<&str, usize> {
    let mut counts = HashMap::new();
    for record in sheet {
        *counts.entry(record.composite_key.as_str()).or_insert(0) += 1;
    }
    counts
}

fn display_id(record: &PipelineRecord) -> String {
    record
        .id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "(unsaved)".to_string())
}

/// Compute the change set between freshly transformed sheet records and the
/// records currently stored for the same source. Pure; performs no I/O.
pub fn reconcile(sheet: &[PipelineRecord], stored: &[PipelineRecord]) -> ChangeSet {
    let mut changes = ChangeSet::default();

    let lookup = StoredLookup::build(stored, &mut changes.warnings);
    let sheet_counts = sheet_composite_counts(sheet);

    let mut stored_matched = vec![false; stored.len()];
    let mut pairs: Vec<Option<(usize, MatchReason)>> = vec![None; sheet.len()];

    // Pass 1: position
    for (i, incoming) in sheet.iter().enumerate() {
        if let Some(&s) = lookup.by_position.get(&incoming.row_number) {
            if !stored_matched[s] {
                stored_matched[s] = true;
                pairs[i] = Some((s, MatchReason::Position));
            }
        }
    }

    // Pass 2: composite key among stored records nobody claimed yet
    for (i, incoming) in sheet.iter().enumerate() {
        if pairs[i].is_some() {
            continue;
        }

        let candidates = match lookup.by_composite.get(incoming.composite_key.as_str()) {
            Some(c) => c,
            None => continue,
        };

        match candidates.iter().copied().find(|&s| !stored_matched[s]) {
            Some(s) => {
                stored_matched[s] = true;
                pairs[i] = Some((
                    s,
                    MatchReason::Composite {
                        previous_row: stored[s].row_number,
                    },
                ));
            }
            None => {
                let duplicated = sheet_counts
                    .get(incoming.composite_key.as_str())
                    .copied()
                    .unwrap_or(0);
                log::warn!(
                    "Row {}: composite key '{}' already claimed ({} sheet rows share it), treating as new",
                    incoming.row_number,
                    incoming.composite_key,
                    duplicated
                );
                changes.warnings.push(format!(
                    "row {}: duplicate composite key '{}', created as a new record",
                    incoming.row_number, incoming.composite_key
                ));
            }
        }
    }

    for (incoming, pair) in sheet.iter().zip(&pairs) {
        let (s, reason) = match pair {
            Some(p) => *p,
            None => {
                log::debug!("Row {}: no match, mode=Create", incoming.row_number);
                changes.to_create.push(incoming.clone());
                continue;
            }
        };

        let existing = &stored[s];
        let id = match existing.id {
            Some(id) => id,
            None => {
                // Stored records always carry an id; anything else is treated as new
                changes.to_create.push(incoming.clone());
                continue;
            }
        };

        let changed = existing.changed_fields(incoming);
        let moved = existing.row_number != incoming.row_number;

        if changed.is_empty() && !moved {
            log::debug!(
                "Row {}: matched record {} by {}, unchanged",
                incoming.row_number,
                id,
                reason
            );
            continue;
        }

        log::debug!(
            "Row {}: matched record {} by {}, {} field(s) changed, mode=Update",
            incoming.row_number,
            id,
            reason,
            changed.len()
        );
        for field in &changed {
            log::trace!(
                "  {}: {} -> {}",
                field,
                existing.get(*field),
                incoming.get(*field)
            );
        }

        let mut incoming = incoming.clone();
        incoming.id = Some(id);
        changes.to_update.push(PendingUpdate {
            id,
            incoming,
            reason,
            changed,
        });
    }

    for (record, matched) in stored.iter().zip(&stored_matched) {
        if !matched {
            log::debug!(
                "Stored record {} (row {}) not in sheet, mode=Delete",
                display_id(record),
                record.row_number
            );
            changes.to_delete.push(record.clone());
        }
    }

    log::info!(
        "Reconciled {} sheet rows against {} stored records: {} create, {} update, {} delete",
        sheet.len(),
        stored.len(),
        changes.to_create.len(),
        changes.to_update.len(),
        changes.to_delete.len()
    );

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::models::Field;
    use chrono::NaiveDate;

    const SOURCE: i64 = 1;

    fn record(row: u32, key: &str) -> PipelineRecord {
        let mut r = PipelineRecord::new(SOURCE, row);
        r.natural_key = key.to_string();
        r.status = "Proposal Sent".to_string();
        r.owner = "Dana Reyes".to_string();
        r.advertiser = "Acme".to_string();
        r.description = Some("Video".to_string());
        r.proposal_date = NaiveDate::from_ymd_opt(2026, 7, 1);
        r.forecast_revenue = Some(100.0);
        r.fiscal_year = 2026;
        r.group_name = "direct".to_string();
        r.refresh_derived();
        r
    }

    fn stored(id: i64, row: u32, key: &str) -> PipelineRecord {
        let mut r = record(row, key);
        r.id = Some(id);
        r
    }

    fn ids(records: &[PipelineRecord]) -> Vec<i64> {
        records.iter().filter_map(|r| r.id).collect()
    }

    #[test]
    fn test_changed_revenue_is_position_update() {
        let existing = vec![stored(10, 3, "A")];
        let mut incoming = record(3, "A");
        incoming.forecast_revenue = Some(150.0);

        let changes = reconcile(&[incoming], &existing);

        assert!(changes.to_create.is_empty());
        assert!(changes.to_delete.is_empty());
        assert_eq!(changes.to_update.len(), 1);
        let update = &changes.to_update[0];
        assert_eq!(update.id, 10);
        assert_eq!(update.reason, MatchReason::Position);
        assert_eq!(update.reason.as_str(), "position");
        assert_eq!(update.incoming.forecast_revenue, Some(150.0));
        assert_eq!(update.changed, vec![Field::ForecastRevenue]);
    }

    #[test]
    fn test_moved_row_is_composite_update() {
        let existing = vec![stored(10, 3, "K1")];
        let changes = reconcile(&[record(7, "K1")], &existing);

        assert!(changes.to_create.is_empty());
        assert!(changes.to_delete.is_empty());
        assert_eq!(changes.to_update.len(), 1);
        let update = &changes.to_update[0];
        assert_eq!(update.id, 10);
        assert_eq!(update.reason, MatchReason::Composite { previous_row: 3 });
        assert_eq!(update.incoming.row_number, 7);
        assert!(update.changed.is_empty());
    }

    #[test]
    fn test_row_five_moved_to_nine_is_not_delete_and_create() {
        let existing = vec![stored(1, 4, "D-1"), stored(2, 5, "D-2")];
        let sheet = vec![record(4, "D-1"), record(9, "D-2")];

        let changes = reconcile(&sheet, &existing);

        assert!(changes.to_create.is_empty());
        assert!(changes.to_delete.is_empty());
        assert_eq!(changes.to_update.len(), 1);
        assert_eq!(changes.to_update[0].id, 2);
        assert_eq!(
            changes.to_update[0].reason,
            MatchReason::Composite { previous_row: 5 }
        );
    }

    #[test]
    fn test_missing_row_is_deleted() {
        let existing = vec![stored(10, 3, "K1")];
        let changes = reconcile(&[], &existing);

        assert!(changes.to_create.is_empty());
        assert!(changes.to_update.is_empty());
        assert_eq!(ids(&changes.to_delete), vec![10]);
    }

    #[test]
    fn test_position_wins_over_composite() {
        // Row 3 was edited so its composite key now equals the record at row 9
        let existing = vec![stored(1, 3, "K1"), stored(2, 9, "K2")];
        let sheet = vec![record(3, "K2")];

        let changes = reconcile(&sheet, &existing);

        assert_eq!(changes.to_update.len(), 1);
        assert_eq!(changes.to_update[0].id, 1);
        assert_eq!(changes.to_update[0].reason, MatchReason::Position);
        assert!(changes.to_update[0].changed.contains(&Field::NaturalKey));
        assert_eq!(ids(&changes.to_delete), vec![2]);
        assert!(changes.to_create.is_empty());
    }

    #[test]
    fn test_position_pass_runs_before_composite_pass() {
        // Sheet row 2 carries the key stored at row 5, and sheet row 5 still
        // exists. Row 5 must keep its record even though row 2 is seen first.
        let existing = vec![stored(1, 5, "K1")];
        let sheet = vec![record(2, "K1"), record(5, "K1")];

        let changes = reconcile(&sheet, &existing);

        assert!(changes.to_update.is_empty());
        assert_eq!(changes.to_create.len(), 1);
        assert_eq!(changes.to_create[0].row_number, 2);
        assert_eq!(changes.warnings.len(), 1);
    }

    #[test]
    fn test_second_run_is_a_no_op() {
        let sheet = vec![record(2, "A"), record(3, "B"), record(4, "C")];

        let first = reconcile(&sheet, &[]);
        assert_eq!(first.to_create.len(), 3);

        // Simulate the store after applying the first change set
        let persisted: Vec<PipelineRecord> = first
            .to_create
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let mut r = r.clone();
                r.id = Some(i as i64 + 1);
                r
            })
            .collect();

        let second = reconcile(&sheet, &persisted);
        assert!(second.is_empty(), "{:?}", second);
    }

    #[test]
    fn test_normalized_noise_is_not_an_update() {
        let mut existing = stored(1, 3, "A");
        existing.notes = Some("call back\n".to_string());
        existing.forecast_revenue = Some(0.1 + 0.2);
        existing.agency = Some(String::new());

        let mut incoming = record(3, "A");
        incoming.notes = Some("call back".to_string());
        incoming.forecast_revenue = Some(0.3);
        incoming.refresh_derived();

        let changes = reconcile(&[incoming], &[existing]);
        assert!(changes.to_update.is_empty(), "{:?}", changes.to_update);
    }

    #[test]
    fn test_deletes_exactly_the_unmatched_records() {
        let existing = vec![
            stored(1, 2, "A"),
            stored(2, 3, "B"),
            stored(3, 4, "C"),
            stored(4, 5, "D"),
            stored(5, 6, "E"),
        ];
        // A stays, C moves to row 12, E is edited in place, B and D are gone
        let mut e = record(6, "E");
        e.owner = "Kim Park".to_string();
        e.refresh_derived();
        let sheet = vec![record(2, "A"), record(12, "C"), e, record(13, "NEW")];

        let changes = reconcile(&sheet, &existing);

        let mut deleted = ids(&changes.to_delete);
        deleted.sort();
        assert_eq!(deleted, vec![2, 4]);
        assert_eq!(changes.to_create.len(), 1);
        assert_eq!(changes.to_create[0].natural_key, "NEW");
        let mut updated: Vec<i64> = changes.to_update.iter().map(|u| u.id).collect();
        updated.sort();
        assert_eq!(updated, vec![3, 5]);
    }

    #[test]
    fn test_composite_collision_first_wins_and_warns() {
        let existing = vec![stored(1, 4, "DUP")];
        let sheet = vec![record(10, "DUP"), record(11, "DUP")];

        let changes = reconcile(&sheet, &existing);

        assert_eq!(changes.to_update.len(), 1);
        assert_eq!(changes.to_update[0].incoming.row_number, 10);
        assert_eq!(changes.to_create.len(), 1);
        assert_eq!(changes.to_create[0].row_number, 11);
        assert!(changes.to_delete.is_empty());
        assert_eq!(changes.warnings.len(), 1);
        assert!(changes.warnings[0].contains("row 11"));
    }

    #[test]
    fn test_duplicate_stored_position_first_record_keeps_it() {
        let existing = vec![stored(1, 3, "A"), stored(2, 3, "B")];
        let sheet = vec![record(3, "A")];

        let changes = reconcile(&sheet, &existing);

        assert!(changes.to_update.is_empty());
        assert_eq!(ids(&changes.to_delete), vec![2]);
        assert_eq!(changes.warnings.len(), 1);
    }

    #[test]
    fn test_update_carries_stored_id() {
        let existing = vec![stored(42, 8, "K")];
        let mut incoming = record(8, "K");
        incoming.status = "Verbal".to_string();
        incoming.refresh_derived();

        let changes = reconcile(&[incoming], &existing);

        assert_eq!(changes.to_update[0].incoming.id, Some(42));
        assert!(changes.to_update[0].changed.contains(&Field::Status));
    }
}
