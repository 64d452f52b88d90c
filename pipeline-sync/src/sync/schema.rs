//! Column-mapping schemas for pipeline tracking sheets
//!
//! Each organizational group lays its sheet out differently. A schema is a
//! typed table of (column index, field, value kind, required, default) that a
//! single decode routine evaluates, plus the group's valid status values.
//!
//! Built-in tables cover the `direct` and `programmatic` groups. Groups listed
//! under `[[groups]]` in the config file replace or extend them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::models::Field;

/// How a cell is decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Text,
    /// Comma-grouped numbers, currency symbols, trailing percent
    Decimal,
    Integer,
    /// Percent value; fractions from percent-formatted cells are scaled to 0-100
    Percent,
    /// ISO text, free-text dates, or spreadsheet serial day numbers
    Date,
    Boolean,
}

/// Single mapping from a sheet column to a record field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// 0-based column position (A = 0)
    pub index: usize,
    pub field: Field,
    pub kind: ValueKind,
    #[serde(default)]
    pub required: bool,
    /// Raw text decoded in place of an empty cell
    #[serde(default)]
    pub default: Option<String>,
}

impl ColumnSpec {
    fn new(index: usize, field: Field, kind: ValueKind) -> Self {
        Self {
            index,
            field,
            kind,
            required: false,
            default: None,
        }
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn with_default(mut self, default: &str) -> Self {
        self.default = Some(default.to_string());
        self
    }
}

/// Layout and status vocabulary for one organizational group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSchema {
    pub group: String,
    /// Rows with fewer populated cells are rejected
    pub min_columns: usize,
    pub valid_statuses: Vec<String>,
    pub default_status: String,
    pub columns: Vec<ColumnSpec>,
}

impl GroupSchema {
    /// Canonical spelling of `status` if it is in the valid set (case-insensitive)
    pub fn canonical_status(&self, status: &str) -> Option<&str> {
        let wanted = status.trim();
        self.valid_statuses
            .iter()
            .find(|s| s.eq_ignore_ascii_case(wanted))
            .map(|s| s.as_str())
    }

    pub fn column_for(&self, field: Field) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.field == field)
    }

    /// Consistency problems in a schema table
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.canonical_status(&self.default_status).is_none() {
            problems.push(format!(
                "group '{}': default status '{}' is not in valid_statuses",
                self.group, self.default_status
            ));
        }

        let mut seen = HashMap::new();
        for column in &self.columns {
            if let Some(previous) = seen.insert(column.field, column.index) {
                problems.push(format!(
                    "group '{}': field {} mapped twice (columns {} and {})",
                    self.group, column.field, previous, column.index
                ));
            }
        }

        if self.column_for(Field::NaturalKey).is_none() {
            problems.push(format!("group '{}': no natural_key column", self.group));
        }

        problems
    }
}

/// Schemas for every known group
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    groups: HashMap<String, GroupSchema>,
}

impl SchemaRegistry {
    /// Built-in schemas only
    pub fn builtin() -> Self {
        let groups = [direct_schema(), programmatic_schema()]
            .into_iter()
            .map(|s| (s.group.clone(), s))
            .collect();
        Self { groups }
    }

    /// Built-in schemas with config-supplied groups layered on top
    pub fn with_overrides(overrides: Vec<GroupSchema>) -> Self {
        let mut registry = Self::builtin();
        for schema in overrides {
            for problem in schema.validate() {
                log::warn!("Schema override: {}", problem);
            }
            log::debug!("Registering schema for group '{}'", schema.group);
            registry.groups.insert(schema.group.to_lowercase(), schema);
        }
        registry
    }

    pub fn get(&self, group: &str) -> Option<&GroupSchema> {
        self.groups.get(&group.trim().to_lowercase())
    }

    pub fn group_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.groups.keys().map(|k| k.as_str()).collect();
        names.sort();
        names
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Direct sales team tracking sheet
pub fn direct_schema() -> GroupSchema {
    use Field::*;
    use ValueKind::*;

    GroupSchema {
        group: "direct".to_string(),
        min_columns: 4,
        valid_statuses: [
            "Prospecting",
            "Proposal Sent",
            "Negotiation",
            "Verbal",
            "Closed Won",
            "Closed Lost",
            "On Hold",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
        default_status: "Prospecting".to_string(),
        columns: vec![
            ColumnSpec::new(0, NaturalKey, Text).required(),   // A: Deal ID
            ColumnSpec::new(1, Advertiser, Text).required(),   // B: Advertiser
            ColumnSpec::new(2, Agency, Text),                  // C: Agency
            ColumnSpec::new(3, Description, Text),             // D: Campaign
            ColumnSpec::new(4, Status, Text).required(),       // E: Stage
            ColumnSpec::new(5, Owner, Text).required(),        // F: Seller
            ColumnSpec::new(6, Team, Text),                    // G: Team
            ColumnSpec::new(7, ForecastRevenue, Decimal),      // H: Gross Forecast
            ColumnSpec::new(8, Probability, Percent),          // I: Probability
            ColumnSpec::new(9, Impressions, Integer),          // J: Impressions
            ColumnSpec::new(10, ProposalDate, Date),           // K: Proposal Date
            ColumnSpec::new(11, WonDate, Date),                // L: Won Date
            ColumnSpec::new(12, LostDate, Date),               // M: Lost Date
            ColumnSpec::new(13, IsRenewal, Boolean).with_default("no"), // N: Renewal
            ColumnSpec::new(14, Notes, Text),                  // O: Notes
        ],
    }
}

/// Programmatic team tracking sheet
pub fn programmatic_schema() -> GroupSchema {
    use Field::*;
    use ValueKind::*;

    GroupSchema {
        group: "programmatic".to_string(),
        min_columns: 3,
        valid_statuses: ["Pitch", "RFP", "Proposal", "Commit", "Won", "Lost"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        default_status: "Pitch".to_string(),
        columns: vec![
            ColumnSpec::new(0, NaturalKey, Text).required(), // A: Deal ID
            ColumnSpec::new(1, Status, Text).required(),     // B: Status
            ColumnSpec::new(2, Advertiser, Text).required(), // C: Brand
            ColumnSpec::new(3, Agency, Text),                // D: Agency / Trading desk
            ColumnSpec::new(4, Owner, Text).required(),      // E: Account Manager
            ColumnSpec::new(5, Team, Text).with_default("Programmatic"),
            ColumnSpec::new(6, Description, Text),           // G: Deal name
            ColumnSpec::new(7, ProposalDate, Date),          // H: Submitted
            ColumnSpec::new(8, ForecastRevenue, Decimal),    // I: Net Forecast
            ColumnSpec::new(9, Probability, Percent),        // J: Confidence
            ColumnSpec::new(10, WonDate, Date),              // K: Closed Won
            ColumnSpec::new(11, LostDate, Date),             // L: Closed Lost
            ColumnSpec::new(12, Notes, Text),                // M: Comments
        ],
    }
}
