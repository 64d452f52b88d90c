//! Core data types for spreadsheet reconciliation
//!
//! These types describe the registered spreadsheet scopes, the pipeline
//! records kept in step with them, and the bookkeeping written by each run.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::sanitize::sanitize_text;

/// Decimal places kept when comparing numeric fields
const DECIMAL_COMPARE_PLACES: i32 = 4;

// ============================================================================
// Source Descriptor
// ============================================================================

/// Whether a registered source may be synced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Active,
    Paused,
    Archived,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where the spreadsheet lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Google Sheets document, `spreadsheet_id` is the document id
    GoogleSheets,
    /// Local `.xlsx` workbook, `spreadsheet_id` is the file path
    Workbook,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GoogleSheets => "google",
            Self::Workbook => "workbook",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "google" | "gsheets" | "google_sheets" => Some(Self::GoogleSheets),
            "workbook" | "xlsx" | "excel" => Some(Self::Workbook),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One synchronizable spreadsheet scope (file + tab + group + period)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub id: i64,
    pub kind: SourceKind,
    /// Google document id, or a workbook path for [`SourceKind::Workbook`]
    pub spreadsheet_id: String,
    pub sheet_name: String,
    /// Organizational group, selects the column-mapping schema
    pub group_name: String,
    pub fiscal_year: i32,
    /// Fiscal period label (e.g. "FY2026-Q3")
    pub period: String,
    pub sync_status: SyncStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_sync_outcome: Option<RunOutcome>,
    pub last_sync_error: Option<String>,
}

/// Fields needed to register a new source
#[derive(Debug, Clone)]
pub struct NewSource {
    pub kind: SourceKind,
    pub spreadsheet_id: String,
    pub sheet_name: String,
    pub group_name: String,
    pub fiscal_year: i32,
    pub period: String,
}

/// Sync bookkeeping written onto a source at the end of each run
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSyncState {
    pub last_synced_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub error_summary: Option<String>,
}

// ============================================================================
// Pipeline Record
// ============================================================================

/// A typed field value, as decoded from a sheet cell or read from the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum FieldValue {
    Empty,
    Text(String),
    Decimal(f64),
    Integer(i64),
    Date(NaiveDate),
    Boolean(bool),
}

impl FieldValue {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            Self::Text(s) => sanitize_text(s).is_empty(),
            other => other.is_empty(),
        }
    }

    pub fn from_text(value: Option<&str>) -> Self {
        match value {
            Some(s) if !s.is_empty() => Self::Text(s.to_string()),
            _ => Self::Empty,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Empty => None,
            Self::Text(s) if s.is_empty() => None,
            Self::Text(s) => Some(s.clone()),
            Self::Decimal(d) => Some(d.to_string()),
            Self::Integer(i) => Some(i.to_string()),
            Self::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            Self::Boolean(b) => Some(b.to_string()),
        }
    }

    pub fn as_decimal(&self) -> Option<f64> {
        match self {
            Self::Decimal(d) => Some(*d),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Decimal(d) => Some(d.round() as i64),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Equality after normalization: sanitized text, numbers rounded to a
    /// fixed precision, dates as calendar days, empty text equal to missing.
    pub fn normalized_eq(&self, other: &FieldValue) -> bool {
        match (self, other) {
            (a, b) if a.is_blank() && b.is_blank() => true,
            (Self::Text(a), Self::Text(b)) => sanitize_text(a) == sanitize_text(b),
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (a, b) => match (a.as_decimal(), b.as_decimal()) {
                (Some(x), Some(y)) => round_decimal(x) == round_decimal(y),
                _ => false,
            },
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.as_text() {
            Some(s) => write!(f, "{}", s),
            None => write!(f, "(empty)"),
        }
    }
}

fn round_decimal(value: f64) -> i64 {
    let factor = 10f64.powi(DECIMAL_COMPARE_PLACES);
    (value * factor).round() as i64
}

/// Every field on a pipeline record that the spreadsheet owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    NaturalKey,
    Status,
    Owner,
    Team,
    Advertiser,
    Agency,
    Description,
    ForecastRevenue,
    Probability,
    Impressions,
    ProposalDate,
    WonDate,
    LostDate,
    IsRenewal,
    Notes,
    // Derived at transform time
    WeightedRevenue,
    FiscalYear,
    GroupName,
}

impl Field {
    /// Fields compared and written by a sync update
    pub const SYNCABLE: &'static [Field] = &[
        Field::NaturalKey,
        Field::Status,
        Field::Owner,
        Field::Team,
        Field::Advertiser,
        Field::Agency,
        Field::Description,
        Field::ForecastRevenue,
        Field::Probability,
        Field::Impressions,
        Field::ProposalDate,
        Field::WonDate,
        Field::LostDate,
        Field::IsRenewal,
        Field::Notes,
        Field::WeightedRevenue,
        Field::FiscalYear,
        Field::GroupName,
    ];

    /// Column name in `pipeline_records`
    pub fn column(&self) -> &'static str {
        match self {
            Self::NaturalKey => "natural_key",
            Self::Status => "status",
            Self::Owner => "owner",
            Self::Team => "team",
            Self::Advertiser => "advertiser",
            Self::Agency => "agency",
            Self::Description => "description",
            Self::ForecastRevenue => "forecast_revenue",
            Self::Probability => "probability",
            Self::Impressions => "impressions",
            Self::ProposalDate => "proposal_date",
            Self::WonDate => "won_date",
            Self::LostDate => "lost_date",
            Self::IsRenewal => "is_renewal",
            Self::Notes => "notes",
            Self::WeightedRevenue => "weighted_revenue",
            Self::FiscalYear => "fiscal_year",
            Self::GroupName => "group_name",
        }
    }

    pub fn is_derived(&self) -> bool {
        matches!(
            self,
            Self::WeightedRevenue | Self::FiscalYear | Self::GroupName
        )
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.column())
    }
}

/// One tracked sales opportunity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRecord {
    /// Store id, `None` until inserted
    pub id: Option<i64>,
    pub source_id: i64,
    /// 1-based spreadsheet row (together with `source_id`, the position key)
    pub row_number: u32,
    pub composite_key: String,
    pub natural_key: String,
    pub status: String,
    pub owner: String,
    pub team: Option<String>,
    pub advertiser: String,
    pub agency: Option<String>,
    pub description: Option<String>,
    pub forecast_revenue: Option<f64>,
    pub probability: Option<f64>,
    pub weighted_revenue: Option<f64>,
    pub impressions: Option<i64>,
    pub proposal_date: Option<NaiveDate>,
    pub won_date: Option<NaiveDate>,
    pub lost_date: Option<NaiveDate>,
    pub is_renewal: Option<bool>,
    pub notes: Option<String>,
    pub fiscal_year: i32,
    pub group_name: String,
}

impl PipelineRecord {
    /// Empty record bound to a source row
    pub fn new(source_id: i64, row_number: u32) -> Self {
        Self {
            id: None,
            source_id,
            row_number,
            composite_key: String::new(),
            natural_key: String::new(),
            status: String::new(),
            owner: String::new(),
            team: None,
            advertiser: String::new(),
            agency: None,
            description: None,
            forecast_revenue: None,
            probability: None,
            weighted_revenue: None,
            impressions: None,
            proposal_date: None,
            won_date: None,
            lost_date: None,
            is_renewal: None,
            notes: None,
            fiscal_year: 0,
            group_name: String::new(),
        }
    }

    pub fn get(&self, field: Field) -> FieldValue {
        match field {
            Field::NaturalKey => FieldValue::from_text(Some(&self.natural_key)),
            Field::Status => FieldValue::from_text(Some(&self.status)),
            Field::Owner => FieldValue::from_text(Some(&self.owner)),
            Field::Team => FieldValue::from_text(self.team.as_deref()),
            Field::Advertiser => FieldValue::from_text(Some(&self.advertiser)),
            Field::Agency => FieldValue::from_text(self.agency.as_deref()),
            Field::Description => FieldValue::from_text(self.description.as_deref()),
            Field::ForecastRevenue => decimal_value(self.forecast_revenue),
            Field::Probability => decimal_value(self.probability),
            Field::WeightedRevenue => decimal_value(self.weighted_revenue),
            Field::Impressions => self
                .impressions
                .map(FieldValue::Integer)
                .unwrap_or(FieldValue::Empty),
            Field::ProposalDate => date_value(self.proposal_date),
            Field::WonDate => date_value(self.won_date),
            Field::LostDate => date_value(self.lost_date),
            Field::IsRenewal => self
                .is_renewal
                .map(FieldValue::Boolean)
                .unwrap_or(FieldValue::Empty),
            Field::Notes => FieldValue::from_text(self.notes.as_deref()),
            Field::FiscalYear => FieldValue::Integer(self.fiscal_year as i64),
            Field::GroupName => FieldValue::from_text(Some(&self.group_name)),
        }
    }

    pub fn set(&mut self, field: Field, value: FieldValue) {
        match field {
            Field::NaturalKey => self.natural_key = value.as_text().unwrap_or_default(),
            Field::Status => self.status = value.as_text().unwrap_or_default(),
            Field::Owner => self.owner = value.as_text().unwrap_or_default(),
            Field::Team => self.team = value.as_text(),
            Field::Advertiser => self.advertiser = value.as_text().unwrap_or_default(),
            Field::Agency => self.agency = value.as_text(),
            Field::Description => self.description = value.as_text(),
            Field::ForecastRevenue => self.forecast_revenue = value.as_decimal(),
            Field::Probability => self.probability = value.as_decimal(),
            Field::WeightedRevenue => self.weighted_revenue = value.as_decimal(),
            Field::Impressions => self.impressions = value.as_integer(),
            Field::ProposalDate => self.proposal_date = value.as_date(),
            Field::WonDate => self.won_date = value.as_date(),
            Field::LostDate => self.lost_date = value.as_date(),
            Field::IsRenewal => self.is_renewal = value.as_bool(),
            Field::Notes => self.notes = value.as_text(),
            Field::FiscalYear => {
                self.fiscal_year = value.as_integer().map(|v| v as i32).unwrap_or_default()
            }
            Field::GroupName => self.group_name = value.as_text().unwrap_or_default(),
        }
    }

    /// Deterministic identity built from business fields. Survives row moves,
    /// changes whenever one of the contributing fields is edited.
    pub fn compute_composite_key(&self) -> String {
        let date = self
            .proposal_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();

        [
            self.natural_key.as_str(),
            self.status.as_str(),
            self.owner.as_str(),
            self.description.as_deref().unwrap_or(""),
            date.as_str(),
        ]
        .iter()
        .map(|part| sanitize_text(part).to_lowercase())
        .collect::<Vec<_>>()
        .join("|")
    }

    /// Recompute the derived fields after the business fields changed
    pub fn refresh_derived(&mut self) {
        self.weighted_revenue = match (self.forecast_revenue, self.probability) {
            (Some(revenue), Some(probability)) => {
                Some((revenue * probability / 100.0 * 100.0).round() / 100.0)
            }
            _ => None,
        };
        self.composite_key = self.compute_composite_key();
    }

    /// Fields whose normalized values differ between `self` and `other`
    pub fn changed_fields(&self, other: &PipelineRecord) -> Vec<Field> {
        Field::SYNCABLE
            .iter()
            .copied()
            .filter(|field| !self.get(*field).normalized_eq(&other.get(*field)))
            .collect()
    }
}

fn decimal_value(value: Option<f64>) -> FieldValue {
    value.map(FieldValue::Decimal).unwrap_or(FieldValue::Empty)
}

fn date_value(value: Option<NaiveDate>) -> FieldValue {
    value.map(FieldValue::Date).unwrap_or(FieldValue::Empty)
}

/// Per-month forecast breakdown owned by a pipeline record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyForecast {
    /// `YYYY-MM`
    pub month: String,
    pub amount: f64,
}

// ============================================================================
// Change set
// ============================================================================

/// Why a sheet row was paired with a stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchReason {
    /// Same source and row number
    Position,
    /// Same composite key, row moved from `previous_row`
    Composite { previous_row: u32 },
}

impl MatchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Position => "position",
            Self::Composite { .. } => "composite",
        }
    }
}

impl std::fmt::Display for MatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Position => write!(f, "position"),
            Self::Composite { previous_row } => {
                write!(f, "composite (moved from row {})", previous_row)
            }
        }
    }
}

/// A matched record whose syncable fields changed
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpdate {
    /// Store id of the matched record
    pub id: i64,
    /// Incoming values, carrying the new row number and composite key
    pub incoming: PipelineRecord,
    pub reason: MatchReason,
    /// Fields that differed (empty when only the row moved)
    pub changed: Vec<Field>,
}

/// Output of the reconciler
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub to_create: Vec<PipelineRecord>,
    pub to_update: Vec<PendingUpdate>,
    pub to_delete: Vec<PipelineRecord>,
    /// Data-quality notes (composite collisions, duplicate positions)
    pub warnings: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

// ============================================================================
// Run bookkeeping
// ============================================================================

/// Final state of a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Partial,
    Failed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Self::Success),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// `success` with no row errors, `partial` otherwise
    pub fn from_errors(errors: &[String]) -> Self {
        if errors.is_empty() {
            Self::Success
        } else {
            Self::Partial
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Full sheet read, or a subset of rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Full,
    Incremental,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "full" => Some(Self::Full),
            "incremental" => Some(Self::Incremental),
            _ => None,
        }
    }
}

/// Summary record of one reconciliation attempt. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRunRecord {
    pub id: String,
    pub source_id: i64,
    pub mode: SyncMode,
    pub outcome: RunOutcome,
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Classified failure for `failed` runs
    pub error_kind: Option<String>,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Immutable deletion snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedRecord {
    pub id: Option<i64>,
    pub source_id: i64,
    pub original_id: i64,
    pub natural_key: String,
    /// The persisted row as stored, keyed by column name. Includes columns
    /// the sync never writes (kanban placement, timestamps).
    pub record: serde_json::Value,
    pub children: Vec<MonthlyForecast>,
    pub reason: String,
    pub run_id: String,
    pub archived_at: DateTime<Utc>,
}

impl ArchivedRecord {
    /// A snapshot column rendered as text, `None` when null or absent
    pub fn column_text(&self, column: &str) -> Option<String> {
        match self.record.get(column)? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn column_f64(&self, column: &str) -> Option<f64> {
        self.record.get(column)?.as_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> PipelineRecord {
        let mut r = PipelineRecord::new(1, 4);
        r.natural_key = "D-100".to_string();
        r.status = "Proposal Sent".to_string();
        r.owner = "Dana Reyes".to_string();
        r.description = Some("Q3 Video Flight".to_string());
        r.proposal_date = NaiveDate::from_ymd_opt(2026, 7, 1);
        r
    }

    #[test]
    fn test_composite_key_is_lowercase_and_ordered() {
        let r = record();
        assert_eq!(
            r.compute_composite_key(),
            "d-100|proposal sent|dana reyes|q3 video flight|2026-07-01"
        );
    }

    #[test]
    fn test_composite_key_ignores_whitespace_noise() {
        let mut noisy = record();
        noisy.owner = "  Dana\tReyes \n".to_string();
        assert_eq!(noisy.compute_composite_key(), record().compute_composite_key());
    }

    #[test]
    fn test_normalized_eq_absorbs_float_noise() {
        assert!(FieldValue::Decimal(0.1 + 0.2).normalized_eq(&FieldValue::Decimal(0.3)));
        assert!(!FieldValue::Decimal(100.0).normalized_eq(&FieldValue::Decimal(150.0)));
        assert!(FieldValue::Integer(5).normalized_eq(&FieldValue::Decimal(5.0)));
    }

    #[test]
    fn test_normalized_eq_treats_empty_text_as_missing() {
        assert!(FieldValue::Text(String::new()).normalized_eq(&FieldValue::Empty));
        assert!(!FieldValue::Decimal(0.0).normalized_eq(&FieldValue::Empty));
    }

    #[test]
    fn test_refresh_derived_computes_weighted_revenue() {
        let mut r = record();
        r.forecast_revenue = Some(12_500.0);
        r.probability = Some(40.0);
        r.refresh_derived();
        assert_eq!(r.weighted_revenue, Some(5_000.0));
        assert_eq!(r.composite_key, r.compute_composite_key());
    }

    #[test]
    fn test_changed_fields_reports_only_differences() {
        let a = record();
        let mut b = record();
        b.forecast_revenue = Some(150.0);
        b.notes = Some("  ".to_string());
        assert_eq!(a.changed_fields(&b), vec![Field::ForecastRevenue]);
    }

    #[test]
    fn test_set_and_get_round_trip_through_field_values() {
        let mut r = PipelineRecord::new(1, 2);
        r.set(Field::Impressions, FieldValue::Decimal(1500.4));
        r.set(Field::IsRenewal, FieldValue::Boolean(true));
        assert_eq!(r.get(Field::Impressions), FieldValue::Integer(1500));
        assert_eq!(r.get(Field::IsRenewal), FieldValue::Boolean(true));
    }
}
