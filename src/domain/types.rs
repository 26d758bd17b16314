use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::error::ValidationError as DomainValidationError;

/// Transaction hash linking a staged row to its ledger operation.
pub type LedgerReference = String;

/// Lifecycle status of a versioned mutation record.
///
/// The string forms are persisted and must match exactly.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Active,
    #[default]
    WaitingConfirmation,
    Inactive,
}

impl RecordStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::WaitingConfirmation => "waiting_confirmation",
            RecordStatus::Inactive => "inactive",
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, RecordStatus::WaitingConfirmation)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = DomainValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RecordStatus::Active),
            "waiting_confirmation" => Ok(RecordStatus::WaitingConfirmation),
            "inactive" => Ok(RecordStatus::Inactive),
            other => Err(DomainValidationError::InvalidField {
                field: "status".to_string(),
                message: format!("unknown status '{other}'"),
            }),
        }
    }
}

/// How a confirmed staging row becomes live state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileShape {
    /// Confirmed fields are merged onto the superseded row, the staging row is deleted.
    Supersede,
    /// The staging row's own status flips to active in place.
    Flip,
}

/// The six reconcilable entity kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Token,
    Ownership,
    Collection,
    Rental,
    Transaction,
    Fraction,
}

impl EntityKind {
    /// Processing order of a reconciliation pass.
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Token,
        EntityKind::Ownership,
        EntityKind::Collection,
        EntityKind::Transaction,
        EntityKind::Rental,
        EntityKind::Fraction,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Token => "token",
            EntityKind::Ownership => "ownership",
            EntityKind::Collection => "collection",
            EntityKind::Rental => "rental",
            EntityKind::Transaction => "transaction",
            EntityKind::Fraction => "fraction",
        }
    }

    #[must_use]
    pub fn shape(&self) -> ReconcileShape {
        match self {
            EntityKind::Token | EntityKind::Ownership | EntityKind::Collection => {
                ReconcileShape::Supersede
            }
            EntityKind::Rental | EntityKind::Transaction | EntityKind::Fraction => {
                ReconcileShape::Flip
            }
        }
    }

    /// Cache namespace pattern evicted after each pass over this kind.
    #[must_use]
    pub fn cache_prefix(&self) -> &'static str {
        match self {
            EntityKind::Token => "token-*",
            EntityKind::Ownership => "ownership-*",
            EntityKind::Collection => "collection-*",
            EntityKind::Rental => "rental-*",
            EntityKind::Transaction => "transaction-*",
            EntityKind::Fraction => "fraction-*",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalizes a transaction hash to lower-case `0x`-prefixed hex.
///
/// # Errors
///
/// Returns an error unless the input holds exactly 32 bytes of hex.
pub fn normalize_ledger_reference(raw: &str) -> Result<LedgerReference, DomainValidationError> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.len() != 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DomainValidationError::InvalidField {
            field: "ledger_reference".to_string(),
            message: format!("expected 32-byte hex transaction hash, got '{trimmed}'"),
        });
    }

    Ok(format!("0x{}", digits.to_ascii_lowercase()))
}

/// `validator` hook for ledger reference fields.
pub fn validate_ledger_reference(value: &str) -> Result<(), validator::ValidationError> {
    normalize_ledger_reference(value)
        .map(|_| ())
        .map_err(|_| validator::ValidationError::new("ledger_reference"))
}

/// The ledger's answer for a settled transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalityVerdict {
    Success,
    Failure,
}

impl FinalityVerdict {
    /// Receipt status `1` is the only success value.
    #[must_use]
    pub fn from_receipt_status(status: Option<u64>) -> Self {
        match status {
            Some(1) => FinalityVerdict::Success,
            _ => FinalityVerdict::Failure,
        }
    }
}

/// A single `trait_type`/`value` pair of token metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attribute {
    pub trait_type: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Validate)]
pub struct Token {
    pub id: Uuid,
    pub previous_id: Option<Uuid>,
    pub token_index: i32,
    pub title: String,
    pub description: String,
    pub category_id: Uuid,
    pub collection_id: Uuid,
    pub image: String,
    pub uri: String,
    pub source_id: Option<Uuid>,
    pub fraction_id: Option<Uuid>,
    #[validate(range(min = 0))]
    pub supply: i32,
    #[validate(range(min = 0.0))]
    pub last_price: f64,
    #[validate(range(min = 0.0))]
    pub initial_price: f64,
    #[validate(range(min = 0))]
    pub views: i64,
    #[validate(range(min = 0))]
    pub number_of_transactions: i64,
    #[validate(range(min = 0.0))]
    pub volume_transactions: f64,
    pub creator_id: Uuid,
    pub attributes: Vec<Attribute>,
    pub status: RecordStatus,
    #[validate(custom(function = "validate_ledger_reference"))]
    pub ledger_reference: LedgerReference,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Validate)]
pub struct Ownership {
    pub id: Uuid,
    pub previous_id: Option<Uuid>,
    pub token_id: Uuid,
    pub user_id: Uuid,
    #[validate(range(min = 0))]
    pub quantity: i32,
    #[validate(range(min = 0.0))]
    pub sale_price: f64,
    #[validate(range(min = 0.0))]
    pub rent_cost: f64,
    pub available_for_sale: bool,
    pub available_for_rent: bool,
    pub status: RecordStatus,
    #[validate(custom(function = "validate_ledger_reference"))]
    pub ledger_reference: LedgerReference,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ownership {
    /// An ownership holding nothing is retired rather than kept live.
    #[must_use]
    pub fn status_for_quantity(quantity: i32) -> RecordStatus {
        if quantity > 0 {
            RecordStatus::Active
        } else {
            RecordStatus::Inactive
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Validate)]
pub struct Collection {
    pub id: Uuid,
    pub previous_id: Option<Uuid>,
    pub thumbnail: Option<String>,
    pub cover: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    #[validate(range(min = 0))]
    pub views: i64,
    #[validate(range(min = 0))]
    pub number_of_items: i64,
    #[validate(range(min = 0))]
    pub number_of_transactions: i64,
    #[validate(range(min = 0.0))]
    pub volume_transactions: f64,
    #[validate(range(min = 0.0))]
    pub floor: f64,
    pub category_id: Uuid,
    pub creator_id: Uuid,
    pub status: RecordStatus,
    #[validate(custom(function = "validate_ledger_reference"))]
    pub ledger_reference: LedgerReference,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Validate)]
pub struct Rental {
    pub id: Uuid,
    pub previous_id: Option<Uuid>,
    pub user_id: Uuid,
    pub owner_id: Uuid,
    pub token_id: Uuid,
    pub ownership_id: Uuid,
    /// End of the rental window.
    pub timestamp: Option<DateTime<Utc>>,
    pub status: RecordStatus,
    #[validate(custom(function = "validate_ledger_reference"))]
    pub ledger_reference: LedgerReference,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Validate)]
pub struct Transaction {
    pub id: Uuid,
    pub previous_id: Option<Uuid>,
    pub user_from_id: Uuid,
    pub user_to_id: Uuid,
    pub ownership_id: Uuid,
    pub rental_id: Option<Uuid>,
    pub token_id: Uuid,
    pub collection_id: Option<Uuid>,
    #[validate(length(min = 1, max = 32))]
    pub transaction_type: String,
    #[validate(range(min = 0))]
    pub quantity: i32,
    #[validate(range(min = 0.0))]
    pub amount: f64,
    #[validate(range(min = 0.0))]
    pub gas_fee: f64,
    pub status: RecordStatus,
    #[validate(custom(function = "validate_ledger_reference"))]
    pub ledger_reference: LedgerReference,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Validate)]
pub struct Fraction {
    pub id: Uuid,
    pub previous_id: Option<Uuid>,
    pub token_parent_id: Uuid,
    pub token_fraction_id: Uuid,
    pub status: RecordStatus,
    #[validate(custom(function = "validate_ledger_reference"))]
    pub ledger_reference: LedgerReference,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What happened to one pending row during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    Committed,
    RolledBack,
    Skipped,
    Failed,
}

impl RecordOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordOutcome::Committed => "committed",
            RecordOutcome::RolledBack => "rolled_back",
            RecordOutcome::Skipped => "skipped",
            RecordOutcome::Failed => "failed",
        }
    }
}

/// Per-kind tally of a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindReport {
    pub kind: EntityKind,
    pub pending: usize,
    pub committed: usize,
    pub rolled_back: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Set when the pending set could not be fetched at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_error: Option<String>,
}

impl KindReport {
    #[must_use]
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            pending: 0,
            committed: 0,
            rolled_back: 0,
            skipped: 0,
            failed: 0,
            list_error: None,
        }
    }

    pub fn record(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Committed => self.committed += 1,
            RecordOutcome::RolledBack => self.rolled_back += 1,
            RecordOutcome::Skipped => self.skipped += 1,
            RecordOutcome::Failed => self.failed += 1,
        }
    }

    /// Rows whose persisted state changed in this pass.
    #[must_use]
    pub fn mutated(&self) -> usize {
        self.committed + self.rolled_back
    }
}

/// Result of one full pass over all entity kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub kinds: Vec<KindReport>,
}

impl ReconcileReport {
    #[must_use]
    pub fn kind(&self, kind: EntityKind) -> Option<&KindReport> {
        self.kinds.iter().find(|k| k.kind == kind)
    }

    #[must_use]
    pub fn total_pending(&self) -> usize {
        self.kinds.iter().map(|k| k.pending).sum()
    }

    #[must_use]
    pub fn total_mutated(&self) -> usize {
        self.kinds.iter().map(KindReport::mutated).sum()
    }
}

/// Health check status for services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health check response for the application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub database: HealthStatus,
    pub ledger: HealthStatus,
    pub cache: HealthStatus,
    pub timestamp: DateTime<Utc>,
}

impl HealthResponse {
    /// The cache is advisory, so losing it only degrades the service.
    pub fn new(database: HealthStatus, ledger: HealthStatus, cache: HealthStatus) -> Self {
        let status = match (&database, &ledger, &cache) {
            (HealthStatus::Unhealthy, _, _) | (_, HealthStatus::Unhealthy, _) => {
                HealthStatus::Unhealthy
            }
            (HealthStatus::Healthy, HealthStatus::Healthy, HealthStatus::Healthy) => {
                HealthStatus::Healthy
            }
            _ => HealthStatus::Degraded,
        };

        Self {
            status,
            database,
            ledger,
            cache,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub r#type: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}
