//! Domain layer containing core business types, traits, and error definitions.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{AppError, CacheError, ConfigError, DatabaseError, LedgerError, ValidationError};
pub use traits::{
    CacheInvalidator, DatabaseClient, EntityStore, LedgerClient, PassLease, TransactionReceipt,
    VersionedRecord,
};
pub use types::{
    Attribute, Collection, EntityKind, ErrorDetail, ErrorResponse, FinalityVerdict, Fraction,
    HealthResponse, HealthStatus, KindReport, LedgerReference, Ownership, ReconcileReport,
    ReconcileShape, RecordOutcome, RecordStatus, Rental, Token, Transaction,
    normalize_ledger_reference, validate_ledger_reference,
};
