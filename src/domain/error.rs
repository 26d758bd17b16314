//! Application error types with proper error chaining.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Query execution failed: {0}")]
    Query(String),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Duplicate record: {0}")]
    Duplicate(String),
    #[error("Conflicting mutation: {0}")]
    Conflict(String),
    #[error("Pool exhausted: {0}")]
    PoolExhausted(String),
    #[error("Migration failed: {0}")]
    Migration(String),
}

#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("RPC call failed: {0}")]
    RpcError(String),
    #[error("Receipt not yet available: {0}")]
    ReceiptUnavailable(String),
    #[error("Invalid ledger reference: {0}")]
    InvalidReference(String),
    #[error("Timeout waiting for ledger: {0}")]
    Timeout(String),
}

#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Cache command failed: {0}")]
    Command(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl From<&str> for ConfigError {
    fn from(s: &str) -> Self {
        ConfigError::ParseError(s.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    #[error("Validation failed: {0}")]
    Multiple(String),
}

impl From<&str> for ValidationError {
    fn from(s: &str) -> Self {
        ValidationError::InvalidFormat(s.to_string())
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Reconciliation pass already in flight")]
    PassInFlight,
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

impl AppError {
    /// True for ledger errors that only mean "ask again on the next pass".
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Ledger(_))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(ValidationError::Multiple(err.to_string()))
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Row not found".to_string()),
            sqlx::Error::PoolTimedOut => DatabaseError::PoolExhausted("Pool timed out".to_string()),
            sqlx::Error::Database(db_err) => {
                if db_err.code().is_some_and(|code| code == "23505") {
                    return DatabaseError::Duplicate(db_err.message().to_string());
                }
                DatabaseError::Query(db_err.message().to_string())
            }
            _ => DatabaseError::Query(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Database(DatabaseError::Migration(err.to_string()))
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            CacheError::Connection(err.to_string())
        } else {
            CacheError::Command(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_error_conversions() {
        let not_found = DatabaseError::from(sqlx::Error::RowNotFound);
        assert!(matches!(not_found, DatabaseError::NotFound(_)));

        let pool_timeout = DatabaseError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(pool_timeout, DatabaseError::PoolExhausted(_)));

        // Simulate fallback for unknown errors
        let generic = DatabaseError::from(sqlx::Error::WorkerCrashed);
        assert!(matches!(generic, DatabaseError::Query(_)));
    }

    #[test]
    fn test_validation_conversion() {
        use validator::Validate;

        #[derive(Validate)]
        struct TestStruct {
            #[validate(range(min = 0.0))]
            price: f64,
        }

        let s = TestStruct { price: -1.0 };
        let err = s.validate().unwrap_err();
        let app_err = AppError::from(err);

        assert!(matches!(
            app_err,
            AppError::Validation(ValidationError::Multiple(_))
        ));
    }

    #[test]
    fn test_config_error_from_str() {
        let err: ConfigError = "parse failure".into();
        assert!(matches!(err, ConfigError::ParseError(msg) if msg == "parse failure"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let json_err = serde_json::from_str::<String>("invalid json").unwrap_err();
        let app_err = AppError::from(json_err);
        assert!(matches!(app_err, AppError::Serialization(_)));
    }

    #[test]
    fn test_database_error_display() {
        let err = DatabaseError::Conflict("ownership already superseded".to_string());
        assert_eq!(
            err.to_string(),
            "Conflicting mutation: ownership already superseded"
        );

        let err = DatabaseError::Duplicate("unique violation".to_string());
        assert_eq!(err.to_string(), "Duplicate record: unique violation");

        let err = DatabaseError::Migration("failed".to_string());
        assert_eq!(err.to_string(), "Migration failed: failed");
    }

    #[test]
    fn test_ledger_error_display() {
        let err = LedgerError::ReceiptUnavailable("0xabc".to_string());
        assert_eq!(err.to_string(), "Receipt not yet available: 0xabc");

        let err = LedgerError::InvalidReference("zz".to_string());
        assert_eq!(err.to_string(), "Invalid ledger reference: zz");

        let err = LedgerError::Timeout("10s".to_string());
        assert_eq!(err.to_string(), "Timeout waiting for ledger: 10s");
    }

    #[test]
    fn test_app_error_transient_classification() {
        let ledger: AppError = LedgerError::RpcError("node down".to_string()).into();
        assert!(ledger.is_transient());

        let db: AppError = DatabaseError::Query("boom".to_string()).into();
        assert!(!db.is_transient());

        let cache: AppError = CacheError::Command("boom".to_string()).into();
        assert!(!cache.is_transient());
    }

    #[test]
    fn test_app_error_display() {
        assert_eq!(
            AppError::PassInFlight.to_string(),
            "Reconciliation pass already in flight"
        );
        assert_eq!(
            AppError::Internal("panic".to_string()).to_string(),
            "Internal error: panic"
        );
    }

    #[test]
    fn test_app_error_from_migrate_error() {
        let mig_err = sqlx::migrate::MigrateError::VersionMissing(1);
        let app_err: AppError = mig_err.into();

        match app_err {
            AppError::Database(DatabaseError::Migration(msg)) => {
                assert!(msg.contains("migration 1 was previously applied"));
            }
            _ => panic!("Expected DatabaseError::Migration, got {:?}", app_err),
        }
    }
}
