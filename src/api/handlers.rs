//! HTTP request handlers for the operations surface.

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use tracing::{error, info};

use crate::app::AppState;
use crate::domain::{
    AppError, CacheError, DatabaseError, ErrorDetail, ErrorResponse, HealthResponse, HealthStatus,
    LedgerError, ReconcileReport,
};

/// Detailed health check
pub async fn health_check_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let health = state.service.health_check().await;
    Json(health)
}

/// Kubernetes liveness probe
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness probe
pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    let health = state.service.health_check().await;
    match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Prometheus scrape endpoint
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "metrics recorder not installed".to_string(),
        ),
    }
}

/// Runs one reconciliation pass now, unless one is already running
pub async fn reconcile_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReconcileReport>, AppError> {
    let report = state.reconciler.run_exclusive().await?;
    info!(
        pending = report.total_pending(),
        mutated = report.total_mutated(),
        "Manual reconciliation pass finished"
    );
    Ok(Json(report))
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_type, message) = match &self {
            AppError::Database(db_err) => match db_err {
                DatabaseError::Connection(_) | DatabaseError::PoolExhausted(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "database_error",
                    self.to_string(),
                ),
                DatabaseError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "not_found", self.to_string())
                }
                DatabaseError::Duplicate(_) => {
                    (StatusCode::CONFLICT, "duplicate", self.to_string())
                }
                DatabaseError::Conflict(_) => {
                    (StatusCode::CONFLICT, "conflict", self.to_string())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    self.to_string(),
                ),
            },
            AppError::Ledger(ledger_err) => match ledger_err {
                LedgerError::Connection(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "ledger_error",
                    self.to_string(),
                ),
                LedgerError::Timeout(_) => {
                    (StatusCode::GATEWAY_TIMEOUT, "timeout", self.to_string())
                }
                LedgerError::InvalidReference(_) => (
                    StatusCode::BAD_REQUEST,
                    "invalid_reference",
                    self.to_string(),
                ),
                _ => (StatusCode::BAD_GATEWAY, "ledger_error", self.to_string()),
            },
            AppError::Cache(cache_err) => match cache_err {
                CacheError::Connection(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "cache_error",
                    self.to_string(),
                ),
                CacheError::Command(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "cache_error",
                    self.to_string(),
                ),
            },
            AppError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "configuration_error",
                self.to_string(),
            ),
            AppError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                self.to_string(),
            ),
            AppError::Serialization(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "serialization_error",
                self.to_string(),
            ),
            AppError::PassInFlight => (
                StatusCode::CONFLICT,
                "pass_in_flight",
                self.to_string(),
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                self.to_string(),
            ),
            AppError::NotSupported(_) => (
                StatusCode::NOT_IMPLEMENTED,
                "not_supported",
                self.to_string(),
            ),
        };

        if status.is_server_error() {
            error!(error_type = %error_type, message = %message, "Server error");
        }

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConfigError, ValidationError};

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(status_of(AppError::PassInFlight), StatusCode::CONFLICT);
        assert_eq!(
            status_of(DatabaseError::Conflict("x".into()).into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(DatabaseError::Duplicate("x".into()).into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(DatabaseError::NotFound("x".into()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(DatabaseError::PoolExhausted("x".into()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(LedgerError::Timeout("x".into()).into()),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_of(LedgerError::RpcError("x".into()).into()),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(CacheError::Connection("x".into()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(ValidationError::MissingField("id".into()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ConfigError::MissingEnvVar("RPC_URL".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(AppError::NotSupported("x".into())),
            StatusCode::NOT_IMPLEMENTED
        );
    }
}
