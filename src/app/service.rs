//! Application service layer.
//!
//! Staging of new mutations and dependency health checks. Reconciliation of
//! staged rows lives in [`super::reconciler`].

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::domain::{
    AppError, CacheInvalidator, DatabaseClient, HealthResponse, HealthStatus, LedgerClient,
    RecordStatus, normalize_ledger_reference,
};

use super::reconciler::{EntityStores, StoredIn};

/// Application service holding the trait objects shared with the reconciler.
///
/// # Example
///
/// ```ignore
/// let db = Arc::new(PostgresClient::with_defaults(&url).await?);
/// let stores = EntityStores::from_backend(Arc::clone(&db));
/// let service = AppService::new(db, stores, ledger, cache);
///
/// let staged = service.propose(ownership).await?;
/// ```
pub struct AppService {
    db_client: Arc<dyn DatabaseClient>,
    stores: EntityStores,
    ledger_client: Arc<dyn LedgerClient>,
    cache: Arc<dyn CacheInvalidator>,
}

impl AppService {
    #[must_use]
    pub fn new(
        db_client: Arc<dyn DatabaseClient>,
        stores: EntityStores,
        ledger_client: Arc<dyn LedgerClient>,
        cache: Arc<dyn CacheInvalidator>,
    ) -> Self {
        Self {
            db_client,
            stores,
            ledger_client,
            cache,
        }
    }

    /// Stages a mutation to be settled by the ledger transaction it references.
    ///
    /// The reference is normalized to lowercase, the status forced to
    /// `waiting_confirmation` and a nil id replaced with a fresh one.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for malformed input and
    /// `DatabaseError::Conflict` when `previous_id` is not the live row or is
    /// already being superseded.
    #[instrument(skip(self, record), fields(kind = %R::KIND))]
    pub async fn propose<R>(&self, mut record: R) -> Result<R, AppError>
    where
        R: StoredIn + Validate,
    {
        record.validate().map_err(|e| {
            warn!(error = %e, "Validation failed for proposed record");
            AppError::from(e)
        })?;

        let reference = normalize_ledger_reference(record.ledger_reference())?;
        record.set_ledger_reference(reference);
        record.set_status(RecordStatus::WaitingConfirmation);
        record.touch(Utc::now());
        if record.id().is_nil() {
            record.set_id(Uuid::new_v4());
        }

        self.stores.for_kind::<R>().insert_pending(&record).await?;
        info!(
            record_id = %record.id(),
            previous_id = ?record.previous_id(),
            reference = %record.ledger_reference(),
            "Staged pending record"
        );
        Ok(record)
    }

    /// Performs a health check on all dependencies.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthResponse {
        let db_health = match self.db_client.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = ?e, "Database health check failed");
                HealthStatus::Unhealthy
            }
        };

        let ledger_health = match self.ledger_client.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = ?e, "Ledger health check failed");
                HealthStatus::Unhealthy
            }
        };

        let cache_health = match self.cache.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = ?e, "Cache health check failed");
                HealthStatus::Unhealthy
            }
        };

        HealthResponse::new(db_health, ledger_health, cache_health)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DatabaseError, Ownership, Token, ValidationError};
    use crate::test_utils::{
        InMemoryStore, MockCacheInvalidator, MockLedgerClient, hash, in_memory_stores,
    };

    fn service() -> (AppService, Arc<InMemoryStore>, Arc<MockLedgerClient>, Arc<MockCacheInvalidator>) {
        let (store, stores) = in_memory_stores();
        let ledger = Arc::new(MockLedgerClient::new());
        let cache = Arc::new(MockCacheInvalidator::new());
        let service = AppService::new(
            Arc::clone(&store) as _,
            stores,
            Arc::clone(&ledger) as _,
            Arc::clone(&cache) as _,
        );
        (service, store, ledger, cache)
    }

    fn live_ownership() -> Ownership {
        Ownership {
            id: Uuid::new_v4(),
            quantity: 5,
            status: RecordStatus::Active,
            ledger_reference: hash(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_propose_stages_pending_row() {
        let (service, store, _, _) = service();
        let live = live_ownership();
        store.seed(live.clone());

        let proposal = Ownership {
            previous_id: Some(live.id),
            quantity: 4,
            status: RecordStatus::Active,
            ledger_reference: hash(2).to_uppercase().replacen("0X", "0x", 1),
            ..Default::default()
        };
        let staged = service.propose(proposal).await.unwrap();

        assert!(!staged.id.is_nil());
        assert_eq!(staged.status, RecordStatus::WaitingConfirmation);
        assert_eq!(staged.ledger_reference, hash(2));
        assert_eq!(store.get::<Ownership>(staged.id).unwrap(), staged);
    }

    #[tokio::test]
    async fn test_propose_rejects_second_supersede_of_same_row() {
        let (service, store, _, _) = service();
        let live = live_ownership();
        store.seed(live.clone());

        let first = Ownership {
            previous_id: Some(live.id),
            quantity: 4,
            ledger_reference: hash(2),
            ..Default::default()
        };
        let second = Ownership {
            previous_id: Some(live.id),
            quantity: 3,
            ledger_reference: hash(3),
            ..Default::default()
        };

        service.propose(first).await.unwrap();
        let err = service.propose(second).await.unwrap_err();

        assert!(matches!(err, AppError::Database(DatabaseError::Conflict(_))));
        assert_eq!(store.len::<Ownership>(), 2);
    }

    #[tokio::test]
    async fn test_propose_rejects_non_active_previous_row() {
        let (service, store, _, _) = service();
        let retired = Ownership {
            status: RecordStatus::Inactive,
            ..live_ownership()
        };
        store.seed(retired.clone());

        let proposal = Ownership {
            previous_id: Some(retired.id),
            ledger_reference: hash(4),
            ..Default::default()
        };
        let err = service.propose(proposal).await.unwrap_err();
        assert!(matches!(err, AppError::Database(DatabaseError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_propose_validates_reference_and_amounts() {
        let (service, store, _, _) = service();

        let bad_reference = Token {
            ledger_reference: "0x1234".to_string(),
            ..Default::default()
        };
        let err = service.propose(bad_reference).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(ValidationError::Multiple(_))));

        let negative_price = Token {
            last_price: -1.0,
            ledger_reference: hash(5),
            ..Default::default()
        };
        assert!(service.propose(negative_price).await.is_err());
        assert_eq!(store.len::<Token>(), 0);
    }

    #[tokio::test]
    async fn test_health_check_all_healthy() {
        let (service, _, _, _) = service();
        let health = service.health_check().await;

        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.database, HealthStatus::Healthy);
        assert_eq!(health.ledger, HealthStatus::Healthy);
        assert_eq!(health.cache, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_health_check_ledger_unhealthy() {
        let (service, _, ledger, _) = service();
        ledger.set_healthy(false);

        let health = service.health_check().await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.ledger, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_health_check_cache_unhealthy_degrades() {
        let (service, _, _, cache) = service();
        cache.set_failing(true);

        let health = service.health_check().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.cache, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_health_check_db_unhealthy() {
        let (service, store, _, _) = service();
        store.set_healthy(false);

        let health = service.health_check().await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.database, HealthStatus::Unhealthy);
    }
}
