//! Ledger reconciliation engine.
//!
//! One pass walks every entity kind, resolves each staging row's ledger
//! reference and applies the kind's commit or rollback rule. Errors are
//! contained to the row (or kind) that raised them so the rest of the pass
//! still runs.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{
    AppError, CacheInvalidator, Collection, DatabaseError, EntityKind, EntityStore,
    FinalityVerdict, Fraction, KindReport, LedgerClient, LedgerError, Ownership, PassLease,
    ReconcileReport, ReconcileShape, RecordOutcome, RecordStatus, Rental, Token, Transaction,
    VersionedRecord, normalize_ledger_reference,
};
use crate::infra::observability::{
    record_outcome, record_pass_duration, record_pass_skipped, record_pending,
};

/// One store handle per entity kind.
#[derive(Clone)]
pub struct EntityStores {
    pub tokens: Arc<dyn EntityStore<Token>>,
    pub ownerships: Arc<dyn EntityStore<Ownership>>,
    pub collections: Arc<dyn EntityStore<Collection>>,
    pub rentals: Arc<dyn EntityStore<Rental>>,
    pub transactions: Arc<dyn EntityStore<Transaction>>,
    pub fractions: Arc<dyn EntityStore<Fraction>>,
}

impl EntityStores {
    /// Uses one backend for every kind.
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: EntityStore<Token>
            + EntityStore<Ownership>
            + EntityStore<Collection>
            + EntityStore<Rental>
            + EntityStore<Transaction>
            + EntityStore<Fraction>
            + 'static,
    {
        Self {
            tokens: Arc::clone(&backend) as _,
            ownerships: Arc::clone(&backend) as _,
            collections: Arc::clone(&backend) as _,
            rentals: Arc::clone(&backend) as _,
            transactions: Arc::clone(&backend) as _,
            fractions: backend as _,
        }
    }

    /// The store holding records of type `R`.
    #[must_use]
    pub fn for_kind<R: StoredIn>(&self) -> &Arc<dyn EntityStore<R>> {
        R::store_in(self)
    }
}

/// Picks the `EntityStores` field matching a record type.
pub trait StoredIn: VersionedRecord {
    fn store_in(stores: &EntityStores) -> &Arc<dyn EntityStore<Self>>;
}

macro_rules! stored_in {
    ($($ty:ty => $field:ident),* $(,)?) => {
        $(
            impl StoredIn for $ty {
                fn store_in(stores: &EntityStores) -> &Arc<dyn EntityStore<Self>> {
                    &stores.$field
                }
            }
        )*
    };
}

stored_in! {
    Token => tokens,
    Ownership => ownerships,
    Collection => collections,
    Rental => rentals,
    Transaction => transactions,
    Fraction => fractions,
}

/// The staging-and-reconciliation engine.
///
/// Built once at startup with its collaborators injected; holds no ambient state.
pub struct Reconciler {
    stores: EntityStores,
    ledger: Arc<dyn LedgerClient>,
    cache: Arc<dyn CacheInvalidator>,
    lease: Arc<dyn PassLease>,
}

impl Reconciler {
    #[must_use]
    pub fn new(
        stores: EntityStores,
        ledger: Arc<dyn LedgerClient>,
        cache: Arc<dyn CacheInvalidator>,
        lease: Arc<dyn PassLease>,
    ) -> Self {
        Self {
            stores,
            ledger,
            cache,
            lease,
        }
    }

    #[must_use]
    pub fn stores(&self) -> &EntityStores {
        &self.stores
    }

    /// Runs a pass if no other pass holds the lease.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PassInFlight` when the lease is taken, or the lease
    /// backend's error if it could not be consulted.
    pub async fn run_exclusive(&self) -> Result<ReconcileReport, AppError> {
        if !self.lease.try_acquire().await? {
            record_pass_skipped();
            return Err(AppError::PassInFlight);
        }

        let guard = LeaseGuard::new(self.lease.as_ref());
        let report = self.reconcile().await;
        guard.release().await;

        Ok(report)
    }

    /// Runs one full pass over all entity kinds.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> ReconcileReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut kinds = Vec::with_capacity(EntityKind::ALL.len());

        for kind in EntityKind::ALL {
            let report = match kind {
                EntityKind::Token => self.reconcile_kind::<Token>().await,
                EntityKind::Ownership => self.reconcile_kind::<Ownership>().await,
                EntityKind::Collection => self.reconcile_kind::<Collection>().await,
                EntityKind::Rental => self.reconcile_kind::<Rental>().await,
                EntityKind::Transaction => self.reconcile_kind::<Transaction>().await,
                EntityKind::Fraction => self.reconcile_kind::<Fraction>().await,
            };
            kinds.push(report);
        }

        let elapsed = clock.elapsed();
        record_pass_duration(elapsed);

        for report in &kinds {
            info!(
                kind = %report.kind,
                pending = report.pending,
                committed = report.committed,
                rolled_back = report.rolled_back,
                skipped = report.skipped,
                failed = report.failed,
                "Number of pending {}s: {}",
                report.kind,
                report.pending
            );
        }

        ReconcileReport {
            started_at,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            kinds,
        }
    }

    async fn reconcile_kind<R: StoredIn>(&self) -> KindReport {
        let kind = R::KIND;
        let store = self.stores.for_kind::<R>().as_ref();
        let mut report = KindReport::new(kind);

        match store.list_pending().await {
            Ok(pending) => {
                report.pending = pending.len();
                record_pending(kind, pending.len());

                for record in &pending {
                    let outcome = self.reconcile_record(store, record).await;
                    record_outcome(kind, outcome);
                    report.record(outcome);
                }
            }
            Err(e) => {
                error!(kind = %kind, error = ?e, "Failed to list pending records");
                report.list_error = Some(e.to_string());
            }
        }

        self.invalidate(kind).await;
        report
    }

    async fn reconcile_record<R: VersionedRecord>(
        &self,
        store: &dyn EntityStore<R>,
        record: &R,
    ) -> RecordOutcome {
        let kind = R::KIND;
        let record_id = record.id();

        let verdict = match self.resolve(record.ledger_reference()).await {
            Ok(verdict) => verdict,
            Err(e) => {
                debug!(
                    kind = %kind,
                    record_id = %record_id,
                    reference = %record.ledger_reference(),
                    error = ?e,
                    "Ledger verdict not available, leaving record pending"
                );
                return RecordOutcome::Skipped;
            }
        };

        let (result, outcome) = match verdict {
            FinalityVerdict::Success => (commit(store, record).await, RecordOutcome::Committed),
            FinalityVerdict::Failure => (
                store.delete(record_id).await.map(|_| ()),
                RecordOutcome::RolledBack,
            ),
        };

        match result {
            Ok(()) => {
                info!(
                    kind = %kind,
                    record_id = %record_id,
                    previous_id = ?record.previous_id(),
                    outcome = outcome.as_str(),
                    "Reconciled pending record"
                );
                outcome
            }
            Err(e) => {
                error!(
                    kind = %kind,
                    record_id = %record_id,
                    previous_id = ?record.previous_id(),
                    attempted = outcome.as_str(),
                    error = ?e,
                    "Failed to apply ledger verdict"
                );
                RecordOutcome::Failed
            }
        }
    }

    async fn resolve(&self, reference: &str) -> Result<FinalityVerdict, AppError> {
        let reference = normalize_ledger_reference(reference)
            .map_err(|e| AppError::Ledger(LedgerError::InvalidReference(e.to_string())))?;
        self.ledger.resolve(&reference).await
    }

    async fn invalidate(&self, kind: EntityKind) {
        match self.cache.delete_keys_matching(kind.cache_prefix()).await {
            Ok(evicted) => {
                debug!(kind = %kind, evicted = evicted, "Invalidated cache namespace");
            }
            Err(e) => {
                warn!(kind = %kind, error = ?e, "Failed to invalidate cache namespace");
            }
        }
    }
}

/// Holds the pass lease and abandons it if the pass is dropped before finishing.
struct LeaseGuard<'a> {
    lease: &'a dyn PassLease,
    armed: bool,
}

impl<'a> LeaseGuard<'a> {
    fn new(lease: &'a dyn PassLease) -> Self {
        Self { lease, armed: true }
    }

    async fn release(mut self) {
        if let Err(e) = self.lease.release().await {
            error!(error = ?e, "Failed to release reconciliation lease");
        }
        self.armed = false;
    }
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("Reconciliation pass cancelled, abandoning lease");
            self.lease.abandon();
        }
    }
}

/// Applies a success verdict according to the kind's reconciliation shape.
async fn commit<R: VersionedRecord>(
    store: &dyn EntityStore<R>,
    record: &R,
) -> Result<(), AppError> {
    match (R::KIND.shape(), record.previous_id()) {
        (ReconcileShape::Flip, _) => {
            let mut live = record.clone();
            live.set_status(RecordStatus::Active);
            store.update(&live).await
        }
        (ReconcileShape::Supersede, None) => {
            let mut live = record.clone();
            live.set_status(record.confirmed_status());
            store.update(&live).await
        }
        (ReconcileShape::Supersede, Some(previous_id)) => {
            let mut superseded = store.get_by_id(previous_id).await?.ok_or_else(|| {
                AppError::Database(DatabaseError::NotFound(format!(
                    "{} {} superseded by {}",
                    R::KIND,
                    previous_id,
                    record.id()
                )))
            })?;
            record.merge_into(&mut superseded);
            store.commit_supersede(&superseded, record.id()).await
        }
    }
}
