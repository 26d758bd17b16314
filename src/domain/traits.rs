//! Domain traits defining contracts for external systems.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::{AppError, DatabaseError, LedgerError};
use super::types::{
    Collection, EntityKind, FinalityVerdict, Fraction, Ownership, RecordStatus, Rental, Token,
    Transaction,
};

/// A row following the propose / wait / commit-or-rollback lifecycle.
pub trait VersionedRecord: Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> Uuid;

    fn set_id(&mut self, id: Uuid);

    /// `None` marks a first-time creation.
    fn previous_id(&self) -> Option<Uuid>;

    fn status(&self) -> RecordStatus;

    fn set_status(&mut self, status: RecordStatus);

    fn ledger_reference(&self) -> &str;

    fn set_ledger_reference(&mut self, reference: String);

    /// Stamps creation and modification times.
    fn touch(&mut self, at: DateTime<Utc>);

    /// Status a confirmed first-time creation settles into.
    fn confirmed_status(&self) -> RecordStatus {
        RecordStatus::Active
    }

    /// Copies the confirmed fields of this staging row onto the row it supersedes.
    ///
    /// Only meaningful for supersede kinds; flip kinds keep the no-op.
    fn merge_into(&self, _superseded: &mut Self) {}
}

macro_rules! record_accessors {
    () => {
        fn id(&self) -> Uuid {
            self.id
        }

        fn set_id(&mut self, id: Uuid) {
            self.id = id;
        }

        fn previous_id(&self) -> Option<Uuid> {
            self.previous_id
        }

        fn status(&self) -> RecordStatus {
            self.status
        }

        fn set_status(&mut self, status: RecordStatus) {
            self.status = status;
        }

        fn ledger_reference(&self) -> &str {
            &self.ledger_reference
        }

        fn set_ledger_reference(&mut self, reference: String) {
            self.ledger_reference = reference;
        }

        fn touch(&mut self, at: DateTime<Utc>) {
            if self.created_at == DateTime::<Utc>::default() {
                self.created_at = at;
            }
            self.updated_at = at;
        }
    };
}

impl VersionedRecord for Token {
    const KIND: EntityKind = EntityKind::Token;
    record_accessors!();

    fn merge_into(&self, superseded: &mut Self) {
        superseded.last_price = self.last_price;
        superseded.number_of_transactions = self.number_of_transactions;
        superseded.volume_transactions = self.volume_transactions;
        superseded.fraction_id = self.fraction_id;
        superseded.source_id = self.source_id;
        superseded.views = self.views;
    }
}

impl VersionedRecord for Ownership {
    const KIND: EntityKind = EntityKind::Ownership;
    record_accessors!();

    fn confirmed_status(&self) -> RecordStatus {
        Ownership::status_for_quantity(self.quantity)
    }

    fn merge_into(&self, superseded: &mut Self) {
        superseded.quantity = self.quantity;
        superseded.sale_price = self.sale_price;
        superseded.rent_cost = self.rent_cost;
        superseded.available_for_sale = self.available_for_sale;
        superseded.available_for_rent = self.available_for_rent;
        superseded.user_id = self.user_id;
        superseded.status = Ownership::status_for_quantity(self.quantity);
    }
}

impl VersionedRecord for Collection {
    const KIND: EntityKind = EntityKind::Collection;
    record_accessors!();

    fn merge_into(&self, superseded: &mut Self) {
        superseded.number_of_items = self.number_of_items;
        superseded.number_of_transactions = self.number_of_transactions;
        superseded.volume_transactions = self.volume_transactions;
        superseded.floor = self.floor;
        superseded.views = self.views;
    }
}

impl VersionedRecord for Rental {
    const KIND: EntityKind = EntityKind::Rental;
    record_accessors!();
}

impl VersionedRecord for Transaction {
    const KIND: EntityKind = EntityKind::Transaction;
    record_accessors!();
}

impl VersionedRecord for Fraction {
    const KIND: EntityKind = EntityKind::Fraction;
    record_accessors!();
}

/// Connectivity probe for the persistence backend.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;
}

/// Persistence contract for one entity kind's table.
#[async_trait]
pub trait EntityStore<R: VersionedRecord>: Send + Sync {
    /// All `waiting_confirmation` rows, oldest first.
    async fn list_pending(&self) -> Result<Vec<R>, AppError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<R>, AppError>;

    /// Persists every mutable column of `record`, keyed by its id.
    async fn update(&self, record: &R) -> Result<(), AppError>;

    /// Returns whether a row was removed.
    async fn delete(&self, id: Uuid) -> Result<bool, AppError>;

    /// Stores a new staging row.
    ///
    /// Implementations must reject the row with `DatabaseError::Conflict` when
    /// its `previous_id` is not the currently active row or is already
    /// superseded by another pending row.
    async fn insert_pending(&self, record: &R) -> Result<(), AppError>;

    /// Writes the merged superseded row and removes the staging row.
    /// Fails with `DatabaseError::NotFound` when either row is missing.
    ///
    /// The default runs the two writes back to back; stores with transactions
    /// should override it so both land or neither does.
    async fn commit_supersede(&self, superseded: &R, pending_id: Uuid) -> Result<(), AppError> {
        self.update(superseded).await?;
        if !self.delete(pending_id).await? {
            return Err(AppError::Database(DatabaseError::NotFound(format!(
                "{} {}",
                R::KIND,
                pending_id
            ))));
        }
        Ok(())
    }
}

/// Receipt fields the reconciler consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    pub block_number: Option<u64>,
    /// `Some(1)` on success; absent on legacy receipts.
    pub status: Option<u64>,
}

/// Read-only view of the external ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Check ledger RPC connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Fetch the receipt, `None` while the transaction is not yet mined.
    async fn transaction_receipt(
        &self,
        reference: &str,
    ) -> Result<Option<TransactionReceipt>, AppError>;

    /// Single poll for a finality verdict.
    ///
    /// Any `Err` is transient: the caller leaves the row pending.
    async fn resolve(&self, reference: &str) -> Result<FinalityVerdict, AppError> {
        match self.transaction_receipt(reference).await? {
            Some(receipt) => Ok(FinalityVerdict::from_receipt_status(receipt.status)),
            None => Err(AppError::Ledger(LedgerError::ReceiptUnavailable(
                reference.to_string(),
            ))),
        }
    }
}

/// Evicts cache namespaces.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    /// Deletes every key matching `pattern` and returns how many went.
    async fn delete_keys_matching(&self, pattern: &str) -> Result<u64, AppError>;
}

/// Guard ensuring at most one reconciliation pass is in flight.
#[async_trait]
pub trait PassLease: Send + Sync {
    /// Returns `false` when another holder already has the lease.
    async fn try_acquire(&self) -> Result<bool, AppError>;

    async fn release(&self) -> Result<(), AppError>;

    /// Gives the lease back without waiting, for holders dropped mid-pass.
    ///
    /// Must not block; backends needing I/O finish the release in the background.
    fn abandon(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_merge_copies_derived_fields_only() {
        let superseded_id = Uuid::new_v4();
        let mut superseded = Token {
            id: superseded_id,
            title: "Original".to_string(),
            last_price: 10.0,
            supply: 5,
            status: RecordStatus::Active,
            ..Default::default()
        };
        let fraction = Uuid::new_v4();
        let pending = Token {
            id: Uuid::new_v4(),
            previous_id: Some(superseded_id),
            title: "Ignored".to_string(),
            last_price: 25.0,
            number_of_transactions: 4,
            volume_transactions: 80.0,
            fraction_id: Some(fraction),
            views: 12,
            supply: 99,
            ..Default::default()
        };

        pending.merge_into(&mut superseded);

        assert_eq!(superseded.id, superseded_id);
        assert_eq!(superseded.last_price, 25.0);
        assert_eq!(superseded.number_of_transactions, 4);
        assert_eq!(superseded.volume_transactions, 80.0);
        assert_eq!(superseded.fraction_id, Some(fraction));
        assert_eq!(superseded.views, 12);
        assert_eq!(superseded.title, "Original");
        assert_eq!(superseded.supply, 5);
        assert_eq!(superseded.status, RecordStatus::Active);
    }

    #[test]
    fn test_ownership_merge_derives_status_from_quantity() {
        let mut superseded = Ownership {
            id: Uuid::new_v4(),
            quantity: 3,
            status: RecordStatus::Active,
            ..Default::default()
        };
        let buyer = Uuid::new_v4();
        let emptied = Ownership {
            quantity: 0,
            user_id: buyer,
            available_for_sale: true,
            ..Default::default()
        };

        emptied.merge_into(&mut superseded);
        assert_eq!(superseded.quantity, 0);
        assert_eq!(superseded.user_id, buyer);
        assert!(superseded.available_for_sale);
        assert_eq!(superseded.status, RecordStatus::Inactive);

        let refilled = Ownership {
            quantity: 2,
            ..Default::default()
        };
        refilled.merge_into(&mut superseded);
        assert_eq!(superseded.status, RecordStatus::Active);
    }

    #[test]
    fn test_collection_merge() {
        let mut superseded = Collection {
            title: Some("Kept".to_string()),
            floor: 1.0,
            ..Default::default()
        };
        let pending = Collection {
            number_of_items: 7,
            number_of_transactions: 3,
            volume_transactions: 42.5,
            floor: 2.5,
            views: 100,
            title: Some("Ignored".to_string()),
            ..Default::default()
        };

        pending.merge_into(&mut superseded);
        assert_eq!(superseded.number_of_items, 7);
        assert_eq!(superseded.number_of_transactions, 3);
        assert_eq!(superseded.volume_transactions, 42.5);
        assert_eq!(superseded.floor, 2.5);
        assert_eq!(superseded.views, 100);
        assert_eq!(superseded.title.as_deref(), Some("Kept"));
    }

    #[test]
    fn test_confirmed_status() {
        let token = Token::default();
        assert_eq!(token.confirmed_status(), RecordStatus::Active);

        let empty = Ownership {
            quantity: 0,
            ..Default::default()
        };
        assert_eq!(empty.confirmed_status(), RecordStatus::Inactive);
    }

    #[test]
    fn test_kind_constants() {
        assert_eq!(Token::KIND, EntityKind::Token);
        assert_eq!(Ownership::KIND, EntityKind::Ownership);
        assert_eq!(Collection::KIND, EntityKind::Collection);
        assert_eq!(Rental::KIND, EntityKind::Rental);
        assert_eq!(Transaction::KIND, EntityKind::Transaction);
        assert_eq!(Fraction::KIND, EntityKind::Fraction);
    }
}
