//! Mock implementations for testing.
//!
//! These mocks provide in-memory implementations of domain traits
//! that can be configured to simulate various scenarios including
//! success, failure, and edge cases.

use async_trait::async_trait;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::app::EntityStores;
use crate::domain::{
    AppError, CacheError, CacheInvalidator, DatabaseClient, DatabaseError, EntityKind,
    EntityStore, LedgerClient, LedgerError, RecordStatus, TransactionReceipt, VersionedRecord,
};

/// Configuration for mock behavior.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// If true, operations will fail.
    pub should_fail: bool,
    /// Custom error message for failures.
    pub error_message: Option<String>,
    /// Simulated latency in milliseconds.
    pub latency_ms: Option<u64>,
}

impl MockConfig {
    /// Creates a config that always succeeds.
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    /// Creates a config that always fails.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
            latency_ms: None,
        }
    }

    /// Adds simulated latency.
    #[must_use]
    pub fn with_latency(mut self, ms: u64) -> Self {
        self.latency_ms = Some(ms);
        self
    }
}

/// A well-formed, lowercase transaction hash derived from `n`.
#[must_use]
pub fn hash(n: u64) -> String {
    format!("0x{n:064x}")
}

/// One in-memory store backing every kind, plus the bundle pointing at it.
#[must_use]
pub fn in_memory_stores() -> (Arc<InMemoryStore>, EntityStores) {
    let store = Arc::new(InMemoryStore::new());
    let stores = EntityStores::from_backend(Arc::clone(&store));
    (store, stores)
}

struct StoredRow {
    seq: u64,
    record: Box<dyn Any + Send + Sync>,
}

/// In-memory store for every record kind.
///
/// Rows are kept per kind in insertion order. Writes can be made to fail
/// per row id and listings per kind.
///
/// # Example
///
/// ```
/// use marketplace_reconciler::domain::{Rental, RecordStatus};
/// use marketplace_reconciler::test_utils::{InMemoryStore, hash};
///
/// let store = InMemoryStore::new();
/// let rental = Rental { ledger_reference: hash(7), ..Default::default() };
/// store.seed(rental.clone());
/// assert_eq!(store.get::<Rental>(rental.id).unwrap().status, RecordStatus::WaitingConfirmation);
/// ```
pub struct InMemoryStore {
    tables: Mutex<HashMap<EntityKind, HashMap<Uuid, StoredRow>>>,
    next_seq: AtomicU64,
    config: MockConfig,
    failing_ids: Mutex<HashSet<Uuid>>,
    failing_lists: Mutex<HashSet<EntityKind>>,
    call_count: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    is_healthy: AtomicBool,
}

impl InMemoryStore {
    /// Creates a new mock with default (success) configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    /// Creates a new mock with the given configuration.
    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            config,
            failing_ids: Mutex::new(HashSet::new()),
            failing_lists: Mutex::new(HashSet::new()),
            call_count: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            is_healthy: AtomicBool::new(true),
        }
    }

    /// Creates a mock whose every operation fails.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    /// Inserts or replaces a row without any checks or counters.
    pub fn seed<R: VersionedRecord>(&self, record: R) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut tables = self.tables.lock().unwrap();
        tables.entry(R::KIND).or_default().insert(
            record.id(),
            StoredRow {
                seq,
                record: Box::new(record),
            },
        );
    }

    pub fn get<R: VersionedRecord>(&self, id: Uuid) -> Option<R> {
        let tables = self.tables.lock().unwrap();
        tables
            .get(&R::KIND)
            .and_then(|table| table.get(&id))
            .and_then(|row| row.record.downcast_ref::<R>())
            .cloned()
    }

    /// Rows of `R`'s kind currently stored.
    pub fn len<R: VersionedRecord>(&self) -> usize {
        let tables = self.tables.lock().unwrap();
        tables.get(&R::KIND).map_or(0, HashMap::len)
    }

    /// All rows of `R`'s kind in insertion order.
    pub fn all<R: VersionedRecord>(&self) -> Vec<R> {
        let tables = self.tables.lock().unwrap();
        let Some(table) = tables.get(&R::KIND) else {
            return Vec::new();
        };
        let mut rows: Vec<&StoredRow> = table.values().collect();
        rows.sort_by_key(|row| row.seq);
        rows.into_iter()
            .filter_map(|row| row.record.downcast_ref::<R>().cloned())
            .collect()
    }

    /// Makes every write touching `id` fail.
    pub fn fail_writes_for(&self, id: Uuid) {
        self.failing_ids.lock().unwrap().insert(id);
    }

    /// Makes `list_pending` fail for `kind`.
    pub fn fail_listing(&self, kind: EntityKind) {
        self.failing_lists.lock().unwrap().insert(kind);
    }

    /// Clears injected failures.
    pub fn heal(&self) {
        self.failing_ids.lock().unwrap().clear();
        self.failing_lists.lock().unwrap().clear();
    }

    /// Gets the number of times any method was called.
    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Successful mutations: updates, deletes, inserts and supersede commits.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Rows removed through `delete` or `commit_supersede`.
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Sets the health status.
    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    async fn enter(&self) -> Result<(), AppError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if let Some(ms) = self.config.latency_ms {
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
        }
        if self.config.should_fail {
            let msg = self
                .config
                .error_message
                .clone()
                .unwrap_or_else(|| "Mock database error".to_string());
            return Err(AppError::Database(DatabaseError::Query(msg)));
        }
        Ok(())
    }

    fn check_writable(&self, ids: &[Uuid]) -> Result<(), AppError> {
        let failing = self.failing_ids.lock().unwrap();
        match ids.iter().find(|id| failing.contains(id)) {
            Some(id) => Err(AppError::Database(DatabaseError::Query(format!(
                "Injected write failure for {id}"
            )))),
            None => Ok(()),
        }
    }

    fn replace<R: VersionedRecord>(
        table: &mut HashMap<Uuid, StoredRow>,
        record: &R,
    ) -> Result<(), AppError> {
        match table.get_mut(&record.id()) {
            Some(row) => {
                row.record = Box::new(record.clone());
                Ok(())
            }
            None => Err(AppError::Database(DatabaseError::NotFound(format!(
                "{} {}",
                R::KIND,
                record.id()
            )))),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseClient for InMemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        self.enter().await?;

        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Mock database unhealthy".to_string(),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl<R: VersionedRecord> EntityStore<R> for InMemoryStore {
    async fn list_pending(&self) -> Result<Vec<R>, AppError> {
        self.enter().await?;
        if self.failing_lists.lock().unwrap().contains(&R::KIND) {
            return Err(AppError::Database(DatabaseError::Query(format!(
                "Injected list failure for {}",
                R::KIND
            ))));
        }

        Ok(self
            .all::<R>()
            .into_iter()
            .filter(|record| record.status().is_pending())
            .collect())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<R>, AppError> {
        self.enter().await?;
        Ok(self.get::<R>(id))
    }

    async fn update(&self, record: &R) -> Result<(), AppError> {
        self.enter().await?;
        self.check_writable(&[record.id()])?;

        let mut tables = self.tables.lock().unwrap();
        Self::replace(tables.entry(R::KIND).or_default(), record)?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        self.enter().await?;
        self.check_writable(&[id])?;

        let mut tables = self.tables.lock().unwrap();
        let removed = tables
            .get_mut(&R::KIND)
            .and_then(|table| table.remove(&id))
            .is_some();
        if removed {
            self.writes.fetch_add(1, Ordering::Relaxed);
            self.deletes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(removed)
    }

    async fn insert_pending(&self, record: &R) -> Result<(), AppError> {
        self.enter().await?;
        self.check_writable(&[record.id()])?;

        let mut tables = self.tables.lock().unwrap();
        let table = tables.entry(R::KIND).or_default();

        if table.contains_key(&record.id()) {
            return Err(AppError::Database(DatabaseError::Duplicate(format!(
                "{} {}",
                R::KIND,
                record.id()
            ))));
        }

        if let Some(previous_id) = record.previous_id() {
            let previous_status = table
                .get(&previous_id)
                .and_then(|row| row.record.downcast_ref::<R>())
                .map(VersionedRecord::status);
            if previous_status != Some(RecordStatus::Active) {
                return Err(AppError::Database(DatabaseError::Conflict(format!(
                    "{} {} is not an active row",
                    R::KIND,
                    previous_id
                ))));
            }

            let rival = table.values().any(|row| {
                row.record.downcast_ref::<R>().is_some_and(|other| {
                    other.status().is_pending() && other.previous_id() == Some(previous_id)
                })
            });
            if rival {
                return Err(AppError::Database(DatabaseError::Conflict(format!(
                    "{} {} already has a pending successor",
                    R::KIND,
                    previous_id
                ))));
            }
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        table.insert(
            record.id(),
            StoredRow {
                seq,
                record: Box::new(record.clone()),
            },
        );
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn commit_supersede(&self, superseded: &R, pending_id: Uuid) -> Result<(), AppError> {
        self.enter().await?;
        self.check_writable(&[superseded.id(), pending_id])?;

        let mut tables = self.tables.lock().unwrap();
        let table = tables.entry(R::KIND).or_default();
        if !table.contains_key(&pending_id) {
            return Err(AppError::Database(DatabaseError::NotFound(format!(
                "{} {}",
                R::KIND,
                pending_id
            ))));
        }
        Self::replace(table, superseded)?;
        table.remove(&pending_id);
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LedgerBehavior {
    Confirmed,
    Reverted,
    Unreachable,
}

/// Mock ledger client for testing.
///
/// References default to "not yet mined" until told otherwise.
pub struct MockLedgerClient {
    behaviors: Mutex<HashMap<String, LedgerBehavior>>,
    call_count: AtomicU64,
    is_healthy: AtomicBool,
}

impl MockLedgerClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            behaviors: Mutex::new(HashMap::new()),
            call_count: AtomicU64::new(0),
            is_healthy: AtomicBool::new(true),
        }
    }

    /// The transaction was mined and succeeded.
    pub fn confirm(&self, reference: &str) {
        self.set(reference, LedgerBehavior::Confirmed);
    }

    /// The transaction was mined and reverted.
    pub fn reject(&self, reference: &str) {
        self.set(reference, LedgerBehavior::Reverted);
    }

    /// Receipt lookups for the reference fail with a connection error.
    pub fn fail_transiently(&self, reference: &str) {
        self.set(reference, LedgerBehavior::Unreachable);
    }

    /// Back to "not yet mined".
    pub fn forget(&self, reference: &str) {
        self.behaviors.lock().unwrap().remove(reference);
    }

    /// Receipt lookups made so far.
    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Sets the health status.
    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    fn set(&self, reference: &str, behavior: LedgerBehavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(reference.to_string(), behavior);
    }
}

impl Default for MockLedgerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerClient for MockLedgerClient {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Ledger(LedgerError::Connection(
                "Mock ledger unhealthy".to_string(),
            )));
        }
        Ok(())
    }

    async fn transaction_receipt(
        &self,
        reference: &str,
    ) -> Result<Option<TransactionReceipt>, AppError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);

        let behavior = self.behaviors.lock().unwrap().get(reference).copied();
        let receipt = |status| TransactionReceipt {
            transaction_hash: reference.to_string(),
            block_number: Some(1000),
            status: Some(status),
        };

        match behavior {
            Some(LedgerBehavior::Confirmed) => Ok(Some(receipt(1))),
            Some(LedgerBehavior::Reverted) => Ok(Some(receipt(0))),
            Some(LedgerBehavior::Unreachable) => Err(AppError::Ledger(LedgerError::Connection(
                "Mock ledger unreachable".to_string(),
            ))),
            None => Ok(None),
        }
    }
}

/// Mock cache invalidator recording every namespace it was asked to evict.
pub struct MockCacheInvalidator {
    keys: Mutex<HashSet<String>>,
    invalidated: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl MockCacheInvalidator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(HashSet::new()),
            invalidated: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// Adds a cached key.
    pub fn insert_key(&self, key: impl Into<String>) {
        self.keys.lock().unwrap().insert(key.into());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.lock().unwrap().contains(key)
    }

    /// Times `pattern` was passed to `delete_keys_matching`, failed calls included.
    pub fn invalidations(&self, pattern: &str) -> usize {
        self.invalidated
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.as_str() == pattern)
            .count()
    }

    pub fn total_invalidations(&self) -> usize {
        self.invalidated.lock().unwrap().len()
    }

    /// Makes every call fail with a connection error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    fn check_failing(&self) -> Result<(), AppError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(AppError::Cache(CacheError::Connection(
                "Mock cache unreachable".to_string(),
            )));
        }
        Ok(())
    }
}

impl Default for MockCacheInvalidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheInvalidator for MockCacheInvalidator {
    async fn health_check(&self) -> Result<(), AppError> {
        self.check_failing()
    }

    async fn delete_keys_matching(&self, pattern: &str) -> Result<u64, AppError> {
        self.invalidated.lock().unwrap().push(pattern.to_string());
        self.check_failing()?;

        let prefix = pattern.trim_end_matches('*');
        let mut keys = self.keys.lock().unwrap();
        let before = keys.len();
        keys.retain(|key| !key.starts_with(prefix));
        Ok((before - keys.len()) as u64)
    }
}
