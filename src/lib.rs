//! Marketplace Ledger Reconciler
//!
//! Settles staged marketplace mutations once the Ethereum transaction they
//! reference is final. Every mutation is written as a pending row first; a
//! background pass asks the ledger for the receipt and then either commits
//! the row or deletes it, and finally evicts the affected cache keys.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                   API Layer                  │
//! │   health, metrics, manual reconcile trigger  │
//! ├─────────────────────────────────────────────┤
//! │               Application Layer              │
//! │  staging, reconciliation engine, scheduler   │
//! ├─────────────────────────────────────────────┤
//! │                 Domain Layer                 │
//! │   records, verdicts, traits, error types     │
//! ├─────────────────────────────────────────────┤
//! │             Infrastructure Layer             │
//! │  Postgres stores, JSON-RPC ledger, Redis,    │
//! │  pass leases, tracing and metrics            │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Entity kinds
//!
//! Tokens, ownerships and collections are *superseded*: a confirmed pending
//! row is merged onto the row it replaces and then removed. Rentals,
//! transactions and fractions are *flipped*: the pending row itself becomes
//! active.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use marketplace_reconciler::app::{EntityStores, Reconciler, WorkerConfig, spawn_worker};
//! use marketplace_reconciler::infra::{
//!     EthRpcLedgerClient, LocalPassLease, PostgresClient, RedisCacheInvalidator,
//! };
//!
//! let db = Arc::new(PostgresClient::with_defaults(&database_url).await?);
//! let ledger = Arc::new(EthRpcLedgerClient::with_defaults(rpc_url)?);
//! let cache = Arc::new(RedisCacheInvalidator::connect(&redis_url).await?);
//!
//! let reconciler = Arc::new(Reconciler::new(
//!     EntityStores::from_backend(db),
//!     ledger,
//!     cache,
//!     Arc::new(LocalPassLease::new()),
//! ));
//! let (worker, shutdown) = spawn_worker(reconciler, WorkerConfig::default());
//! ```

pub mod api;
pub mod app;
pub mod config;
pub mod domain;
pub mod infra;

// Test utilities are available in tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
