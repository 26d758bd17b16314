//! Infrastructure layer implementations.

pub mod cache;
pub mod database;
pub mod lease;
pub mod ledger;
pub mod observability;

pub use cache::RedisCacheInvalidator;
pub use database::{PgRecord, PostgresClient, PostgresConfig};
pub use lease::{LocalPassLease, PostgresPassLease};
pub use ledger::{EthRpcLedgerClient, RpcClientConfig};
