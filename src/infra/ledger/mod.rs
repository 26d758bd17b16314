//! Ledger client implementations.

pub mod ethereum;

pub use ethereum::{EthRpcLedgerClient, RpcClientConfig};
