//! Concrete database client implementations.
//!
//! This module contains the production adapter implementing the
//! `EntityStore` trait for every record kind defined in the domain layer.

pub mod postgres;

pub use postgres::{PgRecord, PostgresClient, PostgresConfig};
