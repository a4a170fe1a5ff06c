//! Durable, per-server transaction log
//!
//! Write-ahead record store for in-flight global transactions, built on a
//! Fjall keyspace. Every mutation is synced to disk before it returns, so a
//! state transition that came back `Ok` survives a crash at any later point.

pub mod error;
pub mod store;

pub use error::{Error, Result};
pub use store::{LogPosition, TransactionLogStore};
