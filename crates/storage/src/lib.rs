//! Persistence for orders, the stock ledger and the status change outbox.
//!
//! This crate provides:
//! - A transaction manager with caller-scoped units of work
//! - Repository traits for stock, orders and the outbox
//! - An in-memory backend and a PostgreSQL backend

pub mod error;
pub mod memory;
pub mod postgres;
pub mod repository;
pub mod tx;

pub use error::{Result, StorageError};
pub use memory::{DEFAULT_STOCK, MemoryStore, MemoryTx, parse_stock};
pub use postgres::{PgTx, PostgresStore};
pub use repository::{OrderRepository, OutboxRepository, StockRepository};
pub use tx::{Scope, TxGuard, TxHandle, TxManager, run_in_transaction};
