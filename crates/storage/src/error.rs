use common::{OrderId, Sku};
use thiserror::Error;

/// Errors that can occur when interacting with the repositories.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The order does not exist.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The SKU has no stock ledger entry.
    #[error("Sku not found: {0}")]
    SkuNotFound(Sku),

    /// A reservation asked for more than is available.
    #[error("Insufficient stock for sku {sku}: requested {requested}, available {available}")]
    InsufficientStock {
        sku: Sku,
        requested: u64,
        available: u64,
    },

    /// The outbox has no unsent events. Not a failure for the dispatcher.
    #[error("No unsent events in the outbox")]
    NoElements,

    /// Code running inside a transaction panicked; the transaction was rolled back.
    #[error("Transaction aborted by panic: {0}")]
    TransactionPanicked(String),

    /// A stored value could not be mapped onto the domain model.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, StorageError>;
