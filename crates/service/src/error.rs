//! Service error types.

use common::{OrderId, Sku};
use domain::OrderError;
use storage::StorageError;
use thiserror::Error;

use crate::producer::ProducerError;

/// Errors returned by the order and stock services.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Order not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// SKU has no stock ledger entry.
    #[error("Sku not found: {0}")]
    SkuNotFound(Sku),

    /// Stock could not be reserved; the order was recorded as failed.
    #[error("Order {order_id} cannot be fulfilled: {source}")]
    CannotFulfill {
        order_id: OrderId,
        #[source]
        source: StorageError,
    },

    /// The order is not in a status that allows the operation.
    #[error("Order {order_id}: {source}")]
    InvalidStatusTransition {
        order_id: OrderId,
        #[source]
        source: OrderError,
    },

    /// The order request itself is malformed.
    #[error("Invalid order: {0}")]
    InvalidOrder(OrderError),

    /// Reservation failed and marking the order as failed failed too.
    #[error("Order {order_id} failed ({cause}) and the failure could not be recorded: {source}")]
    FailureNotRecorded {
        order_id: OrderId,
        cause: StorageError,
        #[source]
        source: Box<ServiceError>,
    },

    /// Message bus error.
    #[error("Producer error: {0}")]
    Producer(#[from] ProducerError),

    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(StorageError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StorageError> for ServiceError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::OrderNotFound(id) => ServiceError::OrderNotFound(id),
            StorageError::SkuNotFound(sku) => ServiceError::SkuNotFound(sku),
            other => ServiceError::Storage(other),
        }
    }
}

/// Convenience type alias for service results.
pub type Result<T> = std::result::Result<T, ServiceError>;
