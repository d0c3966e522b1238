//! Order model and related types.

mod events;
mod model;
mod state;
mod value_objects;

pub use events::StatusChangedEvent;
pub use model::{Order, OrderInfo};
pub use state::OrderStatus;
pub use value_objects::{NewOrder, OrderItem};

use common::Sku;
use thiserror::Error;

/// Errors raised by order validation and status checks.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Order is not in the status the operation requires.
    #[error("Invalid status transition: cannot {action} from {current} status")]
    InvalidStatusTransition {
        current: OrderStatus,
        action: &'static str,
    },

    /// Invalid item count.
    #[error("Invalid count for sku {sku}: must be greater than 0")]
    InvalidCount { sku: Sku },

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// A persisted status name was not recognised.
    #[error("Unknown order status: {0}")]
    UnknownStatus(String),
}
