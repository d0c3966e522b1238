//! Value objects for the order domain.

use common::{Sku, UserId};
use serde::{Deserialize, Serialize};

use super::{OrderError, OrderStatus};

/// A line item of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderItem {
    pub sku: Sku,
    pub count: u16,
}

impl OrderItem {
    /// Creates a new line item.
    pub fn new(sku: impl Into<Sku>, count: u16) -> Self {
        Self {
            sku: sku.into(),
            count,
        }
    }
}

/// An order that has not been persisted yet.
///
/// Construction validates the items, so a `NewOrder` always has at least one
/// item and every count is positive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    user_id: UserId,
    items: Vec<OrderItem>,
    status: OrderStatus,
}

impl NewOrder {
    /// Creates a new order in the `New` status.
    pub fn new(user_id: UserId, items: Vec<OrderItem>) -> Result<Self, OrderError> {
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }
        if let Some(item) = items.iter().find(|item| item.count == 0) {
            return Err(OrderError::InvalidCount { sku: item.sku });
        }

        Ok(Self {
            user_id,
            items,
            status: OrderStatus::New,
        })
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }
}
