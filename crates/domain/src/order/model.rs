use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};

use super::{OrderItem, OrderStatus};

/// A persisted order with its line items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    /// Unset until the first status change.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Read projection returned by the order info operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderInfo {
    pub status: OrderStatus,
    pub user_id: UserId,
    pub items: Vec<OrderItem>,
}

impl From<Order> for OrderInfo {
    fn from(order: Order) -> Self {
        Self {
            status: order.status,
            user_id: order.user_id,
            items: order.items,
        }
    }
}
