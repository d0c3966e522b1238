//! Order status change notifications.

use chrono::{DateTime, Utc};
use common::{EventId, OrderId};
use serde::{Deserialize, Serialize};

use super::OrderStatus;

/// An outbox row announcing that an order moved to a new status.
///
/// The row is written in the same transaction as the status change it
/// reports. Only `sent` ever changes afterwards, and only from false to true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChangedEvent {
    pub id: EventId,
    pub order_id: OrderId,
    pub status: OrderStatus,
    /// When the status transition happened.
    pub at: DateTime<Utc>,
    /// Delivery bookkeeping, not part of the published message.
    #[serde(default, skip_serializing)]
    pub sent: bool,
}

impl StatusChangedEvent {
    /// Message key used when publishing: the decimal order id, so every
    /// event of one order lands on the same partition.
    pub fn message_key(&self) -> Vec<u8> {
        self.order_id.to_string().into_bytes()
    }
}
