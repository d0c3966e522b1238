//! Order status state machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::OrderError;

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// New ──┬──► AwaitingPayment ──┬──► Payed
///       │                      │
///       └──► Failed            └──► Cancelled
/// ```
///
/// The serialized names match the persisted `order_status` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Order persisted, stock not yet reserved.
    #[default]
    #[serde(rename = "new")]
    New,

    /// Stock reserved, waiting for the payment confirmation.
    #[serde(rename = "awaiting payment")]
    AwaitingPayment,

    /// Stock could not be reserved (terminal state).
    #[serde(rename = "failed")]
    Failed,

    /// Payment confirmed, reserved stock consumed (terminal state).
    #[serde(rename = "payed")]
    Payed,

    /// Order abandoned before payment, reservation released (terminal state).
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl OrderStatus {
    /// Returns true if a successful reservation may move the order here.
    pub fn can_await_payment(&self) -> bool {
        matches!(self, OrderStatus::New)
    }

    /// Returns true if a failed reservation may mark the order as failed.
    pub fn can_fail(&self) -> bool {
        matches!(self, OrderStatus::New)
    }

    /// Returns true if the order can be paid in this status.
    pub fn can_pay(&self) -> bool {
        matches!(self, OrderStatus::AwaitingPayment)
    }

    /// Returns true if the order can be cancelled in this status.
    ///
    /// A `New` order has no reservation yet, so releasing stock for it would
    /// release somebody else's hold.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::AwaitingPayment)
    }

    /// Returns the persisted name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "new",
            OrderStatus::AwaitingPayment => "awaiting payment",
            OrderStatus::Failed => "failed",
            OrderStatus::Payed => "payed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Verifies that `action` is allowed from this status.
    pub fn ensure(&self, allowed: bool, action: &'static str) -> Result<(), OrderError> {
        if allowed {
            Ok(())
        } else {
            Err(OrderError::InvalidStatusTransition {
                current: *self,
                action,
            })
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(OrderStatus::New),
            "awaiting payment" => Ok(OrderStatus::AwaitingPayment),
            "failed" => Ok(OrderStatus::Failed),
            "payed" => Ok(OrderStatus::Payed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(OrderError::UnknownStatus(other.to_string())),
        }
    }
}
