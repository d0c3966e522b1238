//! Domain model of the order management service.
//!
//! This crate provides:
//! - Order, line items and the order status state machine
//! - Stock ledger entries and reservation items
//! - Status change events written to the transactional outbox

pub mod order;
pub mod stock;

pub use order::{
    NewOrder, Order, OrderError, OrderInfo, OrderItem, OrderStatus, StatusChangedEvent,
};
pub use stock::{ReserveItem, StockItem, totals_by_sku};
