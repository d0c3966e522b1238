//! Repository traits shared by the storage backends.
//!
//! Each trait is generic over the backend's transaction type so that calls
//! from different repositories can share one [`Scope::Within`] transaction.

use async_trait::async_trait;
use common::{OrderId, Sku};
use domain::{NewOrder, Order, OrderStatus, ReserveItem, StatusChangedEvent, StockItem};

use crate::{Result, Scope};

/// Stock ledger: total and reserved counts per SKU.
///
/// All batch operations are all-or-nothing. Backends lock and update rows in
/// ascending SKU order and merge duplicate SKUs in a batch before applying.
#[async_trait]
pub trait StockRepository<T: Send>: Send + Sync {
    /// Returns the ledger entry for a SKU.
    ///
    /// Errors with [`StorageError::SkuNotFound`](crate::StorageError::SkuNotFound)
    /// if no row exists.
    async fn get_by_sku(&self, scope: Scope<'_, T>, sku: Sku) -> Result<StockItem>;

    /// Increases `reserved` for every item, failing the whole batch if any SKU
    /// is unknown or lacks availability.
    async fn reserve(&self, scope: Scope<'_, T>, items: &[ReserveItem]) -> Result<()>;

    /// Releases a reservation: decreases `reserved`, floored at zero.
    /// Unknown SKUs are skipped.
    async fn reserve_cancel(&self, scope: Scope<'_, T>, items: &[ReserveItem]) -> Result<()>;

    /// Consumes a reservation: decreases both `reserved` and `total_count`,
    /// each floored at zero. Unknown SKUs are skipped.
    async fn reserve_remove(&self, scope: Scope<'_, T>, items: &[ReserveItem]) -> Result<()>;
}

/// Orders and their line items.
#[async_trait]
pub trait OrderRepository<T: Send>: Send + Sync {
    /// Persists a new order and its items, returning the assigned id.
    async fn create(&self, scope: Scope<'_, T>, order: &NewOrder) -> Result<OrderId>;

    /// Loads an order with its items in insertion order.
    async fn get_by_id(&self, scope: Scope<'_, T>, id: OrderId) -> Result<Order>;

    /// Like [`get_by_id`](Self::get_by_id), but also locks the order row until
    /// the enclosing transaction ends.
    async fn get_by_id_for_update(&self, scope: Scope<'_, T>, id: OrderId) -> Result<Order>;

    /// Overwrites the status and stamps `updated_at`.
    async fn set_status(&self, scope: Scope<'_, T>, id: OrderId, status: OrderStatus)
    -> Result<()>;
}

/// Transactional outbox of order status change notifications.
#[async_trait]
pub trait OutboxRepository<T: Send>: Send + Sync {
    /// Appends an unsent event stamped with the current time.
    async fn create_order_status_changed_event(
        &self,
        scope: Scope<'_, T>,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<()>;

    /// Returns the oldest unsent event, locking it against other dispatchers
    /// for the rest of the transaction. Rows already locked elsewhere are
    /// skipped.
    ///
    /// Errors with [`StorageError::NoElements`](crate::StorageError::NoElements)
    /// when nothing is pending.
    async fn fetch_next_order_status_changed_event(
        &self,
        scope: Scope<'_, T>,
    ) -> Result<StatusChangedEvent>;

    /// Flags an event as delivered. Marking an already-sent event is a no-op.
    async fn mark_order_status_changed_event_as_sent(
        &self,
        scope: Scope<'_, T>,
        event: &StatusChangedEvent,
    ) -> Result<()>;

    /// All events of an order, oldest first, sent or not.
    async fn list_by_order(
        &self,
        scope: Scope<'_, T>,
        order_id: OrderId,
    ) -> Result<Vec<StatusChangedEvent>>;
}
