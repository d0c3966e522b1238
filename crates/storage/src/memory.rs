//! In-memory storage backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{EventId, OrderId, Sku};
use domain::{
    NewOrder, Order, OrderStatus, ReserveItem, StatusChangedEvent, StockItem, totals_by_sku,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    OrderRepository, OutboxRepository, Result, Scope, StockRepository, StorageError, TxGuard,
    TxHandle, TxManager,
};

/// Stock shipped with the service, used when no seed file is configured.
pub const DEFAULT_STOCK: &str = include_str!("../data/stock-data.json");

/// Everything the in-memory backend stores.
#[derive(Debug, Default)]
struct MemoryState {
    orders: BTreeMap<OrderId, Order>,
    last_order_id: i64,
    stock: BTreeMap<Sku, StockItem>,
    events: Vec<StatusChangedEvent>,
    last_event_id: i64,
}

/// What a transaction has to put back when it is rolled back.
///
/// Only entries the transaction touched are recorded, each with the value it
/// had before the first change. Events are append-only, so new ones are
/// dropped by truncating to the length seen at `begin`.
#[derive(Debug)]
struct UndoLog {
    stock: BTreeMap<Sku, StockItem>,
    /// `None` for orders created inside the transaction.
    orders: BTreeMap<OrderId, Option<Order>>,
    /// Positions of events flipped to sent.
    sent: Vec<usize>,
    events_len: usize,
    last_order_id: i64,
    last_event_id: i64,
}

impl UndoLog {
    fn new(state: &MemoryState) -> Self {
        Self {
            stock: BTreeMap::new(),
            orders: BTreeMap::new(),
            sent: Vec::new(),
            events_len: state.events.len(),
            last_order_id: state.last_order_id,
            last_event_id: state.last_event_id,
        }
    }

    fn restore(self, state: &mut MemoryState) {
        for (sku, item) in self.stock {
            state.stock.insert(sku, item);
        }
        for (id, order) in self.orders {
            match order {
                Some(order) => {
                    state.orders.insert(id, order);
                }
                None => {
                    state.orders.remove(&id);
                }
            }
        }
        for index in self.sent {
            if let Some(event) = state.events.get_mut(index) {
                event.sent = false;
            }
        }
        state.events.truncate(self.events_len);
        state.last_order_id = self.last_order_id;
        state.last_event_id = self.last_event_id;
    }
}

/// In-memory implementation of all three repositories, for tests and for
/// running the service without a database.
///
/// A transaction holds the state lock for its whole lifetime, so
/// transactions are fully serialized. Changes are applied in place and
/// recorded in an undo log; a transaction that is rolled back, or dropped
/// before commit, replays it.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

/// An open in-memory transaction.
pub struct MemoryTx {
    state: OwnedMutexGuard<MemoryState>,
    undo: Option<UndoLog>,
}

impl MemoryTx {
    /// Ledger entry for `sku`, remembering its value before the first change.
    fn stock_mut(&mut self, sku: Sku) -> Option<&mut StockItem> {
        let current = *self.state.stock.get(&sku)?;
        if let Some(undo) = self.undo.as_mut() {
            undo.stock.entry(sku).or_insert(current);
        }
        self.state.stock.get_mut(&sku)
    }

    fn order_mut(&mut self, id: OrderId) -> Option<&mut Order> {
        if let Some(undo) = self.undo.as_mut() {
            if !undo.orders.contains_key(&id) {
                let previous = self.state.orders.get(&id).cloned()?;
                undo.orders.insert(id, Some(previous));
            }
        }
        self.state.orders.get_mut(&id)
    }

    fn insert_order(&mut self, order: Order) {
        let id = order.id;
        let previous = self.state.orders.insert(id, order);
        if let Some(undo) = self.undo.as_mut() {
            undo.orders.entry(id).or_insert(previous);
        }
    }

    fn mark_sent(&mut self, index: usize) {
        if let Some(event) = self.state.events.get_mut(index) {
            if !event.sent {
                event.sent = true;
                if let Some(undo) = self.undo.as_mut() {
                    undo.sent.push(index);
                }
            }
        }
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if let Some(undo) = self.undo.take() {
            undo.restore(&mut self.state);
        }
    }
}

#[async_trait]
impl TxHandle for MemoryTx {
    async fn commit(mut self) -> Result<()> {
        self.undo = None;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        // Drop replays the undo log.
        Ok(())
    }
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with the given stock ledger.
    pub fn with_stock(items: impl IntoIterator<Item = StockItem>) -> Self {
        let stock = items.into_iter().map(|item| (item.sku, item)).collect();
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                stock,
                ..MemoryState::default()
            })),
        }
    }

    /// Creates a store seeded from a JSON array of
    /// `{"sku", "total_count", "reserved"}` objects.
    pub fn from_stock_json(json: &str) -> Result<Self> {
        Ok(Self::with_stock(parse_stock(json)?))
    }

    /// Inserts ledger entries, keeping entries that already exist.
    pub async fn seed_stock(&self, items: impl IntoIterator<Item = StockItem>) {
        let mut state = self.state.lock().await;
        for item in items {
            state.stock.entry(item.sku).or_insert(item);
        }
    }

    /// Total number of outbox rows, sent or not.
    pub async fn event_count(&self) -> usize {
        self.state.lock().await.events.len()
    }

    /// Number of outbox rows not delivered yet.
    pub async fn unsent_event_count(&self) -> usize {
        self.state
            .lock()
            .await
            .events
            .iter()
            .filter(|event| !event.sent)
            .count()
    }
}

/// Parses a stock seed document and validates each entry.
pub fn parse_stock(json: &str) -> Result<Vec<StockItem>> {
    let items: Vec<StockItem> = serde_json::from_str(json)?;
    if let Some(item) = items.iter().find(|item| item.reserved > item.total_count) {
        return Err(StorageError::InvalidData(format!(
            "sku {} reserves {} of {}",
            item.sku, item.reserved, item.total_count
        )));
    }
    Ok(items)
}

#[async_trait]
impl TxManager for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx> {
        let state = Arc::clone(&self.state).lock_owned().await;
        let undo = Some(UndoLog::new(&state));
        Ok(MemoryTx { state, undo })
    }
}

/// Applies `f` to the ledger entries of the batch, skipping unknown SKUs.
fn apply_each(tx: &mut MemoryTx, items: &[ReserveItem], f: impl Fn(&mut StockItem, u64)) {
    for (sku, count) in totals_by_sku(items) {
        if let Some(entry) = tx.stock_mut(sku) {
            f(entry, count);
        }
    }
}

#[async_trait]
impl StockRepository<MemoryTx> for MemoryStore {
    async fn get_by_sku(&self, scope: Scope<'_, MemoryTx>, sku: Sku) -> Result<StockItem> {
        let mut guard = TxGuard::open(self, scope).await?;
        let item = guard
            .tx()
            .state
            .stock
            .get(&sku)
            .copied()
            .ok_or(StorageError::SkuNotFound(sku))?;
        guard.commit().await?;
        Ok(item)
    }

    async fn reserve(&self, scope: Scope<'_, MemoryTx>, items: &[ReserveItem]) -> Result<()> {
        let mut guard = TxGuard::open(self, scope).await?;
        let totals = totals_by_sku(items);
        let tx = guard.tx();

        // Check the whole batch before touching any entry.
        for (&sku, &requested) in &totals {
            let entry = tx.state.stock.get(&sku).ok_or(StorageError::SkuNotFound(sku))?;
            let available = entry.available();
            if available < requested {
                return Err(StorageError::InsufficientStock {
                    sku,
                    requested,
                    available,
                });
            }
        }
        for (sku, count) in totals {
            if let Some(entry) = tx.stock_mut(sku) {
                entry.reserved += count;
            }
        }

        guard.commit().await
    }

    async fn reserve_cancel(
        &self,
        scope: Scope<'_, MemoryTx>,
        items: &[ReserveItem],
    ) -> Result<()> {
        let mut guard = TxGuard::open(self, scope).await?;
        apply_each(guard.tx(), items, |entry, count| {
            entry.reserved = entry.reserved.saturating_sub(count);
        });
        guard.commit().await
    }

    async fn reserve_remove(
        &self,
        scope: Scope<'_, MemoryTx>,
        items: &[ReserveItem],
    ) -> Result<()> {
        let mut guard = TxGuard::open(self, scope).await?;
        apply_each(guard.tx(), items, |entry, count| {
            entry.reserved = entry.reserved.saturating_sub(count);
            entry.total_count = entry.total_count.saturating_sub(count);
        });
        guard.commit().await
    }
}

#[async_trait]
impl OrderRepository<MemoryTx> for MemoryStore {
    async fn create(&self, scope: Scope<'_, MemoryTx>, order: &NewOrder) -> Result<OrderId> {
        let mut guard = TxGuard::open(self, scope).await?;
        let tx = guard.tx();

        tx.state.last_order_id += 1;
        let id = OrderId::new(tx.state.last_order_id);
        tx.insert_order(Order {
            id,
            user_id: order.user_id(),
            status: order.status(),
            items: order.items().to_vec(),
            created_at: Utc::now(),
            updated_at: None,
        });

        guard.commit().await?;
        Ok(id)
    }

    async fn get_by_id(&self, scope: Scope<'_, MemoryTx>, id: OrderId) -> Result<Order> {
        let mut guard = TxGuard::open(self, scope).await?;
        let order = guard
            .tx()
            .state
            .orders
            .get(&id)
            .cloned()
            .ok_or(StorageError::OrderNotFound(id))?;
        guard.commit().await?;
        Ok(order)
    }

    async fn get_by_id_for_update(&self, scope: Scope<'_, MemoryTx>, id: OrderId) -> Result<Order> {
        // The transaction already holds the only lock there is.
        self.get_by_id(scope, id).await
    }

    async fn set_status(
        &self,
        scope: Scope<'_, MemoryTx>,
        id: OrderId,
        status: OrderStatus,
    ) -> Result<()> {
        let mut guard = TxGuard::open(self, scope).await?;
        let order = guard
            .tx()
            .order_mut(id)
            .ok_or(StorageError::OrderNotFound(id))?;
        order.status = status;
        order.updated_at = Some(Utc::now());
        guard.commit().await
    }
}

#[async_trait]
impl OutboxRepository<MemoryTx> for MemoryStore {
    async fn create_order_status_changed_event(
        &self,
        scope: Scope<'_, MemoryTx>,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<()> {
        let mut guard = TxGuard::open(self, scope).await?;
        let state = &mut *guard.tx().state;

        state.last_event_id += 1;
        let id = EventId::new(state.last_event_id);
        state.events.push(StatusChangedEvent {
            id,
            order_id,
            status,
            at: Utc::now(),
            sent: false,
        });

        guard.commit().await
    }

    async fn fetch_next_order_status_changed_event(
        &self,
        scope: Scope<'_, MemoryTx>,
    ) -> Result<StatusChangedEvent> {
        let mut guard = TxGuard::open(self, scope).await?;
        let event = guard
            .tx()
            .state
            .events
            .iter()
            .find(|event| !event.sent)
            .cloned()
            .ok_or(StorageError::NoElements)?;
        guard.commit().await?;
        Ok(event)
    }

    async fn mark_order_status_changed_event_as_sent(
        &self,
        scope: Scope<'_, MemoryTx>,
        event: &StatusChangedEvent,
    ) -> Result<()> {
        let mut guard = TxGuard::open(self, scope).await?;
        let tx = guard.tx();
        if let Some(index) = tx.state.events.iter().position(|stored| stored.id == event.id) {
            tx.mark_sent(index);
        }
        guard.commit().await
    }

    async fn list_by_order(
        &self,
        scope: Scope<'_, MemoryTx>,
        order_id: OrderId,
    ) -> Result<Vec<StatusChangedEvent>> {
        let mut guard = TxGuard::open(self, scope).await?;
        let events = guard
            .tx()
            .state
            .events
            .iter()
            .filter(|event| event.order_id == order_id)
            .cloned()
            .collect();
        guard.commit().await?;
        Ok(events)
    }
}
