//! Stock service: order items in, ledger operations out.

use std::sync::Arc;

use common::Sku;
use domain::{OrderItem, ReserveItem};
use storage::{Scope, StockRepository};

use crate::error::Result;

/// Translates order items into stock ledger operations.
///
/// Ledger errors are passed through untranslated so the caller can tell a
/// shortage apart from an infrastructure failure.
pub struct StockService<T: Send> {
    stock: Arc<dyn StockRepository<T>>,
}

impl<T: Send> Clone for StockService<T> {
    fn clone(&self) -> Self {
        Self {
            stock: Arc::clone(&self.stock),
        }
    }
}

fn reserve_items(items: &[OrderItem]) -> Vec<ReserveItem> {
    items.iter().copied().map(ReserveItem::from).collect()
}

impl<T: Send> StockService<T> {
    /// Creates a new stock service over a ledger repository.
    pub fn new(stock: Arc<dyn StockRepository<T>>) -> Self {
        Self { stock }
    }

    /// Reserves stock for all items, or for none of them.
    pub async fn reserve(&self, scope: Scope<'_, T>, items: &[OrderItem]) -> storage::Result<()> {
        self.stock.reserve(scope, &reserve_items(items)).await
    }

    /// Returns reserved stock to the available pool.
    pub async fn reserve_cancel(
        &self,
        scope: Scope<'_, T>,
        items: &[OrderItem],
    ) -> storage::Result<()> {
        self.stock.reserve_cancel(scope, &reserve_items(items)).await
    }

    /// Ships reserved stock: it leaves both the reservation and the total.
    pub async fn reserve_remove(
        &self,
        scope: Scope<'_, T>,
        items: &[OrderItem],
    ) -> storage::Result<()> {
        self.stock.reserve_remove(scope, &reserve_items(items)).await
    }

    /// Amount of a SKU that can still be ordered.
    #[tracing::instrument(skip(self))]
    pub async fn stocks_info(&self, sku: Sku) -> Result<u64> {
        let item = self.stock.get_by_sku(Scope::Auto, sku).await?;
        Ok(item.available())
    }
}
