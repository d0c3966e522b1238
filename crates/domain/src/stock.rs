//! Stock ledger types.

use std::collections::BTreeMap;

use common::Sku;
use serde::{Deserialize, Serialize};

use crate::order::OrderItem;

/// A stock ledger entry.
///
/// `reserved` is the amount held against pending orders; it never exceeds
/// `total_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    pub sku: Sku,
    pub total_count: u64,
    pub reserved: u64,
}

impl StockItem {
    pub fn new(sku: impl Into<Sku>, total_count: u64, reserved: u64) -> Self {
        Self {
            sku: sku.into(),
            total_count,
            reserved,
        }
    }

    /// Amount that can still be reserved.
    pub fn available(&self) -> u64 {
        self.total_count.saturating_sub(self.reserved)
    }
}

/// Amount of a SKU to reserve, release or consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReserveItem {
    pub sku: Sku,
    pub count: u16,
}

impl ReserveItem {
    pub fn new(sku: impl Into<Sku>, count: u16) -> Self {
        Self {
            sku: sku.into(),
            count,
        }
    }
}

impl From<OrderItem> for ReserveItem {
    fn from(item: OrderItem) -> Self {
        Self {
            sku: item.sku,
            count: item.count,
        }
    }
}

/// Sums the requested counts per SKU, ordered by SKU.
///
/// Ledger backends check and lock rows in this order, so concurrent batches
/// always acquire row locks in the same sequence.
pub fn totals_by_sku(items: &[ReserveItem]) -> BTreeMap<Sku, u64> {
    let mut totals = BTreeMap::new();
    for item in items {
        *totals.entry(item.sku).or_insert(0) += u64::from(item.count);
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_floors_at_zero() {
        assert_eq!(StockItem::new(1, 10, 3).available(), 7);
        assert_eq!(StockItem::new(1, 3, 10).available(), 0);
    }

    #[test]
    fn totals_merge_duplicate_skus() {
        let totals = totals_by_sku(&[
            ReserveItem::new(200, 1),
            ReserveItem::new(100, 2),
            ReserveItem::new(200, 4),
        ]);
        let pairs: Vec<_> = totals.into_iter().collect();
        assert_eq!(pairs, vec![(Sku::new(100), 2), (Sku::new(200), 5)]);
    }
}
