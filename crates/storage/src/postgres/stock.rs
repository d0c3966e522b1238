use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use common::Sku;
use domain::{ReserveItem, StockItem, totals_by_sku};
use sqlx::postgres::PgRow;

use super::{PgTx, PostgresStore, count_column, count_param, record_query, sku_column, sku_param};
use crate::{Result, Scope, StockRepository, StorageError, TxGuard};

fn row_to_stock(row: &PgRow) -> Result<StockItem> {
    Ok(StockItem {
        sku: sku_column(row, "sku")?,
        total_count: count_column(row, "total_count")?,
        reserved: count_column(row, "reserved")?,
    })
}

/// Batch parameters as parallel arrays, in SKU order.
fn batch_params(items: &[ReserveItem]) -> Result<(Vec<i64>, Vec<i64>)> {
    let totals = totals_by_sku(items);
    let skus = totals.keys().copied().map(sku_param).collect();
    let counts = totals
        .values()
        .copied()
        .map(count_param)
        .collect::<Result<_>>()?;
    Ok((skus, counts))
}

#[async_trait]
impl StockRepository<PgTx> for PostgresStore {
    #[tracing::instrument(skip(self, scope))]
    async fn get_by_sku(&self, scope: Scope<'_, PgTx>, sku: Sku) -> Result<StockItem> {
        let started = Instant::now();
        let mut guard = TxGuard::open(self, scope).await?;

        let row = sqlx::query("SELECT sku, total_count, reserved FROM items WHERE sku = $1")
            .bind(sku_param(sku))
            .fetch_optional(&mut **guard.tx())
            .await?
            .ok_or(StorageError::SkuNotFound(sku))?;
        let item = row_to_stock(&row)?;

        guard.commit().await?;
        record_query("stock_get_by_sku", started);
        Ok(item)
    }

    #[tracing::instrument(skip(self, scope, items), fields(items = items.len()))]
    async fn reserve(&self, scope: Scope<'_, PgTx>, items: &[ReserveItem]) -> Result<()> {
        let started = Instant::now();
        let mut guard = TxGuard::open(self, scope).await?;
        let totals = totals_by_sku(items);
        let (skus, counts) = batch_params(items)?;

        // Lock in SKU order so concurrent batches cannot deadlock.
        let rows = sqlx::query(
            r#"
            SELECT sku, total_count, reserved
            FROM items
            WHERE sku = ANY($1)
            ORDER BY sku
            FOR UPDATE
            "#,
        )
        .bind(&skus)
        .fetch_all(&mut **guard.tx())
        .await?;

        let locked = rows
            .iter()
            .map(|row| row_to_stock(row).map(|item| (item.sku, item)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        for (&sku, &requested) in &totals {
            let entry = locked.get(&sku).ok_or(StorageError::SkuNotFound(sku))?;
            let available = entry.available();
            if available < requested {
                return Err(StorageError::InsufficientStock {
                    sku,
                    requested,
                    available,
                });
            }
        }

        sqlx::query(
            r#"
            UPDATE items
            SET reserved = items.reserved + data.count
            FROM (SELECT unnest($1::bigint[]) AS sku, unnest($2::bigint[]) AS count) AS data
            WHERE items.sku = data.sku
            "#,
        )
        .bind(&skus)
        .bind(&counts)
        .execute(&mut **guard.tx())
        .await?;

        guard.commit().await?;
        record_query("stock_reserve", started);
        Ok(())
    }

    #[tracing::instrument(skip(self, scope, items), fields(items = items.len()))]
    async fn reserve_cancel(&self, scope: Scope<'_, PgTx>, items: &[ReserveItem]) -> Result<()> {
        let started = Instant::now();
        let mut guard = TxGuard::open(self, scope).await?;
        let (skus, counts) = batch_params(items)?;

        sqlx::query(
            r#"
            UPDATE items
            SET reserved = GREATEST(items.reserved - data.count, 0)
            FROM (SELECT unnest($1::bigint[]) AS sku, unnest($2::bigint[]) AS count) AS data
            WHERE items.sku = data.sku
            "#,
        )
        .bind(&skus)
        .bind(&counts)
        .execute(&mut **guard.tx())
        .await?;

        guard.commit().await?;
        record_query("stock_reserve_cancel", started);
        Ok(())
    }

    #[tracing::instrument(skip(self, scope, items), fields(items = items.len()))]
    async fn reserve_remove(&self, scope: Scope<'_, PgTx>, items: &[ReserveItem]) -> Result<()> {
        let started = Instant::now();
        let mut guard = TxGuard::open(self, scope).await?;
        let (skus, counts) = batch_params(items)?;

        sqlx::query(
            r#"
            UPDATE items
            SET reserved = GREATEST(items.reserved - data.count, 0),
                total_count = GREATEST(items.total_count - data.count, 0)
            FROM (SELECT unnest($1::bigint[]) AS sku, unnest($2::bigint[]) AS count) AS data
            WHERE items.sku = data.sku
            "#,
        )
        .bind(&skus)
        .bind(&counts)
        .execute(&mut **guard.tx())
        .await?;

        guard.commit().await?;
        record_query("stock_reserve_remove", started);
        Ok(())
    }
}
