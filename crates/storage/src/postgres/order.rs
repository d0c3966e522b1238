use std::time::Instant;

use async_trait::async_trait;
use common::{OrderId, UserId};
use domain::{NewOrder, Order, OrderItem, OrderStatus};
use sqlx::{PgConnection, Row};

use super::{PgTx, PostgresStore, record_query, sku_column, sku_param, status_column};
use crate::{OrderRepository, Result, Scope, StorageError, TxGuard};

/// Loads an order header and its items, optionally locking the header row.
async fn fetch_order(conn: &mut PgConnection, id: OrderId, for_update: bool) -> Result<Order> {
    let header = if for_update {
        "SELECT order_id, user_id, status, created_at, updated_at FROM orders WHERE order_id = $1 FOR UPDATE"
    } else {
        "SELECT order_id, user_id, status, created_at, updated_at FROM orders WHERE order_id = $1"
    };

    let row = sqlx::query(header)
        .bind(id.get())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(StorageError::OrderNotFound(id))?;

    let item_rows =
        sqlx::query("SELECT item_sku, count FROM orders_to_items WHERE order_id = $1 ORDER BY id")
            .bind(id.get())
            .fetch_all(&mut *conn)
            .await?;

    let items = item_rows
        .iter()
        .map(|row| {
            let count: i32 = row.try_get("count")?;
            let count = u16::try_from(count)
                .map_err(|_| StorageError::InvalidData(format!("item count {count} out of range")))?;
            Ok(OrderItem::new(sku_column(row, "item_sku")?, count))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Order {
        id: OrderId::new(row.try_get("order_id")?),
        user_id: UserId::new(row.try_get("user_id")?),
        status: status_column(&row)?,
        items,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl OrderRepository<PgTx> for PostgresStore {
    #[tracing::instrument(skip_all, fields(user_id = %order.user_id()))]
    async fn create(&self, scope: Scope<'_, PgTx>, order: &NewOrder) -> Result<OrderId> {
        let started = Instant::now();
        let mut guard = TxGuard::open(self, scope).await?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO orders (user_id, status) VALUES ($1, $2) RETURNING order_id",
        )
        .bind(order.user_id().get())
        .bind(order.status().as_str())
        .fetch_one(&mut **guard.tx())
        .await?;

        let skus: Vec<i64> = order.items().iter().map(|item| sku_param(item.sku)).collect();
        let counts: Vec<i32> = order
            .items()
            .iter()
            .map(|item| i32::from(item.count))
            .collect();

        sqlx::query(
            r#"
            INSERT INTO orders_to_items (order_id, item_sku, count)
            SELECT $1, data.sku, data.count
            FROM unnest($2::bigint[], $3::int[]) WITH ORDINALITY AS data(sku, count, position)
            ORDER BY data.position
            "#,
        )
        .bind(id)
        .bind(&skus)
        .bind(&counts)
        .execute(&mut **guard.tx())
        .await?;

        guard.commit().await?;
        record_query("order_create", started);
        Ok(OrderId::new(id))
    }

    #[tracing::instrument(skip(self, scope))]
    async fn get_by_id(&self, scope: Scope<'_, PgTx>, id: OrderId) -> Result<Order> {
        let started = Instant::now();
        let mut guard = TxGuard::open(self, scope).await?;
        let order = fetch_order(guard.tx(), id, false).await?;
        guard.commit().await?;
        record_query("order_get_by_id", started);
        Ok(order)
    }

    #[tracing::instrument(skip(self, scope))]
    async fn get_by_id_for_update(&self, scope: Scope<'_, PgTx>, id: OrderId) -> Result<Order> {
        let started = Instant::now();
        let mut guard = TxGuard::open(self, scope).await?;
        let order = fetch_order(guard.tx(), id, true).await?;
        guard.commit().await?;
        record_query("order_get_by_id_for_update", started);
        Ok(order)
    }

    #[tracing::instrument(skip(self, scope))]
    async fn set_status(
        &self,
        scope: Scope<'_, PgTx>,
        id: OrderId,
        status: OrderStatus,
    ) -> Result<()> {
        let started = Instant::now();
        let mut guard = TxGuard::open(self, scope).await?;

        let result =
            sqlx::query("UPDATE orders SET status = $2, updated_at = now() WHERE order_id = $1")
                .bind(id.get())
                .bind(status.as_str())
                .execute(&mut **guard.tx())
                .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::OrderNotFound(id));
        }

        guard.commit().await?;
        record_query("order_set_status", started);
        Ok(())
    }
}
