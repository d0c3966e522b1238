use std::time::Instant;

use async_trait::async_trait;
use common::{EventId, OrderId};
use domain::{OrderStatus, StatusChangedEvent};
use sqlx::Row;
use sqlx::postgres::PgRow;

use super::{PgTx, PostgresStore, record_query, status_column};
use crate::{OutboxRepository, Result, Scope, StorageError, TxGuard};

fn row_to_event(row: &PgRow) -> Result<StatusChangedEvent> {
    Ok(StatusChangedEvent {
        id: EventId::new(row.try_get("id")?),
        order_id: OrderId::new(row.try_get("order_id")?),
        status: status_column(row)?,
        at: row.try_get("at")?,
        sent: row.try_get("sent")?,
    })
}

#[async_trait]
impl OutboxRepository<PgTx> for PostgresStore {
    #[tracing::instrument(skip(self, scope))]
    async fn create_order_status_changed_event(
        &self,
        scope: Scope<'_, PgTx>,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<()> {
        let started = Instant::now();
        let mut guard = TxGuard::open(self, scope).await?;

        sqlx::query("INSERT INTO order_status_changed_events (order_id, status) VALUES ($1, $2)")
            .bind(order_id.get())
            .bind(status.as_str())
            .execute(&mut **guard.tx())
            .await?;

        guard.commit().await?;
        record_query("outbox_create", started);
        Ok(())
    }

    async fn fetch_next_order_status_changed_event(
        &self,
        scope: Scope<'_, PgTx>,
    ) -> Result<StatusChangedEvent> {
        let started = Instant::now();
        let mut guard = TxGuard::open(self, scope).await?;

        // SKIP LOCKED hands concurrent dispatchers different rows.
        let row = sqlx::query(
            r#"
            SELECT id, order_id, status, at, sent
            FROM order_status_changed_events
            WHERE sent = false
            ORDER BY id
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut **guard.tx())
        .await?
        .ok_or(StorageError::NoElements)?;
        let event = row_to_event(&row)?;

        guard.commit().await?;
        record_query("outbox_fetch_next", started);
        Ok(event)
    }

    #[tracing::instrument(skip_all, fields(event_id = %event.id))]
    async fn mark_order_status_changed_event_as_sent(
        &self,
        scope: Scope<'_, PgTx>,
        event: &StatusChangedEvent,
    ) -> Result<()> {
        let started = Instant::now();
        let mut guard = TxGuard::open(self, scope).await?;

        sqlx::query("UPDATE order_status_changed_events SET sent = true WHERE id = $1")
            .bind(event.id.get())
            .execute(&mut **guard.tx())
            .await?;

        guard.commit().await?;
        record_query("outbox_mark_sent", started);
        Ok(())
    }

    async fn list_by_order(
        &self,
        scope: Scope<'_, PgTx>,
        order_id: OrderId,
    ) -> Result<Vec<StatusChangedEvent>> {
        let started = Instant::now();
        let mut guard = TxGuard::open(self, scope).await?;

        let rows = sqlx::query(
            r#"
            SELECT id, order_id, status, at, sent
            FROM order_status_changed_events
            WHERE order_id = $1
            ORDER BY id
            "#,
        )
        .bind(order_id.get())
        .fetch_all(&mut **guard.tx())
        .await?;
        let events = rows.iter().map(row_to_event).collect::<Result<Vec<_>>>()?;

        guard.commit().await?;
        record_query("outbox_list_by_order", started);
        Ok(events)
    }
}
