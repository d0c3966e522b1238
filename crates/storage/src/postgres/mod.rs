//! PostgreSQL backend.
//!
//! One [`PostgresStore`] implements all three repositories; the tables live
//! in `migrations/001_create_loms_tables.sql`.

mod order;
mod outbox;
mod stock;

use std::time::Instant;

use async_trait::async_trait;
use common::Sku;
use domain::{OrderStatus, StockItem};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row};

use crate::{Result, StorageError, TxHandle, TxManager};

/// Transaction type of the PostgreSQL backend.
pub type PgTx = sqlx::Transaction<'static, Postgres>;

/// PostgreSQL-backed store for orders, stock and the outbox.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new store on an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a new pool.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Inserts ledger entries, keeping entries that already exist.
    pub async fn seed_stock(&self, items: &[StockItem]) -> Result<u64> {
        let skus: Vec<i64> = items.iter().map(|item| sku_param(item.sku)).collect();
        let totals = items
            .iter()
            .map(|item| count_param(item.total_count))
            .collect::<Result<Vec<_>>>()?;
        let reserved = items
            .iter()
            .map(|item| count_param(item.reserved))
            .collect::<Result<Vec<_>>>()?;

        let result = sqlx::query(
            r#"
            INSERT INTO items (sku, total_count, reserved)
            SELECT * FROM unnest($1::bigint[], $2::bigint[], $3::bigint[])
            ON CONFLICT (sku) DO NOTHING
            "#,
        )
        .bind(&skus)
        .bind(&totals)
        .bind(&reserved)
        .execute(&self.pool)
        .await?;

        tracing::info!(inserted = result.rows_affected(), "stock seeded");
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TxHandle for PgTx {
    async fn commit(self) -> Result<()> {
        sqlx::Transaction::commit(self).await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        sqlx::Transaction::rollback(self).await?;
        Ok(())
    }
}

#[async_trait]
impl TxManager for PostgresStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }
}

/// Records how long a repository query took.
fn record_query(operation: &'static str, started: Instant) {
    metrics::histogram!("loms_db_query_duration_seconds", "operation" => operation)
        .record(started.elapsed().as_secs_f64());
}

fn sku_param(sku: Sku) -> i64 {
    i64::from(sku.get())
}

fn count_param(count: u64) -> Result<i64> {
    i64::try_from(count)
        .map_err(|_| StorageError::InvalidData(format!("count {count} out of range")))
}

fn sku_column(row: &PgRow, column: &str) -> Result<Sku> {
    let raw: i64 = row.try_get(column)?;
    u32::try_from(raw)
        .map(Sku::new)
        .map_err(|_| StorageError::InvalidData(format!("sku {raw} out of range")))
}

fn count_column(row: &PgRow, column: &str) -> Result<u64> {
    let raw: i64 = row.try_get(column)?;
    u64::try_from(raw)
        .map_err(|_| StorageError::InvalidData(format!("negative {column}: {raw}")))
}

fn status_column(row: &PgRow) -> Result<OrderStatus> {
    let raw: String = row.try_get("status")?;
    raw.parse()
        .map_err(|e: domain::OrderError| StorageError::InvalidData(e.to_string()))
}
