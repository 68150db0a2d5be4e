//! Postgres storage backend
//!
//! Order numbers and withdrawal references are primary keys of their own
//! tables but share one key space. Every insert into either table runs in a
//! transaction holding a transaction-scoped advisory lock on the key, checks
//! both tables, then writes. Withdrawals additionally take a per-owner lock
//! first, which serializes the balance check and the insert per owner without
//! blocking other owners. Lock order is always owner, then key.

use super::{LedgerStore, WithdrawalRecord};
use crate::{
    error::{Error, Result},
    money::Money,
    types::{Balance, Order, OrderStatus, Withdrawal},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Executor, FromRow, Postgres, Transaction};
use std::time::Duration;

/// Schema applied by [`PostgresStore::migrate`]
pub const SCHEMA: &str = include_str!("../../migrations/0001_ledger.sql");

const ORDER_COLUMNS: &str = "number, owner, status, accrual, submitted_at";

/// Advisory lock namespaces (first argument of the two-key lock)
const OWNER_LOCK: i32 = 1;
const KEY_LOCK: i32 = 2;

#[derive(Debug, FromRow)]
struct OrderRow {
    number: String,
    owner: String,
    status: String,
    accrual: Option<Decimal>,
    submitted_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = Error;

    fn try_from(row: OrderRow) -> Result<Self> {
        let status = row.status.parse::<OrderStatus>().map_err(Error::Invariant)?;

        Ok(Order {
            number: row.number,
            owner: row.owner,
            status,
            accrual: row.accrual.map(Money::new),
            submitted_at: row.submitted_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct WithdrawalRow {
    reference: String,
    owner: String,
    amount: Decimal,
    processed_at: DateTime<Utc>,
}

impl From<WithdrawalRow> for Withdrawal {
    fn from(row: WithdrawalRow) -> Self {
        Withdrawal {
            order_reference: row.reference,
            owner: row.owner,
            amount: Money::new(row.amount),
            processed_at: row.processed_at,
        }
    }
}

/// Ledger store backed by a Postgres pool
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect a pool
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;

        tracing::info!(max_connections, "Connected to Postgres");

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist
    pub async fn migrate(&self) -> Result<()> {
        // No bind parameters: runs over the simple query protocol, which
        // accepts several statements at once.
        self.pool.execute(SCHEMA).await?;
        tracing::info!("Ledger schema is up to date");
        Ok(())
    }

    async fn advisory_lock(
        tx: &mut Transaction<'_, Postgres>,
        namespace: i32,
        key: &str,
    ) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock($1, hashtext($2))")
            .bind(namespace)
            .bind(key)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Owner of `key` as an order number or a withdrawal reference
    async fn claimed_by(tx: &mut Transaction<'_, Postgres>, key: &str) -> Result<Option<String>> {
        let owner: Option<String> = sqlx::query_scalar(CLAIM_QUERY)
            .bind(key)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(owner)
    }

    async fn sum_totals(
        tx: &mut Transaction<'_, Postgres>,
        owner: &str,
    ) -> Result<(Money, Money)> {
        let (accrued, withdrawn): (Decimal, Decimal) = sqlx::query_as(TOTALS_QUERY)
            .bind(owner)
            .fetch_one(&mut **tx)
            .await?;

        Ok((Money::new(accrued), Money::new(withdrawn)))
    }
}

const CLAIM_QUERY: &str = r#"
    SELECT owner FROM orders WHERE number = $1
    UNION ALL
    SELECT owner FROM withdrawals WHERE reference = $1
    LIMIT 1
"#;

const TOTALS_QUERY: &str = r#"
    SELECT
        COALESCE((SELECT SUM(accrual) FROM orders
                  WHERE owner = $1 AND status = 'PROCESSED'), 0) AS accrued,
        COALESCE((SELECT SUM(amount) FROM withdrawals
                  WHERE owner = $1), 0) AS withdrawn
"#;

#[async_trait]
impl LedgerStore for PostgresStore {
    async fn insert_order_if_absent(&self, order: &Order) -> Result<Option<String>> {
        let mut tx = self.pool.begin().await?;
        Self::advisory_lock(&mut tx, KEY_LOCK, &order.number).await?;

        if let Some(owner) = Self::claimed_by(&mut tx, &order.number).await? {
            tx.rollback().await?;
            return Ok(Some(owner));
        }

        sqlx::query(
            r#"
            INSERT INTO orders (number, owner, status, accrual, submitted_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&order.number)
        .bind(&order.owner)
        .bind(order.status.as_str())
        .bind(order.accrual.map(Decimal::from))
        .bind(order.submitted_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(None)
    }

    async fn get_order(&self, number: &str) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE number = $1",
            ORDER_COLUMNS
        ))
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Order::try_from).transpose()
    }

    async fn orders_by_owner(&self, owner: &str) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE owner = $1 ORDER BY submitted_at DESC, number DESC",
            ORDER_COLUMNS
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Order::try_from).collect()
    }

    async fn unresolved_orders(&self) -> Result<Vec<Order>> {
        let statuses: Vec<&str> = OrderStatus::unresolved().iter().map(|s| s.as_str()).collect();

        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE status = ANY($1) ORDER BY submitted_at, number",
            ORDER_COLUMNS
        ))
        .bind(statuses)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Order::try_from).collect()
    }

    async fn compare_and_set_status(
        &self,
        number: &str,
        expected: OrderStatus,
        next: OrderStatus,
        accrual: Option<Money>,
    ) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET status = $1, accrual = $2
            WHERE number = $3 AND status = $4
            "#,
        )
        .bind(next.as_str())
        .bind(accrual.map(Decimal::from))
        .bind(number)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() == 1)
    }

    async fn balance(&self, owner: &str) -> Result<Balance> {
        let (accrued, withdrawn): (Decimal, Decimal) = sqlx::query_as(TOTALS_QUERY)
            .bind(owner)
            .fetch_one(&self.pool)
            .await?;

        Ok(Balance::from_totals(Money::new(accrued), Money::new(withdrawn)))
    }

    async fn withdrawals_by_owner(&self, owner: &str) -> Result<Vec<Withdrawal>> {
        let rows = sqlx::query_as::<_, WithdrawalRow>(
            r#"
            SELECT reference, owner, amount, processed_at
            FROM withdrawals
            WHERE owner = $1
            ORDER BY processed_at DESC, reference DESC
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Withdrawal::from).collect())
    }

    async fn record_withdrawal(&self, withdrawal: &Withdrawal) -> Result<WithdrawalRecord> {
        let mut tx = self.pool.begin().await?;

        Self::advisory_lock(&mut tx, OWNER_LOCK, &withdrawal.owner).await?;
        Self::advisory_lock(&mut tx, KEY_LOCK, &withdrawal.order_reference).await?;

        if let Some(owner) = Self::claimed_by(&mut tx, &withdrawal.order_reference).await? {
            tx.rollback().await?;
            return Ok(WithdrawalRecord::ReferenceTaken { owner });
        }

        let (accrued, withdrawn) = Self::sum_totals(&mut tx, &withdrawal.owner).await?;
        let current = accrued - withdrawn;
        if current.checked_sub(withdrawal.amount).is_none() {
            tx.rollback().await?;
            return Ok(WithdrawalRecord::Insufficient { current });
        }

        sqlx::query(
            r#"
            INSERT INTO withdrawals (reference, owner, amount, processed_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&withdrawal.order_reference)
        .bind(&withdrawal.owner)
        .bind(withdrawal.amount.as_decimal())
        .bind(withdrawal.processed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(WithdrawalRecord::Recorded)
    }
}
