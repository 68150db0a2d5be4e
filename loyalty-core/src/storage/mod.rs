//! Storage layer for orders and withdrawals
//!
//! # Tables
//!
//! - `orders` - Order rows keyed by number (owner, status, accrual, submitted_at)
//! - `withdrawals` - Withdrawal rows keyed by reference (owner, amount, processed_at)
//!
//! Balances are never stored; every backend recomputes them from these two
//! tables. Backends provide the atomic primitives the ledger and the balance
//! engine rely on: insert-if-absent per order number, compare-and-set on
//! order status, and a per-owner serialized check-then-insert for withdrawals.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::{
    error::Result,
    money::Money,
    types::{Balance, Order, OrderStatus, Withdrawal},
};
use async_trait::async_trait;

/// Result of the atomic withdrawal primitive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawalRecord {
    /// Row inserted
    Recorded,
    /// Reference already used; carries its owner
    ReferenceTaken {
        /// Owner of the existing withdrawal
        owner: String,
    },
    /// Balance check failed; nothing written
    Insufficient {
        /// Current balance at the time of the check
        current: Money,
    },
}

/// Persistence backend for the ledger
#[async_trait]
pub trait LedgerStore: Send + Sync + std::fmt::Debug {
    /// Insert `order` unless its number exists.
    ///
    /// Returns `None` when inserted, or the owner of the existing row.
    async fn insert_order_if_absent(&self, order: &Order) -> Result<Option<String>>;

    /// Fetch one order by number
    async fn get_order(&self, number: &str) -> Result<Option<Order>>;

    /// All orders of `owner`, newest first
    async fn orders_by_owner(&self, owner: &str) -> Result<Vec<Order>>;

    /// All non-terminal orders across owners, oldest first
    async fn unresolved_orders(&self) -> Result<Vec<Order>>;

    /// Set status and accrual only if the order is still in `expected`.
    ///
    /// Returns `false` when the order is missing or another writer moved it.
    async fn compare_and_set_status(
        &self,
        number: &str,
        expected: OrderStatus,
        next: OrderStatus,
        accrual: Option<Money>,
    ) -> Result<bool>;

    /// Derived balance of `owner`
    async fn balance(&self, owner: &str) -> Result<Balance>;

    /// All withdrawals of `owner`, newest first
    async fn withdrawals_by_owner(&self, owner: &str) -> Result<Vec<Withdrawal>>;

    /// Check reference uniqueness and balance, then insert, as one unit
    /// serialized against every other withdrawal of the same owner.
    async fn record_withdrawal(&self, withdrawal: &Withdrawal) -> Result<WithdrawalRecord>;
}
