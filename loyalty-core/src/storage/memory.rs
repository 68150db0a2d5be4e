//! In-memory storage backend
//!
//! Used when no database URI is configured and throughout the test suite.
//! Order numbers and withdrawal references share one `claims` map, so a
//! number is claimed exactly once whichever table it lands in and
//! insert-if-absent is a single entry operation. Withdrawals are serialized
//! per owner with an async mutex.

use super::{LedgerStore, WithdrawalRecord};
use crate::{
    error::Result,
    money::Money,
    types::{Balance, Order, OrderStatus, Transition, Withdrawal},
};
use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct Stored<T> {
    seq: u64,
    row: T,
}

/// Ledger store kept in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Number or reference -> owner, across both tables
    claims: DashMap<String, String>,
    orders: DashMap<String, Stored<Order>>,
    withdrawals: DashMap<String, Stored<Withdrawal>>,
    owner_locks: DashMap<String, Arc<Mutex<()>>>,
    seq: AtomicU64,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn owner_lock(&self, owner: &str) -> Arc<Mutex<()>> {
        self.owner_locks
            .entry(owner.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn totals(&self, owner: &str) -> (Money, Money) {
        let accrued: Money = self
            .orders
            .iter()
            .filter(|e| e.row.owner == owner && e.row.status == OrderStatus::Processed)
            .filter_map(|e| e.row.accrual)
            .sum();

        let withdrawn: Money = self
            .withdrawals
            .iter()
            .filter(|e| e.row.owner == owner)
            .map(|e| e.row.amount)
            .sum();

        (accrued, withdrawn)
    }

    fn newest_first<T>(mut rows: Vec<Stored<T>>) -> Vec<T> {
        rows.sort_by(|a, b| b.seq.cmp(&a.seq));
        rows.into_iter().map(|s| s.row).collect()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn insert_order_if_absent(&self, order: &Order) -> Result<Option<String>> {
        match self.claims.entry(order.number.clone()) {
            Entry::Occupied(existing) => Ok(Some(existing.get().clone())),
            Entry::Vacant(slot) => {
                self.orders.insert(
                    order.number.clone(),
                    Stored {
                        seq: self.next_seq(),
                        row: order.clone(),
                    },
                );
                slot.insert(order.owner.clone());
                Ok(None)
            }
        }
    }

    async fn get_order(&self, number: &str) -> Result<Option<Order>> {
        Ok(self.orders.get(number).map(|e| e.row.clone()))
    }

    async fn orders_by_owner(&self, owner: &str) -> Result<Vec<Order>> {
        let rows = self
            .orders
            .iter()
            .filter(|e| e.row.owner == owner)
            .map(|e| e.value().clone())
            .collect();

        Ok(Self::newest_first(rows))
    }

    async fn unresolved_orders(&self) -> Result<Vec<Order>> {
        let mut rows: Vec<Stored<Order>> = self
            .orders
            .iter()
            .filter(|e| !e.row.status.is_terminal())
            .map(|e| e.value().clone())
            .collect();

        rows.sort_by_key(|s| s.seq);
        Ok(rows.into_iter().map(|s| s.row).collect())
    }

    async fn compare_and_set_status(
        &self,
        number: &str,
        expected: OrderStatus,
        next: OrderStatus,
        accrual: Option<Money>,
    ) -> Result<bool> {
        let Some(mut entry) = self.orders.get_mut(number) else {
            return Ok(false);
        };

        if entry.row.status != expected || expected.transition_to(next) != Transition::Advance {
            return Ok(false);
        }

        entry.row.status = next;
        entry.row.accrual = accrual;
        Ok(true)
    }

    async fn balance(&self, owner: &str) -> Result<Balance> {
        let (accrued, withdrawn) = self.totals(owner);
        Ok(Balance::from_totals(accrued, withdrawn))
    }

    async fn withdrawals_by_owner(&self, owner: &str) -> Result<Vec<Withdrawal>> {
        let rows = self
            .withdrawals
            .iter()
            .filter(|e| e.row.owner == owner)
            .map(|e| e.value().clone())
            .collect();

        Ok(Self::newest_first(rows))
    }

    async fn record_withdrawal(&self, withdrawal: &Withdrawal) -> Result<WithdrawalRecord> {
        let lock = self.owner_lock(&withdrawal.owner);
        let _guard = lock.lock().await;

        if let Some(existing) = self.claims.get(&withdrawal.order_reference) {
            return Ok(WithdrawalRecord::ReferenceTaken {
                owner: existing.value().clone(),
            });
        }

        // No map guard may be held here: totals() iterates both tables.
        let (accrued, withdrawn) = self.totals(&withdrawal.owner);
        let current = accrued - withdrawn;
        if current.checked_sub(withdrawal.amount).is_none() {
            return Ok(WithdrawalRecord::Insufficient { current });
        }

        // Another owner or an order may have claimed the reference since the
        // lookup above.
        match self.claims.entry(withdrawal.order_reference.clone()) {
            Entry::Occupied(existing) => Ok(WithdrawalRecord::ReferenceTaken {
                owner: existing.get().clone(),
            }),
            Entry::Vacant(slot) => {
                self.withdrawals.insert(
                    withdrawal.order_reference.clone(),
                    Stored {
                        seq: self.next_seq(),
                        row: withdrawal.clone(),
                    },
                );
                slot.insert(withdrawal.owner.clone());
                Ok(WithdrawalRecord::Recorded)
            }
        }
    }
}
