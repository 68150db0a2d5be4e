//! Order ledger
//!
//! Owns order records and their lifecycle. Ownership is decided once, by the
//! store's insert-if-absent on the order number; status changes go through
//! [`OrderStatus::transition_to`] and land as a compare-and-set, so a
//! concurrent writer can never regress an order.
//!
//! # Example
//!
//! ```no_run
//! use loyalty_core::{CreateOrderOutcome, MemoryStore, Metrics, OrderLedger};
//! use std::sync::Arc;
//!
//! # async fn demo() -> loyalty_core::Result<()> {
//! let ledger = OrderLedger::new(Arc::new(MemoryStore::new()), Metrics::new()?);
//!
//! let outcome = ledger.create_order("alice", "79927398713").await?;
//! assert_eq!(outcome, CreateOrderOutcome::Accepted);
//! # Ok(())
//! # }
//! ```

use crate::{
    error::{Error, Result},
    luhn,
    metrics::Metrics,
    money::Money,
    storage::LedgerStore,
    types::{CreateOrderOutcome, Order, OrderStatus, ResolutionOutcome, Transition},
};
use std::sync::Arc;

/// Compare-and-set attempts before a resolution is reported as lost
const MAX_CAS_ATTEMPTS: usize = 3;

/// Order ledger
#[derive(Clone, Debug)]
pub struct OrderLedger {
    store: Arc<dyn LedgerStore>,
    metrics: Metrics,
}

impl OrderLedger {
    /// Ledger over `store`
    pub fn new(store: Arc<dyn LedgerStore>, metrics: Metrics) -> Self {
        Self { store, metrics }
    }

    /// Shared store handle
    pub fn store(&self) -> Arc<dyn LedgerStore> {
        self.store.clone()
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Submit an order number on behalf of `owner`.
    ///
    /// The Luhn check runs before the store is touched. The first submitter
    /// of a number owns it forever; resubmitting is a no-op. A number already
    /// used as a withdrawal reference counts as owned by whoever withdrew.
    pub async fn create_order(&self, owner: &str, number: &str) -> Result<CreateOrderOutcome> {
        if owner.is_empty() {
            return Err(Error::Validation("owner must not be empty".to_string()));
        }

        if !luhn::is_valid(number) {
            tracing::debug!(order = %number, owner = %owner, "Rejected order number");
            self.metrics.record_order("invalid_number");
            return Ok(CreateOrderOutcome::InvalidNumber);
        }

        let outcome = match self.store.insert_order_if_absent(&Order::new(owner, number)).await? {
            None => CreateOrderOutcome::Accepted,
            Some(existing) if existing == owner => CreateOrderOutcome::AlreadyOwnedByCaller,
            Some(_) => CreateOrderOutcome::OwnedByOther,
        };

        match outcome {
            CreateOrderOutcome::Accepted => {
                tracing::info!(order = %number, owner = %owner, "Order accepted");
                self.metrics.record_order("accepted");
            }
            CreateOrderOutcome::AlreadyOwnedByCaller => {
                self.metrics.record_order("already_owned");
            }
            _ => {
                tracing::warn!(order = %number, owner = %owner, "Order number owned by another user");
                self.metrics.record_order("owned_by_other");
            }
        }

        Ok(outcome)
    }

    /// Every order of `owner`, newest first
    pub async fn get_orders(&self, owner: &str) -> Result<Vec<Order>> {
        self.store.orders_by_owner(owner).await
    }

    /// Every non-terminal order across owners, oldest first
    pub async fn get_unresolved(&self) -> Result<Vec<Order>> {
        self.store.unresolved_orders().await
    }

    /// Move one order to `status`.
    ///
    /// `accrual` is only kept for `PROCESSED` (missing means zero). Regressions
    /// and attempts to change a terminal outcome are refused without writing;
    /// repeating an already applied resolution is a no-op.
    pub async fn apply_resolution(
        &self,
        number: &str,
        status: OrderStatus,
        accrual: Option<Money>,
    ) -> Result<ResolutionOutcome> {
        let accrual = match status {
            OrderStatus::Processed => Some(accrual.unwrap_or(Money::ZERO)),
            _ => None,
        };

        if accrual.map_or(false, |a| a.is_negative()) {
            return Err(Error::Validation(format!(
                "negative accrual for order {}",
                number
            )));
        }

        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(order) = self.store.get_order(number).await? else {
                tracing::warn!(order = %number, "Resolution for unknown order");
                return Ok(ResolutionOutcome::NotFound);
            };

            match order.status.transition_to(status) {
                Transition::Unchanged if order.accrual == accrual => {
                    self.metrics.record_resolution("unchanged");
                    return Ok(ResolutionOutcome::Unchanged);
                }
                Transition::Unchanged | Transition::Rejected => {
                    tracing::warn!(
                        order = %number,
                        current = %order.status,
                        requested = %status,
                        "Refused order status change"
                    );
                    self.metrics.record_resolution("rejected");
                    return Ok(ResolutionOutcome::Rejected {
                        current: order.status,
                        requested: status,
                    });
                }
                Transition::Advance => {
                    if self
                        .store
                        .compare_and_set_status(number, order.status, status, accrual)
                        .await?
                    {
                        tracing::info!(
                            order = %number,
                            from = %order.status,
                            to = %status,
                            "Order status advanced"
                        );
                        self.metrics.record_resolution("applied");
                        return Ok(ResolutionOutcome::Applied {
                            from: order.status,
                            to: status,
                        });
                    }
                    tracing::debug!(order = %number, "Order changed concurrently, retrying");
                }
            }
        }

        Err(Error::Invariant(format!(
            "order {} kept changing during resolution",
            number
        )))
    }
}
