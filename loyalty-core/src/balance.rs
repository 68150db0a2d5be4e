//! Balance engine
//!
//! Balances are recomputed from committed ledger state on every read. A
//! withdrawal checks the reference, recomputes the balance and records the
//! row as one unit serialized per owner, so concurrent withdrawals by the
//! same owner can never push the balance below zero.

use crate::{
    error::{Error, Result},
    luhn,
    metrics::Metrics,
    money::Money,
    storage::{LedgerStore, WithdrawalRecord},
    types::{Balance, WithdrawOutcome, Withdrawal},
};
use std::sync::Arc;

/// Balance and withdrawal operations
#[derive(Clone, Debug)]
pub struct BalanceEngine {
    store: Arc<dyn LedgerStore>,
    metrics: Metrics,
}

impl BalanceEngine {
    /// Engine over `store`
    pub fn new(store: Arc<dyn LedgerStore>, metrics: Metrics) -> Self {
        Self { store, metrics }
    }

    /// Current and withdrawn totals of `owner`
    pub async fn get_balance(&self, owner: &str) -> Result<Balance> {
        self.store.balance(owner).await
    }

    /// Withdraw `amount` points against `order_reference`.
    ///
    /// A reference is an idempotency key sharing one key space with order
    /// numbers: a number already claimed by the caller (as a reference or an
    /// order) gives `DuplicateReference`, one claimed by anyone else
    /// `OwnedByOther`.
    pub async fn withdraw(
        &self,
        owner: &str,
        order_reference: &str,
        amount: Money,
    ) -> Result<WithdrawOutcome> {
        if owner.is_empty() {
            return Err(Error::Validation("owner must not be empty".to_string()));
        }

        if !luhn::is_valid(order_reference) {
            self.metrics.record_withdrawal("invalid_number");
            return Ok(WithdrawOutcome::InvalidNumber);
        }

        if !amount.is_positive() {
            self.metrics.record_withdrawal("invalid_amount");
            return Ok(WithdrawOutcome::InvalidAmount);
        }

        let withdrawal = Withdrawal::new(owner, order_reference, amount);
        let outcome = match self.store.record_withdrawal(&withdrawal).await? {
            WithdrawalRecord::Recorded => {
                tracing::info!(
                    reference = %order_reference,
                    owner = %owner,
                    amount = %amount,
                    "Withdrawal recorded"
                );
                self.metrics.record_withdrawal("accepted");
                WithdrawOutcome::Accepted
            }
            WithdrawalRecord::ReferenceTaken { owner: existing } if existing == owner => {
                self.metrics.record_withdrawal("duplicate_reference");
                WithdrawOutcome::DuplicateReference
            }
            WithdrawalRecord::ReferenceTaken { .. } => {
                tracing::warn!(
                    reference = %order_reference,
                    owner = %owner,
                    "Withdrawal reference claimed by another user"
                );
                self.metrics.record_withdrawal("owned_by_other");
                WithdrawOutcome::OwnedByOther
            }
            WithdrawalRecord::Insufficient { current } => {
                tracing::info!(
                    reference = %order_reference,
                    owner = %owner,
                    amount = %amount,
                    current = %current,
                    "Insufficient balance"
                );
                self.metrics.record_withdrawal("insufficient_balance");
                WithdrawOutcome::InsufficientBalance
            }
        };

        Ok(outcome)
    }

    /// Every withdrawal of `owner`, newest first
    pub async fn get_withdrawals(&self, owner: &str) -> Result<Vec<Withdrawal>> {
        self.store.withdrawals_by_owner(owner).await
    }
}
