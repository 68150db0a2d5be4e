//! Loyalty Ledger Core
//!
//! Order ledger and accrual reconciliation engine for a loyalty programme.
//!
//! # Architecture
//!
//! - **Ledger**: Orders keyed by number, first submitter owns them forever
//! - **Balance**: Derived from processed accruals minus withdrawals, never cached
//! - **Reconciliation**: Background poller resolves orders against the accrual oracle
//! - **Backpressure**: A rate-limit signal from the oracle ends the current tick
//!
//! # Invariants
//!
//! - Non-negative balance: current >= 0 for every owner at all times
//! - Exclusive ownership: an order number never changes owner
//! - Monotonic status: NEW → {REGISTERED, PROCESSING} → {PROCESSED, INVALID}
//! - Exact money: all amounts are decimals, never binary floats

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod balance;
pub mod error;
pub mod ledger;
pub mod luhn;
pub mod metrics;
pub mod money;
pub mod oracle;
pub mod poller;
pub mod storage;
pub mod types;

// Re-exports
pub use balance::BalanceEngine;
pub use error::{Error, Result};
pub use ledger::OrderLedger;
pub use metrics::Metrics;
pub use money::Money;
pub use oracle::{AccrualOracle, HttpAccrualClient, OracleResult};
pub use poller::{PollerConfig, PollerHandle, ReconciliationPoller, TickReport};
pub use storage::{LedgerStore, MemoryStore, PostgresStore};
pub use types::{
    Balance, CreateOrderOutcome, Order, OrderStatus, ResolutionOutcome, Transition,
    WithdrawOutcome, Withdrawal,
};
