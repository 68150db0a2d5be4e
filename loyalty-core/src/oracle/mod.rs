//! Accrual oracle integration
//!
//! The oracle is the remote system that decides whether an order earns
//! points and how many. The poller talks to it only through
//! [`AccrualOracle`], so tests can script any sequence of answers.

pub mod http;

pub use http::HttpAccrualClient;

use crate::{money::Money, types::OrderStatus};
use async_trait::async_trait;
use std::time::Duration;

/// What the oracle said about one order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleResult {
    /// Oracle classified the order (`PROCESSING`, `PROCESSED` or `INVALID`)
    Resolved {
        /// Status reported by the oracle
        status: OrderStatus,
        /// Accrued points, if any
        accrual: Option<Money>,
    },
    /// Oracle knows the order but has not classified it yet
    StillRegistered,
    /// Oracle has never heard of the order
    UnknownOrder,
    /// Oracle asked us to back off
    RateLimited {
        /// Suggested pause from the `Retry-After` header
        retry_after: Option<Duration>,
    },
    /// Network failure, timeout or unreadable response
    TransportError(String),
}

impl OracleResult {
    /// Short label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            OracleResult::Resolved { .. } => "resolved",
            OracleResult::StillRegistered => "still_registered",
            OracleResult::UnknownOrder => "unknown_order",
            OracleResult::RateLimited { .. } => "rate_limited",
            OracleResult::TransportError(_) => "transport_error",
        }
    }
}

/// Accrual oracle client
#[async_trait]
pub trait AccrualOracle: Send + Sync {
    /// Look up one order number
    async fn lookup(&self, order_number: &str) -> OracleResult;
}
