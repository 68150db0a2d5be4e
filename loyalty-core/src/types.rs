//! Core types for the ledger
//!
//! Order status is a closed enumeration with one total transition function,
//! so every status change in the system is checked in a single place.

use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Processing status of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Accepted by the ledger, not yet seen by the oracle
    New,
    /// Oracle knows the order but has not classified it
    Registered,
    /// Oracle is computing the accrual
    Processing,
    /// Accrual computed (terminal)
    Processed,
    /// Oracle refused the order (terminal)
    Invalid,
}

/// Result of checking a status change against the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Status moves forward
    Advance,
    /// Status stays where it is
    Unchanged,
    /// Status would regress or leave a terminal state
    Rejected,
}

impl OrderStatus {
    /// Wire/database code
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Registered => "REGISTERED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Processed => "PROCESSED",
            OrderStatus::Invalid => "INVALID",
        }
    }

    /// `PROCESSED` and `INVALID` never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Processed | OrderStatus::Invalid)
    }

    /// Statuses the reconciliation poller still has to revisit
    pub fn unresolved() -> [OrderStatus; 3] {
        [OrderStatus::New, OrderStatus::Registered, OrderStatus::Processing]
    }

    /// Total transition function for the order lifecycle
    ///
    /// `NEW → {REGISTERED, PROCESSING} → {PROCESSED, INVALID}`; `NEW` and
    /// `REGISTERED` may also jump straight to a terminal status.
    pub fn transition_to(self, next: OrderStatus) -> Transition {
        use OrderStatus::*;

        match (self, next) {
            (New, New)
            | (Registered, Registered)
            | (Processing, Processing)
            | (Processed, Processed)
            | (Invalid, Invalid) => Transition::Unchanged,

            (New, Registered | Processing | Processed | Invalid) => Transition::Advance,
            (Registered, Processing | Processed | Invalid) => Transition::Advance,
            (Processing, Processed | Invalid) => Transition::Advance,

            (_, New) | (Processing, Registered) => Transition::Rejected,
            (Processed | Invalid, _) => Transition::Rejected,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "REGISTERED" => Ok(OrderStatus::Registered),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "PROCESSED" => Ok(OrderStatus::Processed),
            "INVALID" => Ok(OrderStatus::Invalid),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

/// Loyalty order submitted by a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    /// Luhn-valid order number, globally unique
    pub number: String,

    /// Login of the first submitter
    #[serde(skip_serializing)]
    pub owner: String,

    /// Lifecycle status
    pub status: OrderStatus,

    /// Accrued points, present only once `PROCESSED`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Money>,

    /// Submission time, set once
    #[serde(rename = "uploaded_at")]
    pub submitted_at: DateTime<Utc>,
}

impl Order {
    /// Fresh `NEW` order
    pub fn new(owner: impl Into<String>, number: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            owner: owner.into(),
            status: OrderStatus::New,
            accrual: None,
            submitted_at: Utc::now(),
        }
    }
}

/// Points withdrawn by a user against their balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Withdrawal {
    /// Caller-supplied Luhn-valid idempotency key
    #[serde(rename = "order")]
    pub order_reference: String,

    /// Login of the withdrawing user
    #[serde(skip_serializing)]
    pub owner: String,

    /// Positive amount withdrawn
    #[serde(rename = "sum")]
    pub amount: Money,

    /// Time the withdrawal was recorded
    pub processed_at: DateTime<Utc>,
}

impl Withdrawal {
    /// Withdrawal stamped with the current time
    pub fn new(owner: impl Into<String>, order_reference: impl Into<String>, amount: Money) -> Self {
        Self {
            order_reference: order_reference.into(),
            owner: owner.into(),
            amount,
            processed_at: Utc::now(),
        }
    }
}

/// Derived balance of one owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Balance {
    /// Processed accruals minus withdrawals
    pub current: Money,

    /// Sum of all withdrawals
    pub withdrawn: Money,
}

impl Balance {
    /// Balance from the two ledger sums
    pub fn from_totals(accrued: Money, withdrawn: Money) -> Self {
        Self {
            current: accrued - withdrawn,
            withdrawn,
        }
    }
}

/// Outcome of submitting an order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOrderOutcome {
    /// New order stored with status `NEW`
    Accepted,
    /// Same owner submitted the same number before; nothing written
    AlreadyOwnedByCaller,
    /// Number belongs to another owner
    OwnedByOther,
    /// Failed the Luhn check; nothing written
    InvalidNumber,
}

/// Outcome of a withdrawal request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawOutcome {
    /// Withdrawal recorded
    Accepted,
    /// Caller already used this reference
    DuplicateReference,
    /// Reference belongs to another owner
    OwnedByOther,
    /// Amount exceeds the current balance
    InsufficientBalance,
    /// Reference failed the Luhn check
    InvalidNumber,
    /// Amount is zero or negative
    InvalidAmount,
}

/// Outcome of applying an oracle resolution to an order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// Status moved forward
    Applied {
        /// Status before
        from: OrderStatus,
        /// Status after
        to: OrderStatus,
    },
    /// Order already had this resolution
    Unchanged,
    /// Would regress or overwrite a terminal outcome
    Rejected {
        /// Status the order keeps
        current: OrderStatus,
        /// Status that was refused
        requested: OrderStatus,
    },
    /// No order with that number
    NotFound,
}
