//! Error types for the ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// Business outcomes such as a conflicting owner or an insufficient balance
/// are not errors; they are reported through the outcome enums in
/// [`crate::types`].
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (Postgres)
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Input rejected before touching the store
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invariant violation (negative balance, lost update, etc.)
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// Accrual oracle client could not be built or used
    #[error("Oracle error: {0}")]
    Oracle(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
