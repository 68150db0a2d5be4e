//! HTTP gateway for the loyalty ledger
//!
//! Thin actix-web layer over `loyalty-core`: resolves the caller from a
//! trusted header, maps core outcomes to status codes, and bounds every
//! request with a deadline.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod identity;

pub use config::Config;
pub use errors::{GatewayError, Result};
pub use handlers::AppState;
