//! HTTP client for the accrual oracle
//!
//! `GET {base}/api/orders/{number}`:
//!
//! | Status | Result |
//! |--------|--------|
//! | 200    | decoded body, see below |
//! | 204, 404 | `UnknownOrder` |
//! | 429    | `RateLimited` (`Retry-After` seconds carried along) |
//! | other  | `TransportError` |
//!
//! A 200 body is `{"order": "...", "status": "...", "accrual": 500}`.
//! `REGISTERED` means the oracle has not classified the order yet.

use super::{AccrualOracle, OracleResult};
use crate::{
    error::{Error, Result},
    money::Money,
    types::OrderStatus,
};
use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

const ORDERS_PATH: &str = "/api/orders/";

#[derive(Debug, Deserialize)]
struct AccrualResponse {
    #[serde(alias = "number")]
    order: String,
    status: String,
    #[serde(default)]
    accrual: Option<Money>,
}

/// reqwest-backed [`AccrualOracle`]
#[derive(Debug, Clone)]
pub struct HttpAccrualClient {
    base_url: String,
    client: Client,
}

impl HttpAccrualClient {
    /// Client for the oracle at `address`.
    ///
    /// `address` may omit the scheme (`localhost:8080`); `http://` is assumed.
    pub fn new(address: &str, timeout: Duration) -> Result<Self> {
        let address = address.trim().trim_end_matches('/');
        if address.is_empty() {
            return Err(Error::Config("accrual system address is empty".to_string()));
        }

        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Oracle(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { base_url, client })
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn decode(order_number: &str, body: AccrualResponse) -> OracleResult {
        if body.order != order_number {
            return OracleResult::TransportError(format!(
                "oracle answered for order {} instead of {}",
                body.order, order_number
            ));
        }

        match body.status.parse::<OrderStatus>() {
            Ok(OrderStatus::Registered) => OracleResult::StillRegistered,
            Ok(status @ (OrderStatus::Processing | OrderStatus::Processed | OrderStatus::Invalid)) => {
                OracleResult::Resolved {
                    status,
                    accrual: body.accrual,
                }
            }
            Ok(OrderStatus::New) | Err(_) => OracleResult::TransportError(format!(
                "unexpected oracle status: {}",
                body.status
            )),
        }
    }
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl AccrualOracle for HttpAccrualClient {
    async fn lookup(&self, order_number: &str) -> OracleResult {
        let url = format!("{}{}{}", self.base_url, ORDERS_PATH, order_number);

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(order = %order_number, error = %e, "Oracle request failed");
                return OracleResult::TransportError(format!("request failed: {}", e));
            }
        };

        match response.status() {
            StatusCode::OK => match response.json::<AccrualResponse>().await {
                Ok(body) => Self::decode(order_number, body),
                Err(e) => OracleResult::TransportError(format!("Failed to parse response: {}", e)),
            },
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => OracleResult::UnknownOrder,
            StatusCode::TOO_MANY_REQUESTS => OracleResult::RateLimited {
                retry_after: retry_after(&response),
            },
            status => OracleResult::TransportError(format!("oracle responded with {}", status)),
        }
    }
}
