//! Caller identity
//!
//! Authentication happens upstream; the identity provider forwards the
//! caller's login in a trusted header, which is taken verbatim: no trimming
//! or case folding. A missing or empty header is refused, as is one that is
//! not visible ASCII.

use crate::errors::GatewayError;
use crate::handlers::AppState;
use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use futures_util::future::{ready, Ready};

pub const DEFAULT_IDENTITY_HEADER: &str = "X-User-Login";

/// Login of the authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

impl Owner {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn extract(req: &HttpRequest) -> Result<Owner, GatewayError> {
    let header = req
        .app_data::<web::Data<AppState>>()
        .map(|state| state.identity_header.as_str())
        .unwrap_or(DEFAULT_IDENTITY_HEADER);

    let login = req
        .headers()
        .get(header)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if login.is_empty() {
        return Err(GatewayError::Unauthorized);
    }

    Ok(Owner(login.to_string()))
}

impl FromRequest for Owner {
    type Error = GatewayError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(extract(req))
    }
}
