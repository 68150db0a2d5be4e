use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unprocessable: {0}")]
    Validation(String),

    #[error("Unauthorized access")]
    Unauthorized,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Request deadline exceeded")]
    Timeout,

    #[error("Internal server error: {0}")]
    Core(#[from] loyalty_core::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl ResponseError for GatewayError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        let error_message = match self {
            // Storage details stay in the logs
            GatewayError::Core(e) => {
                tracing::error!(error = %e, "Request failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        HttpResponse::build(status_code).json(json!({
            "error": {
                "code": status_code.as_u16(),
                "message": error_message,
                "type": self.error_type()
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::InsufficientBalance => StatusCode::PAYMENT_REQUIRED,
            GatewayError::Timeout => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Core(loyalty_core::Error::Validation(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Metrics(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl GatewayError {
    fn error_type(&self) -> &str {
        match self {
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::Validation(_) => "validation_error",
            GatewayError::Unauthorized => "unauthorized",
            GatewayError::Conflict(_) => "conflict",
            GatewayError::InsufficientBalance => "insufficient_balance",
            GatewayError::Timeout => "service_unavailable",
            GatewayError::Core(loyalty_core::Error::Validation(_)) => "validation_error",
            GatewayError::Core(loyalty_core::Error::Storage(_)) => "database_error",
            GatewayError::Core(_) => "internal_error",
            GatewayError::Metrics(_) => "internal_error",
        }
    }
}
