use crate::errors::{GatewayError, Result};
use crate::identity::Owner;
use actix_web::{web, HttpResponse};
use loyalty_core::{
    BalanceEngine, CreateOrderOutcome, Metrics, Money, OrderLedger, WithdrawOutcome,
};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::time::Duration;

/// Shared handler state
#[derive(Debug, Clone)]
pub struct AppState {
    pub ledger: OrderLedger,
    pub balance: BalanceEngine,
    pub metrics: Metrics,
    pub identity_header: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub order: String,
    pub sum: Money,
}

/// Run a core call under the per-request deadline
async fn within_deadline<T, F>(state: &AppState, call: F) -> Result<T>
where
    F: Future<Output = loyalty_core::Result<T>>,
{
    match tokio::time::timeout(state.request_timeout, call).await {
        Ok(result) => result.map_err(GatewayError::from),
        Err(_) => Err(GatewayError::Timeout),
    }
}

/// Health check endpoint
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "loyalty-gateway",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Prometheus scrape endpoint
pub async fn metrics(state: web::Data<AppState>) -> Result<HttpResponse> {
    let body = state.metrics.render()?;
    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(body))
}

/// Submit an order number (plain text body)
pub async fn submit_order(
    state: web::Data<AppState>,
    owner: Owner,
    body: String,
) -> Result<HttpResponse> {
    let number = body.trim();
    if number.is_empty() {
        return Err(GatewayError::BadRequest("order number is empty".to_string()));
    }

    let outcome = within_deadline(&state, state.ledger.create_order(owner.as_str(), number)).await?;

    match outcome {
        CreateOrderOutcome::Accepted => Ok(HttpResponse::Accepted().finish()),
        CreateOrderOutcome::AlreadyOwnedByCaller => Ok(HttpResponse::Ok().finish()),
        CreateOrderOutcome::OwnedByOther => Err(GatewayError::Conflict(format!(
            "order {} was uploaded by another user",
            number
        ))),
        CreateOrderOutcome::InvalidNumber => Err(GatewayError::Validation(format!(
            "invalid order number: {}",
            number
        ))),
    }
}

/// List the caller's orders, newest first
pub async fn list_orders(state: web::Data<AppState>, owner: Owner) -> Result<HttpResponse> {
    let orders = within_deadline(&state, state.ledger.get_orders(owner.as_str())).await?;

    if orders.is_empty() {
        return Ok(HttpResponse::NoContent().finish());
    }
    Ok(HttpResponse::Ok().json(orders))
}

/// Current and withdrawn balance of the caller
pub async fn get_balance(state: web::Data<AppState>, owner: Owner) -> Result<HttpResponse> {
    let balance = within_deadline(&state, state.balance.get_balance(owner.as_str())).await?;
    Ok(HttpResponse::Ok().json(balance))
}

/// Withdraw points against an order reference
pub async fn withdraw(
    state: web::Data<AppState>,
    owner: Owner,
    request: web::Json<WithdrawRequest>,
) -> Result<HttpResponse> {
    let WithdrawRequest { order, sum } = request.into_inner();
    let reference = order.trim();

    let outcome = within_deadline(
        &state,
        state.balance.withdraw(owner.as_str(), reference, sum),
    )
    .await?;

    match outcome {
        WithdrawOutcome::Accepted => Ok(HttpResponse::Ok().finish()),
        WithdrawOutcome::InsufficientBalance => Err(GatewayError::InsufficientBalance),
        WithdrawOutcome::DuplicateReference => Err(GatewayError::Conflict(format!(
            "withdrawal {} already recorded",
            reference
        ))),
        WithdrawOutcome::OwnedByOther => Err(GatewayError::Conflict(format!(
            "order {} belongs to another user",
            reference
        ))),
        WithdrawOutcome::InvalidNumber => Err(GatewayError::Validation(format!(
            "invalid order number: {}",
            reference
        ))),
        WithdrawOutcome::InvalidAmount => Err(GatewayError::Validation(
            "sum must be positive".to_string(),
        )),
    }
}

/// List the caller's withdrawals, newest first
pub async fn list_withdrawals(state: web::Data<AppState>, owner: Owner) -> Result<HttpResponse> {
    let withdrawals = within_deadline(&state, state.balance.get_withdrawals(owner.as_str())).await?;

    if withdrawals.is_empty() {
        return Ok(HttpResponse::NoContent().finish());
    }
    Ok(HttpResponse::Ok().json(withdrawals))
}

/// Configure routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/metrics", web::get().to(metrics))
        .service(
            web::scope("/api/user")
                .route("/orders", web::post().to(submit_order))
                .route("/orders", web::get().to(list_orders))
                .route("/balance", web::get().to(get_balance))
                .route("/balance/withdraw", web::post().to(withdraw))
                .route("/withdrawals", web::get().to(list_withdrawals)),
        );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::DEFAULT_IDENTITY_HEADER;
    use actix_web::{http::header::ContentType, http::StatusCode, test, App};
    use loyalty_core::{LedgerStore, MemoryStore, OrderStatus};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn state() -> AppState {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
        let metrics = Metrics::new().unwrap();
        AppState {
            ledger: OrderLedger::new(store.clone(), metrics.clone()),
            balance: BalanceEngine::new(store, metrics.clone()),
            metrics,
            identity_header: DEFAULT_IDENTITY_HEADER.to_string(),
            request_timeout: Duration::from_secs(1),
        }
    }

    fn submit(owner: &str, number: &str) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/api/user/orders")
            .insert_header((DEFAULT_IDENTITY_HEADER, owner))
            .insert_header(ContentType::plaintext())
            .set_payload(number.to_string())
    }

    fn get(owner: &str, uri: &str) -> test::TestRequest {
        test::TestRequest::get()
            .uri(uri)
            .insert_header((DEFAULT_IDENTITY_HEADER, owner))
    }

    #[actix_web::test]
    async fn test_submit_order_statuses() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state()))
                .configure(configure_routes),
        )
        .await;

        let resp = test::call_service(&app, submit("alice", "79927398713").to_request()).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let resp = test::call_service(&app, submit("alice", "79927398713\n").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = test::call_service(&app, submit("bob", "79927398713").to_request()).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = test::call_service(&app, submit("alice", "1111").to_request()).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = test::call_service(&app, submit("alice", "   ").to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_missing_identity_is_unauthorized() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state()))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/user/balance").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_orders_listing() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state()))
                .configure(configure_routes),
        )
        .await;

        let resp = test::call_service(&app, get("alice", "/api/user/orders").to_request()).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        test::call_service(&app, submit("alice", "79927398713").to_request()).await;

        let resp = test::call_service(&app, get("alice", "/api/user/orders").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body[0]["number"], "79927398713");
        assert_eq!(body[0]["status"], "NEW");
        assert!(body[0].get("accrual").is_none());
        assert!(body[0].get("uploaded_at").is_some());
    }

    #[actix_web::test]
    async fn test_balance_and_withdraw() {
        let state = state();
        state.ledger.create_order("alice", "79927398713").await.unwrap();
        state
            .ledger
            .apply_resolution("79927398713", OrderStatus::Processed, Some(Money::new(dec!(500))))
            .await
            .unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let withdraw = |sum: serde_json::Value, reference: &str| {
            test::TestRequest::post()
                .uri("/api/user/balance/withdraw")
                .insert_header((DEFAULT_IDENTITY_HEADER, "alice"))
                .set_json(json!({"order": reference, "sum": sum}))
                .to_request()
        };

        let resp = test::call_service(&app, withdraw(json!(500.01), "2377225624")).await;
        assert_eq!(resp.status(), StatusCode::PAYMENT_REQUIRED);

        let resp = test::call_service(&app, withdraw(json!(0), "2377225624")).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = test::call_service(&app, withdraw(json!(10), "1111")).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = test::call_service(&app, withdraw(json!(200), "2377225624")).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = test::call_service(&app, withdraw(json!(1), "2377225624")).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = test::call_service(&app, get("alice", "/api/user/balance").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["current"], "300");
        assert_eq!(body["withdrawn"], "200");

        let resp = test::call_service(&app, get("alice", "/api/user/withdrawals").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body[0]["order"], "2377225624");
        assert_eq!(body[0]["sum"], "200");

        let resp = test::call_service(&app, get("bob", "/api/user/withdrawals").to_request()).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[actix_web::test]
    async fn test_withdraw_sum_parsed_exactly() {
        let state = state();
        state.ledger.create_order("alice", "79927398713").await.unwrap();
        state
            .ledger
            .apply_resolution("79927398713", OrderStatus::Processed, Some(Money::new(dec!(500))))
            .await
            .unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        // Rounds to exactly 500.0 as an f64
        let req = test::TestRequest::post()
            .uri("/api/user/balance/withdraw")
            .insert_header((DEFAULT_IDENTITY_HEADER, "alice"))
            .insert_header(ContentType::json())
            .set_payload(r#"{"order":"2377225624","sum":500.0000000000000001}"#)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::PAYMENT_REQUIRED);

        let resp = test::call_service(&app, get("alice", "/api/user/balance").to_request()).await;
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["current"], "500");
    }

    #[actix_web::test]
    async fn test_malformed_withdraw_body() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state()))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/user/balance/withdraw")
            .insert_header((DEFAULT_IDENTITY_HEADER, "alice"))
            .insert_header(ContentType::json())
            .set_payload("{\"order\":")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_health_and_metrics() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state()))
                .configure(configure_routes),
        )
        .await;

        test::call_service(&app, submit("alice", "79927398713").to_request()).await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("loyalty_orders_submitted_total{outcome=\"accepted\"} 1"));
    }
}
