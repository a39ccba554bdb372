//! Integration tests for the HTTP API.
//!
//! The router runs over in-memory stores and sandbox providers, so no
//! database or network is needed.

use ap_server::api::{AppState, auth::AccessTokenClaims, create_router};
use arena_pay::payments::callback::success_body;
use arena_pay::{EngineConfig, PaymentEngine, Stores};
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tower::ServiceExt; // For `oneshot` method
use uuid::Uuid;

const JWT_SECRET: &str = "test_secret_key_for_testing_only_32chars";
const CALLBACK_SECRET: &str = "callback_secret_for_tests";

fn test_server() -> (Router, PaymentEngine) {
    let engine = PaymentEngine::sandbox(Stores::in_memory("KES"), EngineConfig::default());
    let state = AppState::new(engine.clone(), JWT_SECRET, Some(CALLBACK_SECRET));
    (create_router(state), engine)
}

fn bearer(user_id: i64) -> String {
    let claims = AccessTokenClaims {
        sub: user_id,
        exp: chrono::Utc::now().timestamp() + 900,
        iat: chrono::Utc::now().timestamp(),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("encode token");
    format!("Bearer {token}")
}

fn sign(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(CALLBACK_SECRET.as_bytes());
    hasher.update(body);
    hex::encode(hasher.finalize())
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn authed(method: &str, uri: &str, user_id: i64, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", bearer(user_id));
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn signed_callback(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/payments/callback")
        .header("content-type", "application/json")
        .header("x-callback-signature", sign(body.as_bytes()))
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ============================================================================
// Health and authentication
// ============================================================================

#[tokio::test]
async fn test_health_check_endpoint() {
    let (app, _) = test_server();
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["storage"]["persistent"], false);
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let (app, _) = test_server();

    let (status, _) = send(
        &app,
        Request::builder()
            .uri("/api/v1/wallet")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        Request::builder()
            .uri("/api/v1/wallet")
            .header("authorization", "Bearer not-a-token")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Push payments and callbacks
// ============================================================================

#[tokio::test]
async fn test_push_then_signed_callback_credits_wallet() {
    let (app, _) = test_server();

    let (status, started) = send(
        &app,
        authed(
            "POST",
            "/api/v1/payments/push",
            42,
            Some(json!({"amount": 1000, "phone": "0712345678"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(started["status"], "pending");
    let reference = started["reference"].as_str().unwrap().to_string();

    let body = success_body(&reference, 1000, "NLJ7RT61SV").to_string();
    let (status, ack) = send(&app, signed_callback(&body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["ResultCode"], 0);

    // Redelivery is acknowledged and changes nothing
    let (status, _) = send(&app, signed_callback(&body)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, wallet) = send(&app, authed("GET", "/api/v1/wallet", 42, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(wallet["balance"], 1000);

    let uri = format!("/api/v1/payments/{reference}");
    let (status, view) = send(&app, authed("GET", &uri, 42, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["intent"]["status"], "completed");
    assert_eq!(view["wallet_balance"], 1000);

    let (status, _) = send(&app, authed("GET", &uri, 43, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unsigned_callback_rejected() {
    let (app, engine) = test_server();
    let started = engine.initiate_push(7, 500, "0712345678").await.unwrap();
    let body = success_body(&started.reference, 500, "FORGED0001").to_string();

    let (status, _) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/api/v1/payments/callback")
            .header("x-callback-signature", "00".repeat(32))
            .body(Body::from(body))
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(engine.wallet_snapshot(7).await.unwrap().balance, 0);
}

#[tokio::test]
async fn test_unknown_reference_callback_acknowledged() {
    let (app, _) = test_server();
    let body = success_body("ws_CO_never_issued", 100, "ABC123").to_string();
    let (status, ack) = send(&app, signed_callback(&body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["ResultDesc"], "Accepted");
}

#[tokio::test]
async fn test_push_amount_out_of_range_is_bad_request() {
    let (app, _) = test_server();
    let (status, body) = send(
        &app,
        authed(
            "POST",
            "/api/v1/payments/push",
            1,
            Some(json!({"amount": 0, "phone": "0712345678"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

// ============================================================================
// Pull orders and history
// ============================================================================

#[tokio::test]
async fn test_order_capture_and_history() {
    let (app, _) = test_server();

    let (status, order) = send(
        &app,
        authed("POST", "/api/v1/payments/orders", 5, Some(json!({"amount": 250}))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let order_id = order["order_id"].as_str().unwrap().to_string();

    let uri = format!("/api/v1/payments/orders/{order_id}/capture");
    let (status, view) = send(&app, authed("POST", &uri, 5, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["wallet_balance"], 250);

    let (status, page) = send(
        &app,
        authed(
            "GET",
            "/api/v1/wallet/transactions?kind=topup&status=completed",
            5,
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["amount"], 250);

    let (status, _) = send(
        &app,
        authed("GET", "/api/v1/wallet/transactions?kind=bonus", 5, None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// Tournaments
// ============================================================================

#[tokio::test]
async fn test_tournament_join_and_leave() {
    let (app, engine) = test_server();
    engine
        .stores()
        .wallets
        .apply_delta(42, 500, Uuid::new_v4())
        .await
        .unwrap();

    let starts_at = (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
    let (status, tournament) = send(
        &app,
        authed(
            "POST",
            "/api/v1/tournaments",
            1,
            Some(json!({
                "name": "Sunday Major",
                "entry_fee": 200,
                "max_players": 8,
                "starts_at": starts_at,
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = tournament["id"].as_i64().unwrap();

    let (status, joined) = send(
        &app,
        authed("POST", &format!("/api/v1/tournaments/{id}/join"), 42, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(joined["wallet"]["balance"], 300);

    let (status, _) = send(
        &app,
        authed("POST", &format!("/api/v1/tournaments/{id}/join"), 42, None),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app,
        authed("POST", &format!("/api/v1/tournaments/{id}/join"), 77, None),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);

    let (status, left) = send(
        &app,
        authed("POST", &format!("/api/v1/tournaments/{id}/leave"), 42, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(left["wallet"]["balance"], 500);
    assert_eq!(left["refunded"], 200);

    let (status, _) = send(
        &app,
        authed("POST", &format!("/api/v1/tournaments/{id}/leave"), 42, None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, authed("GET", "/api/v1/tournaments/9999", 42, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
