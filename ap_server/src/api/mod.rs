//! HTTP API for the wallet, payment and escrow engine.
//!
//! # Endpoints Overview
//!
//! ## Public
//! - `GET /health` - Server health status
//! - `POST /api/v1/payments/callback` - Provider outcome notification (signature checked)
//!
//! ## Payments (auth required)
//! - `POST /api/v1/payments/push` - Start a mobile-money push payment
//! - `GET /api/v1/payments/{reference}` - Status of one payment
//! - `POST /api/v1/payments/orders` - Create a pull-payment order
//! - `POST /api/v1/payments/orders/{order_id}/capture` - Capture an approved order
//!
//! ## Wallet (auth required)
//! - `GET /api/v1/wallet` - Balance
//! - `GET /api/v1/wallet/transactions` - Paged history
//!
//! ## Tournaments (auth required)
//! - `POST /api/v1/tournaments` - Create
//! - `GET /api/v1/tournaments/{id}` - Details
//! - `POST /api/v1/tournaments/{id}/join` - Register, paying the entry fee
//! - `POST /api/v1/tournaments/{id}/leave` - Withdraw before the start, refunded
//!
//! # Security
//!
//! Protected routes expect `Authorization: Bearer <jwt>` signed with HS256,
//! whose `sub` claim is the numeric user id. Tokens are issued elsewhere.
//!
//! The callback route is reached by the payment provider and carries no
//! bearer token. Its body is authenticated with the `x-callback-signature`
//! header instead, and an accepted notification is always answered with
//! `200 OK` and an acknowledgement body.

pub mod auth;
pub mod error;
pub mod middleware;
pub mod payments;
pub mod request_id;
pub mod tournaments;
pub mod wallet;

use arena_pay::PaymentEngine;
use arena_pay::payments::{AcceptAllVerifier, CallbackVerifier, SharedSecretVerifier};
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use auth::TokenVerifier;

/// Application state shared across all HTTP handlers.
///
/// Cloned for each request; every field is reference counted.
#[derive(Clone)]
pub struct AppState {
    pub engine: PaymentEngine,
    pub tokens: Arc<TokenVerifier>,
    pub callback_verifier: Arc<dyn CallbackVerifier>,
}

impl AppState {
    /// State with signature checks when `callback_secret` is set, and without otherwise
    pub fn new(engine: PaymentEngine, jwt_secret: &str, callback_secret: Option<&str>) -> Self {
        let callback_verifier: Arc<dyn CallbackVerifier> = match callback_secret {
            Some(secret) => Arc::new(SharedSecretVerifier::new(secret.as_bytes())),
            None => Arc::new(AcceptAllVerifier),
        };
        Self {
            engine,
            tokens: Arc::new(TokenVerifier::new(jwt_secret)),
            callback_verifier,
        }
    }
}

/// Create the complete API router with all endpoints and middleware.
pub fn create_router(state: AppState) -> Router {
    let v1_routes = create_v1_router(state.clone());

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", v1_routes)
        .layer(axum::middleware::from_fn(middleware::track_metrics))
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn create_v1_router(state: AppState) -> Router<AppState> {
    let public_routes = Router::new().route("/payments/callback", post(payments::callback));

    let protected_routes = Router::new()
        .route("/payments/push", post(payments::initiate_push))
        .route("/payments/orders", post(payments::create_order))
        .route(
            "/payments/orders/{order_id}/capture",
            post(payments::capture_order),
        )
        .route("/payments/{reference}", get(payments::payment_status))
        .route("/wallet", get(wallet::get_wallet))
        .route("/wallet/transactions", get(wallet::list_transactions))
        .route("/tournaments", post(tournaments::create_tournament))
        .route("/tournaments/{tournament_id}", get(tournaments::get_tournament))
        .route(
            "/tournaments/{tournament_id}/join",
            post(tournaments::join_tournament),
        )
        .route(
            "/tournaments/{tournament_id}/leave",
            post(tournaments::leave_tournament),
        )
        .layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth_middleware,
        ));

    Router::new().merge(public_routes).merge(protected_routes)
}

/// Health check endpoint for monitoring and load balancers.
///
/// Returns `200 OK` when storage answers, `503 Service Unavailable` otherwise.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let storage_healthy = state.engine.health_check().await;

    let status_code = if storage_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if storage_healthy { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "storage": {
            "healthy": storage_healthy,
            "persistent": state.engine.stores().is_persistent(),
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status_code, Json(response))
}
