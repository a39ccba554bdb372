//! Authentication and request metrics middleware.
//!
//! # Extracting User ID
//!
//! Handlers behind [`auth_middleware`] read the caller from request extensions:
//!
//! ```rust,no_run
//! use axum::extract::Extension;
//!
//! async fn protected_handler(Extension(user_id): Extension<i64>) -> String {
//!     format!("Authenticated as user {}", user_id)
//! }
//! # let _ = protected_handler;
//! ```

use axum::{
    extract::{MatchedPath, Request, State},
    http::{StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use super::AppState;
use crate::{logging, metrics};

/// Validate the `Authorization: Bearer <token>` header and inject the user id.
///
/// Missing, malformed, badly signed and expired tokens all get `401 Unauthorized`.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    match state.tokens.verify(token) {
        Ok(claims) => {
            request.extensions_mut().insert(claims.sub);
            Ok(next.run(request).await)
        }
        Err(e) => {
            logging::log_security_event(
                "invalid_access_token",
                None,
                None,
                &format!("Rejected bearer token: {e}"),
            );
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Count and time every request, labelled by route template
pub async fn track_metrics(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    // Route templates keep label cardinality bounded
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    let elapsed = started.elapsed();
    let status = response.status().as_u16();
    metrics::http_requests_total(&method, &path, status);
    metrics::http_request_duration_ms(&method, &path, elapsed.as_secs_f64() * 1000.0);
    logging::log_api_request(
        &method,
        &path,
        status,
        elapsed.as_millis() as u64,
        None,
    );

    response
}
