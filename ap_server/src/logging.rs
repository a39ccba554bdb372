//! Structured logging configuration.
//!
//! The library logs through the `log` facade; the subscriber installed here
//! picks those records up alongside the server's own `tracing` events.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured logging
///
/// Log levels come from `RUST_LOG`, defaulting to `info,sqlx=warn,hyper=warn`.
///
/// # Example
///
/// ```no_run
/// use ap_server::logging;
///
/// #[tokio::main]
/// async fn main() {
///     logging::init();
///     tracing::info!("Server starting");
/// }
/// ```
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,hyper=warn"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Structured logging initialized");
}

/// Log security event with structured data
///
/// # Example
///
/// ```
/// use ap_server::logging::log_security_event;
///
/// log_security_event(
///     "callback_signature_invalid",
///     None,
///     Some("192.168.1.1"),
///     "Rejected unsigned payment callback"
/// );
/// ```
pub fn log_security_event(
    event_type: &str,
    user_id: Option<i64>,
    ip_address: Option<&str>,
    message: &str,
) {
    tracing::warn!(
        event_type = event_type,
        user_id = user_id,
        ip_address = ip_address,
        "SECURITY: {}",
        message
    );
}

/// Log a callback that reached the server but could not be applied cleanly.
///
/// These are acknowledged to the provider regardless; the log line is what an
/// operator investigates.
pub fn log_reconciliation_anomaly(outcome: &str, request_id: Option<&str>, detail: &str) {
    tracing::warn!(
        outcome = outcome,
        request_id = request_id,
        "RECONCILIATION: {}",
        detail
    );
}

/// Log API request/response
pub fn log_api_request(
    method: &str,
    path: &str,
    status_code: u16,
    duration_ms: u64,
    user_id: Option<i64>,
) {
    if duration_ms > 1000 {
        tracing::warn!(
            http_method = method,
            http_path = path,
            http_status = status_code,
            duration_ms = duration_ms,
            user_id = user_id,
            "Slow API request"
        );
    } else {
        tracing::info!(
            http_method = method,
            http_path = path,
            http_status = status_code,
            duration_ms = duration_ms,
            user_id = user_id,
            "API request completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_security_event() {
        // Just ensure it doesn't panic
        log_security_event("test_event", Some(1), Some("127.0.0.1"), "Test message");
    }

    #[test]
    fn test_log_reconciliation_anomaly() {
        log_reconciliation_anomaly("unknown_reference", Some("3f1c0f6e"), "no intent for ws_CO_1");
        log_reconciliation_anomaly("protocol_error", None, "missing amount");
    }

    #[test]
    fn test_log_api_request() {
        log_api_request("GET", "/api/v1/wallet", 200, 45, Some(123));
        log_api_request("POST", "/api/v1/payments/push", 503, 2000, None);
    }
}
