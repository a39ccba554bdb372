//! Prometheus metrics for payment and escrow activity.
//!
//! Recording goes through the `metrics` facade and is a no-op until
//! [`init_metrics`] installs the exporter.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use ap_server::metrics;
//! use std::net::SocketAddr;
//!
//! let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
//! metrics::init_metrics(addr).unwrap();
//!
//! metrics::payments_initiated_total("accepted");
//! metrics::http_requests_total("POST", "/api/v1/payments/push", 202);
//! ```

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize Prometheus metrics exporter.
///
/// Metrics will be available at `http://<addr>/metrics`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record HTTP request.
pub fn http_requests_total(method: &str, path: &str, status: u16) {
    metrics::counter!("http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record HTTP request duration in milliseconds.
pub fn http_request_duration_ms(method: &str, path: &str, duration_ms: f64) {
    metrics::histogram!("http_request_duration_ms",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(duration_ms);
}

// ============================================================================
// Payment Metrics
// ============================================================================

/// Push initiations by outcome (`accepted`, `rejected`, `invalid`)
pub fn payments_initiated_total(outcome: &str) {
    metrics::counter!("payments_initiated_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Provider callbacks by reconcile outcome label
pub fn payment_callbacks_total(outcome: &str) {
    metrics::counter!("payment_callbacks_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn pull_captures_total(outcome: &str) {
    metrics::counter!("pull_captures_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ============================================================================
// Escrow Metrics
// ============================================================================

/// Escrow operations (`join`, `leave`, `create`) by outcome
pub fn escrow_operations_total(operation: &str, outcome: &str) {
    metrics::counter!("escrow_operations_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}
