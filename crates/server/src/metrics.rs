//! Prometheus metrics
//!
//! Installs the global recorder once; every crate records through the
//! `metrics` facade.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Latency buckets in milliseconds, sized for cold and warm model calls
const LATENCY_BUCKETS_MS: &[f64] = &[
    50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0, 30_000.0, 60_000.0,
];

/// Install the Prometheus recorder. Later calls return the same handle.
pub fn init_metrics() -> Option<PrometheusHandle> {
    HANDLE
        .get_or_try_init(|| {
            PrometheusBuilder::new()
                .set_buckets_for_metric(Matcher::Suffix("_ms".to_string()), LATENCY_BUCKETS_MS)?
                .install_recorder()
        })
        .map(Clone::clone)
        .map_err(|e| tracing::warn!(error = %e, "Failed to install Prometheus recorder"))
        .ok()
}

/// GET /metrics
pub async fn metrics_handler() -> impl IntoResponse {
    match HANDLE.get() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics are disabled".to_string(),
        ),
    }
}

/// Record one HTTP request
pub fn record_request(route: &'static str, status: StatusCode, elapsed: Duration) {
    let status = status.as_u16().to_string();
    metrics::counter!("triage_http_requests_total", "route" => route, "status" => status)
        .increment(1);
    metrics::histogram!("triage_http_latency_ms", "route" => route)
        .record(elapsed.as_secs_f64() * 1_000.0);
}
