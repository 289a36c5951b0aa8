//! Prometheus recorder setup and scrape endpoint.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Store call latencies are expected in the low milliseconds, bounded by
/// the store timeout.
const STORE_CALL_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5];

/// Installs the global Prometheus recorder and returns its render handle.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("catalog_store_call_seconds".to_string()),
            STORE_CALL_BUCKETS,
        )?
        .install_recorder()
}

/// GET /metrics returns Prometheus-formatted metrics.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, CONTENT_TYPE)],
        handle.render(),
    )
}
