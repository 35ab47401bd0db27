//! HTTP surface: Prometheus exposition and a liveness probe.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/healthz` | Liveness probe |

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;

use poolscale_metrics::{MetricsRegistry, render_prometheus};

/// Build the router, reading gauges from `metrics` on every scrape.
pub fn build_router(metrics: MetricsRegistry) -> Router {
    Router::new()
        .route("/metrics", get(prometheus_metrics))
        .route("/healthz", get(healthz))
        .with_state(metrics)
}

/// GET /metrics
pub async fn prometheus_metrics(State(metrics): State<MetricsRegistry>) -> impl IntoResponse {
    let body = render_prometheus(&metrics.snapshot());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
