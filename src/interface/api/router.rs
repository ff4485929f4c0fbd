//! API Router configuration

use super::calls_handler::{get_active_call, health_check, list_active_calls};
use super::media_stream::media_stream_handler;
use super::metrics_handler::metrics_handler;
use super::state::AppState;
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the API router
pub fn build_router(state: AppState, prometheus_handle: PrometheusHandle) -> Router {
    // Telephony provider media stream
    let media_routes = Router::new().route("/call", get(media_stream_handler));

    let call_routes = Router::new()
        .route("/health", get(health_check))
        .route("/calls", get(list_active_calls))
        .route("/calls/:stream_sid", get(get_active_call));

    // Metrics route (separate state)
    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(prometheus_handle);

    Router::new()
        .merge(media_routes)
        .merge(call_routes)
        .with_state(state)
        .merge(metrics_routes)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
