//! Prometheus metrics handler

use crate::application::session::metrics::{
    ACTIVE_SESSIONS, FRAMES, LATE_FRAMES_DROPPED, SESSIONS_ENDED, SESSIONS_STARTED, SESSION_EVENTS,
    TRUNCATE_TIMEOUTS, TRUNCATIONS,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(handle)
}

/// A handle whose recorder is not installed globally, e.g. for tests
pub fn standalone_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

fn describe_metrics() {
    describe_counter!(SESSIONS_STARTED, "Total number of call sessions started");
    describe_counter!(SESSIONS_ENDED, "Total number of call sessions ended, by end reason");
    describe_gauge!(ACTIVE_SESSIONS, "Number of currently active call sessions");
    describe_counter!(SESSION_EVENTS, "Events handled by session loops, by kind");
    describe_counter!(FRAMES, "Audio frames relayed, by direction");
    describe_counter!(
        LATE_FRAMES_DROPPED,
        "Assistant audio frames dropped because their response was truncated"
    );
    describe_counter!(TRUNCATIONS, "Responses truncated after a caller interruption");
    describe_counter!(
        TRUNCATE_TIMEOUTS,
        "Truncates given up after the acknowledgment deadline"
    );
    describe_counter!(
        "callrelay_persistence_dropped_total",
        "Persistence events dropped because the queue was full"
    );
    describe_counter!(
        "callrelay_persistence_failures_total",
        "Persistence calls that failed after all retries"
    );
}

/// HTTP metrics handler
pub async fn metrics_handler(State(prometheus_handle): State<PrometheusHandle>) -> Response {
    let metrics = prometheus_handle.render();
    (StatusCode::OK, metrics).into_response()
}
