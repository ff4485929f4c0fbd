//! Call monitoring API handlers

use super::dto::ApiResponse;
use super::state::AppState;
use crate::application::session::ActiveCall;
use crate::domain::shared::value_objects::StreamSid;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub active_calls: usize,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: i64,
}

/// Active call with its running duration
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveCallResponse {
    #[serde(flatten)]
    pub call: ActiveCall,
    pub duration_seconds: i64,
}

impl From<ActiveCall> for ActiveCallResponse {
    fn from(call: ActiveCall) -> Self {
        Self {
            duration_seconds: call.duration_seconds(),
            call,
        }
    }
}

/// Active calls list response
#[derive(Debug, Serialize, Deserialize)]
pub struct ActiveCallsResponse {
    pub calls: Vec<ActiveCallResponse>,
    pub total: usize,
}

pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    let active_calls = state.registry().len().await;
    let uptime_seconds = (Utc::now() - state.started_at).num_seconds().max(0);

    Json(ApiResponse::success(HealthResponse {
        status: "ok".to_string(),
        active_calls,
        started_at: state.started_at,
        uptime_seconds,
    }))
}

/// Get active calls
pub async fn list_active_calls(
    State(state): State<AppState>,
) -> Json<ApiResponse<ActiveCallsResponse>> {
    info!("API: Getting active calls");

    let calls: Vec<ActiveCallResponse> = state
        .registry()
        .list()
        .await
        .into_iter()
        .map(ActiveCallResponse::from)
        .collect();
    let total = calls.len();
    Json(ApiResponse::success(ActiveCallsResponse { calls, total }))
}

/// Get active call by stream identifier
pub async fn get_active_call(
    State(state): State<AppState>,
    Path(stream_sid): Path<String>,
) -> (StatusCode, Json<ApiResponse<ActiveCallResponse>>) {
    info!("API: Getting active call for stream {}", stream_sid);

    match state.registry().get(&StreamSid::new(stream_sid.clone())).await {
        Some(call) => (StatusCode::OK, Json(ApiResponse::success(call.into()))),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Call with stream {} not found", stream_sid))),
        ),
    }
}
