//! Service-level endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Map, Value};

use super::super::AppState;

/// Health check for container orchestration: database reachability,
/// request counts by status and the provider chain.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.orchestrator.stats().await {
        Ok(counts) => {
            let requests: Map<String, Value> = counts
                .into_iter()
                .map(|(status, n)| (status.as_str().to_string(), json!(n)))
                .collect();
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "providers": state.providers.as_slice(),
                    "requests": requests,
                })),
            )
        }
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
        }
    }
}
