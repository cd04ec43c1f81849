//! Adjustment request endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::super::problem::Problem;
use super::super::AppState;
use crate::models::{AdjustmentRequest, AdjustmentStatus, ErrorKind};
use crate::orchestrator::SubmitAdjustment;
use crate::repository::CancelOutcome;

/// Status summary returned for a request. The input snapshot stays internal.
#[derive(Debug, Serialize)]
pub struct AdjustmentView {
    pub request_id: String,
    pub saved_recipe_id: String,
    pub feedback_id: String,
    pub status: AdjustmentStatus,
    pub attempt_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Message safe to show to the cook.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<String>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
}

impl From<AdjustmentRequest> for AdjustmentView {
    fn from(r: AdjustmentRequest) -> Self {
        Self {
            request_id: r.id,
            saved_recipe_id: r.saved_recipe_id,
            feedback_id: r.feedback_id,
            status: r.status,
            attempt_count: r.attempt_count,
            provider_used: r.provider_used,
            variation_id: r.output_variant_id,
            error_message: r.error_kind.map(|k| k.user_message()),
            error_kind: r.error_kind,
            retry_of: r.retry_of,
            cancel_requested: r.cancel_requested,
            created_at: r.created_at,
            completed_at: r.completed_at,
            processing_time_ms: r.processing_time_ms,
        }
    }
}

#[derive(Debug, Serialize)]
struct Accepted {
    request_id: String,
    status: AdjustmentStatus,
    status_url: String,
}

impl Accepted {
    fn of(request: &AdjustmentRequest) -> Self {
        Self {
            request_id: request.id.clone(),
            status: request.status,
            status_url: format!("/api/adjustments/{}", request.id),
        }
    }
}

/// Enqueue an adjustment; processing happens in the worker pool.
pub async fn submit_adjustment(
    State(state): State<AppState>,
    Json(input): Json<SubmitAdjustment>,
) -> Result<impl IntoResponse, Problem> {
    let request = state.orchestrator.submit(input).await?;
    Ok((StatusCode::ACCEPTED, Json(Accepted::of(&request))))
}

pub async fn get_adjustment(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<AdjustmentView>, Problem> {
    let request = state.orchestrator.get_status(&request_id).await?;
    Ok(Json(request.into()))
}

/// The committed variation; 409 until the request completes.
pub async fn get_adjustment_result(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    let variation = state.orchestrator.get_result(&request_id).await?;
    Ok(Json(variation))
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    let transitions = state.orchestrator.history(&request_id).await?;
    Ok(Json(transitions))
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    request_id: String,
    outcome: &'static str,
    status: AdjustmentStatus,
}

pub async fn cancel_adjustment(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    let (outcome, request) = state.orchestrator.cancel(&request_id).await?;
    let (status, outcome) = match outcome {
        CancelOutcome::CancelledImmediately => (StatusCode::OK, "cancelled"),
        CancelOutcome::Scheduled => (StatusCode::ACCEPTED, "scheduled"),
        CancelOutcome::AlreadyTerminal => {
            return Err(Problem::new(
                StatusCode::CONFLICT,
                "adjustment-finished",
                "Adjustment has already finished",
            )
            .with("request_id", request.id)
            .with("status", request.status.as_str()));
        }
    };
    Ok((
        status,
        Json(CancelResponse {
            request_id: request.id,
            outcome,
            status: request.status,
        }),
    ))
}

pub async fn retry_adjustment(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    let request = state.orchestrator.retry(&request_id).await?;
    Ok((StatusCode::ACCEPTED, Json(Accepted::of(&request))))
}
