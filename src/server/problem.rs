//! RFC 7807 problem responses.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::collaborators::CollaboratorError;
use crate::orchestrator::AdjustmentError;

const TYPE_BASE: &str = "https://api.naecipe.com/errors/";

/// An `application/problem+json` body.
#[derive(Debug, Clone, Serialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Extension members.
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

impl Problem {
    pub fn new(status: StatusCode, slug: &str, title: &str) -> Self {
        Self {
            problem_type: format!("{}{}", TYPE_BASE, slug),
            title: title.to_string(),
            status: status.as_u16(),
            detail: None,
            extensions: Map::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extensions.insert(key.to_string(), value.into());
        self
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not-found", "Resource not found").with_detail(detail)
    }

    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::to_string(&self).unwrap_or_default();
        (
            status,
            [(header::CONTENT_TYPE, "application/problem+json")],
            body,
        )
            .into_response()
    }
}

impl From<AdjustmentError> for Problem {
    fn from(e: AdjustmentError) -> Self {
        let detail = e.to_string();
        match e {
            AdjustmentError::Conflict {
                saved_recipe_id,
                request_id,
            } => {
                let problem = Problem::new(
                    StatusCode::CONFLICT,
                    "adjustment-in-progress",
                    "An adjustment is already in progress",
                )
                .with_detail(detail)
                .with("saved_recipe_id", saved_recipe_id);
                match request_id {
                    Some(id) => problem.with("request_id", id),
                    None => problem,
                }
            }
            AdjustmentError::NotFound(_) => Problem::not_found(detail),
            AdjustmentError::NotCompleted { request_id, status } => Problem::new(
                StatusCode::CONFLICT,
                "adjustment-not-completed",
                "Adjustment has not completed",
            )
            .with_detail(detail)
            .with("request_id", request_id)
            .with("status", status.as_str()),
            AdjustmentError::NotRetryable { request_id, status } => Problem::new(
                StatusCode::CONFLICT,
                "adjustment-not-retryable",
                "Only failed adjustments can be retried",
            )
            .with_detail(detail)
            .with("request_id", request_id)
            .with("status", status.as_str()),
            AdjustmentError::Invalid(_) => {
                Problem::new(StatusCode::BAD_REQUEST, "invalid-request", "Invalid request")
                    .with_detail(detail)
            }
            AdjustmentError::VersionConsistency(_) => Problem::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "version-consistency",
                "Variation history is inconsistent",
            )
            .with_detail(detail),
            AdjustmentError::Collaborator(CollaboratorError::NotFound { .. }) => {
                Problem::not_found(detail)
            }
            AdjustmentError::Collaborator(_) => Problem::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "collaborator-unavailable",
                "A dependent service is unavailable",
            )
            .with_detail(detail),
            AdjustmentError::Versions(_)
            | AdjustmentError::Requests(_)
            | AdjustmentError::Outbox(_) => {
                tracing::error!("Request failed: {}", detail);
                Problem::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "Internal server error",
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AdjustmentStatus;

    #[test]
    fn test_conflict_problem_carries_request_id() {
        let problem: Problem = AdjustmentError::Conflict {
            saved_recipe_id: "saved-1".to_string(),
            request_id: Some("req-1".to_string()),
        }
        .into();
        assert_eq!(problem.status, 409);
        assert_eq!(
            problem.problem_type,
            "https://api.naecipe.com/errors/adjustment-in-progress"
        );
        let json = serde_json::to_value(&problem).unwrap();
        assert_eq!(json["request_id"], "req-1");
        assert_eq!(json["type"], problem.problem_type.as_str());
    }

    #[test]
    fn test_not_completed_is_conflict() {
        let problem: Problem = AdjustmentError::NotCompleted {
            request_id: "req-1".to_string(),
            status: AdjustmentStatus::Generating,
        }
        .into();
        assert_eq!(problem.status, 409);
        assert_eq!(problem.extensions["status"], "generating");
    }

    #[test]
    fn test_internal_errors_hide_detail() {
        let problem: Problem = AdjustmentError::Requests(
            crate::repository::RequestStoreError::NotFound("x".to_string()),
        )
        .into();
        assert_eq!(problem.status, 500);
        assert!(problem.detail.is_none());
    }
}
