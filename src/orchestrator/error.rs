//! Orchestrator error types.

use thiserror::Error;

use crate::collaborators::CollaboratorError;
use crate::models::AdjustmentStatus;
use crate::repository::{OutboxError, RequestStoreError};
use crate::versions::StoreError;

#[derive(Debug, Error)]
pub enum AdjustmentError {
    #[error("An adjustment is already in progress for saved recipe {saved_recipe_id}")]
    Conflict {
        saved_recipe_id: String,
        /// The in-flight request, when it could be looked up.
        request_id: Option<String>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Adjustment {request_id} is not completed (status: {status})")]
    NotCompleted {
        request_id: String,
        status: AdjustmentStatus,
    },

    #[error("Adjustment {request_id} is {status}; only failed adjustments can be retried")]
    NotRetryable {
        request_id: String,
        status: AdjustmentStatus,
    },

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Version consistency violated: {0}")]
    VersionConsistency(String),

    #[error("Version store error: {0}")]
    Versions(StoreError),

    #[error("Request store error: {0}")]
    Requests(RequestStoreError),

    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

impl From<StoreError> for AdjustmentError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => AdjustmentError::NotFound(format!("variation {}", id)),
            StoreError::WrongRecipe {
                variation_id,
                saved_recipe_id,
            } => AdjustmentError::NotFound(format!(
                "variation {} of saved recipe {}",
                variation_id, saved_recipe_id
            )),
            StoreError::VersionConsistency(msg) => AdjustmentError::VersionConsistency(msg),
            other => AdjustmentError::Versions(other),
        }
    }
}

impl From<RequestStoreError> for AdjustmentError {
    fn from(e: RequestStoreError) -> Self {
        match e {
            RequestStoreError::Conflict { saved_recipe_id } => AdjustmentError::Conflict {
                saved_recipe_id,
                request_id: None,
            },
            RequestStoreError::NotFound(id) => AdjustmentError::NotFound(format!("adjustment {}", id)),
            other => AdjustmentError::Requests(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_client_errors() {
        let e: AdjustmentError = StoreError::NotFound("v9".to_string()).into();
        assert!(matches!(e, AdjustmentError::NotFound(ref m) if m.contains("v9")));

        let e: AdjustmentError = StoreError::VersionConsistency("two active".to_string()).into();
        assert!(matches!(e, AdjustmentError::VersionConsistency(_)));

        let e: AdjustmentError = RequestStoreError::Conflict {
            saved_recipe_id: "saved-1".to_string(),
        }
        .into();
        assert!(matches!(e, AdjustmentError::Conflict { request_id: None, .. }));
    }
}
