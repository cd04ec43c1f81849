//! Adjustment request lifecycle models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::taste::FeedbackSnapshot;

/// Processing status of an adjustment request.
///
/// Variants are declared in pipeline order; `Ord` follows that order so a
/// transition is valid only when it moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentStatus {
    Pending,
    Interpreting,
    AssemblingContext,
    Planning,
    Generating,
    Validating,
    Completed,
    Failed,
}

impl AdjustmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Interpreting => "interpreting",
            Self::AssemblingContext => "assembling_context",
            Self::Planning => "planning",
            Self::Generating => "generating",
            Self::Validating => "validating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "interpreting" => Some(Self::Interpreting),
            "assembling_context" => Some(Self::AssemblingContext),
            "planning" => Some(Self::Planning),
            "generating" => Some(Self::Generating),
            "validating" => Some(Self::Validating),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `next` respects the stage order.
    ///
    /// `Failed` is reachable from every non-terminal state; `Completed` only
    /// from `Validating`.
    pub fn can_transition_to(&self, next: AdjustmentStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Failed => true,
            Self::Completed => *self == Self::Validating,
            _ => next > *self,
        }
    }

    /// Statuses a request can be in while it still holds its saved recipe.
    pub const IN_FLIGHT: [AdjustmentStatus; 6] = [
        Self::Pending,
        Self::Interpreting,
        Self::AssemblingContext,
        Self::Planning,
        Self::Generating,
        Self::Validating,
    ];
}

impl std::fmt::Display for AdjustmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stable failure classification that clients map to user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InterpretationError,
    ContextUnavailable,
    ProviderExhausted,
    ValidationRejected,
    Cancelled,
    VersionConsistency,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InterpretationError => "interpretation_error",
            Self::ContextUnavailable => "context_unavailable",
            Self::ProviderExhausted => "provider_exhausted",
            Self::ValidationRejected => "validation_rejected",
            Self::Cancelled => "cancelled",
            Self::VersionConsistency => "version_consistency",
            Self::Internal => "internal",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "interpretation_error" => Some(Self::InterpretationError),
            "context_unavailable" => Some(Self::ContextUnavailable),
            "provider_exhausted" => Some(Self::ProviderExhausted),
            "validation_rejected" => Some(Self::ValidationRejected),
            "cancelled" => Some(Self::Cancelled),
            "version_consistency" => Some(Self::VersionConsistency),
            "internal" => Some(Self::Internal),
            _ => None,
        }
    }

    /// Short message suitable for showing to the person who gave feedback.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InterpretationError => "We couldn't understand your feedback.",
            Self::ContextUnavailable => "This recipe is no longer available.",
            Self::ProviderExhausted => "Our system is busy, please try again.",
            Self::ValidationRejected => "We couldn't produce a safe adjustment for this recipe.",
            Self::Cancelled => "The adjustment was cancelled.",
            Self::VersionConsistency | Self::Internal => "Something went wrong on our side.",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One attempt at producing a new variation from a feedback submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRequest {
    pub id: String,
    pub saved_recipe_id: String,
    pub feedback_id: String,
    pub status: AdjustmentStatus,
    /// Provider calls made so far, across all stages.
    pub attempt_count: u32,
    pub provider_used: Option<String>,
    pub input_snapshot: FeedbackSnapshot,
    pub output_variant_id: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    /// The failed request this one retries, if any.
    pub retry_of: Option<String>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<u64>,
}

impl AdjustmentRequest {
    pub fn new(saved_recipe_id: &str, feedback_id: &str, input_snapshot: FeedbackSnapshot) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            saved_recipe_id: saved_recipe_id.to_string(),
            feedback_id: feedback_id.to_string(),
            status: AdjustmentStatus::Pending,
            attempt_count: 0,
            provider_used: None,
            input_snapshot,
            output_variant_id: None,
            error_kind: None,
            error_message: None,
            retry_of: None,
            cancel_requested: false,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            processing_time_ms: None,
        }
    }

    /// A fresh pending request carrying the same input as a failed one.
    pub fn retry_of(failed: &AdjustmentRequest) -> Self {
        let mut next = Self::new(
            &failed.saved_recipe_id,
            &failed.feedback_id,
            failed.input_snapshot.clone(),
        );
        next.retry_of = Some(failed.id.clone());
        next
    }
}

/// Audit entry for one status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub request_id: String,
    pub from_status: Option<AdjustmentStatus>,
    pub to_status: AdjustmentStatus,
    pub at: DateTime<Utc>,
}

/// Completion notice handed to the [`CompletionSink`](crate::collaborators::CompletionSink).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentCompleted {
    pub request_id: String,
    pub saved_recipe_id: String,
    pub variation_id: Option<String>,
    pub summary: Option<String>,
    pub success: bool,
    pub error_kind: Option<ErrorKind>,
}

impl AdjustmentCompleted {
    pub fn from_request(request: &AdjustmentRequest, summary: Option<String>) -> Self {
        Self {
            request_id: request.id.clone(),
            saved_recipe_id: request.saved_recipe_id.clone(),
            variation_id: request.output_variant_id.clone(),
            summary,
            success: request.status == AdjustmentStatus::Completed,
            error_kind: request.error_kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_only_move_forward() {
        use AdjustmentStatus::*;
        assert!(Pending.can_transition_to(Interpreting));
        assert!(Pending.can_transition_to(Planning));
        assert!(Planning.can_transition_to(Failed));
        assert!(Validating.can_transition_to(Completed));

        assert!(!Planning.can_transition_to(Interpreting));
        assert!(!Generating.can_transition_to(Generating));
        assert!(!Generating.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
    }

    #[test]
    fn test_retry_creates_new_row() {
        let mut failed = AdjustmentRequest::new("saved-1", "fb-1", FeedbackSnapshot::default());
        failed.status = AdjustmentStatus::Failed;
        failed.error_kind = Some(ErrorKind::ProviderExhausted);

        let retry = AdjustmentRequest::retry_of(&failed);
        assert_ne!(retry.id, failed.id);
        assert_eq!(retry.status, AdjustmentStatus::Pending);
        assert_eq!(retry.retry_of.as_deref(), Some(failed.id.as_str()));
        assert!(retry.error_kind.is_none());
    }

    #[test]
    fn test_status_strings_round_trip() {
        for status in AdjustmentStatus::IN_FLIGHT
            .iter()
            .chain([AdjustmentStatus::Completed, AdjustmentStatus::Failed].iter())
        {
            assert_eq!(AdjustmentStatus::from_str(status.as_str()), Some(*status));
        }
    }
}
