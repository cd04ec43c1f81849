//! Adjustment pipeline stages.
//!
//! Each stage is a plain value with one entry point and no persistence of
//! its own: interpretation and validation are pure, context assembly reads
//! from collaborators, and planning and generation go through the
//! [`ProviderGateway`](crate::gateway::ProviderGateway). Sequencing, status
//! and retries of whole requests belong to the orchestrator.

pub mod axes;
pub mod context;
pub mod generator;
pub mod interpreter;
pub mod planner;
pub mod quantity;
pub mod validator;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collaborators::Passage;
use crate::gateway::{
    GenerationConstraints, GenerationRequest, GenerationTask, ProviderError, ProviderExhausted,
    ProvidersConfig,
};
use crate::models::{
    ErrorKind, Ingredient, OriginalRecipe, RecipeContent, SavedRecipeRef, Step, TasteAxis,
    TasteProfile,
};

pub use context::ContextAssembler;
pub use generator::VariantGenerator;
pub use interpreter::FeedbackInterpreter;
pub use planner::PlanGenerator;
pub use validator::{ValidationCheck, ValidationInput, ValidatorConfig, VariantValidator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Increase,
    Decrease,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Magnitude {
    Slight,
    Moderate,
    Strong,
}

impl Magnitude {
    /// Multiplier applied to axis-bearing ingredient amounts.
    pub fn factor(&self, direction: Direction) -> f64 {
        match (direction, self) {
            (Direction::Decrease, Magnitude::Slight) => 0.85,
            (Direction::Decrease, Magnitude::Moderate) => 0.7,
            (Direction::Decrease, Magnitude::Strong) => 0.5,
            (Direction::Increase, Magnitude::Slight) => 1.15,
            (Direction::Increase, Magnitude::Moderate) => 1.3,
            (Direction::Increase, Magnitude::Strong) => 1.5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Magnitude::Slight => "slight",
            Magnitude::Moderate => "moderate",
            Magnitude::Strong => "strong",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisAdjustment {
    pub axis: TasteAxis,
    pub direction: Direction,
    pub magnitude: Magnitude,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Substitution {
    pub ingredient: String,
    /// `None` removes the ingredient.
    #[serde(default)]
    pub replacement: Option<String>,
    pub reason: String,
}

/// Feedback reduced to what the planner acts on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredAdjustment {
    #[serde(default)]
    pub adjustments: Vec<AxisAdjustment>,
    #[serde(default)]
    pub substitutions: Vec<Substitution>,
    /// Feedback fragments that carried no actionable signal.
    #[serde(default)]
    pub notes: Vec<String>,
}

impl StructuredAdjustment {
    pub fn is_empty(&self) -> bool {
        self.adjustments.is_empty() && self.substitutions.is_empty()
    }

    pub fn adjustment_for(&self, axis: TasteAxis) -> Option<&AxisAdjustment> {
        self.adjustments.iter().find(|a| a.axis == axis)
    }
}

/// Everything the planner and generator need, resolved once per request.
#[derive(Debug, Clone)]
pub struct AdjustmentContext {
    pub saved_recipe: SavedRecipeRef,
    pub original: OriginalRecipe,
    pub profile: Option<TasteProfile>,
    /// Content being adjusted: the active variation, else the original.
    pub base: RecipeContent,
    pub base_variation_id: Option<String>,
    pub passages: Vec<Passage>,
    pub adjustment: StructuredAdjustment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeTarget {
    Ingredient,
    Step,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Modify,
    Add,
    Remove,
}

/// One intended edit. `index` refers to the base content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedChange {
    pub target: ChangeTarget,
    pub action: ChangeAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePlan {
    pub summary: String,
    pub changes: Vec<PlannedChange>,
}

/// Generator output before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftVariant {
    pub summary: String,
    pub ingredients: Vec<Ingredient>,
    pub steps: Vec<Step>,
}

impl DraftVariant {
    pub fn content(&self) -> RecipeContent {
        RecipeContent::new(self.ingredients.clone(), self.steps.clone())
    }
}

/// A draft that passed every check.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedVariant {
    pub summary: String,
    pub content: RecipeContent,
}

/// Inputs carried in the planner's generation payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanPayload {
    pub base: RecipeContent,
    pub adjustment: StructuredAdjustment,
    #[serde(default)]
    pub profile: Option<TasteProfile>,
}

/// Inputs carried in the generator's generation payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantPayload {
    pub base: RecipeContent,
    pub plan: ChangePlan,
}

#[derive(Debug, Clone, Error)]
pub enum StageError {
    #[error("no actionable adjustment in feedback: {0}")]
    Interpretation(String),

    #[error("context unavailable: {0}")]
    ContextUnavailable(String),

    #[error(transparent)]
    ProviderExhausted(#[from] ProviderExhausted),

    #[error("variant rejected: {}", .0.join("; "))]
    ValidationRejected(Vec<String>),
}

impl StageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::Interpretation(_) => ErrorKind::InterpretationError,
            StageError::ContextUnavailable(_) => ErrorKind::ContextUnavailable,
            StageError::ProviderExhausted(_) => ErrorKind::ProviderExhausted,
            StageError::ValidationRejected(_) => ErrorKind::ValidationRejected,
        }
    }

    /// Provider calls consumed before the stage gave up.
    pub fn attempts(&self) -> u32 {
        match self {
            StageError::ProviderExhausted(e) => e.attempts,
            _ => 0,
        }
    }
}

/// Per-call limits shared by the planning and generation stages.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self::from_config(&ProvidersConfig::default())
    }
}

impl GenerationSettings {
    pub fn from_config(config: &ProvidersConfig) -> Self {
        Self {
            max_tokens: config.primary.max_tokens,
            temperature: config.primary.temperature,
            timeout: Duration::from_secs(config.call_timeout_secs.max(1)),
        }
    }

    pub(crate) fn request(
        &self,
        task: GenerationTask,
        prompt: String,
        payload: serde_json::Value,
    ) -> GenerationRequest {
        GenerationRequest {
            prompt,
            constraints: GenerationConstraints {
                task,
                max_tokens: self.max_tokens,
                temperature: self.temperature,
                payload,
            },
            timeout: self.timeout,
        }
    }
}

/// Pull the JSON object out of a model reply: strips code fences and any
/// prose around the outermost braces.
pub(crate) fn extract_json(text: &str) -> Result<&str, ProviderError> {
    let start = text.find('{');
    let end = text.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if s < e => Ok(&text[s..=e]),
        _ => Err(ProviderError::MalformedOutput(
            "no JSON object in response".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_strips_fences() {
        let reply = "```json\n{\"summary\": \"x\"}\n```";
        assert_eq!(extract_json(reply).unwrap(), "{\"summary\": \"x\"}");
        assert!(extract_json("sorry, I can't").is_err());
    }

    #[test]
    fn test_magnitude_factors_are_ordered() {
        let down: Vec<f64> = [Magnitude::Slight, Magnitude::Moderate, Magnitude::Strong]
            .iter()
            .map(|m| m.factor(Direction::Decrease))
            .collect();
        assert!(down.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(Magnitude::Strong.factor(Direction::Decrease), 0.5);
    }
}
