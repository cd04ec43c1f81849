//! Recipe variations and their change records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::recipe::{Ingredient, RecipeContent, Step};

/// One generated or re-activated version of a saved recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeVariation {
    pub id: String,
    pub saved_recipe_id: String,
    pub version_number: u32,
    pub ingredients: Vec<Ingredient>,
    pub steps: Vec<Step>,
    pub adjustment_summary: String,
    pub is_active: bool,
    pub source_request_id: Option<String>,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

impl RecipeVariation {
    pub fn content(&self) -> RecipeContent {
        RecipeContent::new(self.ingredients.clone(), self.steps.clone())
    }
}

/// Kind of difference recorded for one field path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Removed,
    Modified,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Modified => "modified",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "added" => Some(Self::Added),
            "removed" => Some(Self::Removed),
            "modified" => Some(Self::Modified),
            _ => None,
        }
    }
}

/// One field-level difference between two recipe states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: String,
    pub variation_id: String,
    /// Path such as `ingredients[2].amount` or `steps[0]`.
    pub field_path: String,
    pub before_value: Option<serde_json::Value>,
    pub after_value: Option<serde_json::Value>,
    pub change_type: ChangeType,
}
