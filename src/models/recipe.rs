//! Recipe content models.
//!
//! Ingredients and steps are the unit of variation: every generated variant
//! carries a full copy of both lists so any version can be shown without
//! replaying history.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One ingredient line of a recipe.
///
/// `amount` stays free text because catalog recipes mix numeric quantities
/// ("300", "1/2") with qualitative ones ("to taste", "약간").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Ingredient {
    pub fn new(name: &str, amount: Option<&str>, unit: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            amount: amount.map(str::to_string),
            unit: unit.map(str::to_string),
            note: None,
        }
    }

    /// Human-readable "name amount unit" line.
    pub fn display_line(&self) -> String {
        let mut line = self.name.clone();
        if let Some(ref amount) = self.amount {
            line.push(' ');
            line.push_str(amount);
        }
        if let Some(ref unit) = self.unit {
            line.push(' ');
            line.push_str(unit);
        }
        line
    }
}

/// One cooking step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tip: Option<String>,
}

impl Step {
    pub fn new(description: &str) -> Self {
        Self {
            description: description.to_string(),
            duration_seconds: None,
            tip: None,
        }
    }
}

/// The adjustable body of a recipe: its ingredient list and steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeContent {
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl RecipeContent {
    pub fn new(ingredients: Vec<Ingredient>, steps: Vec<Step>) -> Self {
        Self { ingredients, steps }
    }

    /// SHA-256 over the canonical JSON encoding.
    pub fn content_hash(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        hex::encode(hasher.finalize())
    }
}

/// A recipe as stored in the catalog. Read-only from this crate's side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginalRecipe {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servings: Option<u32>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl OriginalRecipe {
    pub fn content(&self) -> RecipeContent {
        RecipeContent::new(self.ingredients.clone(), self.steps.clone())
    }
}

/// A user's saved copy of a catalog recipe, as resolved by the cookbook service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedRecipeRef {
    pub id: String,
    pub user_id: String,
    pub original_recipe_id: String,
}
