//! Versioned storage of recipe variations.
//!
//! The store owns the "active variation" pointer of every saved recipe.
//! Nothing else flips `is_active`: new generations go through [`VersionStore::commit`]
//! and manual switches through [`VersionStore::rollback`].

pub mod diff;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{ChangeRecord, RecipeContent, RecipeVariation};

pub use diff::{apply, diff, DiffError};

/// Errors from version store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Variation not found: {0}")]
    NotFound(String),

    #[error("Variation {variation_id} does not belong to saved recipe {saved_recipe_id}")]
    WrongRecipe {
        variation_id: String,
        saved_recipe_id: String,
    },

    /// The single-active invariant would be broken. Never retried.
    #[error("Version consistency violated: {0}")]
    VersionConsistency(String),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Stored JSON is invalid: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Input to [`VersionStore::commit`].
#[derive(Debug, Clone)]
pub struct NewVariation {
    pub saved_recipe_id: String,
    pub content: RecipeContent,
    pub summary: String,
    /// Request that produced this variation; `None` for manual edits.
    pub source_request_id: Option<String>,
    /// Original recipe content, diffed against when no variation is active yet.
    pub baseline: RecipeContent,
}

#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Store a new variation and make it the active one.
    ///
    /// Assigns the next version number, records the diff against the
    /// previously active variation (or `baseline`), and swaps the active
    /// flag in the same transaction. Calling it again with a
    /// `source_request_id` that already committed returns the existing
    /// variation unchanged.
    async fn commit(&self, new: NewVariation) -> Result<RecipeVariation, StoreError>;

    /// Re-activate an existing variation. Never creates a version number.
    async fn rollback(
        &self,
        saved_recipe_id: &str,
        target_version_id: &str,
    ) -> Result<RecipeVariation, StoreError>;

    /// Same atomic swap as [`VersionStore::rollback`], for moving forward again.
    async fn activate(
        &self,
        saved_recipe_id: &str,
        version_id: &str,
    ) -> Result<RecipeVariation, StoreError> {
        self.rollback(saved_recipe_id, version_id).await
    }

    async fn get_active(&self, saved_recipe_id: &str)
        -> Result<Option<RecipeVariation>, StoreError>;

    /// All variations by ascending version number.
    async fn list_versions(&self, saved_recipe_id: &str)
        -> Result<Vec<RecipeVariation>, StoreError>;

    async fn get_variation(&self, variation_id: &str)
        -> Result<Option<RecipeVariation>, StoreError>;

    async fn find_by_source_request(
        &self,
        request_id: &str,
    ) -> Result<Option<RecipeVariation>, StoreError>;

    /// Change records cached when the variation was committed.
    async fn changes(&self, variation_id: &str) -> Result<Vec<ChangeRecord>, StoreError>;
}
