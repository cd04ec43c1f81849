//! Data models for recipe adjustment.

mod adjustment;
mod recipe;
mod taste;
mod variation;

pub use adjustment::{
    AdjustmentCompleted, AdjustmentRequest, AdjustmentStatus, ErrorKind, StatusTransition,
};
pub use recipe::{Ingredient, OriginalRecipe, RecipeContent, SavedRecipeRef, Step};
pub use taste::{
    Allergy, DietaryRestriction, FeedbackSnapshot, SubstitutionRequest, TasteAxis, TasteProfile,
    TasteRating, TasteRatings,
};
pub use variation::{ChangeRecord, ChangeType, RecipeVariation};
