//! Offline wiring shared by the unit and integration test suites.
//!
//! Both suites seed collaborators from the same bundled doenjang stew
//! fixture and build the orchestrator through [`offline_orchestrator`].

use std::sync::Arc;
use std::time::Duration;

use crate::collaborators::{
    Collaborators, DedupingSink, Fixtures, InMemoryCollaborators, RecordingSink,
};
use crate::config::PipelineConfig;
use crate::gateway::{ProviderGateway, RetryPolicy, TextProvider};
use crate::models::OriginalRecipe;
use crate::orchestrator::AdjustmentOrchestrator;
use crate::pipeline::GenerationSettings;
use crate::repository::DbContext;

pub const SAVED_RECIPE_ID: &str = "saved-1";
pub const USER_ID: &str = "user-1";
pub const RECIPE_ID: &str = "recipe-1";

const STEW_FIXTURES: &str = include_str!("../tests/fixtures/doenjang_stew.json");

pub fn stew_fixtures() -> Result<Fixtures, serde_json::Error> {
    serde_json::from_str(STEW_FIXTURES)
}

/// The catalog recipe behind [`SAVED_RECIPE_ID`].
pub fn stew() -> Result<OriginalRecipe, serde_json::Error> {
    let mut fixtures = stew_fixtures()?;
    let index = fixtures
        .recipes
        .iter()
        .position(|r| r.id == RECIPE_ID)
        .unwrap_or(0);
    Ok(fixtures.recipes.swap_remove(index))
}

pub fn seeded_store() -> Result<Arc<InMemoryCollaborators>, serde_json::Error> {
    Ok(Arc::new(InMemoryCollaborators::from_fixtures(stew_fixtures()?)))
}

/// Orchestrator over `store` with immediate retries and a 60 s lease.
/// Completion events land in `sink` behind a deduping wrapper.
pub fn offline_orchestrator(
    db: &DbContext,
    store: Arc<InMemoryCollaborators>,
    primary: Arc<dyn TextProvider>,
    fallbacks: Vec<Arc<dyn TextProvider>>,
    sink: Arc<RecordingSink>,
) -> AdjustmentOrchestrator {
    let gateway = Arc::new(ProviderGateway::new(
        primary,
        fallbacks,
        RetryPolicy::immediate(2),
    ));
    let pipeline = PipelineConfig {
        lease_ttl_secs: 60,
        ..Default::default()
    };
    let generation = GenerationSettings {
        timeout: Duration::from_secs(5),
        ..Default::default()
    };
    AdjustmentOrchestrator::new(
        db,
        Collaborators::in_memory(store),
        gateway,
        Arc::new(DedupingSink::new(sink)),
        &pipeline,
        generation,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{RecipeCatalog, SavedRecipes, UserPreferences};

    #[tokio::test]
    async fn test_bundled_fixture_resolves_saved_recipe_to_stew() {
        let store = seeded_store().unwrap();

        let saved = store.get_saved_recipe(SAVED_RECIPE_ID).await.unwrap();
        assert_eq!(saved.user_id, USER_ID);
        assert_eq!(saved.original_recipe_id, RECIPE_ID);

        let recipe = store.get_original_recipe(RECIPE_ID).await.unwrap();
        assert_eq!(recipe, stew().unwrap());
        let names: Vec<_> = recipe.ingredients.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["doenjang", "tofu", "zucchini", "salt"]);
        assert_eq!(recipe.steps.len(), 3);
        assert_eq!(recipe.servings, Some(2));

        let profile = store.get_taste_profile(USER_ID).await.unwrap();
        assert_eq!(profile, crate::models::TasteProfile::default());
    }
}
