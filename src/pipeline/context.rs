//! Resolve everything an adjustment needs before any model is called.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{AdjustmentContext, Direction, StageError, StructuredAdjustment};
use crate::collaborators::{CollaboratorError, Collaborators, Passage};
use crate::models::{FeedbackSnapshot, TasteProfile};
use crate::versions::VersionStore;

pub struct ContextAssembler {
    collaborators: Collaborators,
    versions: Arc<dyn VersionStore>,
    knowledge_top_k: usize,
    knowledge_timeout: Duration,
}

impl ContextAssembler {
    pub fn new(
        collaborators: Collaborators,
        versions: Arc<dyn VersionStore>,
        knowledge_top_k: usize,
        knowledge_timeout: Duration,
    ) -> Self {
        Self {
            collaborators,
            versions,
            knowledge_top_k,
            knowledge_timeout,
        }
    }

    pub async fn assemble(
        &self,
        saved_recipe_id: &str,
        snapshot: &FeedbackSnapshot,
        adjustment: StructuredAdjustment,
    ) -> Result<AdjustmentContext, StageError> {
        let saved_recipe = self
            .collaborators
            .saved_recipes
            .get_saved_recipe(saved_recipe_id)
            .await
            .map_err(unavailable)?;
        if saved_recipe.user_id.trim().is_empty() {
            return Err(StageError::ContextUnavailable(format!(
                "saved recipe {} has no owner",
                saved_recipe_id
            )));
        }

        let original = self
            .collaborators
            .catalog
            .get_original_recipe(&saved_recipe.original_recipe_id)
            .await
            .map_err(unavailable)?;

        let profile = match snapshot.taste_profile {
            Some(ref profile) => Some(profile.clone()),
            None => self.load_profile(&saved_recipe.user_id).await?,
        };

        let active = self
            .versions
            .get_active(saved_recipe_id)
            .await
            .map_err(|e| StageError::ContextUnavailable(format!("active variation: {}", e)))?;
        let (base, base_variation_id) = match active {
            Some(variation) => (variation.content(), Some(variation.id)),
            None => (original.content(), None),
        };

        let query = knowledge_query(&original.title, &adjustment);
        let passages = self.retrieve(&query).await;

        debug!(
            saved_recipe_id,
            base_variation = base_variation_id.as_deref().unwrap_or("original"),
            passages = passages.len(),
            has_profile = profile.is_some(),
            "Context assembled"
        );

        Ok(AdjustmentContext {
            saved_recipe,
            original,
            profile,
            base,
            base_variation_id,
            passages,
            adjustment,
        })
    }

    /// The owner must exist; a user service outage only costs the profile.
    async fn load_profile(&self, user_id: &str) -> Result<Option<TasteProfile>, StageError> {
        match self.collaborators.users.get_taste_profile(user_id).await {
            Ok(profile) => Ok(Some(profile)),
            Err(e @ CollaboratorError::NotFound { .. }) => Err(unavailable(e)),
            Err(e) => {
                warn!(user_id, "Taste profile unavailable, continuing without it: {}", e);
                Ok(None)
            }
        }
    }

    async fn retrieve(&self, query: &str) -> Vec<Passage> {
        let Some(ref knowledge) = self.collaborators.knowledge else {
            return Vec::new();
        };
        if self.knowledge_top_k == 0 {
            return Vec::new();
        }
        match tokio::time::timeout(
            self.knowledge_timeout,
            knowledge.retrieve(query, self.knowledge_top_k),
        )
        .await
        {
            Ok(Ok(mut passages)) => {
                passages.truncate(self.knowledge_top_k);
                passages
            }
            Ok(Err(e)) => {
                warn!("Knowledge retrieval failed, continuing without passages: {}", e);
                Vec::new()
            }
            Err(_) => {
                warn!(
                    "Knowledge retrieval timed out after {:?}, continuing without passages",
                    self.knowledge_timeout
                );
                Vec::new()
            }
        }
    }
}

fn unavailable(e: CollaboratorError) -> StageError {
    StageError::ContextUnavailable(e.to_string())
}

fn knowledge_query(title: &str, adjustment: &StructuredAdjustment) -> String {
    let mut terms = vec![title.to_string()];
    for a in &adjustment.adjustments {
        let direction = match a.direction {
            Direction::Increase => "more",
            Direction::Decrease => "less",
        };
        terms.push(format!("{} {}", direction, a.axis));
    }
    for s in &adjustment.substitutions {
        terms.push(format!("substitute {}", s.ingredient));
        if let Some(ref r) = s.replacement {
            terms.push(r.clone());
        }
    }
    terms.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryCollaborators;
    use crate::models::{
        Allergy, Ingredient, OriginalRecipe, RecipeContent, SavedRecipeRef, Step, TasteAxis,
    };
    use crate::pipeline::{AxisAdjustment, Magnitude};
    use crate::repository::DbContext;
    use crate::versions::NewVariation;

    struct Fixture {
        assembler: ContextAssembler,
        store: Arc<InMemoryCollaborators>,
        versions: Arc<dyn VersionStore>,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = DbContext::from_sqlite_path(&dir.path().join("ctx.db"));
        db.init_schema().await.unwrap();
        let versions: Arc<dyn VersionStore> = Arc::new(db.versions());

        let store = Arc::new(InMemoryCollaborators::new());
        store.add_saved_recipe(SavedRecipeRef {
            id: "saved-1".to_string(),
            user_id: "user-1".to_string(),
            original_recipe_id: "recipe-1".to_string(),
        });
        store.add_recipe(OriginalRecipe {
            id: "recipe-1".to_string(),
            title: "Kimchi stew".to_string(),
            ingredients: vec![Ingredient::new("salt", Some("2"), Some("tsp"))],
            steps: vec![Step::new("Boil.")],
            servings: Some(2),
            metadata: serde_json::Value::Null,
        });
        store.set_profile(
            "user-1",
            TasteProfile {
                allergies: vec![Allergy::Peanut],
                ..Default::default()
            },
        );
        store.add_passage(Passage {
            text: "Stew tastes less salty when you add more water".to_string(),
            source: None,
            score: 0.0,
        });

        let assembler = ContextAssembler::new(
            Collaborators::in_memory(store.clone()),
            versions.clone(),
            3,
            Duration::from_secs(1),
        );
        Fixture {
            assembler,
            store,
            versions,
            _dir: dir,
        }
    }

    fn less_salt() -> StructuredAdjustment {
        StructuredAdjustment {
            adjustments: vec![AxisAdjustment {
                axis: TasteAxis::Saltiness,
                direction: Direction::Decrease,
                magnitude: Magnitude::Moderate,
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_assembles_from_original_when_no_variation() {
        let f = fixture().await;
        let ctx = f
            .assembler
            .assemble("saved-1", &FeedbackSnapshot::default(), less_salt())
            .await
            .unwrap();
        assert_eq!(ctx.original.title, "Kimchi stew");
        assert!(ctx.base_variation_id.is_none());
        assert_eq!(ctx.base, ctx.original.content());
        assert_eq!(ctx.profile.unwrap().allergies, vec![Allergy::Peanut]);
        assert_eq!(ctx.passages.len(), 1);
    }

    #[tokio::test]
    async fn test_active_variation_becomes_base() {
        let f = fixture().await;
        let adjusted = RecipeContent::new(
            vec![Ingredient::new("salt", Some("1"), Some("tsp"))],
            vec![Step::new("Boil.")],
        );
        let variation = f
            .versions
            .commit(NewVariation {
                saved_recipe_id: "saved-1".to_string(),
                content: adjusted.clone(),
                summary: "less salt".to_string(),
                source_request_id: None,
                baseline: adjusted.clone(),
            })
            .await
            .unwrap();

        let ctx = f
            .assembler
            .assemble("saved-1", &FeedbackSnapshot::default(), less_salt())
            .await
            .unwrap();
        assert_eq!(ctx.base_variation_id, Some(variation.id));
        assert_eq!(ctx.base, adjusted);
    }

    #[tokio::test]
    async fn test_snapshot_profile_wins_and_knowledge_is_optional() {
        let f = fixture().await;
        f.store.set_knowledge_down(true);
        let snapshot = FeedbackSnapshot {
            taste_profile: Some(TasteProfile {
                saltiness: 1,
                ..Default::default()
            }),
            ..Default::default()
        };
        let ctx = f.assembler.assemble("saved-1", &snapshot, less_salt()).await.unwrap();
        assert_eq!(ctx.profile.unwrap().saltiness, 1);
        assert!(ctx.passages.is_empty());
    }

    #[tokio::test]
    async fn test_missing_recipe_or_owner_is_unavailable() {
        let f = fixture().await;
        let err = f
            .assembler
            .assemble("nope", &FeedbackSnapshot::default(), less_salt())
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::ContextUnavailable(_)));

        f.store.add_saved_recipe(SavedRecipeRef {
            id: "saved-2".to_string(),
            user_id: "ghost".to_string(),
            original_recipe_id: "recipe-1".to_string(),
        });
        let err = f
            .assembler
            .assemble("saved-2", &FeedbackSnapshot::default(), less_salt())
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::ContextUnavailable(_)));
    }
}
