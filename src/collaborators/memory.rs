//! In-memory collaborators, optionally seeded from a fixtures file.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    CollaboratorError, CompletionSink, KnowledgeRetriever, Passage, RecipeCatalog, SavedRecipes,
    UserPreferences,
};
use crate::models::{AdjustmentCompleted, OriginalRecipe, SavedRecipeRef, TasteProfile};

/// Fixture file layout (JSON).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixtures {
    #[serde(default)]
    pub saved_recipes: Vec<SavedRecipeRef>,
    #[serde(default)]
    pub recipes: Vec<OriginalRecipe>,
    /// Taste profiles by user id.
    #[serde(default)]
    pub profiles: HashMap<String, TasteProfile>,
    #[serde(default)]
    pub passages: Vec<Passage>,
}

#[derive(Default)]
pub struct InMemoryCollaborators {
    saved: RwLock<HashMap<String, SavedRecipeRef>>,
    recipes: RwLock<HashMap<String, OriginalRecipe>>,
    profiles: RwLock<HashMap<String, TasteProfile>>,
    passages: RwLock<Vec<Passage>>,
    knowledge_down: std::sync::atomic::AtomicBool,
}

impl InMemoryCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixtures(fixtures: Fixtures) -> Self {
        let store = Self::new();
        for saved in fixtures.saved_recipes {
            store.add_saved_recipe(saved);
        }
        for recipe in fixtures.recipes {
            store.add_recipe(recipe);
        }
        for (user_id, profile) in fixtures.profiles {
            store.set_profile(&user_id, profile);
        }
        if let Ok(mut passages) = store.passages.write() {
            *passages = fixtures.passages;
        }
        store
    }

    pub fn load(path: &Path) -> Result<Self, CollaboratorError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CollaboratorError::Unavailable(format!("cannot read {}: {}", path.display(), e))
        })?;
        let fixtures: Fixtures = serde_json::from_str(&content)
            .map_err(|e| CollaboratorError::Invalid(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_fixtures(fixtures))
    }

    pub fn add_saved_recipe(&self, saved: SavedRecipeRef) {
        if let Ok(mut map) = self.saved.write() {
            map.insert(saved.id.clone(), saved);
        }
    }

    pub fn add_recipe(&self, recipe: OriginalRecipe) {
        if let Ok(mut map) = self.recipes.write() {
            map.insert(recipe.id.clone(), recipe);
        }
    }

    pub fn set_profile(&self, user_id: &str, profile: TasteProfile) {
        if let Ok(mut map) = self.profiles.write() {
            map.insert(user_id.to_string(), profile);
        }
    }

    pub fn add_passage(&self, passage: Passage) {
        if let Ok(mut passages) = self.passages.write() {
            passages.push(passage);
        }
    }

    /// Make knowledge retrieval fail, to exercise the degraded path.
    pub fn set_knowledge_down(&self, down: bool) {
        self.knowledge_down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl SavedRecipes for InMemoryCollaborators {
    async fn get_saved_recipe(
        &self,
        saved_recipe_id: &str,
    ) -> Result<SavedRecipeRef, CollaboratorError> {
        self.saved
            .read()
            .ok()
            .and_then(|map| map.get(saved_recipe_id).cloned())
            .ok_or_else(|| CollaboratorError::NotFound {
                what: "saved recipe",
                id: saved_recipe_id.to_string(),
            })
    }
}

#[async_trait]
impl RecipeCatalog for InMemoryCollaborators {
    async fn get_original_recipe(
        &self,
        recipe_id: &str,
    ) -> Result<OriginalRecipe, CollaboratorError> {
        self.recipes
            .read()
            .ok()
            .and_then(|map| map.get(recipe_id).cloned())
            .ok_or_else(|| CollaboratorError::NotFound {
                what: "recipe",
                id: recipe_id.to_string(),
            })
    }
}

#[async_trait]
impl UserPreferences for InMemoryCollaborators {
    async fn get_taste_profile(&self, user_id: &str) -> Result<TasteProfile, CollaboratorError> {
        self.profiles
            .read()
            .ok()
            .and_then(|map| map.get(user_id).cloned())
            .ok_or_else(|| CollaboratorError::NotFound {
                what: "user",
                id: user_id.to_string(),
            })
    }
}

#[async_trait]
impl KnowledgeRetriever for InMemoryCollaborators {
    /// Ranks stored passages by how many query words they contain.
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, CollaboratorError> {
        if self.knowledge_down.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("knowledge base offline".to_string()));
        }
        let words: Vec<String> = query
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .filter(|w| w.chars().count() > 1)
            .collect();
        let passages = self
            .passages
            .read()
            .map_err(|_| CollaboratorError::Unavailable("passage store poisoned".to_string()))?;

        let mut ranked: Vec<Passage> = passages
            .iter()
            .filter_map(|p| {
                let text = p.text.to_lowercase();
                let hits = words.iter().filter(|w| text.contains(w.as_str())).count();
                (hits > 0).then(|| Passage {
                    score: hits as f32 / words.len().max(1) as f32,
                    ..p.clone()
                })
            })
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(top_k);
        Ok(ranked)
    }
}

/// Sink that keeps every delivered event; can be told to fail.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<AdjustmentCompleted>>,
    failures_left: AtomicUsize,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<AdjustmentCompleted> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Reject the next `n` deliveries.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl CompletionSink for RecordingSink {
    async fn deliver(&self, event: &AdjustmentCompleted) -> Result<(), CollaboratorError> {
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(CollaboratorError::Unavailable("sink rejected delivery".to_string()));
        }
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl<T: CompletionSink + ?Sized> CompletionSink for std::sync::Arc<T> {
    async fn deliver(&self, event: &AdjustmentCompleted) -> Result<(), CollaboratorError> {
        (**self).deliver(event).await
    }
}
