//! Services this crate consumes but does not own.
//!
//! Each collaborator is a trait with an HTTP client implementation for
//! production and an in-memory one for tests and offline runs.

mod http;
mod memory;

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::CollaboratorsConfig;
use crate::models::{AdjustmentCompleted, OriginalRecipe, SavedRecipeRef, TasteProfile};

pub use http::{
    HttpKnowledgeRetriever, HttpRecipeCatalog, HttpSavedRecipes, HttpUserPreferences, WebhookSink,
};
pub use memory::{Fixtures, InMemoryCollaborators, RecordingSink};

#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("invalid collaborator response: {0}")]
    Invalid(String),
}

/// A ranked knowledge-base passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub score: f32,
}

/// Cookbook service: saved recipe references.
#[async_trait]
pub trait SavedRecipes: Send + Sync {
    async fn get_saved_recipe(&self, saved_recipe_id: &str)
        -> Result<SavedRecipeRef, CollaboratorError>;
}

/// Recipe catalog: original recipes.
#[async_trait]
pub trait RecipeCatalog: Send + Sync {
    async fn get_original_recipe(&self, recipe_id: &str)
        -> Result<OriginalRecipe, CollaboratorError>;
}

/// User service: taste profiles.
#[async_trait]
pub trait UserPreferences: Send + Sync {
    async fn get_taste_profile(&self, user_id: &str) -> Result<TasteProfile, CollaboratorError>;
}

#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: usize)
        -> Result<Vec<Passage>, CollaboratorError>;
}

/// Receiver of completion notices. Delivery is at-least-once.
#[async_trait]
pub trait CompletionSink: Send + Sync {
    async fn deliver(&self, event: &AdjustmentCompleted) -> Result<(), CollaboratorError>;
}

/// The full set of collaborators the pipeline reads from.
#[derive(Clone)]
pub struct Collaborators {
    pub saved_recipes: Arc<dyn SavedRecipes>,
    pub catalog: Arc<dyn RecipeCatalog>,
    pub users: Arc<dyn UserPreferences>,
    pub knowledge: Option<Arc<dyn KnowledgeRetriever>>,
}

impl Collaborators {
    /// Use one in-memory store for every collaborator.
    pub fn in_memory(store: Arc<InMemoryCollaborators>) -> Self {
        Self {
            saved_recipes: store.clone(),
            catalog: store.clone(),
            users: store.clone(),
            knowledge: Some(store),
        }
    }

    /// HTTP clients for every configured URL; the rest read from fixtures.
    pub fn from_config(
        config: &CollaboratorsConfig,
        fixtures: Option<&Path>,
    ) -> Result<Self, CollaboratorError> {
        let store = Arc::new(match fixtures {
            Some(path) => InMemoryCollaborators::load(path)?,
            None => InMemoryCollaborators::new(),
        });
        let timeout = config.timeout();

        let saved_recipes: Arc<dyn SavedRecipes> = match config.cookbook_url {
            Some(ref url) => Arc::new(HttpSavedRecipes::new(url, timeout)?),
            None => store.clone(),
        };
        let catalog: Arc<dyn RecipeCatalog> = match config.catalog_url {
            Some(ref url) => Arc::new(HttpRecipeCatalog::new(url, timeout)?),
            None => store.clone(),
        };
        let users: Arc<dyn UserPreferences> = match config.users_url {
            Some(ref url) => Arc::new(HttpUserPreferences::new(url, timeout)?),
            None => store.clone(),
        };
        let knowledge: Option<Arc<dyn KnowledgeRetriever>> = match config.knowledge_url {
            Some(ref url) => Some(Arc::new(HttpKnowledgeRetriever::new(url, timeout)?)),
            None if fixtures.is_some() => Some(store),
            None => None,
        };

        Ok(Self {
            saved_recipes,
            catalog,
            users,
            knowledge,
        })
    }
}

/// The configured completion sink, deduplicated per request id.
pub fn completion_sink(
    config: &CollaboratorsConfig,
) -> Result<Arc<dyn CompletionSink>, CollaboratorError> {
    Ok(match config.completion_webhook {
        Some(ref url) => Arc::new(DedupingSink::new(WebhookSink::new(url, config.timeout())?)),
        None => Arc::new(DedupingSink::new(LogSink)),
    })
}

/// Request ids remembered by [`DedupingSink`] unless told otherwise.
pub const DEFAULT_DEDUP_WINDOW: usize = 4096;

/// Drops repeat deliveries of the same request id.
///
/// Only the most recent `window` ids are remembered; the outbox's
/// `delivered_at` covers redelivery across restarts.
pub struct DedupingSink<S> {
    inner: S,
    seen: Mutex<RecentIds>,
}

/// Insertion-ordered set that forgets its oldest entry once full.
struct RecentIds {
    order: VecDeque<String>,
    members: HashSet<String>,
    window: usize,
}

impl RecentIds {
    fn new(window: usize) -> Self {
        Self {
            order: VecDeque::new(),
            members: HashSet::new(),
            window: window.max(1),
        }
    }

    fn insert(&mut self, id: &str) {
        if !self.members.insert(id.to_string()) {
            return;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > self.window {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }
}

impl<S: CompletionSink> DedupingSink<S> {
    pub fn new(inner: S) -> Self {
        Self::with_window(inner, DEFAULT_DEDUP_WINDOW)
    }

    pub fn with_window(inner: S, window: usize) -> Self {
        Self {
            inner,
            seen: Mutex::new(RecentIds::new(window)),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of request ids currently remembered.
    pub fn remembered(&self) -> usize {
        self.seen.lock().map(|seen| seen.order.len()).unwrap_or(0)
    }

    fn already_seen(&self, request_id: &str) -> bool {
        self.seen
            .lock()
            .map(|seen| seen.members.contains(request_id))
            .unwrap_or(false)
    }

    fn remember(&self, request_id: &str) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.insert(request_id);
        }
    }
}

#[async_trait]
impl<S: CompletionSink> CompletionSink for DedupingSink<S> {
    async fn deliver(&self, event: &AdjustmentCompleted) -> Result<(), CollaboratorError> {
        if self.already_seen(&event.request_id) {
            debug!(request_id = %event.request_id, "Duplicate completion ignored");
            return Ok(());
        }
        self.inner.deliver(event).await?;
        self.remember(&event.request_id);
        Ok(())
    }
}

/// Default sink: records completions in the log.
pub struct LogSink;

#[async_trait]
impl CompletionSink for LogSink {
    async fn deliver(&self, event: &AdjustmentCompleted) -> Result<(), CollaboratorError> {
        info!(
            request_id = %event.request_id,
            saved_recipe_id = %event.saved_recipe_id,
            success = event.success,
            variation_id = event.variation_id.as_deref().unwrap_or("-"),
            "Adjustment finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ErrorKind;

    fn event(id: &str) -> AdjustmentCompleted {
        AdjustmentCompleted {
            request_id: id.to_string(),
            saved_recipe_id: "saved-1".to_string(),
            variation_id: Some("var-1".to_string()),
            summary: Some("less salt".to_string()),
            success: true,
            error_kind: None,
        }
    }

    #[tokio::test]
    async fn test_deduping_sink_forwards_once() {
        let sink = DedupingSink::new(RecordingSink::default());
        sink.deliver(&event("req-1")).await.unwrap();
        sink.deliver(&event("req-1")).await.unwrap();
        sink.deliver(&event("req-2")).await.unwrap();

        let delivered = sink.inner().events();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].request_id, "req-1");
    }

    #[tokio::test]
    async fn test_dedup_memory_is_bounded() {
        let sink = DedupingSink::with_window(RecordingSink::default(), 3);
        for i in 0..10 {
            sink.deliver(&event(&format!("req-{i}"))).await.unwrap();
        }
        assert_eq!(sink.remembered(), 3);

        // recent ids are still deduplicated
        sink.deliver(&event("req-9")).await.unwrap();
        assert_eq!(sink.inner().events().len(), 10);
        assert_eq!(sink.remembered(), 3);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_not_remembered() {
        let recording = RecordingSink::default();
        recording.fail_next(1);
        let sink = DedupingSink::new(recording);

        let mut failed = event("req-1");
        failed.success = false;
        failed.error_kind = Some(ErrorKind::ProviderExhausted);
        assert!(sink.deliver(&failed).await.is_err());
        sink.deliver(&failed).await.unwrap();
        assert_eq!(sink.inner().events().len(), 1);
    }

    #[test]
    fn test_from_config_without_urls_uses_fixtures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixtures.json");
        std::fs::write(
            &path,
            r#"{"saved_recipes": [{"id": "s1", "user_id": "u1", "original_recipe_id": "r1"}]}"#,
        )
        .unwrap();

        let collaborators =
            Collaborators::from_config(&CollaboratorsConfig::default(), Some(&path)).unwrap();
        assert!(collaborators.knowledge.is_some());

        let bare = Collaborators::from_config(&CollaboratorsConfig::default(), None).unwrap();
        assert!(bare.knowledge.is_none());
    }
}
