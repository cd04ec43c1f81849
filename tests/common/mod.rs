//! Shared harness for the adjustment integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use recipe_adjust::collaborators::{InMemoryCollaborators, RecordingSink};
use recipe_adjust::gateway::{
    GenerationRequest, GenerationTask, HeuristicProvider, ProviderError, TextProvider,
};
use recipe_adjust::models::{FeedbackSnapshot, OriginalRecipe};
use recipe_adjust::orchestrator::{AdjustmentOrchestrator, SubmitAdjustment};
use recipe_adjust::repository::DbContext;
use recipe_adjust::testkit;

pub const SAVED: &str = testkit::SAVED_RECIPE_ID;
pub const WORKER: &str = "test-worker";

pub struct Harness {
    pub orchestrator: Arc<AdjustmentOrchestrator>,
    pub db: DbContext,
    pub store: Arc<InMemoryCollaborators>,
    pub sink: Arc<RecordingSink>,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub async fn new(primary: Arc<dyn TextProvider>, fallbacks: Vec<Arc<dyn TextProvider>>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = DbContext::from_sqlite_path(&dir.path().join("adjust.db"));
        db.init_schema().await.unwrap();

        let store = testkit::seeded_store().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let orchestrator =
            testkit::offline_orchestrator(&db, store.clone(), primary, fallbacks, sink.clone());

        Self {
            orchestrator: Arc::new(orchestrator),
            db,
            store,
            sink,
            _dir: dir,
        }
    }

    pub async fn heuristic() -> Self {
        Self::new(Arc::new(HeuristicProvider::new()), Vec::new()).await
    }
}

pub fn stew() -> OriginalRecipe {
    testkit::stew().unwrap()
}

pub fn feedback(id: &str, text: &str) -> SubmitAdjustment {
    SubmitAdjustment {
        saved_recipe_id: SAVED.to_string(),
        feedback_id: id.to_string(),
        snapshot: FeedbackSnapshot::from_text(id, text),
    }
}

/// Fails every call with a timeout.
pub struct TimeoutProvider;

#[async_trait]
impl TextProvider for TimeoutProvider {
    fn name(&self) -> &str {
        "slow-primary"
    }

    fn model(&self) -> &str {
        "slow"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String, ProviderError> {
        Err(ProviderError::Timeout)
    }
}

/// Plans like the heuristic provider but always returns a variant without steps.
pub struct StepDroppingProvider {
    inner: HeuristicProvider,
}

impl StepDroppingProvider {
    pub fn new() -> Self {
        Self {
            inner: HeuristicProvider::new(),
        }
    }
}

#[async_trait]
impl TextProvider for StepDroppingProvider {
    fn name(&self) -> &str {
        "step-dropper"
    }

    fn model(&self) -> &str {
        "broken"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        let text = self.inner.generate(request).await?;
        if request.constraints.task != GenerationTask::Variant {
            return Ok(text);
        }
        let mut value: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| ProviderError::MalformedOutput(e.to_string()))?;
        value["steps"] = serde_json::json!([]);
        Ok(value.to_string())
    }
}

/// Heuristic provider that parks variant generation until released.
pub struct GatedProvider {
    inner: HeuristicProvider,
    pub entered: Notify,
    gate: Semaphore,
}

impl GatedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: HeuristicProvider::new(),
            entered: Notify::new(),
            gate: Semaphore::new(0),
        })
    }

    pub fn release(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl TextProvider for GatedProvider {
    fn name(&self) -> &str {
        "gated"
    }

    fn model(&self) -> &str {
        "gated"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        if request.constraints.task == GenerationTask::Variant {
            self.entered.notify_one();
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
            permit.forget();
        }
        self.inner.generate(request).await
    }
}
