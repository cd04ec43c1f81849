//! Unit-test environment over a temporary database.

use std::sync::Arc;

use crate::collaborators::{InMemoryCollaborators, RecordingSink};
use crate::gateway::{HeuristicProvider, TextProvider};
use crate::orchestrator::AdjustmentOrchestrator;
use crate::repository::DbContext;
use crate::testkit;

pub struct TestEnv {
    pub orchestrator: Arc<AdjustmentOrchestrator>,
    pub db: DbContext,
    pub store: Arc<InMemoryCollaborators>,
    pub sink: Arc<RecordingSink>,
    _dir: tempfile::TempDir,
}

pub async fn orchestrator_with(
    primary: Arc<dyn TextProvider>,
    fallbacks: Vec<Arc<dyn TextProvider>>,
) -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let db = DbContext::from_sqlite_path(&dir.path().join("adjust.db"));
    db.init_schema().await.unwrap();

    let store = testkit::seeded_store().unwrap();
    let sink = Arc::new(RecordingSink::default());
    let orchestrator =
        testkit::offline_orchestrator(&db, store.clone(), primary, fallbacks, sink.clone());

    TestEnv {
        orchestrator: Arc::new(orchestrator),
        db,
        store,
        sink,
        _dir: dir,
    }
}

/// Orchestrator over a fresh database with only the offline provider.
pub async fn heuristic_orchestrator() -> TestEnv {
    orchestrator_with(Arc::new(HeuristicProvider::new()), Vec::new()).await
}
