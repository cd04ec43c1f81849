//! Database context: schema setup and repository access.

use std::path::Path;

use diesel_async::SimpleAsyncConnection;

use super::outbox::DieselEventOutbox;
use super::pool::{DieselError, SqlitePool};
use super::requests::DieselAdjustmentRepository;
use super::versions::DieselVersionStore;

/// Entry point for database access. Create one per command or service and
/// hand out repositories from it.
///
/// ```ignore
/// let ctx = DbContext::from_url("sqlite:recipe-adjust.db");
/// ctx.init_schema().await?;
/// let active = ctx.versions().get_active("saved-1").await?;
/// ```
#[derive(Clone, Debug)]
pub struct DbContext {
    pool: SqlitePool,
}

impl DbContext {
    pub fn from_url(database_url: &str) -> Self {
        Self {
            pool: SqlitePool::new(database_url),
        }
    }

    pub fn from_sqlite_path(db_path: &Path) -> Self {
        Self {
            pool: SqlitePool::from_path(db_path),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn requests(&self) -> DieselAdjustmentRepository {
        DieselAdjustmentRepository::new(self.pool.clone())
    }

    pub fn versions(&self) -> DieselVersionStore {
        DieselVersionStore::new(self.pool.clone())
    }

    pub fn outbox(&self) -> DieselEventOutbox {
        DieselEventOutbox::new(self.pool.clone())
    }

    /// Verify that a connection can be opened.
    pub async fn test_connection(&self) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute("SELECT 1").await
    }

    /// Create tables and indexes if they don't exist.
    pub async fn init_schema(&self) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute(
            r#"
            PRAGMA journal_mode = WAL;

            -- One row per adjustment attempt; rows are never deleted
            CREATE TABLE IF NOT EXISTS adjustment_requests (
                id TEXT PRIMARY KEY,
                saved_recipe_id TEXT NOT NULL,
                feedback_id TEXT NOT NULL,
                status TEXT NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                provider_used TEXT,
                input_snapshot TEXT NOT NULL,
                output_variant_id TEXT,
                error_kind TEXT,
                error_message TEXT,
                retry_of TEXT REFERENCES adjustment_requests(id),
                cancel_requested INTEGER NOT NULL DEFAULT 0,
                lease_owner TEXT,
                lease_expires_at TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                updated_at TEXT NOT NULL,
                completed_at TEXT,
                processing_time_ms INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_adjustment_requests_status
                ON adjustment_requests(status, created_at);

            -- At most one in-flight request per saved recipe
            CREATE UNIQUE INDEX IF NOT EXISTS idx_adjustment_requests_in_flight
                ON adjustment_requests(saved_recipe_id)
                WHERE status NOT IN ('completed', 'failed');

            CREATE TABLE IF NOT EXISTS adjustment_transitions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                request_id TEXT NOT NULL REFERENCES adjustment_requests(id),
                from_status TEXT,
                to_status TEXT NOT NULL,
                at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_adjustment_transitions_request
                ON adjustment_transitions(request_id, id);

            CREATE TABLE IF NOT EXISTS recipe_variations (
                id TEXT PRIMARY KEY,
                saved_recipe_id TEXT NOT NULL,
                version_number INTEGER NOT NULL,
                ingredients TEXT NOT NULL,
                steps TEXT NOT NULL,
                adjustment_summary TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 0,
                source_request_id TEXT,
                content_hash TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(saved_recipe_id, version_number)
            );

            -- At most one active variation per saved recipe
            CREATE UNIQUE INDEX IF NOT EXISTS idx_recipe_variations_active
                ON recipe_variations(saved_recipe_id)
                WHERE is_active = 1;

            -- A request commits at most one variation
            CREATE UNIQUE INDEX IF NOT EXISTS idx_recipe_variations_source_request
                ON recipe_variations(source_request_id)
                WHERE source_request_id IS NOT NULL;

            CREATE TABLE IF NOT EXISTS change_records (
                id TEXT PRIMARY KEY,
                variation_id TEXT NOT NULL REFERENCES recipe_variations(id),
                position INTEGER NOT NULL,
                field_path TEXT NOT NULL,
                before_value TEXT,
                after_value TEXT,
                change_type TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_change_records_variation
                ON change_records(variation_id, position);

            -- Completion events awaiting delivery
            CREATE TABLE IF NOT EXISTS adjustment_events (
                request_id TEXT PRIMARY KEY,
                saved_recipe_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                delivered_at TEXT,
                delivery_attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_adjustment_events_undelivered
                ON adjustment_events(delivered_at, created_at);
            "#,
        )
        .await
    }
}
