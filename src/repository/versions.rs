//! Diesel-backed version store.
//!
//! Every mutation runs inside one SQLite transaction whose first statement is
//! a write, so the transaction holds the write lock before it reads the
//! current active variation. Two partial unique indexes back the invariants:
//! one active variation per saved recipe, one variation per source request.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sql_types::{Nullable, Text};
use diesel_async::{AsyncConnection, RunQueryDsl};
use tracing::{error, info};

use super::models::{ChangeRecordRow, NewChangeRecord, VariationRecord};
use super::pool::{SqliteConn, SqlitePool};
use super::util::{is_unique_violation, now_timestamp, parse_datetime};
use crate::models::{ChangeRecord, ChangeType, RecipeContent, RecipeVariation};
use crate::schema::{change_records, recipe_variations};
use crate::versions::{diff, NewVariation, StoreError, VersionStore};

const INSERT_NEXT_VERSION: &str = r#"
    INSERT INTO recipe_variations
        (id, saved_recipe_id, version_number, ingredients, steps,
         adjustment_summary, is_active, source_request_id, content_hash, created_at)
    SELECT ?, ?, COALESCE(MAX(version_number), 0) + 1, ?, ?, ?, 0, ?, ?, ?
    FROM recipe_variations
    WHERE saved_recipe_id = ?
"#;

/// SQLite implementation of [`VersionStore`].
#[derive(Clone)]
pub struct DieselVersionStore {
    pool: SqlitePool,
}

impl DieselVersionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn to_variation(record: VariationRecord) -> Result<RecipeVariation, StoreError> {
        Ok(RecipeVariation {
            ingredients: serde_json::from_str(&record.ingredients)?,
            steps: serde_json::from_str(&record.steps)?,
            id: record.id,
            saved_recipe_id: record.saved_recipe_id,
            version_number: record.version_number.max(0) as u32,
            adjustment_summary: record.adjustment_summary,
            is_active: record.is_active != 0,
            source_request_id: record.source_request_id,
            content_hash: record.content_hash,
            created_at: parse_datetime(&record.created_at),
        })
    }

    fn to_change(row: ChangeRecordRow) -> Result<ChangeRecord, StoreError> {
        let parse = |v: Option<String>| -> Result<Option<serde_json::Value>, StoreError> {
            v.map(|s| serde_json::from_str(&s)).transpose().map_err(Into::into)
        };
        Ok(ChangeRecord {
            before_value: parse(row.before_value)?,
            after_value: parse(row.after_value)?,
            change_type: ChangeType::from_str(&row.change_type).unwrap_or(ChangeType::Modified),
            id: row.id,
            variation_id: row.variation_id,
            field_path: row.field_path,
        })
    }

    /// Count active rows and fail the surrounding transaction unless exactly one.
    async fn ensure_single_active(
        conn: &mut SqliteConn,
        saved_recipe_id: &str,
    ) -> Result<(), StoreError> {
        let active: i64 = recipe_variations::table
            .filter(recipe_variations::saved_recipe_id.eq(saved_recipe_id))
            .filter(recipe_variations::is_active.eq(1))
            .count()
            .get_result(conn)
            .await?;
        if active != 1 {
            error!(
                saved_recipe_id,
                active, "Active variation count is not exactly one, rolling back"
            );
            return Err(StoreError::VersionConsistency(format!(
                "saved recipe {} would have {} active variations",
                saved_recipe_id, active
            )));
        }
        Ok(())
    }

    async fn deactivate_current(conn: &mut SqliteConn, saved_recipe_id: &str) -> Result<usize, StoreError> {
        Ok(diesel::update(
            recipe_variations::table
                .filter(recipe_variations::saved_recipe_id.eq(saved_recipe_id))
                .filter(recipe_variations::is_active.eq(1)),
        )
        .set(recipe_variations::is_active.eq(0))
        .execute(conn)
        .await?)
    }

    async fn activate_row(conn: &mut SqliteConn, variation_id: &str) -> Result<(), StoreError> {
        let updated = diesel::update(recipe_variations::table.find(variation_id))
            .set(recipe_variations::is_active.eq(1))
            .execute(conn)
            .await?;
        if updated != 1 {
            return Err(StoreError::NotFound(variation_id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl VersionStore for DieselVersionStore {
    async fn commit(&self, new: NewVariation) -> Result<RecipeVariation, StoreError> {
        let mut conn = self.pool.get().await?;

        let id = uuid::Uuid::new_v4().to_string();
        let ingredients = serde_json::to_string(&new.content.ingredients)?;
        let steps = serde_json::to_string(&new.content.steps)?;
        let content_hash = new.content.content_hash();
        let created_at = now_timestamp();
        let source_request_id = new.source_request_id.clone();

        let result: Result<VariationRecord, StoreError> = conn
            .transaction(|conn| {
                let id = id.clone();
                let new = new.clone();
                Box::pin(async move {
                    diesel::sql_query(INSERT_NEXT_VERSION)
                        .bind::<Text, _>(&id)
                        .bind::<Text, _>(&new.saved_recipe_id)
                        .bind::<Text, _>(&ingredients)
                        .bind::<Text, _>(&steps)
                        .bind::<Text, _>(&new.summary)
                        .bind::<Nullable<Text>, _>(new.source_request_id.as_deref())
                        .bind::<Text, _>(&content_hash)
                        .bind::<Text, _>(&created_at)
                        .bind::<Text, _>(&new.saved_recipe_id)
                        .execute(conn)
                        .await?;

                    let previous: Option<VariationRecord> = recipe_variations::table
                        .filter(recipe_variations::saved_recipe_id.eq(&new.saved_recipe_id))
                        .filter(recipe_variations::is_active.eq(1))
                        .first(conn)
                        .await
                        .optional()?;

                    let base: RecipeContent = match previous {
                        Some(prev) => RecipeContent::new(
                            serde_json::from_str(&prev.ingredients)?,
                            serde_json::from_str(&prev.steps)?,
                        ),
                        None => new.baseline.clone(),
                    };

                    let changes = diff(&base, &new.content, &id);
                    for (position, change) in changes.iter().enumerate() {
                        let row = NewChangeRecord {
                            id: &change.id,
                            variation_id: &id,
                            position: position as i32,
                            field_path: &change.field_path,
                            before_value: change.before_value.as_ref().map(|v| v.to_string()),
                            after_value: change.after_value.as_ref().map(|v| v.to_string()),
                            change_type: change.change_type.as_str(),
                        };
                        diesel::insert_into(change_records::table)
                            .values(&row)
                            .execute(conn)
                            .await?;
                    }

                    Self::deactivate_current(conn, &new.saved_recipe_id).await?;
                    Self::activate_row(conn, &id).await?;
                    Self::ensure_single_active(conn, &new.saved_recipe_id).await?;

                    let record: VariationRecord =
                        recipe_variations::table.find(&id).first(conn).await?;
                    Ok(record)
                })
            })
            .await;

        match result {
            Ok(record) => {
                let variation = Self::to_variation(record)?;
                info!(
                    saved_recipe_id = %variation.saved_recipe_id,
                    version = variation.version_number,
                    variation_id = %variation.id,
                    "Committed and activated variation"
                );
                Ok(variation)
            }
            Err(StoreError::Database(e)) if is_unique_violation(&e) => {
                // Another run of the same request already committed.
                if let Some(ref request_id) = source_request_id {
                    if let Some(existing) = self.find_by_source_request(request_id).await? {
                        info!(
                            request_id = %request_id,
                            variation_id = %existing.id,
                            "Request already committed a variation, reusing it"
                        );
                        return Ok(existing);
                    }
                }
                Err(StoreError::Database(e))
            }
            Err(e) => Err(e),
        }
    }

    async fn rollback(
        &self,
        saved_recipe_id: &str,
        target_version_id: &str,
    ) -> Result<RecipeVariation, StoreError> {
        let mut conn = self.pool.get().await?;

        let record: VariationRecord = conn
            .transaction(|conn| {
                Box::pin(async move {
                    Self::deactivate_current(conn, saved_recipe_id).await?;

                    let target: VariationRecord = recipe_variations::table
                        .find(target_version_id)
                        .first(conn)
                        .await
                        .optional()?
                        .ok_or_else(|| StoreError::NotFound(target_version_id.to_string()))?;
                    if target.saved_recipe_id != saved_recipe_id {
                        return Err(StoreError::WrongRecipe {
                            variation_id: target_version_id.to_string(),
                            saved_recipe_id: saved_recipe_id.to_string(),
                        });
                    }

                    Self::activate_row(conn, target_version_id).await?;
                    Self::ensure_single_active(conn, saved_recipe_id).await?;

                    Ok(VariationRecord {
                        is_active: 1,
                        ..target
                    })
                })
            })
            .await?;

        let variation = Self::to_variation(record)?;
        info!(
            saved_recipe_id,
            version = variation.version_number,
            "Activated variation"
        );
        Ok(variation)
    }

    async fn get_active(&self, saved_recipe_id: &str) -> Result<Option<RecipeVariation>, StoreError> {
        let mut conn = self.pool.get().await?;
        let record: Option<VariationRecord> = recipe_variations::table
            .filter(recipe_variations::saved_recipe_id.eq(saved_recipe_id))
            .filter(recipe_variations::is_active.eq(1))
            .first(&mut conn)
            .await
            .optional()?;
        record.map(Self::to_variation).transpose()
    }

    async fn list_versions(&self, saved_recipe_id: &str) -> Result<Vec<RecipeVariation>, StoreError> {
        let mut conn = self.pool.get().await?;
        let records: Vec<VariationRecord> = recipe_variations::table
            .filter(recipe_variations::saved_recipe_id.eq(saved_recipe_id))
            .order(recipe_variations::version_number.asc())
            .load(&mut conn)
            .await?;
        records.into_iter().map(Self::to_variation).collect()
    }

    async fn get_variation(&self, variation_id: &str) -> Result<Option<RecipeVariation>, StoreError> {
        let mut conn = self.pool.get().await?;
        let record: Option<VariationRecord> = recipe_variations::table
            .find(variation_id)
            .first(&mut conn)
            .await
            .optional()?;
        record.map(Self::to_variation).transpose()
    }

    async fn find_by_source_request(
        &self,
        request_id: &str,
    ) -> Result<Option<RecipeVariation>, StoreError> {
        let mut conn = self.pool.get().await?;
        let record: Option<VariationRecord> = recipe_variations::table
            .filter(recipe_variations::source_request_id.eq(request_id))
            .first(&mut conn)
            .await
            .optional()?;
        record.map(Self::to_variation).transpose()
    }

    async fn changes(&self, variation_id: &str) -> Result<Vec<ChangeRecord>, StoreError> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<ChangeRecordRow> = change_records::table
            .filter(change_records::variation_id.eq(variation_id))
            .order(change_records::position.asc())
            .load(&mut conn)
            .await?;
        rows.into_iter().map(Self::to_change).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Ingredient, Step};
    use crate::repository::DbContext;
    use std::sync::Arc;
    use tempfile::tempdir;

    async fn setup_store() -> (DieselVersionStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let ctx = DbContext::from_sqlite_path(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        (ctx.versions(), dir)
    }

    fn original() -> RecipeContent {
        RecipeContent::new(
            vec![
                Ingredient::new("potato", Some("3"), None),
                Ingredient::new("salt", Some("2"), Some("tsp")),
            ],
            vec![Step::new("Boil the potatoes."), Step::new("Season and mash.")],
        )
    }

    fn with_salt(amount: &str) -> RecipeContent {
        let mut content = original();
        content.ingredients[1].amount = Some(amount.to_string());
        content
    }

    fn new_variation(saved: &str, content: RecipeContent, request: Option<&str>) -> NewVariation {
        NewVariation {
            saved_recipe_id: saved.to_string(),
            content,
            summary: "less salt".to_string(),
            source_request_id: request.map(str::to_string),
            baseline: original(),
        }
    }

    async fn active_count(store: &DieselVersionStore, saved: &str) -> usize {
        store
            .list_versions(saved)
            .await
            .unwrap()
            .iter()
            .filter(|v| v.is_active)
            .count()
    }

    #[tokio::test]
    async fn test_first_commit_is_version_one_and_active() {
        let (store, _dir) = setup_store().await;

        let v1 = store
            .commit(new_variation("saved-1", with_salt("1"), Some("req-1")))
            .await
            .unwrap();
        assert_eq!(v1.version_number, 1);
        assert!(v1.is_active);

        let active = store.get_active("saved-1").await.unwrap().unwrap();
        assert_eq!(active.id, v1.id);

        let changes = store.changes(&v1.id).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field_path, "ingredients[1].amount");
        assert_eq!(changes[0].change_type, ChangeType::Modified);
    }

    #[tokio::test]
    async fn test_commit_swaps_active_and_diffs_against_previous() {
        let (store, _dir) = setup_store().await;

        let v1 = store
            .commit(new_variation("saved-1", with_salt("1"), Some("req-1")))
            .await
            .unwrap();
        let v2 = store
            .commit(new_variation("saved-1", with_salt("1/2"), Some("req-2")))
            .await
            .unwrap();

        assert_eq!(v2.version_number, 2);
        assert_eq!(active_count(&store, "saved-1").await, 1);
        assert!(!store.get_variation(&v1.id).await.unwrap().unwrap().is_active);

        let changes = store.changes(&v2.id).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].before_value, Some(serde_json::json!("1")));
        assert_eq!(changes[0].after_value, Some(serde_json::json!("1/2")));
    }

    #[tokio::test]
    async fn test_commit_is_idempotent_per_request() {
        let (store, _dir) = setup_store().await;

        let first = store
            .commit(new_variation("saved-1", with_salt("1"), Some("req-1")))
            .await
            .unwrap();
        let again = store
            .commit(new_variation("saved-1", with_salt("1"), Some("req-1")))
            .await
            .unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(store.list_versions("saved-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_moves_pointer_without_new_version() {
        let (store, _dir) = setup_store().await;

        let v1 = store
            .commit(new_variation("saved-1", with_salt("1"), Some("req-1")))
            .await
            .unwrap();
        let v2 = store
            .commit(new_variation("saved-1", with_salt("1/2"), Some("req-2")))
            .await
            .unwrap();

        let rolled = store.rollback("saved-1", &v1.id).await.unwrap();
        assert_eq!(rolled.id, v1.id);
        assert!(rolled.is_active);

        let versions = store.list_versions("saved-1").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version_number, 1);
        assert_eq!(versions[1].version_number, 2);
        assert!(versions[0].is_active);
        assert!(!versions[1].is_active);

        // Next commit continues numbering after the highest version.
        let v3 = store
            .commit(new_variation("saved-1", with_salt("3/4"), Some("req-3")))
            .await
            .unwrap();
        assert_eq!(v3.version_number, 3);
        assert_ne!(v3.id, v2.id);
    }

    #[tokio::test]
    async fn test_rollback_to_unknown_version_keeps_current_active() {
        let (store, _dir) = setup_store().await;

        let v1 = store
            .commit(new_variation("saved-1", with_salt("1"), None))
            .await
            .unwrap();

        let err = store.rollback("saved-1", "missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(store.get_active("saved-1").await.unwrap().unwrap().id, v1.id);
    }

    #[tokio::test]
    async fn test_rollback_rejects_other_recipes_variation() {
        let (store, _dir) = setup_store().await;

        let other = store
            .commit(new_variation("saved-2", with_salt("1"), None))
            .await
            .unwrap();
        store
            .commit(new_variation("saved-1", with_salt("1"), None))
            .await
            .unwrap();

        let err = store.rollback("saved-1", &other.id).await.unwrap_err();
        assert!(matches!(err, StoreError::WrongRecipe { .. }));
        assert_eq!(active_count(&store, "saved-1").await, 1);
        assert_eq!(active_count(&store, "saved-2").await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_commits_keep_numbers_unique() {
        let (store, _dir) = setup_store().await;
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .commit(new_variation("saved-1", with_salt(&i.to_string()), None))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let versions = store.list_versions("saved-1").await.unwrap();
        let numbers: Vec<u32> = versions.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
        assert_eq!(active_count(&store, "saved-1").await, 1);
    }
}
