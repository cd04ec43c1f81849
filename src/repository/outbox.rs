//! Persisted outbox of completion events.
//!
//! An event is recorded once per request (`INSERT OR IGNORE` on the
//! request id) and stays undelivered until a sink accepts it, so a crash
//! between the terminal status write and delivery loses nothing.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use thiserror::Error;

use super::models::{EventRecord, NewEvent};
use super::pool::SqlitePool;
use super::util::now_timestamp;
use crate::models::AdjustmentCompleted;
use crate::schema::adjustment_events;

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Event payload is invalid: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// An outbox row waiting for delivery.
#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub event: AdjustmentCompleted,
    pub delivery_attempts: u32,
    pub last_error: Option<String>,
}

#[derive(Clone)]
pub struct DieselEventOutbox {
    pool: SqlitePool,
}

impl DieselEventOutbox {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Queue an event. Returns false if one already exists for the request.
    pub async fn record(&self, event: &AdjustmentCompleted) -> Result<bool, OutboxError> {
        let mut conn = self.pool.get().await?;
        let payload = serde_json::to_string(event)?;
        let now = now_timestamp();
        let inserted = diesel::insert_or_ignore_into(adjustment_events::table)
            .values(&NewEvent {
                request_id: &event.request_id,
                saved_recipe_id: &event.saved_recipe_id,
                payload: &payload,
                created_at: &now,
                delivery_attempts: 0,
            })
            .execute(&mut conn)
            .await?;
        Ok(inserted == 1)
    }

    /// Oldest undelivered events first.
    pub async fn undelivered(&self, limit: i64) -> Result<Vec<PendingEvent>, OutboxError> {
        let mut conn = self.pool.get().await?;
        let records: Vec<EventRecord> = adjustment_events::table
            .filter(adjustment_events::delivered_at.is_null())
            .order(adjustment_events::created_at.asc())
            .limit(limit)
            .load(&mut conn)
            .await?;
        records
            .into_iter()
            .map(|r| {
                Ok(PendingEvent {
                    event: serde_json::from_str(&r.payload)?,
                    delivery_attempts: r.delivery_attempts.max(0) as u32,
                    last_error: r.last_error,
                })
            })
            .collect()
    }

    pub async fn mark_delivered(&self, request_id: &str) -> Result<(), OutboxError> {
        let mut conn = self.pool.get().await?;
        diesel::update(adjustment_events::table.find(request_id))
            .set((
                adjustment_events::delivered_at.eq(now_timestamp()),
                adjustment_events::delivery_attempts.eq(adjustment_events::delivery_attempts + 1),
                adjustment_events::last_error.eq(None::<String>),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, request_id: &str, error: &str) -> Result<(), OutboxError> {
        let mut conn = self.pool.get().await?;
        diesel::update(adjustment_events::table.find(request_id))
            .set((
                adjustment_events::delivery_attempts.eq(adjustment_events::delivery_attempts + 1),
                adjustment_events::last_error.eq(error),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn is_delivered(&self, request_id: &str) -> Result<bool, OutboxError> {
        let mut conn = self.pool.get().await?;
        let delivered: Option<Option<String>> = adjustment_events::table
            .find(request_id)
            .select(adjustment_events::delivered_at)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(matches!(delivered, Some(Some(_))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ErrorKind;
    use crate::repository::DbContext;
    use tempfile::tempdir;

    fn event(request_id: &str) -> AdjustmentCompleted {
        AdjustmentCompleted {
            request_id: request_id.to_string(),
            saved_recipe_id: "saved-1".to_string(),
            variation_id: None,
            summary: None,
            success: false,
            error_kind: Some(ErrorKind::ValidationRejected),
        }
    }

    #[tokio::test]
    async fn test_record_is_idempotent_and_delivery_clears_queue() {
        let dir = tempdir().unwrap();
        let ctx = DbContext::from_sqlite_path(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        let outbox = ctx.outbox();

        assert!(outbox.record(&event("req-1")).await.unwrap());
        assert!(!outbox.record(&event("req-1")).await.unwrap());
        assert!(outbox.record(&event("req-2")).await.unwrap());

        outbox.mark_failed("req-1", "sink offline").await.unwrap();
        let pending = outbox.undelivered(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].event.request_id, "req-1");
        assert_eq!(pending[0].delivery_attempts, 1);
        assert_eq!(pending[0].last_error.as_deref(), Some("sink offline"));

        outbox.mark_delivered("req-1").await.unwrap();
        assert!(outbox.is_delivered("req-1").await.unwrap());
        let pending = outbox.undelivered(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].event.request_id, "req-2");
    }
}
