//! Diesel-based adjustment request repository.
//!
//! Requests are never deleted. Status changes are conditional updates
//! (`WHERE status = <expected> AND lease_owner = <worker>`) paired with an
//! audit row in `adjustment_transitions`, so a stale worker cannot move a
//! request it no longer owns.

use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel::sql_types::Text;
use diesel_async::{AsyncConnection, RunQueryDsl};
use thiserror::Error;
use tracing::{debug, info};

use super::models::{AdjustmentRequestRecord, NewAdjustmentRequest, NewTransition, TransitionRecord};
use super::pool::{SqliteConn, SqlitePool};
use super::util::{format_timestamp, is_unique_violation, now_timestamp, parse_datetime, parse_datetime_opt};
use crate::models::{AdjustmentRequest, AdjustmentStatus, ErrorKind, StatusTransition};
use crate::schema::{adjustment_requests, adjustment_transitions};

#[derive(Debug, Error)]
pub enum RequestStoreError {
    #[error("Saved recipe {saved_recipe_id} already has an adjustment in progress")]
    Conflict { saved_recipe_id: String },

    #[error("Adjustment request not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Stored snapshot is invalid: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The request had not started and is now failed.
    CancelledImmediately,
    /// A worker holds it; it stops at the next stage boundary.
    Scheduled,
    /// Already completed or failed; nothing changed.
    AlreadyTerminal,
}

/// Fields written when a request reaches `completed`.
#[derive(Debug, Clone)]
pub struct Completion<'a> {
    pub variation_id: &'a str,
    pub provider_used: Option<&'a str>,
    pub attempt_count: u32,
    pub processing_time_ms: u64,
}

/// Fields written when a request reaches `failed`.
#[derive(Debug, Clone)]
pub struct Failure<'a> {
    pub kind: ErrorKind,
    pub message: &'a str,
    pub provider_used: Option<&'a str>,
    pub attempt_count: u32,
    pub processing_time_ms: Option<u64>,
}

const CLAIM_SQL: &str = r#"
    UPDATE adjustment_requests
    SET lease_owner = ?,
        lease_expires_at = ?,
        started_at = COALESCE(started_at, ?),
        updated_at = ?
    WHERE id = ?
      AND status NOT IN ('completed', 'failed')
      AND (lease_owner IS NULL OR lease_owner = ? OR lease_expires_at < ?)
"#;

/// How many oldest candidates a worker considers per claim attempt.
const CLAIM_CANDIDATES: i64 = 16;

#[derive(Clone)]
pub struct DieselAdjustmentRepository {
    pool: SqlitePool,
}

impl DieselAdjustmentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn to_request(record: AdjustmentRequestRecord) -> Result<AdjustmentRequest, RequestStoreError> {
        Ok(AdjustmentRequest {
            input_snapshot: serde_json::from_str(&record.input_snapshot)?,
            status: AdjustmentStatus::from_str(&record.status).unwrap_or(AdjustmentStatus::Pending),
            attempt_count: record.attempt_count.max(0) as u32,
            error_kind: record.error_kind.as_deref().and_then(ErrorKind::from_str),
            cancel_requested: record.cancel_requested != 0,
            created_at: parse_datetime(&record.created_at),
            started_at: parse_datetime_opt(record.started_at.as_deref()),
            completed_at: parse_datetime_opt(record.completed_at.as_deref()),
            processing_time_ms: record.processing_time_ms.map(|ms| ms.max(0) as u64),
            id: record.id,
            saved_recipe_id: record.saved_recipe_id,
            feedback_id: record.feedback_id,
            provider_used: record.provider_used,
            output_variant_id: record.output_variant_id,
            error_message: record.error_message,
            retry_of: record.retry_of,
        })
    }

    async fn insert_transition(
        conn: &mut SqliteConn,
        request_id: &str,
        from: Option<AdjustmentStatus>,
        to: AdjustmentStatus,
        at: &str,
    ) -> Result<(), diesel::result::Error> {
        diesel::insert_into(adjustment_transitions::table)
            .values(&NewTransition {
                request_id,
                from_status: from.map(|s| s.as_str()),
                to_status: to.as_str(),
                at,
            })
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Insert a new pending request.
    ///
    /// Fails with [`RequestStoreError::Conflict`] when the saved recipe already
    /// has a non-terminal request; the partial unique index makes this hold
    /// even for racing inserts.
    pub async fn insert(&self, request: &AdjustmentRequest) -> Result<(), RequestStoreError> {
        let mut conn = self.pool.get().await?;
        let snapshot = serde_json::to_string(&request.input_snapshot)?;
        let created_at = format_timestamp(&request.created_at);

        let result: Result<(), diesel::result::Error> = conn
            .transaction(|conn| {
                Box::pin(async move {
                    diesel::insert_into(adjustment_requests::table)
                        .values(&NewAdjustmentRequest {
                            id: &request.id,
                            saved_recipe_id: &request.saved_recipe_id,
                            feedback_id: &request.feedback_id,
                            status: request.status.as_str(),
                            attempt_count: 0,
                            input_snapshot: &snapshot,
                            retry_of: request.retry_of.as_deref(),
                            cancel_requested: 0,
                            created_at: &created_at,
                            updated_at: &created_at,
                        })
                        .execute(conn)
                        .await?;
                    Self::insert_transition(conn, &request.id, None, request.status, &created_at)
                        .await
                })
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(RequestStoreError::Conflict {
                saved_recipe_id: request.saved_recipe_id.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<AdjustmentRequest>, RequestStoreError> {
        let mut conn = self.pool.get().await?;
        let record: Option<AdjustmentRequestRecord> = adjustment_requests::table
            .find(id)
            .first(&mut conn)
            .await
            .optional()?;
        record.map(Self::to_request).transpose()
    }

    /// The non-terminal request for a saved recipe, if one exists.
    pub async fn find_in_flight(
        &self,
        saved_recipe_id: &str,
    ) -> Result<Option<AdjustmentRequest>, RequestStoreError> {
        let mut conn = self.pool.get().await?;
        let record: Option<AdjustmentRequestRecord> = adjustment_requests::table
            .filter(adjustment_requests::saved_recipe_id.eq(saved_recipe_id))
            .filter(adjustment_requests::status.eq_any(in_flight_strs()))
            .first(&mut conn)
            .await
            .optional()?;
        record.map(Self::to_request).transpose()
    }

    /// All requests for a saved recipe, newest first.
    pub async fn list_for_saved_recipe(
        &self,
        saved_recipe_id: &str,
    ) -> Result<Vec<AdjustmentRequest>, RequestStoreError> {
        let mut conn = self.pool.get().await?;
        let records: Vec<AdjustmentRequestRecord> = adjustment_requests::table
            .filter(adjustment_requests::saved_recipe_id.eq(saved_recipe_id))
            .order(adjustment_requests::created_at.desc())
            .load(&mut conn)
            .await?;
        records.into_iter().map(Self::to_request).collect()
    }

    /// Count requests per status.
    pub async fn count_by_status(&self) -> Result<Vec<(AdjustmentStatus, i64)>, RequestStoreError> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<(String, i64)> = adjustment_requests::table
            .group_by(adjustment_requests::status)
            .select((adjustment_requests::status, diesel::dsl::count_star()))
            .load(&mut conn)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(s, n)| AdjustmentStatus::from_str(&s).map(|s| (s, n)))
            .collect())
    }

    /// Take the lease on one specific request.
    ///
    /// Succeeds when the request is non-terminal and its lease is free,
    /// expired, or already held by `worker_id`.
    pub async fn claim(
        &self,
        id: &str,
        worker_id: &str,
        lease_ttl: std::time::Duration,
    ) -> Result<Option<AdjustmentRequest>, RequestStoreError> {
        let mut conn = self.pool.get().await?;
        if Self::try_claim(&mut conn, id, worker_id, lease_ttl).await? {
            debug!(request_id = id, worker_id, "Claimed adjustment request");
            drop(conn);
            return self.get(id).await;
        }
        Ok(None)
    }

    /// Claim the oldest request with a free or expired lease.
    pub async fn claim_next(
        &self,
        worker_id: &str,
        lease_ttl: std::time::Duration,
    ) -> Result<Option<AdjustmentRequest>, RequestStoreError> {
        let mut conn = self.pool.get().await?;
        let now = now_timestamp();

        let candidates: Vec<AdjustmentRequestRecord> = adjustment_requests::table
            .filter(adjustment_requests::status.eq_any(in_flight_strs()))
            .order(adjustment_requests::created_at.asc())
            .limit(CLAIM_CANDIDATES)
            .load(&mut conn)
            .await?;

        for candidate in candidates {
            let lease_free = match (&candidate.lease_owner, &candidate.lease_expires_at) {
                (None, _) => true,
                (Some(owner), _) if owner == worker_id => true,
                (Some(_), Some(expires)) => expires.as_str() < now.as_str(),
                (Some(_), None) => true,
            };
            if !lease_free {
                continue;
            }
            if Self::try_claim(&mut conn, &candidate.id, worker_id, lease_ttl).await? {
                if candidate.lease_owner.is_some() {
                    info!(
                        request_id = %candidate.id,
                        status = %candidate.status,
                        "Resuming request with expired lease"
                    );
                }
                let claimed: AdjustmentRequestRecord = adjustment_requests::table
                    .find(&candidate.id)
                    .first(&mut conn)
                    .await?;
                return Self::to_request(claimed).map(Some);
            }
        }
        Ok(None)
    }

    async fn try_claim(
        conn: &mut SqliteConn,
        id: &str,
        worker_id: &str,
        lease_ttl: std::time::Duration,
    ) -> Result<bool, RequestStoreError> {
        let now = Utc::now();
        let now_str = format_timestamp(&now);
        let ttl = Duration::from_std(lease_ttl).unwrap_or_else(|_| Duration::minutes(5));
        let expires = format_timestamp(&(now + ttl));

        let updated = diesel::sql_query(CLAIM_SQL)
            .bind::<Text, _>(worker_id)
            .bind::<Text, _>(&expires)
            .bind::<Text, _>(&now_str)
            .bind::<Text, _>(&now_str)
            .bind::<Text, _>(id)
            .bind::<Text, _>(worker_id)
            .bind::<Text, _>(&now_str)
            .execute(conn)
            .await?;
        Ok(updated == 1)
    }

    /// Extend a held lease. Returns false if the lease was lost.
    pub async fn renew_lease(
        &self,
        id: &str,
        worker_id: &str,
        lease_ttl: std::time::Duration,
    ) -> Result<bool, RequestStoreError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now();
        let ttl = Duration::from_std(lease_ttl).unwrap_or_else(|_| Duration::minutes(5));
        let updated = diesel::update(
            adjustment_requests::table
                .find(id)
                .filter(adjustment_requests::lease_owner.eq(worker_id)),
        )
        .set((
            adjustment_requests::lease_expires_at.eq(format_timestamp(&(now + ttl))),
            adjustment_requests::updated_at.eq(format_timestamp(&now)),
        ))
        .execute(&mut conn)
        .await?;
        Ok(updated == 1)
    }

    /// Move a leased request forward to `to`.
    ///
    /// Returns false without writing when the move would not go forward
    /// (a resumed run re-entering a stage it already recorded) or when
    /// `worker_id` no longer holds the lease.
    pub async fn advance(
        &self,
        id: &str,
        worker_id: &str,
        to: AdjustmentStatus,
    ) -> Result<bool, RequestStoreError> {
        let current = self
            .get(id)
            .await?
            .ok_or_else(|| RequestStoreError::NotFound(id.to_string()))?;
        if !current.status.can_transition_to(to) || to.is_terminal() {
            return Ok(false);
        }

        let mut conn = self.pool.get().await?;
        let from = current.status;
        let now = now_timestamp();
        let moved: Result<bool, diesel::result::Error> = conn
            .transaction(|conn| {
                Box::pin(async move {
                    let updated = diesel::update(
                        adjustment_requests::table
                            .find(id)
                            .filter(adjustment_requests::status.eq(from.as_str()))
                            .filter(adjustment_requests::lease_owner.eq(worker_id)),
                    )
                    .set((
                        adjustment_requests::status.eq(to.as_str()),
                        adjustment_requests::updated_at.eq(&now),
                    ))
                    .execute(conn)
                    .await?;
                    if updated == 0 {
                        return Ok(false);
                    }
                    Self::insert_transition(conn, id, Some(from), to, &now).await?;
                    Ok(true)
                })
            })
            .await;
        let moved = moved?;

        if moved {
            info!(request_id = id, from = %from, to = %to, "Adjustment advanced");
        }
        Ok(moved)
    }

    /// Record provider bookkeeping without changing status.
    ///
    /// Returns false when `worker_id` no longer holds the lease; nothing is
    /// written in that case.
    pub async fn record_attempts(
        &self,
        id: &str,
        worker_id: &str,
        attempt_count: u32,
        provider_used: Option<&str>,
    ) -> Result<bool, RequestStoreError> {
        let mut conn = self.pool.get().await?;
        let updated = diesel::update(
            adjustment_requests::table
                .find(id)
                .filter(adjustment_requests::lease_owner.eq(worker_id)),
        )
        .set((
            adjustment_requests::attempt_count.eq(attempt_count as i32),
            adjustment_requests::provider_used.eq(provider_used),
            adjustment_requests::updated_at.eq(now_timestamp()),
        ))
        .execute(&mut conn)
        .await?;
        Ok(updated > 0)
    }

    /// Mark a validating request completed and release its lease.
    pub async fn complete(
        &self,
        id: &str,
        worker_id: &str,
        completion: Completion<'_>,
    ) -> Result<bool, RequestStoreError> {
        let mut conn = self.pool.get().await?;
        let now = now_timestamp();
        let done: Result<bool, diesel::result::Error> = conn
            .transaction(|conn| {
                Box::pin(async move {
                    let updated = diesel::update(
                        adjustment_requests::table
                            .find(id)
                            .filter(adjustment_requests::status.eq(AdjustmentStatus::Validating.as_str()))
                            .filter(adjustment_requests::lease_owner.eq(worker_id)),
                    )
                    .set((
                        adjustment_requests::status.eq(AdjustmentStatus::Completed.as_str()),
                        adjustment_requests::output_variant_id.eq(completion.variation_id),
                        adjustment_requests::provider_used.eq(completion.provider_used),
                        adjustment_requests::attempt_count.eq(completion.attempt_count as i32),
                        adjustment_requests::processing_time_ms.eq(completion.processing_time_ms as i64),
                        adjustment_requests::completed_at.eq(&now),
                        adjustment_requests::updated_at.eq(&now),
                        adjustment_requests::lease_owner.eq(None::<String>),
                        adjustment_requests::lease_expires_at.eq(None::<String>),
                    ))
                    .execute(conn)
                    .await?;
                    if updated == 0 {
                        return Ok(false);
                    }
                    Self::insert_transition(
                        conn,
                        id,
                        Some(AdjustmentStatus::Validating),
                        AdjustmentStatus::Completed,
                        &now,
                    )
                    .await?;
                    Ok(true)
                })
            })
            .await;
        Ok(done?)
    }

    /// Mark a non-terminal request failed and release its lease.
    ///
    /// With `worker_id` set, only the lease holder may fail the request;
    /// with `None`, only an unleased (or expired) request can be failed.
    pub async fn fail(
        &self,
        id: &str,
        worker_id: Option<&str>,
        failure: Failure<'_>,
    ) -> Result<bool, RequestStoreError> {
        let current = self
            .get(id)
            .await?
            .ok_or_else(|| RequestStoreError::NotFound(id.to_string()))?;
        if current.status.is_terminal() {
            return Ok(false);
        }

        let mut conn = self.pool.get().await?;
        let from = current.status;
        let now = now_timestamp();
        let done: Result<bool, diesel::result::Error> = conn
            .transaction(|conn| {
                Box::pin(async move {
                    let target = adjustment_requests::table
                        .find(id)
                        .filter(adjustment_requests::status.eq(from.as_str()));
                    let changes = (
                        adjustment_requests::status.eq(AdjustmentStatus::Failed.as_str()),
                        adjustment_requests::error_kind.eq(failure.kind.as_str()),
                        adjustment_requests::error_message.eq(failure.message),
                        adjustment_requests::provider_used.eq(failure.provider_used),
                        adjustment_requests::attempt_count.eq(failure.attempt_count as i32),
                        adjustment_requests::processing_time_ms
                            .eq(failure.processing_time_ms.map(|ms| ms as i64)),
                        adjustment_requests::completed_at.eq(&now),
                        adjustment_requests::updated_at.eq(&now),
                        adjustment_requests::lease_owner.eq(None::<String>),
                        adjustment_requests::lease_expires_at.eq(None::<String>),
                    );
                    let updated = match worker_id {
                        Some(worker) => {
                            diesel::update(target.filter(adjustment_requests::lease_owner.eq(worker)))
                                .set(changes)
                                .execute(conn)
                                .await?
                        }
                        None => {
                            diesel::update(target.filter(
                                adjustment_requests::lease_owner
                                    .is_null()
                                    .or(adjustment_requests::lease_expires_at.lt(&now)),
                            ))
                            .set(changes)
                            .execute(conn)
                            .await?
                        }
                    };
                    if updated == 0 {
                        return Ok(false);
                    }
                    Self::insert_transition(conn, id, Some(from), AdjustmentStatus::Failed, &now)
                        .await?;
                    Ok(true)
                })
            })
            .await;
        let done = done?;

        if done {
            info!(
                request_id = id,
                error_kind = %failure.kind,
                "Adjustment failed: {}",
                failure.message
            );
        }
        Ok(done)
    }

    /// Request cancellation.
    pub async fn request_cancel(&self, id: &str) -> Result<CancelOutcome, RequestStoreError> {
        let current = self
            .get(id)
            .await?
            .ok_or_else(|| RequestStoreError::NotFound(id.to_string()))?;
        if current.status.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal);
        }

        {
            let mut conn = self.pool.get().await?;
            diesel::update(adjustment_requests::table.find(id))
                .set((
                    adjustment_requests::cancel_requested.eq(1),
                    adjustment_requests::updated_at.eq(now_timestamp()),
                ))
                .execute(&mut conn)
                .await?;
        }

        if current.status == AdjustmentStatus::Pending {
            let failed = self
                .fail(
                    id,
                    None,
                    Failure {
                        kind: ErrorKind::Cancelled,
                        message: "cancelled before processing started",
                        provider_used: None,
                        attempt_count: 0,
                        processing_time_ms: None,
                    },
                )
                .await?;
            if failed {
                return Ok(CancelOutcome::CancelledImmediately);
            }
        }

        // Re-read: the worker may have finished in the meantime.
        match self.get(id).await? {
            Some(r) if r.status.is_terminal() && r.error_kind != Some(ErrorKind::Cancelled) => {
                Ok(CancelOutcome::AlreadyTerminal)
            }
            Some(r) if r.status.is_terminal() => Ok(CancelOutcome::CancelledImmediately),
            _ => Ok(CancelOutcome::Scheduled),
        }
    }

    pub async fn is_cancel_requested(&self, id: &str) -> Result<bool, RequestStoreError> {
        let mut conn = self.pool.get().await?;
        let flag: Option<i32> = adjustment_requests::table
            .find(id)
            .select(adjustment_requests::cancel_requested)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(flag.unwrap_or(0) != 0)
    }

    /// Status history in the order it happened.
    pub async fn transitions(&self, id: &str) -> Result<Vec<StatusTransition>, RequestStoreError> {
        let mut conn = self.pool.get().await?;
        let records: Vec<TransitionRecord> = adjustment_transitions::table
            .filter(adjustment_transitions::request_id.eq(id))
            .order(adjustment_transitions::id.asc())
            .load(&mut conn)
            .await?;
        Ok(records
            .into_iter()
            .filter_map(|r| {
                Some(StatusTransition {
                    from_status: r.from_status.as_deref().and_then(AdjustmentStatus::from_str),
                    to_status: AdjustmentStatus::from_str(&r.to_status)?,
                    at: parse_datetime(&r.at),
                    request_id: r.request_id,
                })
            })
            .collect())
    }
}

fn in_flight_strs() -> Vec<&'static str> {
    AdjustmentStatus::IN_FLIGHT.iter().map(|s| s.as_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeedbackSnapshot;
    use crate::repository::DbContext;
    use std::time::Duration as StdDuration;
    use tempfile::tempdir;

    const TTL: StdDuration = StdDuration::from_secs(60);

    async fn setup_repo() -> (DieselAdjustmentRepository, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let ctx = DbContext::from_sqlite_path(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        (ctx.requests(), dir)
    }

    fn request(saved: &str) -> AdjustmentRequest {
        AdjustmentRequest::new(saved, "fb-1", FeedbackSnapshot::from_text("fb-1", "too salty"))
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let (repo, _dir) = setup_repo().await;
        let req = request("saved-1");
        repo.insert(&req).await.unwrap();

        let loaded = repo.get(&req.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, AdjustmentStatus::Pending);
        assert_eq!(loaded.input_snapshot.text, "too salty");
        assert_eq!(loaded.attempt_count, 0);

        let history = repo.transitions(&req.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from_status, None);
        assert_eq!(history[0].to_status, AdjustmentStatus::Pending);
    }

    #[tokio::test]
    async fn test_second_in_flight_request_conflicts() {
        let (repo, _dir) = setup_repo().await;
        repo.insert(&request("saved-1")).await.unwrap();

        let err = repo.insert(&request("saved-1")).await.unwrap_err();
        assert!(matches!(err, RequestStoreError::Conflict { .. }));

        // A different saved recipe is unaffected.
        repo.insert(&request("saved-2")).await.unwrap();
    }

    #[tokio::test]
    async fn test_terminal_request_frees_the_saved_recipe() {
        let (repo, _dir) = setup_repo().await;
        let first = request("saved-1");
        repo.insert(&first).await.unwrap();
        repo.claim(&first.id, "w1", TTL).await.unwrap().unwrap();
        repo.fail(
            &first.id,
            Some("w1"),
            Failure {
                kind: ErrorKind::InterpretationError,
                message: "nothing actionable",
                provider_used: None,
                attempt_count: 0,
                processing_time_ms: Some(3),
            },
        )
        .await
        .unwrap();

        repo.insert(&request("saved-1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_lease_is_exclusive() {
        let (repo, _dir) = setup_repo().await;
        let req = request("saved-1");
        repo.insert(&req).await.unwrap();

        let claimed = repo.claim_next("w1", TTL).await.unwrap().unwrap();
        assert_eq!(claimed.id, req.id);
        assert!(claimed.started_at.is_some());

        assert!(repo.claim_next("w2", TTL).await.unwrap().is_none());
        assert!(repo.claim(&req.id, "w2", TTL).await.unwrap().is_none());
        // The holder can re-claim its own lease.
        assert!(repo.claim(&req.id, "w1", TTL).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken_over() {
        let (repo, _dir) = setup_repo().await;
        let req = request("saved-1");
        repo.insert(&req).await.unwrap();

        repo.claim(&req.id, "w1", StdDuration::from_millis(0)).await.unwrap().unwrap();
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        let resumed = repo.claim_next("w2", TTL).await.unwrap().unwrap();
        assert_eq!(resumed.id, req.id);
        assert!(!repo.advance(&req.id, "w1", AdjustmentStatus::Interpreting).await.unwrap());
        assert!(repo.advance(&req.id, "w2", AdjustmentStatus::Interpreting).await.unwrap());
    }

    #[tokio::test]
    async fn test_attempts_are_written_only_by_the_lease_holder() {
        let (repo, _dir) = setup_repo().await;
        let req = request("saved-1");
        repo.insert(&req).await.unwrap();

        repo.claim(&req.id, "w1", StdDuration::from_millis(1)).await.unwrap().unwrap();
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        repo.claim_next("w2", TTL).await.unwrap().unwrap();

        assert!(repo.record_attempts(&req.id, "w2", 1, Some("ollama")).await.unwrap());
        assert!(!repo.record_attempts(&req.id, "w1", 7, Some("stale")).await.unwrap());

        let loaded = repo.get(&req.id).await.unwrap().unwrap();
        assert_eq!(loaded.attempt_count, 1);
        assert_eq!(loaded.provider_used.as_deref(), Some("ollama"));
    }

    #[tokio::test]
    async fn test_advance_only_moves_forward() {
        let (repo, _dir) = setup_repo().await;
        let req = request("saved-1");
        repo.insert(&req).await.unwrap();
        repo.claim(&req.id, "w1", TTL).await.unwrap();

        assert!(repo.advance(&req.id, "w1", AdjustmentStatus::Interpreting).await.unwrap());
        assert!(repo.advance(&req.id, "w1", AdjustmentStatus::Planning).await.unwrap());
        assert!(!repo.advance(&req.id, "w1", AdjustmentStatus::Interpreting).await.unwrap());
        assert!(!repo.advance(&req.id, "w1", AdjustmentStatus::Planning).await.unwrap());

        let statuses: Vec<_> = repo
            .transitions(&req.id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.to_status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                AdjustmentStatus::Pending,
                AdjustmentStatus::Interpreting,
                AdjustmentStatus::Planning
            ]
        );
    }

    #[tokio::test]
    async fn test_complete_requires_validating() {
        let (repo, _dir) = setup_repo().await;
        let req = request("saved-1");
        repo.insert(&req).await.unwrap();
        repo.claim(&req.id, "w1", TTL).await.unwrap();

        let completion = Completion {
            variation_id: "var-1",
            provider_used: Some("heuristic"),
            attempt_count: 2,
            processing_time_ms: 40,
        };
        assert!(!repo.complete(&req.id, "w1", completion.clone()).await.unwrap());

        repo.advance(&req.id, "w1", AdjustmentStatus::Validating).await.unwrap();
        assert!(repo.complete(&req.id, "w1", completion).await.unwrap());

        let done = repo.get(&req.id).await.unwrap().unwrap();
        assert_eq!(done.status, AdjustmentStatus::Completed);
        assert_eq!(done.output_variant_id.as_deref(), Some("var-1"));
        assert_eq!(done.provider_used.as_deref(), Some("heuristic"));
        assert!(done.completed_at.is_some());
        assert!(repo.find_in_flight("saved-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_pending_fails_immediately() {
        let (repo, _dir) = setup_repo().await;
        let req = request("saved-1");
        repo.insert(&req).await.unwrap();

        let outcome = repo.request_cancel(&req.id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::CancelledImmediately);

        let cancelled = repo.get(&req.id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, AdjustmentStatus::Failed);
        assert_eq!(cancelled.error_kind, Some(ErrorKind::Cancelled));
        assert_eq!(
            repo.request_cancel(&req.id).await.unwrap(),
            CancelOutcome::AlreadyTerminal
        );
    }

    #[tokio::test]
    async fn test_cancel_in_progress_is_scheduled() {
        let (repo, _dir) = setup_repo().await;
        let req = request("saved-1");
        repo.insert(&req).await.unwrap();
        repo.claim(&req.id, "w1", TTL).await.unwrap();
        repo.advance(&req.id, "w1", AdjustmentStatus::Planning).await.unwrap();

        assert_eq!(repo.request_cancel(&req.id).await.unwrap(), CancelOutcome::Scheduled);
        assert!(repo.is_cancel_requested(&req.id).await.unwrap());
        assert_eq!(
            repo.get(&req.id).await.unwrap().unwrap().status,
            AdjustmentStatus::Planning
        );
    }
}
