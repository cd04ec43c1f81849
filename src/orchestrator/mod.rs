//! Adjustment request lifecycle.
//!
//! The orchestrator owns every status change of an [`AdjustmentRequest`]:
//! it inserts pending rows, drives claimed requests through the pipeline
//! stages, commits the result through the [`VersionStore`] and records the
//! completion event in the outbox. Stages themselves never persist.
//!
//! Between stages a worker checks for cancellation, renews its lease and
//! moves the persisted status forward. A request resumed after a crash
//! re-runs its stages in memory; the persisted status only ever advances.

mod error;
mod worker;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::collaborators::{Collaborators, CompletionSink};
use crate::config::PipelineConfig;
use crate::gateway::{Generated, ProviderGateway};
use crate::models::{
    AdjustmentCompleted, AdjustmentRequest, AdjustmentStatus, ChangeRecord, ErrorKind,
    FeedbackSnapshot, RecipeVariation, StatusTransition,
};
use crate::pipeline::{
    ContextAssembler, FeedbackInterpreter, GenerationSettings, PlanGenerator, StageError,
    ValidationInput, VariantGenerator, VariantValidator,
};
use crate::repository::{
    CancelOutcome, Completion, DbContext, DieselAdjustmentRepository, DieselEventOutbox, Failure,
    RequestStoreError,
};
use crate::versions::{self, NewVariation, StoreError, VersionStore};

pub use error::AdjustmentError;
pub use worker::{join as join_workers, worker_id, WorkerPool};

/// Input to [`AdjustmentOrchestrator::submit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAdjustment {
    pub saved_recipe_id: String,
    pub feedback_id: String,
    #[serde(default)]
    pub snapshot: FeedbackSnapshot,
}

/// A variation together with its changes relative to the original recipe.
#[derive(Debug, Clone, Serialize)]
pub struct VariationDiff {
    pub variation: RecipeVariation,
    pub changes: Vec<ChangeRecord>,
}

/// Why a run stopped before producing a variation.
enum Abort {
    Stage(StageError),
    Cancelled,
    /// Another worker took the request over; leave it alone.
    LeaseLost,
    Consistency(String),
    Internal(String),
}

impl From<RequestStoreError> for Abort {
    fn from(e: RequestStoreError) -> Self {
        Abort::Internal(e.to_string())
    }
}

impl From<StoreError> for Abort {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::VersionConsistency(msg) => Abort::Consistency(msg),
            other => Abort::Internal(other.to_string()),
        }
    }
}

impl Abort {
    /// Error kind and message to fail the request with; `None` when the
    /// request must be left to its new lease holder.
    fn into_failure(self, request_id: &str) -> Option<(ErrorKind, String)> {
        match self {
            Abort::Stage(e) => Some((e.kind(), e.to_string())),
            Abort::Cancelled => Some((ErrorKind::Cancelled, "cancelled by request".to_string())),
            Abort::Consistency(msg) => {
                error!(request_id, "Version consistency violated: {}", msg);
                Some((ErrorKind::VersionConsistency, msg))
            }
            Abort::Internal(msg) => Some((ErrorKind::Internal, msg)),
            Abort::LeaseLost => None,
        }
    }
}

/// Provider bookkeeping accumulated over one run.
#[derive(Debug, Default)]
struct Progress {
    attempts: u32,
    provider: Option<String>,
}

pub struct AdjustmentOrchestrator {
    requests: DieselAdjustmentRepository,
    versions: Arc<dyn VersionStore>,
    outbox: DieselEventOutbox,
    sink: Arc<dyn CompletionSink>,
    collaborators: Collaborators,
    interpreter: FeedbackInterpreter,
    context: ContextAssembler,
    planner: PlanGenerator,
    generator: VariantGenerator,
    validator: VariantValidator,
    lease_ttl: Duration,
    validation_replans: u32,
    outbox_batch: i64,
    wake: Arc<Notify>,
}

impl AdjustmentOrchestrator {
    pub fn new(
        db: &DbContext,
        collaborators: Collaborators,
        gateway: Arc<ProviderGateway>,
        sink: Arc<dyn CompletionSink>,
        pipeline: &PipelineConfig,
        generation: GenerationSettings,
    ) -> Self {
        let versions: Arc<dyn VersionStore> = Arc::new(db.versions());
        Self {
            requests: db.requests(),
            outbox: db.outbox(),
            sink,
            interpreter: FeedbackInterpreter::new(),
            context: ContextAssembler::new(
                collaborators.clone(),
                versions.clone(),
                pipeline.knowledge_top_k,
                pipeline.knowledge_timeout(),
            ),
            planner: PlanGenerator::new(gateway.clone(), generation.clone()),
            generator: VariantGenerator::new(gateway, generation),
            validator: VariantValidator::new(&pipeline.validator),
            collaborators,
            versions,
            lease_ttl: pipeline.lease_ttl(),
            validation_replans: pipeline.validation_replans,
            outbox_batch: pipeline.outbox_batch,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Replace the default validation checks.
    pub fn with_validator(mut self, validator: VariantValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Signalled on every submit and retry.
    pub fn wake_handle(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    pub fn outbox_batch(&self) -> i64 {
        self.outbox_batch
    }

    /// Enqueue a new adjustment. Returns as soon as the pending row exists.
    pub async fn submit(&self, input: SubmitAdjustment) -> Result<AdjustmentRequest, AdjustmentError> {
        if input.saved_recipe_id.trim().is_empty() {
            return Err(AdjustmentError::Invalid("saved_recipe_id is required".to_string()));
        }
        if input.feedback_id.trim().is_empty() {
            return Err(AdjustmentError::Invalid("feedback_id is required".to_string()));
        }
        let request = AdjustmentRequest::new(&input.saved_recipe_id, &input.feedback_id, input.snapshot);
        self.enqueue(request).await
    }

    async fn enqueue(&self, request: AdjustmentRequest) -> Result<AdjustmentRequest, AdjustmentError> {
        match self.requests.insert(&request).await {
            Ok(()) => {}
            Err(RequestStoreError::Conflict { saved_recipe_id }) => {
                let in_flight = self
                    .requests
                    .find_in_flight(&saved_recipe_id)
                    .await
                    .ok()
                    .flatten()
                    .map(|r| r.id);
                return Err(AdjustmentError::Conflict {
                    saved_recipe_id,
                    request_id: in_flight,
                });
            }
            Err(e) => return Err(e.into()),
        }
        info!(
            request_id = %request.id,
            saved_recipe_id = %request.saved_recipe_id,
            retry_of = request.retry_of.as_deref().unwrap_or("-"),
            "Adjustment enqueued"
        );
        self.wake.notify_one();
        Ok(request)
    }

    /// Claim one specific request and drive it to a terminal state.
    ///
    /// Returns `None` when another worker holds the lease or the request is
    /// already finished.
    pub async fn run(
        &self,
        request_id: &str,
        worker_id: &str,
    ) -> Result<Option<AdjustmentRequest>, AdjustmentError> {
        match self.requests.claim(request_id, worker_id, self.lease_ttl).await? {
            Some(request) => self.drive(request, worker_id).await.map(Some),
            None => Ok(None),
        }
    }

    /// Claim the oldest claimable request, if any, and drive it.
    pub async fn run_next(&self, worker_id: &str) -> Result<Option<AdjustmentRequest>, AdjustmentError> {
        match self.requests.claim_next(worker_id, self.lease_ttl).await? {
            Some(request) => self.drive(request, worker_id).await.map(Some),
            None => Ok(None),
        }
    }

    /// Run claimable requests until none are left. Returns how many ran.
    pub async fn drain(&self, worker_id: &str) -> Result<usize, AdjustmentError> {
        let mut ran = 0;
        while self.run_next(worker_id).await?.is_some() {
            ran += 1;
        }
        Ok(ran)
    }

    async fn drive(
        &self,
        request: AdjustmentRequest,
        worker_id: &str,
    ) -> Result<AdjustmentRequest, AdjustmentError> {
        let started = Instant::now();
        let mut progress = Progress {
            attempts: request.attempt_count,
            provider: request.provider_used.clone(),
        };
        info!(
            request_id = %request.id,
            worker_id,
            status = %request.status,
            "Processing adjustment"
        );

        let outcome = self.run_stages(&request, worker_id, &mut progress).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let id = request.id.as_str();

        let summary = match outcome {
            Ok(variation) => {
                let done = self
                    .requests
                    .complete(
                        id,
                        worker_id,
                        Completion {
                            variation_id: &variation.id,
                            provider_used: progress.provider.as_deref(),
                            attempt_count: progress.attempts,
                            processing_time_ms: elapsed_ms,
                        },
                    )
                    .await?;
                if done {
                    info!(
                        request_id = id,
                        variation_id = %variation.id,
                        version = variation.version_number,
                        provider = progress.provider.as_deref().unwrap_or("-"),
                        elapsed_ms,
                        "Adjustment completed"
                    );
                } else {
                    warn!(request_id = id, "Lease lost before completion was recorded");
                }
                Some(variation.adjustment_summary)
            }
            Err(abort) => {
                match abort.into_failure(id) {
                    Some((kind, message)) => {
                        self.requests
                            .fail(
                                id,
                                Some(worker_id),
                                Failure {
                                    kind,
                                    message: &message,
                                    provider_used: progress.provider.as_deref(),
                                    attempt_count: progress.attempts,
                                    processing_time_ms: Some(elapsed_ms),
                                },
                            )
                            .await?;
                    }
                    None => warn!(request_id = id, worker_id, "Lease lost, abandoning run"),
                }
                None
            }
        };

        let current = self
            .requests
            .get(id)
            .await?
            .ok_or_else(|| AdjustmentError::NotFound(format!("adjustment {}", id)))?;
        if current.status.is_terminal() {
            self.publish(&current, summary).await?;
        }
        Ok(current)
    }

    async fn run_stages(
        &self,
        request: &AdjustmentRequest,
        worker_id: &str,
        progress: &mut Progress,
    ) -> Result<RecipeVariation, Abort> {
        let id = request.id.as_str();

        // A crash between commit and completion leaves the variation behind.
        if let Some(existing) = self.versions.find_by_source_request(id).await? {
            info!(
                request_id = id,
                variation_id = %existing.id,
                "Variation already committed, finishing request"
            );
            for status in [
                AdjustmentStatus::Interpreting,
                AdjustmentStatus::AssemblingContext,
                AdjustmentStatus::Planning,
                AdjustmentStatus::Generating,
                AdjustmentStatus::Validating,
            ] {
                if request.status < status {
                    self.requests.advance(id, worker_id, status).await?;
                }
            }
            return Ok(existing);
        }

        self.boundary(id, worker_id, AdjustmentStatus::Interpreting).await?;
        let adjustment = self
            .interpreter
            .interpret(&request.input_snapshot)
            .map_err(Abort::Stage)?;

        self.boundary(id, worker_id, AdjustmentStatus::AssemblingContext).await?;
        let context = self
            .context
            .assemble(&request.saved_recipe_id, &request.input_snapshot, adjustment)
            .await
            .map_err(Abort::Stage)?;

        let original = context.original.content();
        let mut replans = 0;
        let validated = loop {
            self.boundary(id, worker_id, AdjustmentStatus::Planning).await?;
            let plan = self.account(id, worker_id, progress, self.planner.plan(&context).await).await?;

            self.boundary(id, worker_id, AdjustmentStatus::Generating).await?;
            let draft = self
                .account(id, worker_id, progress, self.generator.generate(&context, &plan).await)
                .await?;

            self.boundary(id, worker_id, AdjustmentStatus::Validating).await?;
            let input = ValidationInput {
                original: &original,
                base: &context.base,
                draft: &draft,
                profile: context.profile.as_ref(),
            };
            match self.validator.validate(input) {
                Ok(validated) => break validated,
                Err(e) if replans < self.validation_replans => {
                    replans += 1;
                    warn!(request_id = id, replans, "Draft rejected, planning again: {}", e);
                }
                Err(e) => return Err(Abort::Stage(e)),
            }
        };

        let variation = self
            .versions
            .commit(NewVariation {
                saved_recipe_id: request.saved_recipe_id.clone(),
                content: validated.content,
                summary: validated.summary,
                source_request_id: Some(request.id.clone()),
                baseline: original,
            })
            .await?;
        Ok(variation)
    }

    /// Stage boundary: honour cancellation, keep the lease, record progress.
    async fn boundary(&self, id: &str, worker_id: &str, to: AdjustmentStatus) -> Result<(), Abort> {
        if self.requests.is_cancel_requested(id).await? {
            return Err(Abort::Cancelled);
        }
        if !self.requests.renew_lease(id, worker_id, self.lease_ttl).await? {
            return Err(Abort::LeaseLost);
        }
        if !self.requests.advance(id, worker_id, to).await? {
            debug!(request_id = id, status = %to, "Re-running stage in memory");
        }
        Ok(())
    }

    /// Fold a provider-backed stage result into the run's bookkeeping.
    async fn account<T>(
        &self,
        id: &str,
        worker_id: &str,
        progress: &mut Progress,
        result: Result<Generated<T>, StageError>,
    ) -> Result<T, Abort> {
        let value = match result {
            Ok(generated) => {
                progress.attempts += generated.attempts;
                progress.provider = Some(generated.result.provider);
                Ok(generated.value)
            }
            Err(e) => {
                progress.attempts += e.attempts();
                if let StageError::ProviderExhausted(ref exhausted) = e {
                    if let Some((name, _)) = exhausted.failures.last() {
                        progress.provider = Some(name.clone());
                    }
                }
                Err(Abort::Stage(e))
            }
        };
        let held = self
            .requests
            .record_attempts(id, worker_id, progress.attempts, progress.provider.as_deref())
            .await?;
        if !held {
            return Err(Abort::LeaseLost);
        }
        value
    }

    /// Persist the completion event, then try to hand it to the sink.
    async fn publish(
        &self,
        request: &AdjustmentRequest,
        summary: Option<String>,
    ) -> Result<(), AdjustmentError> {
        let event = AdjustmentCompleted::from_request(request, summary);
        self.outbox.record(&event).await?;
        self.deliver(&event).await?;
        Ok(())
    }

    async fn deliver(&self, event: &AdjustmentCompleted) -> Result<bool, AdjustmentError> {
        match self.sink.deliver(event).await {
            Ok(()) => {
                self.outbox.mark_delivered(&event.request_id).await?;
                Ok(true)
            }
            Err(e) => {
                warn!(
                    request_id = %event.request_id,
                    "Completion delivery failed, will retry: {}",
                    e
                );
                self.outbox
                    .mark_failed(&event.request_id, &e.to_string())
                    .await?;
                Ok(false)
            }
        }
    }

    /// Re-deliver undelivered completion events. Returns how many went out.
    pub async fn flush_outbox(&self, limit: i64) -> Result<usize, AdjustmentError> {
        let pending = self.outbox.undelivered(limit).await?;
        let mut delivered = 0;
        for item in pending {
            if self.deliver(&item.event).await? {
                delivered += 1;
            }
        }
        if delivered > 0 {
            debug!(delivered, "Outbox flushed");
        }
        Ok(delivered)
    }

    pub async fn get_status(&self, request_id: &str) -> Result<AdjustmentRequest, AdjustmentError> {
        self.requests
            .get(request_id)
            .await?
            .ok_or_else(|| AdjustmentError::NotFound(format!("adjustment {}", request_id)))
    }

    /// The committed variation of a completed request.
    pub async fn get_result(&self, request_id: &str) -> Result<RecipeVariation, AdjustmentError> {
        let request = self.get_status(request_id).await?;
        if request.status != AdjustmentStatus::Completed {
            return Err(AdjustmentError::NotCompleted {
                request_id: request.id,
                status: request.status,
            });
        }
        let variation_id = request.output_variant_id.ok_or_else(|| {
            AdjustmentError::NotFound(format!("variation of adjustment {}", request_id))
        })?;
        self.versions
            .get_variation(&variation_id)
            .await?
            .ok_or_else(|| AdjustmentError::NotFound(format!("variation {}", variation_id)))
    }

    /// Cancel a request. Pending requests fail at once; running ones stop
    /// at their next stage boundary.
    pub async fn cancel(
        &self,
        request_id: &str,
    ) -> Result<(CancelOutcome, AdjustmentRequest), AdjustmentError> {
        let outcome = self.requests.request_cancel(request_id).await?;
        let request = self.get_status(request_id).await?;
        match outcome {
            CancelOutcome::CancelledImmediately => {
                info!(request_id, "Adjustment cancelled");
                self.publish(&request, None).await?;
            }
            CancelOutcome::Scheduled => {
                info!(request_id, status = %request.status, "Cancellation scheduled");
            }
            CancelOutcome::AlreadyTerminal => {}
        }
        Ok((outcome, request))
    }

    /// Enqueue a fresh request with the same input as a failed one.
    pub async fn retry(&self, request_id: &str) -> Result<AdjustmentRequest, AdjustmentError> {
        let failed = self.get_status(request_id).await?;
        if failed.status != AdjustmentStatus::Failed {
            return Err(AdjustmentError::NotRetryable {
                request_id: failed.id,
                status: failed.status,
            });
        }
        self.enqueue(AdjustmentRequest::retry_of(&failed)).await
    }

    pub async fn history(&self, request_id: &str) -> Result<Vec<StatusTransition>, AdjustmentError> {
        self.get_status(request_id).await?;
        Ok(self.requests.transitions(request_id).await?)
    }

    pub async fn versions(&self, saved_recipe_id: &str) -> Result<Vec<RecipeVariation>, AdjustmentError> {
        Ok(self.versions.list_versions(saved_recipe_id).await?)
    }

    pub async fn active(&self, saved_recipe_id: &str) -> Result<Option<RecipeVariation>, AdjustmentError> {
        Ok(self.versions.get_active(saved_recipe_id).await?)
    }

    /// Changes from the original recipe to one variation.
    pub async fn diff_against_original(
        &self,
        saved_recipe_id: &str,
        version_id: &str,
    ) -> Result<VariationDiff, AdjustmentError> {
        let variation = self
            .versions
            .get_variation(version_id)
            .await?
            .filter(|v| v.saved_recipe_id == saved_recipe_id)
            .ok_or_else(|| {
                AdjustmentError::NotFound(format!(
                    "variation {} of saved recipe {}",
                    version_id, saved_recipe_id
                ))
            })?;
        let saved = self
            .collaborators
            .saved_recipes
            .get_saved_recipe(saved_recipe_id)
            .await?;
        let original = self
            .collaborators
            .catalog
            .get_original_recipe(&saved.original_recipe_id)
            .await?;
        let changes = versions::diff(&original.content(), &variation.content(), &variation.id);
        Ok(VariationDiff { variation, changes })
    }

    pub async fn activate(
        &self,
        saved_recipe_id: &str,
        version_id: &str,
    ) -> Result<RecipeVariation, AdjustmentError> {
        let variation = self.versions.activate(saved_recipe_id, version_id).await?;
        info!(saved_recipe_id, version = variation.version_number, "Variation activated");
        Ok(variation)
    }

    pub async fn rollback(
        &self,
        saved_recipe_id: &str,
        version_id: &str,
    ) -> Result<RecipeVariation, AdjustmentError> {
        let variation = self.versions.rollback(saved_recipe_id, version_id).await?;
        info!(saved_recipe_id, version = variation.version_number, "Rolled back");
        Ok(variation)
    }

    /// Request counts by status.
    pub async fn stats(&self) -> Result<Vec<(AdjustmentStatus, i64)>, AdjustmentError> {
        Ok(self.requests.count_by_status().await?)
    }
}
