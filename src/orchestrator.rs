//! Drives jobs through their full lifecycle.
//!
//! One orchestrator run takes a job from `pending` to a terminal state:
//! validate the parameter blob, plan the pending items, process them in
//! fixed-size concurrent batches with a cancellation check at every batch
//! boundary, persist successes, re-queue or fail failures, and finalize
//! billing on every exit path.

use std::sync::Arc;

use futures::future::join_all;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::billing::{BillingReconciler, CREDITS_PER_ITEM};
use crate::config::PipelineConfig;
use crate::error::{GenerateError, PipelineError};
use crate::generator::{GenerateRequest, Generator};
use crate::model::{
    Audience, CompiledSpec, GeneratedArtifact, Hero, Job, JobItem, JobKind, JobStatus,
    ModelProfile, Project, SizeClass,
};
use crate::planner::{self, PlanRequest};
use crate::services::safety::SafetyClassifier;
use crate::services::scenes::ScenePlanner;
use crate::services::store::{
    hero_sheet_key, page_artifact_key, page_thumb_key, Ledger, ObjectStore, PageVersionDraft,
    RecordStore,
};
use crate::services::synthesis::ImageSynthesizer;
use crate::postprocess;

/// Everything a pipeline run talks to.
#[derive(Clone)]
pub struct PipelineServices {
    pub store: Arc<dyn RecordStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub ledger: Arc<dyn Ledger>,
    pub synthesizer: Arc<dyn ImageSynthesizer>,
    pub scenes: Arc<dyn ScenePlanner>,
    pub classifier: Arc<dyn SafetyClassifier>,
}

/// Validated job parameters, one shape per job kind.
#[derive(Debug)]
enum JobParams {
    Generation { idea: String, page_count: u32 },
    Hero { description: String, audience: Audience },
}

impl JobParams {
    /// Validate the free-text parameter blob for the job's kind. A missing
    /// required field is a fatal configuration error, never retried.
    fn parse(job: &Job) -> Result<Self, PipelineError> {
        match job.kind {
            JobKind::Generation => {
                let idea = job.required_param("idea")?;
                let page_count = job
                    .params
                    .get("page_count")
                    .and_then(|v| v.as_u64())
                    .filter(|&n| n > 0)
                    .ok_or_else(|| {
                        PipelineError::Config(format!(
                            "job {} is missing required parameter `page_count`",
                            job.id
                        ))
                    })? as u32;
                Ok(JobParams::Generation { idea, page_count })
            }
            JobKind::HeroCreation => {
                let description = job.required_param("description")?;
                let audience = job
                    .params
                    .get("audience")
                    .and_then(|v| Audience::deserialize(v.clone()).ok())
                    .unwrap_or(Audience::Kid);
                Ok(JobParams::Hero {
                    description,
                    audience,
                })
            }
        }
    }
}

/// The owning context loaded for planning.
enum JobContext {
    Generation {
        project: Project,
        idea: String,
        hero_description: Option<String>,
    },
    Hero {
        hero: Hero,
        description: String,
        audience: Audience,
    },
}

impl JobContext {
    fn audience(&self) -> Audience {
        match self {
            JobContext::Generation { project, .. } => project.audience,
            JobContext::Hero { audience, .. } => *audience,
        }
    }

    fn model(&self) -> ModelProfile {
        match self {
            JobContext::Generation { project, .. } => project.model,
            // Reference sheets are reused across a whole project; always
            // worth the slower model.
            JobContext::Hero { .. } => ModelProfile::Quality,
        }
    }

    fn size(&self) -> SizeClass {
        match self {
            JobContext::Generation { project, .. } => project.size_class,
            JobContext::Hero { .. } => SizeClass::Square,
        }
    }
}

/// Why a batch loop stopped.
#[derive(Debug, PartialEq, Eq)]
enum PassOutcome {
    Ran,
    Cancelled,
}

/// How one item settled within a pass.
struct ItemFailure {
    message: String,
    retryable: bool,
}

/// Drives jobs end to end. Cheap to share behind an [`Arc`].
pub struct JobOrchestrator {
    services: PipelineServices,
    generator: Generator,
    billing: BillingReconciler,
    config: PipelineConfig,
}

impl JobOrchestrator {
    pub fn new(services: PipelineServices, config: PipelineConfig) -> Self {
        let generator = Generator::new(
            services.synthesizer.clone(),
            services.classifier.clone(),
            config.clone(),
        );
        let billing = BillingReconciler::new(services.ledger.clone());
        Self {
            services,
            generator,
            billing,
            config,
        }
    }

    /// Run one job to a terminal state.
    ///
    /// Every terminal outcome reconciles billing exactly once: runs that
    /// drive the job finalize before returning, including job-level
    /// failures, and a job cancelled before any run ever touched it has
    /// its reservation reconciled on the early-return path.
    pub async fn run_job(&self, job_id: Uuid) -> Result<(), PipelineError> {
        let store = &self.services.store;
        let job = store
            .job(job_id)
            .await?
            .ok_or(PipelineError::JobNotFound(job_id))?;

        if job.status.is_terminal() {
            // A run stamps started_at before anything else, so a terminal
            // job without it was cancelled before processing began and
            // still holds its full reservation. The stamped message keeps
            // a repeated trigger from reconciling twice.
            if job.status == JobStatus::Cancelled
                && job.started_at.is_none()
                && job.error.is_none()
            {
                self.billing.finalize(job.owner_id, job.id).await;
                if let Err(e) = store
                    .set_job_status(
                        job.id,
                        JobStatus::Cancelled,
                        Some("cancelled before processing".to_string()),
                    )
                    .await
                {
                    warn!(%job_id, error = %e, "failed to record pre-run cancellation");
                }
            }
            info!(%job_id, status = %job.status, "job already settled, nothing to do");
            return Ok(());
        }

        let mut outcome = self.drive(&job).await;
        if outcome.is_ok() {
            outcome = self.settle(&job).await;
        }

        if let Err(e) = &outcome {
            if let Err(se) = store
                .set_job_status(job.id, JobStatus::Failed, Some(e.job_message()))
                .await
            {
                warn!(%job_id, error = %se, "failed to record job failure");
            }
        }

        self.billing.finalize(job.owner_id, job.id).await;
        outcome
    }

    /// Steps 1-9: transition, validate, load context, plan and process.
    async fn drive(&self, job: &Job) -> Result<(), PipelineError> {
        // The Processing transition comes first so started_at marks every
        // job a run has touched, validation failures included.
        self.services
            .store
            .set_job_status(job.id, JobStatus::Processing, None)
            .await?;
        info!(job_id = %job.id, kind = ?job.kind, "job processing started");

        let params = JobParams::parse(job)?;
        let ctx = self.load_context(job, params).await?;
        self.run_passes(job, &ctx).await
    }

    async fn load_context(&self, job: &Job, params: JobParams) -> Result<JobContext, PipelineError> {
        let store = &self.services.store;
        match params {
            JobParams::Generation { idea, .. } => {
                let project = store.project(job.context_id).await?.ok_or_else(|| {
                    PipelineError::Config(format!("project {} not found", job.context_id))
                })?;
                let hero_description = match project.hero_id {
                    Some(hero_id) => store.hero(hero_id).await?.map(|h| h.description),
                    None => None,
                };
                Ok(JobContext::Generation {
                    project,
                    idea,
                    hero_description,
                })
            }
            JobParams::Hero {
                description,
                audience,
            } => {
                let hero = store.hero(job.context_id).await?.ok_or_else(|| {
                    PipelineError::Config(format!("hero {} not found", job.context_id))
                })?;
                Ok(JobContext::Hero {
                    hero,
                    description,
                    audience,
                })
            }
        }
    }

    /// Process pending items in passes until none remain or cancellation
    /// is observed. Each pass plans only the still-pending subset, so
    /// re-invocation on a partially settled job is idempotent.
    async fn run_passes(&self, job: &Job, ctx: &JobContext) -> Result<(), PipelineError> {
        loop {
            let pending = self.services.store.pending_items(job.id).await?;
            if pending.is_empty() {
                return Ok(());
            }

            let specs = self.compile_specs(ctx, pending.len()).await?;
            // One spec per pending item, paired by position.
            let pairs: Vec<(JobItem, CompiledSpec)> =
                pending.into_iter().zip(specs).collect();

            if self.run_batches(job, ctx, pairs).await? == PassOutcome::Cancelled {
                info!(job_id = %job.id, "cancellation observed, stopping");
                return Ok(());
            }
        }
    }

    async fn compile_specs(
        &self,
        ctx: &JobContext,
        count: usize,
    ) -> Result<Vec<CompiledSpec>, PipelineError> {
        match ctx {
            JobContext::Generation {
                project,
                idea,
                hero_description,
            } => {
                let req = PlanRequest {
                    idea,
                    count,
                    audience: project.audience,
                    hero_description: hero_description.as_deref(),
                    style_anchor: project.style_anchor.as_deref(),
                };
                planner::plan(self.services.scenes.as_ref(), &req).await
            }
            JobContext::Hero {
                description,
                audience,
                ..
            } => Ok(vec![
                planner::hero_sheet_spec(description, *audience);
                count
            ]),
        }
    }

    /// Fixed-size batches with full joins between them. The cancellation
    /// check runs at every batch boundary; in-flight items always run to
    /// completion.
    async fn run_batches(
        &self,
        job: &Job,
        ctx: &JobContext,
        pairs: Vec<(JobItem, CompiledSpec)>,
    ) -> Result<PassOutcome, PipelineError> {
        let batch_size = self.config.batch_size.max(1);
        for chunk in pairs.chunks(batch_size) {
            let current = self
                .services
                .store
                .job(job.id)
                .await?
                .ok_or(PipelineError::JobNotFound(job.id))?;
            if current.status == JobStatus::Cancelled {
                return Ok(PassOutcome::Cancelled);
            }

            let futures = chunk
                .iter()
                .map(|(item, spec)| self.process_item(job, ctx, item, spec));
            join_all(futures).await;
        }
        Ok(PassOutcome::Ran)
    }

    /// One item's whole journey through a pass. Failures are contained
    /// here and never abort sibling items.
    async fn process_item(&self, job: &Job, ctx: &JobContext, item: &JobItem, spec: &CompiledSpec) {
        let result = self.try_item(job, ctx, item, spec).await;
        if let Err(failure) = result {
            self.handle_item_failure(job, item, failure).await;
        }
    }

    async fn try_item(
        &self,
        job: &Job,
        ctx: &JobContext,
        item: &JobItem,
        spec: &CompiledSpec,
    ) -> Result<(), ItemFailure> {
        let store = &self.services.store;
        store
            .mark_item_processing(item.id)
            .await
            .map_err(store_failure)?;

        let req = GenerateRequest {
            prompt: &spec.prompt,
            negative_prompt: &spec.negative_prompt,
            audience: ctx.audience(),
            model: ctx.model(),
            size: ctx.size(),
            max_retries: self.config.generation_retry_limit,
        };
        let artifact = self
            .generator
            .generate(&req)
            .await
            .map_err(|e: GenerateError| ItemFailure {
                message: e.item_message(),
                retryable: e.is_retryable(),
            })?;

        let artifact_key = match ctx {
            JobContext::Generation { .. } => {
                self.persist_page(job, item, spec, &artifact).await?
            }
            JobContext::Hero { hero, .. } => self.persist_hero_sheet(job, hero, &artifact).await?,
        };

        store
            .complete_item(item.id, &artifact_key)
            .await
            .map_err(store_failure)?;

        // The item is durably complete. Bookkeeping failures past this
        // point are logged, never surfaced as retryable: a re-queue here
        // would regenerate a finished item and bill it twice.
        if let Err(e) = store.increment_job_counters(job.id, 1, 0).await {
            warn!(job_id = %job.id, item_id = %item.id, error = %e, "failed to bump completed counter");
        }
        if let Err(e) = self.billing.record_item_spend(job.id).await {
            warn!(job_id = %job.id, item_id = %item.id, error = %e, "failed to record item spend");
        }

        info!(
            job_id = %job.id,
            item_id = %item.id,
            key = %artifact_key,
            score = artifact.quality_score,
            needs_review = artifact.needs_review,
            "item completed"
        );
        Ok(())
    }

    /// Persist a finished page: full image and thumbnail to the object
    /// store, a new page version record, and the current-version pointer.
    async fn persist_page(
        &self,
        job: &Job,
        item: &JobItem,
        spec: &CompiledSpec,
        artifact: &GeneratedArtifact,
    ) -> Result<String, ItemFailure> {
        let store = &self.services.store;
        let version = store
            .next_page_version(item.target_id)
            .await
            .map_err(store_failure)?;
        let key = page_artifact_key(job.owner_id, job.context_id, item.target_id, version);
        let thumb_key = page_thumb_key(job.owner_id, job.context_id, item.target_id, version);

        let thumb = postprocess::thumbnail(&artifact.bytes).map_err(|e| ItemFailure {
            message: e.item_message(),
            retryable: true,
        })?;

        self.services
            .objects
            .put(&key, artifact.bytes.clone(), "image/png")
            .await
            .map_err(|e| ItemFailure {
                message: format!("UNKNOWN: object store: {e}"),
                retryable: true,
            })?;
        self.services
            .objects
            .put(&thumb_key, thumb, "image/png")
            .await
            .map_err(|e| ItemFailure {
                message: format!("UNKNOWN: object store: {e}"),
                retryable: true,
            })?;

        let record = store
            .create_page_version(
                item.target_id,
                PageVersionDraft {
                    version,
                    prompt: spec.prompt.clone(),
                    negative_prompt: spec.negative_prompt.clone(),
                    seed: artifact.seed,
                    quality_score: artifact.quality_score,
                    needs_review: artifact.needs_review,
                    spend: CREDITS_PER_ITEM,
                    artifact_key: key.clone(),
                    thumb_key,
                },
            )
            .await
            .map_err(store_failure)?;
        store
            .set_current_page_version(item.target_id, record.id)
            .await
            .map_err(store_failure)?;
        Ok(key)
    }

    /// Persist a finished hero reference sheet and mark the hero ready.
    async fn persist_hero_sheet(
        &self,
        job: &Job,
        hero: &Hero,
        artifact: &GeneratedArtifact,
    ) -> Result<String, ItemFailure> {
        let key = hero_sheet_key(job.owner_id, hero.id);
        self.services
            .objects
            .put(&key, artifact.bytes.clone(), "image/png")
            .await
            .map_err(|e| ItemFailure {
                message: format!("UNKNOWN: object store: {e}"),
                retryable: true,
            })?;
        self.services
            .store
            .mark_hero_ready(hero.id, &key)
            .await
            .map_err(store_failure)?;
        Ok(key)
    }

    /// Re-queue while retry budget remains, otherwise settle the item as
    /// failed and bump the job's failed counter.
    async fn handle_item_failure(&self, job: &Job, item: &JobItem, failure: ItemFailure) {
        let store = &self.services.store;
        if failure.retryable && item.retry_count < self.config.item_retry_limit {
            warn!(
                job_id = %job.id,
                item_id = %item.id,
                retry = item.retry_count + 1,
                max = self.config.item_retry_limit,
                error = %failure.message,
                "item re-queued"
            );
            if let Err(e) = store.requeue_item(item.id, &failure.message).await {
                warn!(item_id = %item.id, error = %e, "failed to re-queue item");
            }
            return;
        }

        warn!(
            job_id = %job.id,
            item_id = %item.id,
            error = %failure.message,
            "item failed terminally"
        );
        if let Err(e) = store.fail_item(item.id, &failure.message).await {
            warn!(item_id = %item.id, error = %e, "failed to record item failure");
        }
        if let Err(e) = store.increment_job_counters(job.id, 0, 1).await {
            warn!(job_id = %job.id, error = %e, "failed to bump failed counter");
        }
    }

    /// Step 10: resolve the job's terminal status from item bookkeeping.
    /// A cancelled job keeps its externally-set status.
    async fn settle(&self, job: &Job) -> Result<(), PipelineError> {
        let store = &self.services.store;
        let current = store
            .job(job.id)
            .await?
            .ok_or(PipelineError::JobNotFound(job.id))?;
        if current.status == JobStatus::Cancelled {
            info!(job_id = %job.id, "job cancelled");
            return Ok(());
        }

        let items = store.items(job.id).await?;
        let unresolved = items.iter().filter(|i| !i.status.is_terminal()).count();
        if unresolved > 0 {
            store
                .set_job_status(
                    job.id,
                    JobStatus::Failed,
                    Some(format!("{unresolved} items left unresolved")),
                )
                .await?;
            return Ok(());
        }

        let failed = items
            .iter()
            .filter(|i| i.status == crate::model::ItemStatus::Failed)
            .count();
        if failed > 0 {
            store
                .set_job_status(
                    job.id,
                    JobStatus::Failed,
                    Some(format!("{failed} of {} items failed", items.len())),
                )
                .await?;
        } else {
            store.set_job_status(job.id, JobStatus::Completed, None).await?;
            info!(job_id = %job.id, items = items.len(), "job completed");
        }
        Ok(())
    }
}

fn store_failure(e: crate::error::StoreError) -> ItemFailure {
    ItemFailure {
        message: format!("UNKNOWN: record store: {e}"),
        retryable: true,
    }
}
