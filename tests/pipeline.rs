//! Full-job scenario tests: batching, cancellation, two-layer retry,
//! billing discipline and idempotent re-invocation, all against in-memory
//! collaborators and a scripted synthesizer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use pageforge::error::StoreError;
use pageforge::model::{
    Audience, Hero, ItemStatus, Job, JobItem, JobKind, JobStatus, ModelProfile, PageVersion,
    Project, SizeClass,
};
use pageforge::services::memory::{MemoryLedger, MemoryStore, StubClassifier};
use pageforge::services::scenes::{KeywordScenePlanner, SceneError, ScenePlanner};
use pageforge::services::store::{Ledger, PageVersionDraft, RecordStore};
use pageforge::services::synthesis::{
    ImageSynthesizer, SynthesisError, SynthesisOutput, SynthesisRequest,
};
use pageforge::{JobOrchestrator, PipelineConfig, PipelineServices};

fn clean_png() -> Vec<u8> {
    let mut img = image::GrayImage::from_pixel(320, 320, image::Luma([255u8]));
    for y in 100..220 {
        for x in 100..220 {
            img.put_pixel(x, y, image::Luma([0u8]));
        }
    }
    let mut bytes = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut bytes),
        image::ImageFormat::Png,
    )
    .unwrap();
    bytes
}

/// Scripted synthesizer: optionally fails the first `failures` generate
/// calls whose prompt contains `fail_substring`; tracks call counts and
/// peak concurrency.
struct ScriptedSynthesizer {
    image: Vec<u8>,
    fail_substring: Option<String>,
    failures: u32,
    failed_so_far: AtomicU32,
    calls: AtomicU32,
    current: AtomicU32,
    peak: AtomicU32,
    per_prompt: Mutex<HashMap<String, u32>>,
    /// When set, marks this job cancelled on the first generate call.
    cancel_on_first_call: Option<(Arc<MemoryStore>, Uuid)>,
    cancelled: AtomicU32,
}

impl ScriptedSynthesizer {
    fn ok() -> Self {
        Self {
            image: clean_png(),
            fail_substring: None,
            failures: 0,
            failed_so_far: AtomicU32::new(0),
            calls: AtomicU32::new(0),
            current: AtomicU32::new(0),
            peak: AtomicU32::new(0),
            per_prompt: Mutex::new(HashMap::new()),
            cancel_on_first_call: None,
            cancelled: AtomicU32::new(0),
        }
    }

    fn failing(substring: &str, failures: u32) -> Self {
        Self {
            fail_substring: Some(substring.to_string()),
            failures,
            ..Self::ok()
        }
    }

    fn cancelling(store: Arc<MemoryStore>, job_id: Uuid) -> Self {
        Self {
            cancel_on_first_call: Some((store, job_id)),
            ..Self::ok()
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn peak_concurrency(&self) -> u32 {
        self.peak.load(Ordering::SeqCst)
    }

    fn calls_for_prompt_containing(&self, needle: &str) -> u32 {
        self.per_prompt
            .lock()
            .unwrap()
            .iter()
            .filter(|(prompt, _)| prompt.contains(needle))
            .map(|(_, n)| *n)
            .sum()
    }
}

#[async_trait]
impl ImageSynthesizer for ScriptedSynthesizer {
    async fn generate(&self, req: &SynthesisRequest) -> Result<SynthesisOutput, SynthesisError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        *self
            .per_prompt
            .lock()
            .unwrap()
            .entry(req.prompt.clone())
            .or_insert(0) += 1;

        if let Some((store, job_id)) = &self.cancel_on_first_call
            && self.cancelled.fetch_add(1, Ordering::SeqCst) == 0
        {
            store
                .set_job_status(*job_id, JobStatus::Cancelled, None)
                .await
                .unwrap();
        }

        // Hold the slot briefly so sibling batch items overlap.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);

        if let Some(needle) = &self.fail_substring
            && req.prompt.contains(needle)
            && self.failed_so_far.load(Ordering::SeqCst) < self.failures
        {
            self.failed_so_far.fetch_add(1, Ordering::SeqCst);
            return Err(SynthesisError::Api {
                status: 503,
                message: "model overloaded".into(),
            });
        }

        Ok(SynthesisOutput {
            image_url: format!("mem://raw/{n}"),
            seed: u64::from(n),
        })
    }

    async fn download(&self, _image_url: &str) -> Result<Vec<u8>, SynthesisError> {
        Ok(self.image.clone())
    }
}

struct FailingPlanner {
    safety: bool,
}

#[async_trait]
impl ScenePlanner for FailingPlanner {
    async fn scenes(
        &self,
        _idea: &str,
        _count: usize,
        _audience: Audience,
    ) -> Result<Vec<String>, SceneError> {
        if self.safety {
            Err(SceneError::SafetyRejected {
                reason: "idea rejected by moderation".into(),
            })
        } else {
            Err(SceneError::Failed("planner timed out".into()))
        }
    }
}

/// Record store that fails `complete_item` a configured number of times,
/// delegating everything else.
struct FlakyCompletionStore {
    inner: Arc<MemoryStore>,
    failures: AtomicU32,
}

#[async_trait]
impl RecordStore for FlakyCompletionStore {
    async fn job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        self.inner.job(id).await
    }

    async fn set_job_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        self.inner.set_job_status(id, status, error).await
    }

    async fn increment_job_counters(
        &self,
        id: Uuid,
        completed: u32,
        failed: u32,
    ) -> Result<(), StoreError> {
        self.inner.increment_job_counters(id, completed, failed).await
    }

    async fn pending_items(&self, job_id: Uuid) -> Result<Vec<JobItem>, StoreError> {
        self.inner.pending_items(job_id).await
    }

    async fn items(&self, job_id: Uuid) -> Result<Vec<JobItem>, StoreError> {
        self.inner.items(job_id).await
    }

    async fn mark_item_processing(&self, item_id: Uuid) -> Result<(), StoreError> {
        self.inner.mark_item_processing(item_id).await
    }

    async fn complete_item(&self, item_id: Uuid, artifact_key: &str) -> Result<(), StoreError> {
        if self.failures.load(Ordering::SeqCst) > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(StoreError("write conflict".into()));
        }
        self.inner.complete_item(item_id, artifact_key).await
    }

    async fn fail_item(&self, item_id: Uuid, error: &str) -> Result<(), StoreError> {
        self.inner.fail_item(item_id, error).await
    }

    async fn requeue_item(&self, item_id: Uuid, error: &str) -> Result<(), StoreError> {
        self.inner.requeue_item(item_id, error).await
    }

    async fn project(&self, id: Uuid) -> Result<Option<Project>, StoreError> {
        self.inner.project(id).await
    }

    async fn hero(&self, id: Uuid) -> Result<Option<Hero>, StoreError> {
        self.inner.hero(id).await
    }

    async fn mark_hero_ready(&self, hero_id: Uuid, sheet_key: &str) -> Result<(), StoreError> {
        self.inner.mark_hero_ready(hero_id, sheet_key).await
    }

    async fn next_page_version(&self, page_id: Uuid) -> Result<u32, StoreError> {
        self.inner.next_page_version(page_id).await
    }

    async fn create_page_version(
        &self,
        page_id: Uuid,
        draft: PageVersionDraft,
    ) -> Result<PageVersion, StoreError> {
        self.inner.create_page_version(page_id, draft).await
    }

    async fn set_current_page_version(
        &self,
        page_id: Uuid,
        version_id: Uuid,
    ) -> Result<(), StoreError> {
        self.inner.set_current_page_version(page_id, version_id).await
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    ledger: Arc<MemoryLedger>,
    synth: Arc<ScriptedSynthesizer>,
    orchestrator: JobOrchestrator,
    job_id: Uuid,
    page_ids: Vec<Uuid>,
}

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        backoff_base_ms: 1,
        backoff_cap_ms: 2,
        ..PipelineConfig::default()
    }
}

fn build_fixture(
    pages: u32,
    synth: ScriptedSynthesizer,
    planner: Arc<dyn ScenePlanner>,
    config: PipelineConfig,
) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(MemoryLedger::new());
    let synth = Arc::new(synth);

    let owner = Uuid::new_v4();
    let project = Project {
        id: Uuid::new_v4(),
        owner_id: owner,
        audience: Audience::Teen,
        size_class: SizeClass::Square,
        model: ModelProfile::Fast,
        hero_id: None,
        style_anchor: None,
    };
    let job = Job::new(
        owner,
        project.id,
        JobKind::Generation,
        pages,
        serde_json::json!({ "idea": "a curious fox", "page_count": pages }),
    );
    let job_id = job.id;

    let mut page_ids = Vec::new();
    for _ in 0..pages {
        let page_id = Uuid::new_v4();
        page_ids.push(page_id);
        store.insert_item(JobItem::new(job_id, page_id));
    }
    store.insert_project(project);
    store.insert_job(job);
    ledger.reserve(job_id, pages);

    let services = PipelineServices {
        store: store.clone(),
        objects: store.clone(),
        ledger: ledger.clone(),
        synthesizer: synth.clone(),
        scenes: planner,
        classifier: Arc::new(StubClassifier),
    };
    let orchestrator = JobOrchestrator::new(services, config);

    Fixture {
        store,
        ledger,
        synth,
        orchestrator,
        job_id,
        page_ids,
    }
}

#[tokio::test]
async fn five_items_two_batches_all_succeed() {
    let f = build_fixture(
        5,
        ScriptedSynthesizer::ok(),
        Arc::new(KeywordScenePlanner),
        fast_config(),
    );

    f.orchestrator.run_job(f.job_id).await.unwrap();

    let job = f.store.job(f.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.completed_items, 5);
    assert_eq!(job.failed_items, 0);
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());

    // 5 spend events, one finalize, and never more than batch_size in
    // flight at once.
    assert_eq!(f.ledger.spend_events(f.job_id).len(), 5);
    assert_eq!(f.ledger.finalize_calls(f.job_id), 1);
    assert_eq!(f.ledger.refund_for(f.job_id), Some(0));
    assert_eq!(f.synth.calls(), 5);
    assert!(f.synth.peak_concurrency() <= 3);
}

#[tokio::test]
async fn completed_items_carry_artifacts_and_versions() {
    let f = build_fixture(
        3,
        ScriptedSynthesizer::ok(),
        Arc::new(KeywordScenePlanner),
        fast_config(),
    );

    f.orchestrator.run_job(f.job_id).await.unwrap();

    let items = f.store.items(f.job_id).await.unwrap();
    for item in &items {
        assert_eq!(item.status, ItemStatus::Completed);
        let key = item.artifact_key.as_deref().expect("artifact key set");
        assert!(f.store.object(key).is_some(), "artifact stored at {key}");
    }

    for page_id in &f.page_ids {
        let versions = f.store.versions_for(*page_id);
        assert_eq!(versions.len(), 1);
        let v = &versions[0];
        assert_eq!(v.version, 1);
        assert_eq!(v.spend, 1);
        assert!(!v.needs_review);
        assert!(v.prompt.contains("pure black-and-white line art"));
        assert!(f.store.object(&v.thumb_key).is_some());
        assert_eq!(f.store.current_version(*page_id), Some(v.id));
    }
}

#[tokio::test]
async fn transient_failure_succeeds_on_third_internal_attempt() {
    // The second item's scene label is distinct; fail it twice.
    let f = build_fixture(
        4,
        ScriptedSynthesizer::failing("exploring a meadow", 2),
        Arc::new(KeywordScenePlanner),
        fast_config(),
    );

    f.orchestrator.run_job(f.job_id).await.unwrap();

    let job = f.store.job(f.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.completed_items, 4);

    // Generator-internal attempts for item #2: exactly 3 (2 failures + 1
    // success), absorbed without any orchestrator re-queue.
    assert_eq!(f.synth.calls_for_prompt_containing("exploring a meadow"), 3);
    let items = f.store.items(f.job_id).await.unwrap();
    assert!(items.iter().all(|i| i.retry_count == 0));
    assert_eq!(f.ledger.spend_events(f.job_id).len(), 4);
}

#[tokio::test]
async fn exhausted_item_retries_settle_as_failed() {
    // Generator gets a single attempt per call; the item gets one
    // re-queue. Two total generation attempts, then terminal failure.
    let config = PipelineConfig {
        generation_retry_limit: 0,
        item_retry_limit: 1,
        ..fast_config()
    };
    let f = build_fixture(
        3,
        ScriptedSynthesizer::failing("standing proudly", u32::MAX),
        Arc::new(KeywordScenePlanner),
        config,
    );

    // Item-level failures settle the job; the run itself succeeds.
    f.orchestrator.run_job(f.job_id).await.unwrap();

    let job = f.store.job(f.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.completed_items, 2);
    assert_eq!(job.failed_items, 1);
    assert_eq!(job.error.as_deref(), Some("1 of 3 items failed"));

    assert_eq!(f.synth.calls_for_prompt_containing("standing proudly"), 2);
    let items = f.store.items(f.job_id).await.unwrap();
    let failed: Vec<_> = items
        .iter()
        .filter(|i| i.status == ItemStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].retry_count, 1);
    assert!(failed[0].error.as_deref().unwrap().starts_with("AI_GENERATION: "));

    // Spends only for the completed items; finalize exactly once.
    assert_eq!(f.ledger.spend_events(f.job_id).len(), 2);
    assert_eq!(f.ledger.finalize_calls(f.job_id), 1);
    assert_eq!(f.ledger.refund_for(f.job_id), Some(1));
}

#[tokio::test]
async fn planning_safety_rejection_fails_job_without_generation() {
    let f = build_fixture(
        10,
        ScriptedSynthesizer::ok(),
        Arc::new(FailingPlanner { safety: true }),
        fast_config(),
    );

    let err = f.orchestrator.run_job(f.job_id).await.unwrap_err();
    assert!(err.to_string().starts_with("safety: "));

    let job = f.store.job(f.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.as_deref().unwrap().starts_with("safety: "));

    // No generation calls, no spend, still exactly one finalize.
    assert_eq!(f.synth.calls(), 0);
    assert!(f.ledger.spend_events(f.job_id).is_empty());
    assert_eq!(f.ledger.finalize_calls(f.job_id), 1);
    assert_eq!(f.ledger.refund_for(f.job_id), Some(10));
}

#[tokio::test]
async fn generic_planning_failure_is_not_safety_tagged() {
    let f = build_fixture(
        4,
        ScriptedSynthesizer::ok(),
        Arc::new(FailingPlanner { safety: false }),
        fast_config(),
    );

    f.orchestrator.run_job(f.job_id).await.unwrap_err();

    let job = f.store.job(f.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    let msg = job.error.as_deref().unwrap();
    assert!(!msg.starts_with("safety: "));
    assert!(msg.contains("planner timed out"));
    assert_eq!(f.ledger.finalize_calls(f.job_id), 1);
}

#[tokio::test]
async fn cancellation_honored_only_at_batch_boundaries() {
    let store = Arc::new(MemoryStore::new());
    // Fixture wiring is manual here because the synthesizer needs the
    // store handle to flip cancellation mid-batch.
    let ledger = Arc::new(MemoryLedger::new());
    let owner = Uuid::new_v4();
    let project = Project {
        id: Uuid::new_v4(),
        owner_id: owner,
        audience: Audience::Teen,
        size_class: SizeClass::Square,
        model: ModelProfile::Fast,
        hero_id: None,
        style_anchor: None,
    };
    let job = Job::new(
        owner,
        project.id,
        JobKind::Generation,
        6,
        serde_json::json!({ "idea": "a curious fox", "page_count": 6 }),
    );
    let job_id = job.id;
    for _ in 0..6 {
        store.insert_item(JobItem::new(job_id, Uuid::new_v4()));
    }
    store.insert_project(project);
    store.insert_job(job);
    ledger.reserve(job_id, 6);

    let synth = Arc::new(ScriptedSynthesizer::cancelling(store.clone(), job_id));
    let services = PipelineServices {
        store: store.clone(),
        objects: store.clone(),
        ledger: ledger.clone(),
        synthesizer: synth.clone(),
        scenes: Arc::new(KeywordScenePlanner),
        classifier: Arc::new(StubClassifier),
    };
    let orchestrator = JobOrchestrator::new(services, fast_config());

    orchestrator.run_job(job_id).await.unwrap();

    // All 3 in-flight items of the first batch ran to completion; no 4th
    // generation ever began.
    assert_eq!(synth.calls(), 3);
    let job = store.job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.completed_items, 3);

    let items = store.items(job_id).await.unwrap();
    let completed = items
        .iter()
        .filter(|i| i.status == ItemStatus::Completed)
        .count();
    let pending = items
        .iter()
        .filter(|i| i.status == ItemStatus::Pending)
        .count();
    assert_eq!(completed, 3);
    assert_eq!(pending, 3);

    // Cancellation still reconciles billing exactly once.
    assert_eq!(ledger.finalize_calls(job_id), 1);
    assert_eq!(ledger.refund_for(job_id), Some(3));
}

#[tokio::test]
async fn reinvocation_processes_only_pending_items() {
    let f = build_fixture(
        4,
        ScriptedSynthesizer::ok(),
        Arc::new(KeywordScenePlanner),
        fast_config(),
    );

    // Simulate a prior partial run: two items already terminal.
    let items = f.store.items(f.job_id).await.unwrap();
    f.store
        .complete_item(items[0].id, "users/a/b/c/v1/page.png")
        .await
        .unwrap();
    f.store
        .increment_job_counters(f.job_id, 1, 0)
        .await
        .unwrap();
    f.ledger.record_spend(f.job_id, 1).await.unwrap();
    f.store.fail_item(items[1].id, "UNKNOWN: gave up").await.unwrap();
    f.store
        .increment_job_counters(f.job_id, 0, 1)
        .await
        .unwrap();

    f.orchestrator.run_job(f.job_id).await.unwrap();

    // Only the two pending items were generated; terminal ones untouched.
    assert_eq!(f.synth.calls(), 2);
    let items = f.store.items(f.job_id).await.unwrap();
    assert_eq!(items[0].artifact_key.as_deref(), Some("users/a/b/c/v1/page.png"));
    assert_eq!(items[1].status, ItemStatus::Failed);
    assert_eq!(items[2].status, ItemStatus::Completed);
    assert_eq!(items[3].status, ItemStatus::Completed);

    let job = f.store.job(f.job_id).await.unwrap().unwrap();
    // The pre-failed item keeps the job in failed state.
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.completed_items, 3);
    assert_eq!(job.failed_items, 1);
    assert_eq!(f.ledger.spend_events(f.job_id).len(), 3);
}

#[tokio::test]
async fn missing_required_param_is_fatal_config_error() {
    let f = build_fixture(
        3,
        ScriptedSynthesizer::ok(),
        Arc::new(KeywordScenePlanner),
        fast_config(),
    );
    // Corrupt the job params.
    let mut job = f.store.job(f.job_id).await.unwrap().unwrap();
    job.params = serde_json::json!({ "page_count": 3 });
    f.store.insert_job(job);

    let err = f.orchestrator.run_job(f.job_id).await.unwrap_err();
    assert!(err.to_string().contains("missing required parameter"));

    let job = f.store.job(f.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(f.synth.calls(), 0);
    assert_eq!(f.ledger.finalize_calls(f.job_id), 1);

    // The failed run stamped started_at, so a repeated trigger skips the
    // job without reconciling billing a second time.
    f.orchestrator.run_job(f.job_id).await.unwrap();
    assert_eq!(f.ledger.finalize_calls(f.job_id), 1);
}

#[tokio::test]
async fn zero_pending_items_completes_immediately() {
    let f = build_fixture(
        2,
        ScriptedSynthesizer::ok(),
        Arc::new(KeywordScenePlanner),
        fast_config(),
    );
    // Every item already settled by an earlier run.
    for item in f.store.items(f.job_id).await.unwrap() {
        f.store
            .complete_item(item.id, "users/a/b/c/v1/page.png")
            .await
            .unwrap();
        f.store
            .increment_job_counters(f.job_id, 1, 0)
            .await
            .unwrap();
    }

    f.orchestrator.run_job(f.job_id).await.unwrap();

    let job = f.store.job(f.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(f.synth.calls(), 0);
    assert_eq!(f.ledger.finalize_calls(f.job_id), 1);
}

#[tokio::test]
async fn cancellation_before_first_run_still_reconciles_billing() {
    let f = build_fixture(
        2,
        ScriptedSynthesizer::ok(),
        Arc::new(KeywordScenePlanner),
        fast_config(),
    );
    f.store
        .set_job_status(f.job_id, JobStatus::Cancelled, None)
        .await
        .unwrap();

    f.orchestrator.run_job(f.job_id).await.unwrap();

    // Nothing ran, but the reservation came back.
    assert_eq!(f.synth.calls(), 0);
    assert_eq!(f.ledger.finalize_calls(f.job_id), 1);
    assert_eq!(f.ledger.refund_for(f.job_id), Some(2));

    let job = f.store.job(f.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);

    // A repeated trigger must not reconcile again.
    f.orchestrator.run_job(f.job_id).await.unwrap();
    assert_eq!(f.ledger.finalize_calls(f.job_id), 1);
    assert_eq!(f.synth.calls(), 0);
}

#[tokio::test]
async fn completion_write_failure_does_not_double_bill() {
    let inner = Arc::new(MemoryStore::new());
    let ledger = Arc::new(MemoryLedger::new());
    let owner = Uuid::new_v4();
    let project = Project {
        id: Uuid::new_v4(),
        owner_id: owner,
        audience: Audience::Teen,
        size_class: SizeClass::Square,
        model: ModelProfile::Fast,
        hero_id: None,
        style_anchor: None,
    };
    let job = Job::new(
        owner,
        project.id,
        JobKind::Generation,
        1,
        serde_json::json!({ "idea": "a curious fox", "page_count": 1 }),
    );
    let job_id = job.id;
    let page_id = Uuid::new_v4();
    inner.insert_item(JobItem::new(job_id, page_id));
    inner.insert_project(project);
    inner.insert_job(job);
    ledger.reserve(job_id, 1);

    let synth = Arc::new(ScriptedSynthesizer::ok());
    let services = PipelineServices {
        store: Arc::new(FlakyCompletionStore {
            inner: inner.clone(),
            failures: AtomicU32::new(1),
        }),
        objects: inner.clone(),
        ledger: ledger.clone(),
        synthesizer: synth.clone(),
        scenes: Arc::new(KeywordScenePlanner),
        classifier: Arc::new(StubClassifier),
    };
    let orchestrator = JobOrchestrator::new(services, fast_config());

    orchestrator.run_job(job_id).await.unwrap();

    // The first pass generated and persisted but could not mark the item
    // complete, so it was re-queued and regenerated once.
    assert_eq!(synth.calls(), 2);
    let job = inner.job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.completed_items, 1);

    let items = inner.items(job_id).await.unwrap();
    assert_eq!(items[0].status, ItemStatus::Completed);
    assert_eq!(items[0].retry_count, 1);
    assert!(items[0].artifact_key.as_deref().unwrap().ends_with("/v2/page.png"));

    // Two versions were persisted, but the item billed exactly once.
    assert_eq!(inner.versions_for(page_id).len(), 2);
    assert_eq!(ledger.spend_events(job_id), vec![1]);
    assert_eq!(ledger.finalize_calls(job_id), 1);
    assert_eq!(ledger.refund_for(job_id), Some(0));
}

#[tokio::test]
async fn rerunning_a_settled_job_does_not_finalize_again() {
    let f = build_fixture(
        2,
        ScriptedSynthesizer::ok(),
        Arc::new(KeywordScenePlanner),
        fast_config(),
    );

    f.orchestrator.run_job(f.job_id).await.unwrap();
    assert_eq!(f.ledger.finalize_calls(f.job_id), 1);

    f.orchestrator.run_job(f.job_id).await.unwrap();
    assert_eq!(f.ledger.finalize_calls(f.job_id), 1);
    assert_eq!(f.synth.calls(), 2);
}

#[tokio::test]
async fn hero_job_marks_hero_ready() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(MemoryLedger::new());
    let owner = Uuid::new_v4();
    let hero = Hero {
        id: Uuid::new_v4(),
        owner_id: owner,
        name: "Puff".into(),
        description: "a small blue dragon with round glasses".into(),
        ready: false,
        sheet_key: None,
    };
    let hero_id = hero.id;
    let job = Job::new(
        owner,
        hero_id,
        JobKind::HeroCreation,
        1,
        serde_json::json!({ "description": "a small blue dragon with round glasses" }),
    );
    let job_id = job.id;
    store.insert_hero(hero);
    store.insert_item(JobItem::new(job_id, hero_id));
    store.insert_job(job);
    ledger.reserve(job_id, 1);

    let synth = Arc::new(ScriptedSynthesizer::ok());
    let services = PipelineServices {
        store: store.clone(),
        objects: store.clone(),
        ledger: ledger.clone(),
        synthesizer: synth.clone(),
        scenes: Arc::new(KeywordScenePlanner),
        classifier: Arc::new(StubClassifier),
    };
    let orchestrator = JobOrchestrator::new(services, fast_config());

    orchestrator.run_job(job_id).await.unwrap();

    let job = store.job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let hero = store.hero(hero_id).await.unwrap().unwrap();
    assert!(hero.ready);
    let sheet_key = hero.sheet_key.as_deref().unwrap();
    assert!(sheet_key.ends_with("/sheet.png"));
    assert!(store.object(sheet_key).is_some());

    assert_eq!(ledger.spend_events(job_id), vec![1]);
    assert_eq!(ledger.finalize_calls(job_id), 1);
}
