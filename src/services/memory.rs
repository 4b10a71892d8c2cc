//! In-memory collaborator implementations.
//!
//! Back the demo binary and the scenario tests. [`MemoryStore`] implements
//! both [`RecordStore`] and [`ObjectStore`]; [`MemoryLedger`] keeps a full
//! event log so tests can assert exactly-once billing.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{LedgerError, ObjectStoreError, StoreError};
use crate::model::{Hero, ItemStatus, Job, JobItem, JobStatus, PageVersion, Project};

use super::store::{Ledger, ObjectStore, PageVersionDraft, RecordStore};

/// In-memory record and object store.
#[derive(Default)]
pub struct MemoryStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    items: Mutex<Vec<JobItem>>,
    projects: Mutex<HashMap<Uuid, Project>>,
    heroes: Mutex<HashMap<Uuid, Hero>>,
    versions: Mutex<Vec<PageVersion>>,
    current_versions: Mutex<HashMap<Uuid, Uuid>>,
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Setup helpers for callers that would normally create these records
    // out of band.

    pub fn insert_job(&self, job: Job) {
        self.jobs.lock().expect("lock poisoned").insert(job.id, job);
    }

    pub fn insert_item(&self, item: JobItem) {
        self.items.lock().expect("lock poisoned").push(item);
    }

    pub fn insert_project(&self, project: Project) {
        self.projects
            .lock()
            .expect("lock poisoned")
            .insert(project.id, project);
    }

    pub fn insert_hero(&self, hero: Hero) {
        self.heroes
            .lock()
            .expect("lock poisoned")
            .insert(hero.id, hero);
    }

    // Inspection helpers.

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .expect("lock poisoned")
            .get(key)
            .map(|(bytes, _)| bytes.clone())
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().expect("lock poisoned").len()
    }

    pub fn versions_for(&self, page_id: Uuid) -> Vec<PageVersion> {
        self.versions
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|v| v.page_id == page_id)
            .cloned()
            .collect()
    }

    pub fn current_version(&self, page_id: Uuid) -> Option<Uuid> {
        self.current_versions
            .lock()
            .expect("lock poisoned")
            .get(&page_id)
            .copied()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        self.objects
            .lock()
            .expect("lock poisoned")
            .insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.lock().expect("lock poisoned").get(&id).cloned())
    }

    async fn set_job_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().expect("lock poisoned");
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError(format!("job {id} not found")))?;
        job.status = status;
        if error.is_some() {
            job.error = error;
        }
        let now = Utc::now();
        if status == JobStatus::Processing && job.started_at.is_none() {
            job.started_at = Some(now);
        }
        if status.is_terminal() {
            job.completed_at = Some(now);
        }
        Ok(())
    }

    async fn increment_job_counters(
        &self,
        id: Uuid,
        completed: u32,
        failed: u32,
    ) -> Result<(), StoreError> {
        // The single store lock makes the increment atomic with respect to
        // concurrent siblings.
        let mut jobs = self.jobs.lock().expect("lock poisoned");
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError(format!("job {id} not found")))?;
        job.completed_items += completed;
        job.failed_items += failed;
        Ok(())
    }

    async fn pending_items(&self, job_id: Uuid) -> Result<Vec<JobItem>, StoreError> {
        Ok(self
            .items
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|i| i.job_id == job_id && i.status == ItemStatus::Pending)
            .cloned()
            .collect())
    }

    async fn items(&self, job_id: Uuid) -> Result<Vec<JobItem>, StoreError> {
        Ok(self
            .items
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|i| i.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn mark_item_processing(&self, item_id: Uuid) -> Result<(), StoreError> {
        self.update_item(item_id, |item| {
            item.status = ItemStatus::Processing;
            item.started_at = Some(Utc::now());
        })
    }

    async fn complete_item(&self, item_id: Uuid, artifact_key: &str) -> Result<(), StoreError> {
        self.update_item(item_id, |item| {
            item.status = ItemStatus::Completed;
            item.artifact_key = Some(artifact_key.to_string());
            item.completed_at = Some(Utc::now());
        })
    }

    async fn fail_item(&self, item_id: Uuid, error: &str) -> Result<(), StoreError> {
        self.update_item(item_id, |item| {
            item.status = ItemStatus::Failed;
            item.error = Some(error.to_string());
            item.completed_at = Some(Utc::now());
        })
    }

    async fn requeue_item(&self, item_id: Uuid, error: &str) -> Result<(), StoreError> {
        self.update_item(item_id, |item| {
            item.status = ItemStatus::Pending;
            item.retry_count += 1;
            item.error = Some(error.to_string());
        })
    }

    async fn project(&self, id: Uuid) -> Result<Option<Project>, StoreError> {
        Ok(self
            .projects
            .lock()
            .expect("lock poisoned")
            .get(&id)
            .cloned())
    }

    async fn hero(&self, id: Uuid) -> Result<Option<Hero>, StoreError> {
        Ok(self.heroes.lock().expect("lock poisoned").get(&id).cloned())
    }

    async fn mark_hero_ready(&self, hero_id: Uuid, sheet_key: &str) -> Result<(), StoreError> {
        let mut heroes = self.heroes.lock().expect("lock poisoned");
        let hero = heroes
            .get_mut(&hero_id)
            .ok_or_else(|| StoreError(format!("hero {hero_id} not found")))?;
        hero.ready = true;
        hero.sheet_key = Some(sheet_key.to_string());
        Ok(())
    }

    async fn next_page_version(&self, page_id: Uuid) -> Result<u32, StoreError> {
        let versions = self.versions.lock().expect("lock poisoned");
        Ok(versions.iter().filter(|v| v.page_id == page_id).count() as u32 + 1)
    }

    async fn create_page_version(
        &self,
        page_id: Uuid,
        draft: PageVersionDraft,
    ) -> Result<PageVersion, StoreError> {
        let mut versions = self.versions.lock().expect("lock poisoned");
        let version = PageVersion {
            id: Uuid::new_v4(),
            page_id,
            version: draft.version,
            prompt: draft.prompt,
            negative_prompt: draft.negative_prompt,
            seed: draft.seed,
            quality_score: draft.quality_score,
            needs_review: draft.needs_review,
            spend: draft.spend,
            artifact_key: draft.artifact_key,
            thumb_key: draft.thumb_key,
            created_at: Utc::now(),
        };
        versions.push(version.clone());
        Ok(version)
    }

    async fn set_current_page_version(
        &self,
        page_id: Uuid,
        version_id: Uuid,
    ) -> Result<(), StoreError> {
        self.current_versions
            .lock()
            .expect("lock poisoned")
            .insert(page_id, version_id);
        Ok(())
    }
}

impl MemoryStore {
    fn update_item(
        &self,
        item_id: Uuid,
        f: impl FnOnce(&mut JobItem),
    ) -> Result<(), StoreError> {
        let mut items = self.items.lock().expect("lock poisoned");
        let item = items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| StoreError(format!("item {item_id} not found")))?;
        f(item);
        Ok(())
    }
}

/// In-memory ledger with a full event log.
#[derive(Default)]
pub struct MemoryLedger {
    reservations: Mutex<HashMap<Uuid, u32>>,
    spends: Mutex<Vec<(Uuid, u32)>>,
    finalizations: Mutex<Vec<(Uuid, Uuid)>>,
    refunds: Mutex<HashMap<Uuid, u32>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pre-authorized reservation for the job (done by the caller
    /// before the pipeline runs).
    pub fn reserve(&self, job_id: Uuid, amount: u32) {
        self.reservations
            .lock()
            .expect("lock poisoned")
            .insert(job_id, amount);
    }

    pub fn spend_events(&self, job_id: Uuid) -> Vec<u32> {
        self.spends
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|(id, _)| *id == job_id)
            .map(|(_, amount)| *amount)
            .collect()
    }

    pub fn finalize_calls(&self, job_id: Uuid) -> usize {
        self.finalizations
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|(_, id)| *id == job_id)
            .count()
    }

    pub fn refund_for(&self, job_id: Uuid) -> Option<u32> {
        self.refunds
            .lock()
            .expect("lock poisoned")
            .get(&job_id)
            .copied()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn record_spend(&self, job_id: Uuid, amount: u32) -> Result<(), LedgerError> {
        self.spends
            .lock()
            .expect("lock poisoned")
            .push((job_id, amount));
        Ok(())
    }

    async fn finalize(&self, user_id: Uuid, job_id: Uuid) -> Result<u32, LedgerError> {
        self.finalizations
            .lock()
            .expect("lock poisoned")
            .push((user_id, job_id));
        let reserved = self
            .reservations
            .lock()
            .expect("lock poisoned")
            .get(&job_id)
            .copied()
            .unwrap_or(0);
        let spent: u32 = self.spend_events(job_id).iter().sum();
        let refund = reserved.saturating_sub(spent);
        self.refunds
            .lock()
            .expect("lock poisoned")
            .insert(job_id, refund);
        Ok(refund)
    }
}

/// Synthesizer stub that draws a compliant line-art placeholder locally.
/// Lets the demo binary and scenario tests run the full pipeline without
/// a synthesis backend.
#[derive(Default)]
pub struct StubSynthesizer {
    images: Mutex<HashMap<String, Vec<u8>>>,
}

impl StubSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A white page with a black rectangle inset well inside the margins:
    /// two-tone, content present, margin band clear.
    fn placeholder_png(seed: u64) -> Vec<u8> {
        let (w, h) = (640u32, 800u32);
        let mut img = image::GrayImage::from_pixel(w, h, image::Luma([255u8]));
        // Vary the shape slightly per seed so revisions differ.
        let inset = 80 + (seed % 40) as u32;
        for y in inset..h - inset {
            for x in inset..w - inset {
                let on_edge =
                    x < inset + 12 || x >= w - inset - 12 || y < inset + 12 || y >= h - inset - 12;
                if on_edge {
                    img.put_pixel(x, y, image::Luma([0u8]));
                }
            }
        }
        let mut bytes = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .expect("png encode");
        bytes
    }
}

#[async_trait]
impl super::synthesis::ImageSynthesizer for StubSynthesizer {
    async fn generate(
        &self,
        _req: &super::synthesis::SynthesisRequest,
    ) -> Result<super::synthesis::SynthesisOutput, super::synthesis::SynthesisError> {
        let seed: u64 = rand::random();
        let url = format!("mem://raw/{}", Uuid::new_v4());
        self.images
            .lock()
            .expect("lock poisoned")
            .insert(url.clone(), Self::placeholder_png(seed));
        Ok(super::synthesis::SynthesisOutput {
            image_url: url,
            seed,
        })
    }

    async fn download(
        &self,
        image_url: &str,
    ) -> Result<Vec<u8>, super::synthesis::SynthesisError> {
        self.images
            .lock()
            .expect("lock poisoned")
            .get(image_url)
            .cloned()
            .ok_or_else(|| super::synthesis::SynthesisError::Parse(format!(
                "unknown image {image_url}"
            )))
    }
}

/// Classifier stub that approves everything.
pub struct StubClassifier;

#[async_trait]
impl super::safety::SafetyClassifier for StubClassifier {
    async fn classify_image(
        &self,
        _image_ref: &str,
        _audience: crate::model::Audience,
    ) -> Result<super::safety::SafetyVerdict, super::safety::ClassifierError> {
        Ok(super::safety::SafetyVerdict::approve())
    }
}
