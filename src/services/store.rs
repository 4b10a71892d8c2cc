//! Durable storage seams: object store, record store and credit ledger.
//!
//! The record store owns all Job/JobItem mutations the orchestrator makes.
//! Job progress counters move only through [`RecordStore::increment_job_counters`],
//! which implementations must make atomic: concurrent items completing in
//! the same instant must not lose updates.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{LedgerError, ObjectStoreError, StoreError};
use crate::model::{Hero, Job, JobItem, JobStatus, PageVersion, Project};

/// Durable key→bytes storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str)
    -> Result<(), ObjectStoreError>;
}

/// Fields of a page version not assigned by the store.
#[derive(Debug, Clone)]
pub struct PageVersionDraft {
    pub version: u32,
    pub prompt: String,
    pub negative_prompt: String,
    pub seed: u64,
    pub quality_score: u8,
    pub needs_review: bool,
    pub spend: u32,
    pub artifact_key: String,
    pub thumb_key: String,
}

/// Relational record store for jobs, items, pages and heroes.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn job(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Set the job's status and error message, stamping `started_at` on
    /// entry to `Processing` and `completed_at` on any terminal state.
    async fn set_job_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<(), StoreError>;

    /// Atomically add to the job's completed/failed counters.
    async fn increment_job_counters(
        &self,
        id: Uuid,
        completed: u32,
        failed: u32,
    ) -> Result<(), StoreError>;

    /// Items of the job still in `pending`, in creation order.
    async fn pending_items(&self, job_id: Uuid) -> Result<Vec<JobItem>, StoreError>;

    /// All items of the job, in creation order.
    async fn items(&self, job_id: Uuid) -> Result<Vec<JobItem>, StoreError>;

    async fn mark_item_processing(&self, item_id: Uuid) -> Result<(), StoreError>;

    async fn complete_item(&self, item_id: Uuid, artifact_key: &str) -> Result<(), StoreError>;

    async fn fail_item(&self, item_id: Uuid, error: &str) -> Result<(), StoreError>;

    /// Put the item back to `pending` with an incremented retry count and
    /// the error recorded, for a later orchestrator pass.
    async fn requeue_item(&self, item_id: Uuid, error: &str) -> Result<(), StoreError>;

    async fn project(&self, id: Uuid) -> Result<Option<Project>, StoreError>;

    async fn hero(&self, id: Uuid) -> Result<Option<Hero>, StoreError>;

    /// Store the finished reference sheet on the hero and mark it ready.
    async fn mark_hero_ready(&self, hero_id: Uuid, sheet_key: &str) -> Result<(), StoreError>;

    /// The version number the page's next revision should take.
    async fn next_page_version(&self, page_id: Uuid) -> Result<u32, StoreError>;

    /// Persist a new page version, assigning its id.
    async fn create_page_version(
        &self,
        page_id: Uuid,
        draft: PageVersionDraft,
    ) -> Result<PageVersion, StoreError>;

    /// Point the page's current-version pointer at the given version.
    async fn set_current_page_version(
        &self,
        page_id: Uuid,
        version_id: Uuid,
    ) -> Result<(), StoreError>;
}

/// Credit ledger, scoped per job. Reservation happens before the pipeline
/// runs (out of scope); the pipeline only records spends and finalizes.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Append a spend event of `amount` credits against the job.
    async fn record_spend(&self, job_id: Uuid, amount: u32) -> Result<(), LedgerError>;

    /// Refund the reserved-but-unspent remainder to the user. Returns the
    /// refunded amount. Safe on a job with zero recorded spend.
    async fn finalize(&self, user_id: Uuid, job_id: Uuid) -> Result<u32, LedgerError>;
}

/// Hierarchical object key for a page version artifact. The shape is an
/// opaque addressing convention: generated consistently, never parsed.
pub fn page_artifact_key(owner: Uuid, context: Uuid, page: Uuid, version: u32) -> String {
    format!("users/{owner}/{context}/{page}/v{version}/page.png")
}

/// Thumbnail key alongside [`page_artifact_key`].
pub fn page_thumb_key(owner: Uuid, context: Uuid, page: Uuid, version: u32) -> String {
    format!("users/{owner}/{context}/{page}/v{version}/thumb.png")
}

/// Key for a hero reference sheet.
pub fn hero_sheet_key(owner: Uuid, hero: Uuid) -> String {
    format!("users/{owner}/heroes/{hero}/sheet.png")
}
