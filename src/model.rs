//! Core entities of the generation pipeline.
//!
//! [`Job`] and [`JobItem`] are the durable records the orchestrator drives
//! through their lifecycles. [`CompiledSpec`] and [`GeneratedArtifact`] are
//! ephemeral, in-memory artifacts of a single processing pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a [`Job`].
///
/// `Pending → Processing → {Completed | Failed | Cancelled}`. The three
/// right-hand states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle status of a single [`JobItem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Failed)
    }
}

/// What kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Generate N illustrated pages for a project.
    Generation,
    /// Generate a single character reference sheet for a hero.
    HeroCreation,
}

/// One user-initiated batch generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub owner_id: Uuid,
    /// The owning project or hero the job generates into.
    pub context_id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub total_items: u32,
    pub completed_items: u32,
    pub failed_items: u32,
    /// Free-text parameters supplied by the caller (e.g. the user's idea).
    pub params: serde_json::Value,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        owner_id: Uuid,
        context_id: Uuid,
        kind: JobKind,
        total_items: u32,
        params: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            context_id,
            kind,
            status: JobStatus::Pending,
            total_items,
            completed_items: 0,
            failed_items: 0,
            params,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// A required string field from the parameter blob.
    ///
    /// A missing or empty field is a configuration error, not a retryable
    /// failure.
    pub fn required_param(&self, key: &str) -> Result<String, crate::error::PipelineError> {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                crate::error::PipelineError::Config(format!(
                    "job {} is missing required parameter `{key}`",
                    self.id
                ))
            })
    }
}

/// One unit of generation work within a [`Job`]: one page, or the single
/// hero reference sheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobItem {
    pub id: Uuid,
    pub job_id: Uuid,
    /// The page or hero this item generates for.
    pub target_id: Uuid,
    pub status: ItemStatus,
    /// Orchestrator-level re-queue count, distinct from the generator's own
    /// internal attempt loop.
    pub retry_count: u32,
    pub artifact_key: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobItem {
    pub fn new(job_id: Uuid, target_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            target_id,
            status: ItemStatus::Pending,
            retry_count: 0,
            artifact_key: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Who the generated pages are for. Drives line weight, complexity banding
/// and whether the safety classifier runs at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    Toddler,
    Kid,
    Teen,
    Adult,
}

impl Audience {
    /// Only the most sensitive tiers are screened; running the classifier
    /// for older audiences is wasted cost.
    pub fn requires_safety_screening(&self) -> bool {
        matches!(self, Audience::Toddler | Audience::Kid)
    }

    /// Audience-appropriate line weight and complexity wording baked into
    /// compiled prompts.
    pub fn style_band(&self) -> &'static str {
        match self {
            Audience::Toddler => "extra-thick outlines, very large simple shapes, minimal detail",
            Audience::Kid => "thick friendly outlines, simple shapes, low detail",
            Audience::Teen => "medium-weight outlines, moderate detail",
            Audience::Adult => "fine precise outlines, intricate detail",
        }
    }
}

impl std::fmt::Display for Audience {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Audience::Toddler => "toddler",
            Audience::Kid => "kid",
            Audience::Teen => "teen",
            Audience::Adult => "adult",
        };
        write!(f, "{s}")
    }
}

/// Physical output format of a page. Post-processing always returns a
/// bitmap at exactly these pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    /// US Letter at 300 dpi.
    Standard,
    Square,
}

impl SizeClass {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            SizeClass::Standard => (2550, 3300),
            SizeClass::Square => (2550, 2550),
        }
    }

    /// Aspect ratio hint passed to the synthesis service.
    pub fn aspect_ratio(&self) -> &'static str {
        match self {
            SizeClass::Standard => "3:4",
            SizeClass::Square => "1:1",
        }
    }
}

/// Synthesis model profile selected per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProfile {
    /// Fast and economical, good enough for simple compositions.
    Fast,
    /// Slower, higher-fidelity line work.
    Quality,
}

impl ModelProfile {
    pub fn api_name(&self) -> &'static str {
        match self {
            ModelProfile::Fast => "lineart-fast-v2",
            ModelProfile::Quality => "lineart-quality-v1",
        }
    }
}

/// Composition framing of a single page. The planner distributes these
/// across a batch so a book does not repeat itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Composition {
    CloseUp,
    FullBody,
    Action,
    Environment,
    Pattern,
}

impl std::fmt::Display for Composition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Composition::CloseUp => "close-up",
            Composition::FullBody => "full-body",
            Composition::Action => "action",
            Composition::Environment => "environment",
            Composition::Pattern => "pattern",
        };
        write!(f, "{s}")
    }
}

/// Planner output: one structured, rule-compliant prompt per pending item.
/// Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledSpec {
    /// Short human-readable scene label, e.g. "a fox napping under a tree".
    pub scene: String,
    pub composition: Composition,
    /// Fully compiled prompt with all hard style and audience constraints
    /// embedded.
    pub prompt: String,
    pub negative_prompt: String,
}

/// The in-memory result of one successful single-item generation, owned by
/// the invocation until handed to persistence.
#[derive(Debug, Clone)]
pub struct GeneratedArtifact {
    /// Finished PNG bytes at the target dimensions.
    pub bytes: Vec<u8>,
    pub seed: u64,
    /// 0-100, percentage of quality checks passed.
    pub quality_score: u8,
    pub quality_passed: bool,
    pub safety_passed: bool,
    /// Set when quality or safety did not cleanly pass; the artifact is
    /// kept but surfaced for manual review.
    pub needs_review: bool,
}

/// A durable snapshot of one generated page revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageVersion {
    pub id: Uuid,
    pub page_id: Uuid,
    pub version: u32,
    pub prompt: String,
    pub negative_prompt: String,
    pub seed: u64,
    pub quality_score: u8,
    pub needs_review: bool,
    /// Credits recorded against the job's reservation for this version.
    pub spend: u32,
    pub artifact_key: String,
    pub thumb_key: String,
    pub created_at: DateTime<Utc>,
}

/// The project a generation job belongs to; carries the style parameters
/// the planner needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub audience: Audience,
    pub size_class: SizeClass,
    pub model: ModelProfile,
    /// Recurring character attached to the project, if any.
    pub hero_id: Option<Uuid>,
    /// Optional style-anchor description carried into every prompt.
    pub style_anchor: Option<String>,
}

/// A recurring character. Its description is repeated verbatim across a
/// project's pages so the character stays recognizable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hero {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: String,
    pub ready: bool,
    pub sheet_key: Option<String>,
}
