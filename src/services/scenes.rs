//! Scene planning: expanding a free-text idea into per-page scene labels.
//!
//! [`ScenePlanner`] is the seam for an LLM-backed expander. A rejection by
//! upstream moderation is a distinct outcome from a transport failure so
//! the orchestrator can fail the job without burning retries.
//! [`KeywordScenePlanner`] is the deterministic fallback used when no
//! external planner is available.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::Audience;

/// Scene planning failure modes.
#[derive(Debug, Error)]
pub enum SceneError {
    /// The idea itself was blocked by upstream moderation.
    #[error("idea rejected: {reason}")]
    SafetyRejected { reason: String },

    /// Transport or parsing failure while expanding the idea.
    #[error("scene planning failed: {0}")]
    Failed(String),
}

/// Expands one idea into `count` short scene labels.
#[async_trait]
pub trait ScenePlanner: Send + Sync {
    async fn scenes(
        &self,
        idea: &str,
        count: usize,
        audience: Audience,
    ) -> Result<Vec<String>, SceneError>;
}

/// Deterministic scene expansion from keyword templates. No external
/// calls, so it can never be safety-rejected.
pub struct KeywordScenePlanner;

/// Activity templates cycled across the requested count.
const ACTIVITIES: &[&str] = &[
    "standing proudly",
    "exploring a meadow",
    "playing with a ball",
    "taking a nap under a tree",
    "splashing in a puddle",
    "climbing a small hill",
    "having a picnic",
    "looking at the stars",
    "dancing in the rain",
    "making a new friend",
    "building something out of blocks",
    "flying a kite",
];

#[async_trait]
impl ScenePlanner for KeywordScenePlanner {
    async fn scenes(
        &self,
        idea: &str,
        count: usize,
        _audience: Audience,
    ) -> Result<Vec<String>, SceneError> {
        let idea = idea.trim();
        if idea.is_empty() {
            return Err(SceneError::Failed("idea is empty".into()));
        }

        let scenes = (0..count)
            .map(|i| format!("{idea} {}", ACTIVITIES[i % ACTIVITIES.len()]))
            .collect();
        Ok(scenes)
    }
}
