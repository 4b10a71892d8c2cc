//! Content-safety classifier seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Audience;

/// What the classifier recommends doing with the checked content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Approve,
    /// Advisory: the caller may retry generation while budget remains.
    Regenerate,
    /// Hold for manual review.
    Flag,
}

/// Classifier verdict for one image or text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub safe: bool,
    pub issues: Vec<String>,
    pub recommendation: Recommendation,
}

impl SafetyVerdict {
    pub fn approve() -> Self {
        Self {
            safe: true,
            issues: Vec::new(),
            recommendation: Recommendation::Approve,
        }
    }
}

/// Transport failure while classifying.
#[derive(Debug, Error)]
#[error("classifier error: {0}")]
pub struct ClassifierError(pub String);

/// The classifier seam. Implementations wrap whatever moderation backend
/// is in use.
#[async_trait]
pub trait SafetyClassifier: Send + Sync {
    async fn classify_image(
        &self,
        image_ref: &str,
        audience: Audience,
    ) -> Result<SafetyVerdict, ClassifierError>;
}
