//! Safety gate: audience-tier policy around the content classifier.
//!
//! The classifier only runs for the most sensitive audience tiers; other
//! audiences are approved immediately with no external call. On classifier
//! transport failure the gate fails closed: unreviewed content never
//! passes on error.

use tracing::warn;

use crate::model::Audience;
use crate::services::safety::{Recommendation, SafetyClassifier, SafetyVerdict};

/// Screen one generated image for the given audience.
pub async fn screen(
    classifier: &dyn SafetyClassifier,
    image_ref: &str,
    audience: Audience,
) -> SafetyVerdict {
    if !audience.requires_safety_screening() {
        return SafetyVerdict::approve();
    }

    match classifier.classify_image(image_ref, audience).await {
        Ok(verdict) => verdict,
        Err(e) => {
            warn!(%audience, error = %e, "safety classifier unavailable, failing closed");
            SafetyVerdict {
                safe: false,
                issues: vec![format!("classifier unavailable: {e}")],
                recommendation: Recommendation::Flag,
            }
        }
    }
}
