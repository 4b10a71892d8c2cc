//! Single-item generator: one compiled prompt in, one finished artifact out.
//!
//! Wraps synthesis, download, post-processing, the quality gate and the
//! safety gate in an internal attempt loop with escalating backoff. This
//! loop absorbs transient service blips; systemic failures surface to the
//! orchestrator, which owns the separate item-level re-queue budget.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::GenerateError;
use crate::model::{Audience, GeneratedArtifact, ModelProfile, SizeClass};
use crate::services::safety::{Recommendation, SafetyClassifier};
use crate::services::synthesis::{ImageSynthesizer, SynthesisRequest};
use crate::{postprocess, quality, safety};

/// Inputs for one generation call.
#[derive(Debug, Clone)]
pub struct GenerateRequest<'a> {
    pub prompt: &'a str,
    pub negative_prompt: &'a str,
    pub audience: Audience,
    pub model: ModelProfile,
    pub size: SizeClass,
    /// Internal retries after the first attempt; total attempts are
    /// `max_retries + 1`.
    pub max_retries: u32,
}

/// Produces one finished artifact per call.
pub struct Generator {
    synthesizer: Arc<dyn ImageSynthesizer>,
    classifier: Arc<dyn SafetyClassifier>,
    config: PipelineConfig,
}

impl Generator {
    pub fn new(
        synthesizer: Arc<dyn ImageSynthesizer>,
        classifier: Arc<dyn SafetyClassifier>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            synthesizer,
            classifier,
            config,
        }
    }

    /// Run the attempt loop to a success or a terminal failure.
    pub async fn generate(
        &self,
        req: &GenerateRequest<'_>,
    ) -> Result<GeneratedArtifact, GenerateError> {
        // Input validation fails fast: no retry, no external call.
        if req.prompt.trim().is_empty() {
            return Err(GenerateError::Validation("prompt must not be empty".into()));
        }
        if req.negative_prompt.trim().is_empty() {
            return Err(GenerateError::Validation(
                "negative prompt must not be empty".into(),
            ));
        }
        if req.max_retries > self.config.retry_hard_cap {
            return Err(GenerateError::Validation(format!(
                "max_retries {} exceeds hard cap {}",
                req.max_retries, self.config.retry_hard_cap
            )));
        }

        let synth_req = SynthesisRequest {
            prompt: req.prompt.to_string(),
            negative_prompt: req.negative_prompt.to_string(),
            model: req.model.api_name().to_string(),
            aspect_ratio: req.size.aspect_ratio().to_string(),
            seed: None,
        };

        let mut attempt: u32 = 0;
        loop {
            let last_attempt = attempt >= req.max_retries;

            let output = match self.synthesizer.generate(&synth_req).await {
                Ok(o) => o,
                Err(e) => {
                    let err = GenerateError::Synthesis(e);
                    if last_attempt {
                        return Err(err);
                    }
                    attempt = self.backoff(attempt, &err).await;
                    continue;
                }
            };

            let raw = match self.synthesizer.download(&output.image_url).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    let err = GenerateError::Download(e);
                    if last_attempt {
                        return Err(err);
                    }
                    attempt = self.backoff(attempt, &err).await;
                    continue;
                }
            };

            let processed = match postprocess::process(&raw, req.size) {
                Ok(bytes) => bytes,
                Err(err) => {
                    if last_attempt {
                        return Err(err);
                    }
                    attempt = self.backoff(attempt, &err).await;
                    continue;
                }
            };

            // Our own encoder produced these bytes; a decode failure here
            // means the cleanup contract is broken.
            let report = quality::check(&processed)
                .map_err(|e| GenerateError::Postprocess(e.to_string()))?;

            // Safety screening runs against the raw service image, before
            // post-processing touched it.
            let verdict =
                safety::screen(self.classifier.as_ref(), &output.image_url, req.audience).await;

            if !verdict.safe
                && verdict.recommendation == Recommendation::Regenerate
                && !last_attempt
            {
                // Advisory regenerate: spend a retry rather than surface
                // a flagged artifact.
                debug!(
                    attempt,
                    issues = ?verdict.issues,
                    "regenerating after safety verdict"
                );
                let delay = self.config.backoff_delay_ms(attempt);
                sleep(Duration::from_millis(delay)).await;
                attempt += 1;
                continue;
            }

            return Ok(GeneratedArtifact {
                bytes: processed,
                seed: output.seed,
                quality_score: report.score,
                quality_passed: report.passed,
                safety_passed: verdict.safe,
                needs_review: !report.passed || !verdict.safe,
            });
        }
    }

    async fn backoff(&self, attempt: u32, err: &GenerateError) -> u32 {
        let delay = self.config.backoff_delay_ms(attempt);
        debug!(attempt, delay_ms = delay, error = %err, "generation attempt failed, backing off");
        sleep(Duration::from_millis(delay)).await;
        attempt + 1
    }
}
