//! Crate-wide error taxonomy.
//!
//! Job-level failures are [`PipelineError`]; per-item generation failures
//! are [`GenerateError`]. Error categories for observability are derived
//! from the typed variants, never from message substrings.

use thiserror::Error;
use uuid::Uuid;

use crate::services::synthesis::SynthesisError;

/// Job-level failures. Any of these fails the whole job; billing
/// reconciliation still runs before the orchestrator returns.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    /// Missing or malformed job metadata. Fatal, never retried, consumes
    /// no generation attempts.
    #[error("configuration error: {0}")]
    Config(String),

    /// The idea itself was rejected by upstream moderation. Distinct from
    /// a generic planning failure so callers can render it differently.
    #[error("safety: {0}")]
    SafetyRejected(String),

    #[error("planning failed: {0}")]
    Planning(String),

    #[error("record store error: {0}")]
    Store(#[from] StoreError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl PipelineError {
    /// Message stored on the failed job record. Safety rejections keep
    /// their `safety:` tag so the caller can tell them apart.
    pub fn job_message(&self) -> String {
        self.to_string()
    }
}

/// Failure of a record-store operation.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StoreError(pub String);

/// Failure of a ledger operation.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct LedgerError(pub String);

/// Failure of an object-store write.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ObjectStoreError(pub String);

/// Terminal failure of one single-item generation call.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// Bad input shape. Fails fast with no retry and no external call.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The synthesis service failed on the final allowed attempt.
    #[error("synthesis failed: {0}")]
    Synthesis(#[source] SynthesisError),

    /// Fetching the generated image bytes failed on the final attempt.
    #[error("download failed: {0}")]
    Download(#[source] SynthesisError),

    /// The fixed cleanup utility could not produce a conforming bitmap.
    #[error("post-processing failed: {0}")]
    Postprocess(String),
}

impl GenerateError {
    /// Whether the orchestrator may re-queue the item.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, GenerateError::Validation(_))
    }

    /// Coarse category stored alongside the item error message. For
    /// observability only; never consulted for control flow.
    pub fn category(&self) -> ErrorCategory {
        match self {
            GenerateError::Validation(_) => ErrorCategory::Unknown,
            GenerateError::Synthesis(e) | GenerateError::Download(e) => match e {
                SynthesisError::Network(_) | SynthesisError::RateLimited { .. } => {
                    ErrorCategory::Network
                }
                SynthesisError::Api { .. } | SynthesisError::Parse(_) => {
                    ErrorCategory::AiGeneration
                }
            },
            GenerateError::Postprocess(_) => ErrorCategory::Unknown,
        }
    }

    /// Tagged message in the shape `CATEGORY: detail`, as stored on the
    /// item record.
    pub fn item_message(&self) -> String {
        format!("{}: {self}", self.category())
    }
}

/// Observability bucket for a terminal generation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    AiGeneration,
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::Network => "NETWORK",
            ErrorCategory::AiGeneration => "AI_GENERATION",
            ErrorCategory::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}
