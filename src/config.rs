//! Pipeline configuration loaded from `pageforge.toml`.
//!
//! Values absent from the file fall back to sensible defaults. The
//! `SYNTHESIS_API_KEY` environment variable takes precedence over the file
//! for the API key.

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;

/// Top-level configuration for the generation pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// API key for the synthesis service.
    #[serde(default)]
    pub api_key: String,

    /// Base URL of the synthesis service.
    #[serde(default = "default_synthesis_url")]
    pub synthesis_url: String,

    /// Items processed concurrently per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum orchestrator-level re-queues per item.
    #[serde(default = "default_item_retry_limit")]
    pub item_retry_limit: u32,

    /// Maximum generator-internal retries per call (attempts = retries + 1).
    #[serde(default = "default_generation_retry_limit")]
    pub generation_retry_limit: u32,

    /// Hard cap on generator retries regardless of caller input.
    #[serde(default = "default_retry_hard_cap")]
    pub retry_hard_cap: u32,

    /// Base delay in milliseconds for the generator's escalating backoff.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Ceiling on a single backoff delay in milliseconds.
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

fn default_synthesis_url() -> String {
    "https://api.synthesis.example.com".to_string()
}

fn default_batch_size() -> usize {
    3
}

fn default_item_retry_limit() -> u32 {
    2
}

fn default_generation_retry_limit() -> u32 {
    2
}

fn default_retry_hard_cap() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_cap_ms() -> u64 {
    4000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            synthesis_url: default_synthesis_url(),
            batch_size: default_batch_size(),
            item_retry_limit: default_item_retry_limit(),
            generation_retry_limit: default_generation_retry_limit(),
            retry_hard_cap: default_retry_hard_cap(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from `pageforge.toml` in the current directory,
    /// falling back to defaults if the file does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("pageforge.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<PipelineConfig>(&contents)?
        } else {
            Self::default()
        };

        // Environment takes precedence over the file for the API key.
        if let Ok(key) = std::env::var("SYNTHESIS_API_KEY")
            && !key.is_empty()
        {
            config.api_key = key;
        }

        Ok(config)
    }

    /// Backoff delay for a generator attempt index: base, then doubling,
    /// capped.
    pub fn backoff_delay_ms(&self, attempt: u32) -> u64 {
        let delay = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        delay.min(self.backoff_cap_ms)
    }
}
