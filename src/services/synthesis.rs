//! Image synthesis service client.
//!
//! [`ImageSynthesizer`] is the seam the generator calls through;
//! [`HttpSynthesisClient`] is the production implementation. Errors are
//! typed so downstream code never inspects message strings.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the synthesis service or the transport beneath it.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// The server returned HTTP 429. `retry_after_ms` is how long the
    /// server asked us to wait before retrying.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Any other non-success HTTP response from the service.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Underlying network failure (DNS, refused connection, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The service responded but the body was not the expected shape.
    #[error("failed to parse synthesis response: {0}")]
    Parse(String),
}

/// One synthesis request: a compiled prompt and its constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub prompt: String,
    pub negative_prompt: String,
    /// Model identifier, e.g. "lineart-fast-v2".
    pub model: String,
    /// Aspect ratio hint, e.g. "3:4".
    pub aspect_ratio: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Successful synthesis response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisOutput {
    /// Temporary URL of the raw generated image.
    pub image_url: String,
    /// Seed the service actually used.
    pub seed: u64,
}

/// The synthesis seam: generate one raw image, then fetch its bytes.
#[async_trait]
pub trait ImageSynthesizer: Send + Sync {
    async fn generate(&self, req: &SynthesisRequest) -> Result<SynthesisOutput, SynthesisError>;

    async fn download(&self, image_url: &str) -> Result<Vec<u8>, SynthesisError>;
}

/// HTTP client for the synthesis service.
pub struct HttpSynthesisClient {
    api_key: String,
    client: Client,
    base_url: String,
}

impl HttpSynthesisClient {
    /// Create a client pointing at a custom base URL (useful for testing).
    pub fn new(api_key: String, base_url: String) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .expect("failed to build HTTP client");
        Self {
            api_key,
            client,
            base_url,
        }
    }
}

#[async_trait]
impl ImageSynthesizer for HttpSynthesisClient {
    async fn generate(&self, req: &SynthesisRequest) -> Result<SynthesisOutput, SynthesisError> {
        let response = self
            .client
            .post(format!("{}/v1/generate", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(req)
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(SynthesisError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(SynthesisError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<SynthesisOutput>()
            .await
            .map_err(|e| SynthesisError::Parse(e.to_string()))
    }

    async fn download(&self, image_url: &str) -> Result<Vec<u8>, SynthesisError> {
        let response = self.client.get(image_url).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(SynthesisError::Api {
                status: status.as_u16(),
                message: format!("image download failed for {image_url}"),
            });
        }

        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}
