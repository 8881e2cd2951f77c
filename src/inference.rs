//! Shared HTTP transport for the external inference service.
//!
//! Both the embedding and the completion client post JSON to an
//! Ollama-compatible endpoint through [`InferenceTransport::post_json`],
//! which applies a per-call timeout and retries transient failures.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Timeouts → fail immediately, so one call never waits longer than the
//!   configured timeout
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use tracing::{debug, warn};

/// Failure talking to the inference service.
///
/// Callers never propagate this past their own boundary: the embedding
/// client degrades to a zero vector and the completion client turns it
/// into response text.
#[derive(Debug)]
pub enum InferenceError {
    /// Connection, timeout, or body-read failure.
    Transport(String),
    /// The service answered with a non-success status.
    Status { status: u16, body: String },
    /// The response body did not have the expected shape.
    Malformed(String),
}

impl std::fmt::Display for InferenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InferenceError::Transport(e) => write!(f, "inference request failed: {}", e),
            InferenceError::Status { status, body } => {
                write!(f, "inference service returned status {}: {}", status, body)
            }
            InferenceError::Malformed(e) => write!(f, "malformed inference response: {}", e),
        }
    }
}

impl std::error::Error for InferenceError {}

/// A `reqwest` client bound to one base URL, timeout, and retry budget.
#[derive(Clone)]
pub struct InferenceTransport {
    base_url: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl InferenceTransport {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::Transport(e.to_string()))?;
        let base_url: String = base_url.into();
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            max_retries,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `body` to `{base_url}{path}` and return the parsed JSON response.
    pub async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, InferenceError> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(%url, attempt, delay_secs = delay.as_secs(), "retrying inference call");
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&url).json(body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response
                            .json::<serde_json::Value>()
                            .await
                            .map_err(|e| InferenceError::Malformed(e.to_string()));
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = InferenceError::Status {
                        status: status.as_u16(),
                        body: body_text,
                    };

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(%url, status = status.as_u16(), "transient inference error");
                        last_err = Some(err);
                        continue;
                    }

                    return Err(err);
                }
                Err(e) if e.is_timeout() => {
                    warn!(%url, error = %e, "inference call timed out");
                    return Err(InferenceError::Transport(e.to_string()));
                }
                Err(e) => {
                    warn!(%url, error = %e, "inference transport error");
                    last_err = Some(InferenceError::Transport(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| InferenceError::Transport("request failed after retries".into())))
    }
}
