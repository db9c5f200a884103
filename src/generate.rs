//! Outbound text generation with a resilience policy.
//!
//! `TextGenerator` is the injected capability boundary toward the upstream
//! provider; `GeminiGenerator` is the production implementation speaking the
//! Google generative-language wire protocol.  `ResilientCaller` owns the
//! policy: per-attempt deadlines, bounded retries with exponential backoff,
//! and the classification of which failures are worth retrying.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::error::ApiError;
use crate::validate::SanitizedPrompt;

pub const SUMMARY_MAX_TOKENS: u32 = 512;
pub const PROBE_MAX_TOKENS: u32 = 10;
pub const GENERATION_TEMPERATURE: f32 = 0.5;

/// Fixed text sent on health probes.
const PROBE_PROMPT: &str = "Test";

#[derive(Debug, Error, Clone)]
pub enum GenerateError {
    /// Connection-level failure, including per-attempt timeouts.
    #[error("network error: {0}")]
    Network(String),
    /// Upstream answered with a non-success status.
    #[error("upstream returned status {status}")]
    Status { status: u16, message: Option<String> },
    /// Upstream answered 2xx but the first candidate text was empty or absent.
    #[error("upstream returned no candidate text")]
    EmptyCandidate,
}

#[async_trait::async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate text for `prompt`. Implementations must honor `timeout` as a
    /// hard per-call deadline and must never return an empty string: a
    /// missing or empty candidate is `GenerateError::EmptyCandidate`.
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
        timeout: Duration,
    ) -> Result<String, GenerateError>;
}

/// Retry schedule and eligibility for upstream calls.
///
/// Eligible failures are connection-level errors, 429, and any 5xx. Other
/// client errors indicate a malformed request and are surfaced immediately.
/// Delays double per attempt: base, 2*base, 4*base, ...
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn should_retry(&self, err: &GenerateError) -> bool {
        match err {
            GenerateError::Network(_) => true,
            GenerateError::Status { status, .. } => {
                *status == 429 || (500..=599).contains(status)
            }
            GenerateError::EmptyCandidate => false,
        }
    }

    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// Wraps a `TextGenerator` with the retry/backoff/deadline policy and the
/// translation of exhausted failures into the error taxonomy.
pub struct ResilientCaller {
    generator: Arc<dyn TextGenerator>,
    policy: RetryPolicy,
    call_timeout: Duration,
    probe_timeout: Duration,
}

impl ResilientCaller {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        policy: RetryPolicy,
        call_timeout: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            generator,
            policy,
            call_timeout,
            probe_timeout,
        }
    }

    /// Invoke the generator for a summary. Transient failures are retried per
    /// policy; the client only ever sees the final outcome.
    pub async fn invoke(&self, prompt: &SanitizedPrompt) -> Result<String, ApiError> {
        let mut attempt: u32 = 0;
        loop {
            match self
                .generator
                .generate(
                    prompt.text(),
                    SUMMARY_MAX_TOKENS,
                    GENERATION_TEMPERATURE,
                    self.call_timeout,
                )
                .await
            {
                Ok(text) => return Ok(text),
                Err(err) => {
                    if attempt >= self.policy.max_retries || !self.policy.should_retry(&err) {
                        return Err(Self::exhausted(err));
                    }
                    let delay = self.policy.backoff_delay(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "generation attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Single short-deadline probe used by the health endpoint. Never retried.
    pub async fn probe(&self) -> Result<(), GenerateError> {
        self.generator
            .generate(
                PROBE_PROMPT,
                PROBE_MAX_TOKENS,
                GENERATION_TEMPERATURE,
                self.probe_timeout,
            )
            .await
            .map(|_| ())
    }

    /// Wrap the last observed failure, preferring the upstream's reported
    /// message over the low-level one.
    fn exhausted(err: GenerateError) -> ApiError {
        let details = match &err {
            GenerateError::Status {
                message: Some(msg), ..
            } => msg.clone(),
            other => other.to_string(),
        };
        ApiError::ExternalApi {
            message: "Failed to generate summary".into(),
            details: Some(details),
        }
    }
}

/// Production generator speaking the Google generative-language protocol.
pub struct GeminiGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl GeminiGenerator {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            base_url,
            api_key,
        }
    }

    fn endpoint(&self) -> String {
        match &self.api_key {
            Some(key) => format!("{}?key={}", self.base_url, key),
            None => self.base_url.clone(),
        }
    }
}

#[async_trait::async_trait]
impl TextGenerator for GeminiGenerator {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
        timeout: Duration,
    ) -> Result<String, GenerateError> {
        let body = serde_json::json!({
            "contents": [{
                "parts": [{ "text": prompt }]
            }],
            "generationConfig": {
                "temperature": temperature,
                "maxOutputTokens": max_tokens,
            }
        });
        let resp = self
            .client
            .post(self.endpoint())
            .header("content-type", "application/json")
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    GenerateError::Network(format!(
                        "request timed out after {}ms",
                        timeout.as_millis()
                    ))
                } else {
                    GenerateError::Network(err.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            // Pull the provider's message out of its error body when present.
            let message = resp
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| {
                    v.pointer("/error/message")
                        .and_then(|m| m.as_str())
                        .map(|m| m.to_string())
                });
            return Err(GenerateError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|err| GenerateError::Network(err.to_string()))?;
        match json
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|t| t.as_str())
        {
            Some(text) if !text.is_empty() => Ok(text.to_string()),
            _ => Err(GenerateError::EmptyCandidate),
        }
    }
}
