//! Gemini `generateContent` client.
//!
//! Request path for every call:
//! 1. cancellation check
//! 2. throttle: at least `min_request_delay_ms` between two outgoing calls,
//!    shared by every worker using this service
//! 3. up to `max_retries` attempts; backoff 1s, 2s, 4s … between them
//! 4. strip ```` ```json ```` fences and decode with serde
//!
//! HTTP 429, 5xx, network errors and unusable bodies are retried. Other 4xx
//! responses fail immediately. The token is raced against the in-flight
//! request and the backoff sleep, so a cancelled run stops without waiting
//! for the network.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{decode, prompts, ReasoningService};
use crate::config::LlmConfig;
use crate::error::{WorkbenchError, WorkbenchResult};
use crate::models::{CorpusItem, EntryAnalysis, KeyInsights, ParsedEntry, RelevanceVerdict, Utterance};

pub struct GeminiService {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    max_retries: u32,
    throttle: Throttle,
}

enum AttemptError {
    Retryable(String),
    Fatal(String),
}

impl GeminiService {
    /// Build a client from `[llm]`, reading the key from `api_key_env`.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow!("{} not set", config.api_key_env))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &LlmConfig, api_key: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            anyhow::bail!("Gemini API key is empty");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/models/{}:generateContent",
                config.base_url.trim_end_matches('/'),
                config.model
            ),
            api_key,
            max_retries: config.max_retries.max(1),
            throttle: Throttle::new(Duration::from_millis(config.min_request_delay_ms)),
        })
    }

    async fn call<T: DeserializeOwned + Send>(
        &self,
        body: &Value,
        cancel: &CancellationToken,
    ) -> WorkbenchResult<T> {
        if cancel.is_cancelled() {
            return Err(WorkbenchError::Aborted);
        }
        self.throttle.wait(cancel).await?;

        let attempts = self.max_retries;
        let mut last_error = String::new();
        for attempt in 0..attempts {
            if cancel.is_cancelled() {
                return Err(WorkbenchError::Aborted);
            }
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(WorkbenchError::Aborted),
                outcome = self.attempt::<T>(body) => outcome,
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(AttemptError::Fatal(message)) => {
                    warn!(attempt = attempt + 1, error = %message, "gemini call rejected");
                    return Err(WorkbenchError::RemoteCallFailed {
                        attempts: attempt + 1,
                        message,
                    });
                }
                Err(AttemptError::Retryable(message)) => {
                    warn!(
                        attempt = attempt + 1,
                        attempts,
                        error = %message,
                        "gemini call failed"
                    );
                    last_error = message;
                }
            }

            if attempt + 1 < attempts {
                let delay = Duration::from_millis(1000u64 << attempt.min(5));
                tokio::select! {
                    _ = cancel.cancelled() => return Err(WorkbenchError::Aborted),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(WorkbenchError::RemoteCallFailed {
            attempts,
            message: last_error,
        })
    }

    async fn attempt<T: DeserializeOwned>(&self, body: &Value) -> Result<T, AttemptError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("Gemini API error {}: {}", status, text);
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                AttemptError::Retryable(message)
            } else {
                AttemptError::Fatal(message)
            });
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| AttemptError::Retryable(e.to_string()))?;
        let text = response_text(&json).unwrap_or_default();
        debug!(chars = text.len(), "gemini response received");
        decode(&text).map_err(|e| AttemptError::Retryable(e.to_string()))
    }
}

/// Concatenate the text parts of the first candidate.
fn response_text(json: &Value) -> Option<String> {
    let parts = json
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    Some(text)
}

/// Enforces a minimum spacing between outgoing requests. Callers queue on
/// the mutex, so the spacing holds across concurrent workers.
struct Throttle {
    min_delay: Duration,
    last: Mutex<Option<Instant>>,
}

impl Throttle {
    fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last: Mutex::new(None),
        }
    }

    async fn wait(&self, cancel: &CancellationToken) -> WorkbenchResult<()> {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_delay {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(WorkbenchError::Aborted),
                    _ = tokio::time::sleep(self.min_delay - elapsed) => {}
                }
            }
        }
        *last = Some(Instant::now());
        Ok(())
    }
}

#[async_trait]
impl ReasoningService for GeminiService {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn structure_chunk(
        &self,
        chunk: &str,
        protocol: &str,
        cancel: &CancellationToken,
    ) -> WorkbenchResult<Vec<Utterance>> {
        self.call(&prompts::structure_chunk(chunk, protocol), cancel)
            .await
    }

    async fn analyze_entries(
        &self,
        entries: &[ParsedEntry],
        corpus: &[CorpusItem],
        cancel: &CancellationToken,
    ) -> WorkbenchResult<Vec<EntryAnalysis>> {
        self.call(&prompts::analyze_entries(entries, corpus), cancel)
            .await
    }

    async fn check_relevance(
        &self,
        entry: &ParsedEntry,
        query: &str,
        cancel: &CancellationToken,
    ) -> WorkbenchResult<RelevanceVerdict> {
        self.call(&prompts::check_relevance(entry, query), cancel)
            .await
    }

    async fn synthesize_insights(
        &self,
        entries: &[ParsedEntry],
        top_n: usize,
        cancel: &CancellationToken,
    ) -> WorkbenchResult<KeyInsights> {
        self.call(&prompts::synthesize_insights(entries, top_n), cancel)
            .await
    }
}
