//! Remote reasoning collaborator.
//!
//! Defines the [`ReasoningService`] trait the orchestrators talk to and its
//! implementations:
//! - **[`DisabledService`]**: fails every call with
//!   [`WorkbenchError::NotConfigured`]; used when no model is configured.
//! - **[`GeminiService`]**: calls the Gemini `generateContent` endpoint with
//!   throttling, retry and backoff.
//!
//! Use [`create_service`] to pick one from the `[llm]` configuration.
//!
//! Every call takes a [`CancellationToken`]. Implementations must fail with
//! [`WorkbenchError::Aborted`] instead of touching the network once the
//! token is cancelled.

pub mod gemini;
pub mod prompts;

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::config::LlmConfig;
use crate::error::{WorkbenchError, WorkbenchResult};
use crate::models::{CorpusItem, EntryAnalysis, KeyInsights, ParsedEntry, RelevanceVerdict, Utterance};

pub use gemini::GeminiService;

/// The operations the workbench delegates to a language model.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Provider identifier, e.g. `"gemini"`.
    fn name(&self) -> &str;

    /// Split one chunk of protocol text into speaker utterances.
    async fn structure_chunk(
        &self,
        chunk: &str,
        protocol: &str,
        cancel: &CancellationToken,
    ) -> WorkbenchResult<Vec<Utterance>>;

    /// Summarise and categorise a batch of records against a catalogue.
    async fn analyze_entries(
        &self,
        entries: &[ParsedEntry],
        corpus: &[CorpusItem],
        cancel: &CancellationToken,
    ) -> WorkbenchResult<Vec<EntryAnalysis>>;

    async fn check_relevance(
        &self,
        entry: &ParsedEntry,
        query: &str,
        cancel: &CancellationToken,
    ) -> WorkbenchResult<RelevanceVerdict>;

    /// Produce a summary and the `top_n` most significant insights.
    async fn synthesize_insights(
        &self,
        entries: &[ParsedEntry],
        top_n: usize,
        cancel: &CancellationToken,
    ) -> WorkbenchResult<KeyInsights>;
}

/// Stand-in used when `llm.provider = "disabled"`.
pub struct DisabledService;

impl DisabledService {
    fn refuse<T>(&self) -> WorkbenchResult<T> {
        Err(WorkbenchError::NotConfigured(
            "kein Sprachmodell konfiguriert (llm.provider = \"disabled\").".to_string(),
        ))
    }
}

#[async_trait]
impl ReasoningService for DisabledService {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn structure_chunk(
        &self,
        _chunk: &str,
        _protocol: &str,
        _cancel: &CancellationToken,
    ) -> WorkbenchResult<Vec<Utterance>> {
        self.refuse()
    }

    async fn analyze_entries(
        &self,
        _entries: &[ParsedEntry],
        _corpus: &[CorpusItem],
        _cancel: &CancellationToken,
    ) -> WorkbenchResult<Vec<EntryAnalysis>> {
        self.refuse()
    }

    async fn check_relevance(
        &self,
        _entry: &ParsedEntry,
        _query: &str,
        _cancel: &CancellationToken,
    ) -> WorkbenchResult<RelevanceVerdict> {
        self.refuse()
    }

    async fn synthesize_insights(
        &self,
        _entries: &[ParsedEntry],
        _top_n: usize,
        _cancel: &CancellationToken,
    ) -> WorkbenchResult<KeyInsights> {
        self.refuse()
    }
}

/// Create the [`ReasoningService`] named by `config.provider`.
///
/// | Config Value | Service |
/// |--------------|---------|
/// | `"disabled"` | [`DisabledService`] |
/// | `"gemini"`   | [`GeminiService`] (needs the API key variable) |
pub fn create_service(config: &LlmConfig) -> Result<Arc<dyn ReasoningService>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledService)),
        "gemini" => Ok(Arc::new(GeminiService::new(config)?)),
        other => bail!("Unknown llm provider: '{}'", other),
    }
}

/// Remove an optional Markdown code fence (```` ```json ```` … ```` ``` ````)
/// around a model response.
pub fn strip_fences(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        body = rest.strip_prefix("json").unwrap_or(rest).trim_start();
    }
    if let Some(rest) = body.strip_suffix("```") {
        body = rest.trim_end();
    }
    body
}

/// Decode a model response body, tolerating code fences.
pub fn decode<T: DeserializeOwned>(text: &str) -> WorkbenchResult<T> {
    let body = strip_fences(text);
    if body.is_empty() {
        return Err(WorkbenchError::InvalidResponse(
            "The model returned an empty response.".to_string(),
        ));
    }
    serde_json::from_str(body).map_err(|e| {
        WorkbenchError::InvalidResponse(format!("Model returned a non-JSON response ({})", e))
    })
}
