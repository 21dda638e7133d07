//! Parsing orchestrator.
//!
//! Drives one parse run from raw protocol text to a persisted dataset:
//!
//! ```text
//! strip page markers → split_text → pool(structure_chunk) → sort
//!   → collate → finalize → Dataset::replace_all
//! ```
//!
//! A run is all-or-nothing. Cancellation ends it in [`ParseState::Aborted`],
//! any other error in [`ParseState::Failed`]; neither touches the stored
//! dataset. Each run reports exactly one terminal status message.

use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::chunk::split_text;
use crate::collate::{collate, sort_chronologically};
use crate::config::ParsingConfig;
use crate::dataset::Dataset;
use crate::error::{WorkbenchError, WorkbenchResult};
use crate::finalize::finalize;
use crate::models::Utterance;
use crate::pool::{run_pool, PoolHooks, Progress};
use crate::reasoning::ReasoningService;
use crate::status::StatusSink;

static PAGE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"==Start of OCR for page \d+==\n?|==End of OCR for page \d+==(?:\n\n?)?")
        .expect("valid page marker pattern")
});

/// Remove the page framing lines the OCR step writes around each page.
pub fn strip_page_markers(text: &str) -> String {
    PAGE_MARKER.replace_all(text, "").into_owned()
}

/// Lifecycle of the orchestrator:
/// `Idle -> Running -> {Completed | Aborted | Failed} -> Idle`.
///
/// A terminal state is held until [`ParsingOrchestrator::acknowledge`] or
/// the start of the next run returns it to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    Idle,
    Running,
    Completed,
    Aborted,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParseSummary {
    pub persisted_count: usize,
    pub duplicates_removed: usize,
}

pub struct ParsingOrchestrator {
    service: Arc<dyn ReasoningService>,
    dataset: Arc<Dataset>,
    status: Arc<dyn StatusSink>,
    config: ParsingConfig,
    state: Mutex<ParseState>,
}

impl ParsingOrchestrator {
    pub fn new(
        service: Arc<dyn ReasoningService>,
        dataset: Arc<Dataset>,
        status: Arc<dyn StatusSink>,
        config: ParsingConfig,
    ) -> Self {
        Self {
            service,
            dataset,
            status,
            config,
            state: Mutex::new(ParseState::Idle),
        }
    }

    pub fn state(&self) -> ParseState {
        self.state.lock().map(|s| *s).unwrap_or(ParseState::Failed)
    }

    /// Take the outcome of the last run and return to `Idle`.
    ///
    /// A running parse is left alone and reported as `Running`.
    pub fn acknowledge(&self) -> ParseState {
        match self.state.lock() {
            Ok(mut state) => match *state {
                ParseState::Running => ParseState::Running,
                finished => {
                    *state = ParseState::Idle;
                    finished
                }
            },
            Err(_) => ParseState::Failed,
        }
    }

    fn set_state(&self, next: ParseState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }

    /// Parse `raw_text` for protocol `protocol` and replace the stored
    /// dataset with the result.
    pub async fn parse(
        &self,
        raw_text: &str,
        protocol: &str,
        cancel: &CancellationToken,
    ) -> WorkbenchResult<ParseSummary> {
        self.acknowledge();
        self.set_state(ParseState::Running);
        let outcome = self.run(raw_text, protocol, cancel).await;

        match &outcome {
            Ok(summary) => {
                info!(
                    protocol,
                    persisted = summary.persisted_count,
                    duplicates = summary.duplicates_removed,
                    "parse completed"
                );
                self.set_state(ParseState::Completed);
                self.status.show_status(&format!(
                    "{} Einträge verarbeitet. ({} Duplikate entfernt)",
                    summary.persisted_count, summary.duplicates_removed
                ));
            }
            Err(e) if e.is_aborted() => {
                info!(protocol, "parse aborted");
                self.set_state(ParseState::Aborted);
                self.status.show_status("Parsen vom Benutzer abgebrochen.");
            }
            Err(e) => {
                warn!(protocol, error = %e, "parse failed");
                self.set_state(ParseState::Failed);
                self.status
                    .show_error(&format!("Parsen fehlgeschlagen: {}", e));
            }
        }
        outcome
    }

    async fn run(
        &self,
        raw_text: &str,
        protocol: &str,
        cancel: &CancellationToken,
    ) -> WorkbenchResult<ParseSummary> {
        let cleaned = strip_page_markers(raw_text);
        if cleaned.trim().is_empty() {
            return Err(WorkbenchError::EmptyInput);
        }

        let chunks = split_text(&cleaned, self.config.chunk_size);
        info!(protocol, chunks = chunks.len(), "parse started");
        self.status.show_loading("Parse... 0% abgeschlossen.");

        let service = self.service.as_ref();
        let status = self.status.as_ref();
        let mut found = 0usize;
        let per_chunk = run_pool(
            chunks,
            self.config.workers,
            |chunk: String, _index| async move {
                if cancel.is_cancelled() {
                    return Err(WorkbenchError::Aborted);
                }
                service.structure_chunk(&chunk, protocol, cancel).await
            },
            PoolHooks::new()
                .on_result(|batch: &Vec<Utterance>| found += batch.len())
                .on_progress(move |p: Progress| {
                    status.show_loading(&format!("Parse... {}% abgeschlossen.", p.percent()))
                }),
        )
        .await?;

        if cancel.is_cancelled() {
            return Err(WorkbenchError::Aborted);
        }
        if found == 0 {
            return Err(WorkbenchError::NoUsableEntries);
        }

        // Flatten in chunk order so equal sort keys resolve the same way on
        // every run, whatever order the chunks completed in.
        let mut utterances: Vec<Utterance> = per_chunk.into_iter().flatten().collect();
        sort_chronologically(&mut utterances);
        let collated = collate(&utterances);
        let finalized = finalize(collated);

        self.dataset.replace_all(&finalized.entries).await?;

        Ok(ParseSummary {
            persisted_count: finalized.entries.len(),
            duplicates_removed: finalized.duplicates_removed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CorpusItem, EntryAnalysis, KeyInsights, ParsedEntry, RelevanceVerdict, TYPE_ANSWER,
        TYPE_QUESTION,
    };
    use crate::status::{RecordingStatus, StatusKind};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;

    /// Emits one question/answer pair per chunk, on the page named by the
    /// chunk's first word.
    struct ScriptedService {
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl ReasoningService for ScriptedService {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn structure_chunk(
            &self,
            chunk: &str,
            protocol: &str,
            cancel: &CancellationToken,
        ) -> WorkbenchResult<Vec<Utterance>> {
            if cancel.is_cancelled() {
                return Err(WorkbenchError::Aborted);
            }
            if self.fail_on.is_some_and(|m| chunk.contains(m)) {
                return Err(WorkbenchError::RemoteCallFailed {
                    attempts: 3,
                    message: "503".into(),
                });
            }
            let page = chunk.split_whitespace().next().unwrap_or("0").to_string();
            if page == "leer" {
                return Ok(Vec::new());
            }
            let reference = format!("WP{}/{}", protocol, page);
            Ok(vec![
                Utterance {
                    id: 1,
                    speaker: "Abg. X".into(),
                    role: "Fragesteller".into(),
                    kind: TYPE_QUESTION.into(),
                    content: format!("Frage {}", page),
                    source_reference: reference.clone(),
                },
                Utterance {
                    id: 2,
                    speaker: "Y".into(),
                    role: "Zeuge".into(),
                    kind: TYPE_ANSWER.into(),
                    content: format!("Antwort {}", page),
                    source_reference: reference,
                },
            ])
        }

        async fn analyze_entries(
            &self,
            _: &[ParsedEntry],
            _: &[CorpusItem],
            _: &CancellationToken,
        ) -> WorkbenchResult<Vec<EntryAnalysis>> {
            Ok(Vec::new())
        }

        async fn check_relevance(
            &self,
            _: &ParsedEntry,
            _: &str,
            _: &CancellationToken,
        ) -> WorkbenchResult<RelevanceVerdict> {
            Ok(RelevanceVerdict::irrelevant())
        }

        async fn synthesize_insights(
            &self,
            _: &[ParsedEntry],
            _: usize,
            _: &CancellationToken,
        ) -> WorkbenchResult<KeyInsights> {
            Err(WorkbenchError::NotConfigured("scripted".into()))
        }
    }

    async fn setup(
        fail_on: Option<&'static str>,
    ) -> (ParsingOrchestrator, Arc<Dataset>, Arc<RecordingStatus>) {
        let dataset = Arc::new(Dataset::open(Arc::new(InMemoryStore::new())).await.unwrap());
        let status = Arc::new(RecordingStatus::new());
        let config = ParsingConfig {
            chunk_size: 12,
            workers: 2,
        };
        let orchestrator = ParsingOrchestrator::new(
            Arc::new(ScriptedService { fail_on }),
            dataset.clone(),
            status.clone(),
            config,
        );
        (orchestrator, dataset, status)
    }

    #[test]
    fn strips_ocr_page_frames() {
        let text = "==Start of OCR for page 1==\nHallo\n==End of OCR for page 1==\n\n==Start of OCR for page 2==\nWelt\n==End of OCR for page 2==\n\n";
        assert_eq!(strip_page_markers(text), "Hallo\nWelt\n");
    }

    #[tokio::test]
    async fn parses_chunks_into_sorted_records() {
        let (orchestrator, dataset, status) = setup(None).await;
        // Three chunks of at most 12 chars: pages 3, 1, 2.
        let summary = orchestrator
            .parse("3 aaaaaaaa\n1 bbbbbbbb\n2 cccccccc", "20", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            summary,
            ParseSummary {
                persisted_count: 3,
                duplicates_removed: 0
            }
        );
        let entries = dataset.entries();
        let refs: Vec<&str> = entries.iter().map(|e| e.source_reference.as_str()).collect();
        assert_eq!(refs, vec!["WP20/1", "WP20/2", "WP20/3"]);
        assert_eq!(entries[0].answer.as_deref(), Some("Antwort 1"));
        assert_eq!(orchestrator.state(), ParseState::Completed);

        let terminal = status.terminal();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].message, "3 Einträge verarbeitet. (0 Duplikate entfernt)");
        assert!(status
            .messages()
            .iter()
            .any(|m| m.message == "Parse... 100% abgeschlossen."));
    }

    #[tokio::test]
    async fn blank_input_is_rejected() {
        let (orchestrator, dataset, status) = setup(None).await;
        let err = orchestrator
            .parse("==Start of OCR for page 1==\n  \n", "20", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkbenchError::EmptyInput));
        assert!(dataset.is_empty());
        assert_eq!(status.terminal()[0].kind, StatusKind::Error);
        assert_eq!(orchestrator.state(), ParseState::Failed);
    }

    #[tokio::test]
    async fn nothing_extracted_is_not_persisted() {
        let (orchestrator, dataset, _) = setup(None).await;
        dataset
            .replace_all(&[ParsedEntry::note(1, "WP1/1", "alt".into())])
            .await
            .unwrap();
        let err = orchestrator
            .parse("leer", "20", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkbenchError::NoUsableEntries));
        assert_eq!(dataset.len(), 1);
    }

    #[tokio::test]
    async fn chunk_failure_fails_run_without_writing() {
        let (orchestrator, dataset, status) = setup(Some("2 ")).await;
        let err = orchestrator
            .parse("3 aaaaaaaa\n1 bbbbbbbb\n2 cccccccc", "20", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkbenchError::RemoteCallFailed { .. }));
        assert!(dataset.is_empty());
        let terminal = status.terminal();
        assert_eq!(terminal.len(), 1);
        assert!(terminal[0].message.starts_with("Parsen fehlgeschlagen:"));
    }

    #[tokio::test]
    async fn cancellation_ends_in_aborted() {
        let (orchestrator, dataset, status) = setup(None).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = orchestrator
            .parse("1 aaaaaaaa", "20", &cancel)
            .await
            .unwrap_err();
        assert!(err.is_aborted());
        assert!(dataset.is_empty());
        assert_eq!(orchestrator.state(), ParseState::Aborted);
        assert_eq!(orchestrator.acknowledge(), ParseState::Aborted);
        assert_eq!(orchestrator.state(), ParseState::Idle);
        assert_eq!(orchestrator.acknowledge(), ParseState::Idle);
        let terminal = status.terminal();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].kind, StatusKind::Status);
        assert_eq!(terminal[0].message, "Parsen vom Benutzer abgebrochen.");
    }
}
