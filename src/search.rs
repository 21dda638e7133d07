//! Relevance search and insight synthesis.
//!
//! [`SearchOrchestrator::find_relevant`] fans one relevance check per record
//! out through the pool and keeps the records the reasoning service judged
//! relevant, in input order, with `searchReason` filled in.
//! [`SearchOrchestrator::key_insights`] is a single call over the records
//! that already carry a `kernaussage`.
//!
//! Both report one terminal status message per run, like the parser.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{InsightsConfig, SearchConfig};
use crate::error::{WorkbenchError, WorkbenchResult};
use crate::models::{KeyInsights, ParsedEntry, RelevanceVerdict};
use crate::pool::{run_pool, PoolHooks, Progress};
use crate::reasoning::ReasoningService;
use crate::status::StatusSink;

pub struct SearchOrchestrator {
    service: Arc<dyn ReasoningService>,
    status: Arc<dyn StatusSink>,
    search: SearchConfig,
    insights: InsightsConfig,
}

impl SearchOrchestrator {
    pub fn new(
        service: Arc<dyn ReasoningService>,
        status: Arc<dyn StatusSink>,
        search: SearchConfig,
        insights: InsightsConfig,
    ) -> Self {
        Self {
            service,
            status,
            search,
            insights,
        }
    }

    /// Check every record against `query`; return the relevant ones.
    pub async fn find_relevant(
        &self,
        entries: &[ParsedEntry],
        query: &str,
        cancel: &CancellationToken,
    ) -> WorkbenchResult<Vec<ParsedEntry>> {
        let outcome = self.run_search(entries, query, cancel).await;
        match &outcome {
            Ok(hits) => {
                info!(query, checked = entries.len(), relevant = hits.len(), "search completed");
                self.status.show_status(&format!(
                    "Suche abgeschlossen. {} relevante Einträge gefunden.",
                    hits.len()
                ));
            }
            Err(e) if e.is_aborted() => {
                self.status.show_status("Suche vom Benutzer abgebrochen.");
            }
            Err(e) => {
                warn!(query, error = %e, "search failed");
                self.status.show_error(&format!("Suche fehlgeschlagen: {}", e));
            }
        }
        outcome
    }

    async fn run_search(
        &self,
        entries: &[ParsedEntry],
        query: &str,
        cancel: &CancellationToken,
    ) -> WorkbenchResult<Vec<ParsedEntry>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(WorkbenchError::EmptyInput);
        }
        self.status.show_loading("Suche... 0% abgeschlossen.");

        let service = self.service.as_ref();
        let status = self.status.as_ref();
        let items: Vec<&ParsedEntry> = entries.iter().collect();
        let verdicts = run_pool(
            items,
            self.search.workers,
            |entry, _index| async move {
                if cancel.is_cancelled() {
                    return Err(WorkbenchError::Aborted);
                }
                if !entry.has_content() {
                    return Ok(RelevanceVerdict::irrelevant());
                }
                service.check_relevance(entry, query, cancel).await
            },
            PoolHooks::new().on_progress(move |p: Progress| {
                status.show_loading(&format!("Suche... {}% abgeschlossen.", p.percent()))
            }),
        )
        .await?;

        Ok(entries
            .iter()
            .zip(verdicts)
            .filter(|(_, verdict)| verdict.is_relevant)
            .map(|(entry, verdict)| ParsedEntry {
                search_reason: Some(verdict.reason),
                ..entry.clone()
            })
            .collect())
    }

    /// Summarise the analysed records and pick the top insights.
    ///
    /// Only records with a `kernaussage` that are not notes qualify; at most
    /// `insights.max_entries` of them are sent.
    pub async fn key_insights(
        &self,
        entries: &[ParsedEntry],
        cancel: &CancellationToken,
    ) -> WorkbenchResult<KeyInsights> {
        self.status.show_loading("Generiere Kernaussagen...");
        let outcome = self.run_insights(entries, cancel).await;
        match &outcome {
            Ok(insights) => {
                info!(insights = insights.insights.len(), "insights generated");
                self.status.show_status("Kernaussagen erfolgreich generiert.");
            }
            Err(e) if e.is_aborted() => self.status.show_status("Generierung abgebrochen."),
            Err(e) => {
                warn!(error = %e, "insight generation failed");
                self.status
                    .show_error(&format!("Fehler bei der Generierung: {}", e));
            }
        }
        outcome
    }

    async fn run_insights(
        &self,
        entries: &[ParsedEntry],
        cancel: &CancellationToken,
    ) -> WorkbenchResult<KeyInsights> {
        let analysed: Vec<ParsedEntry> = entries
            .iter()
            .filter(|e| e.kernaussage.is_some() && !e.is_note())
            .take(self.insights.max_entries)
            .cloned()
            .collect();
        if analysed.len() < self.insights.min_entries {
            return Err(WorkbenchError::InsufficientData {
                found: analysed.len(),
                required: self.insights.min_entries,
            });
        }
        if cancel.is_cancelled() {
            return Err(WorkbenchError::Aborted);
        }

        let mut insights = self
            .service
            .synthesize_insights(&analysed, self.insights.top_n, cancel)
            .await?;
        insights.insights.truncate(self.insights.top_n);
        Ok(insights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CorpusItem, EntryAnalysis, KeyInsightItem, Utterance};
    use crate::status::{RecordingStatus, StatusKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Relevant when the question mentions the query; counts calls and
    /// records the largest insight batch it saw.
    #[derive(Default)]
    struct KeywordService {
        calls: AtomicUsize,
        insight_batch: Mutex<usize>,
    }

    #[async_trait]
    impl ReasoningService for KeywordService {
        fn name(&self) -> &str {
            "keyword"
        }

        async fn structure_chunk(
            &self,
            _: &str,
            _: &str,
            _: &CancellationToken,
        ) -> WorkbenchResult<Vec<Utterance>> {
            Ok(Vec::new())
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
            entry: &ParsedEntry,
            query: &str,
            _: &CancellationToken,
        ) -> WorkbenchResult<RelevanceVerdict> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Earlier records finish last.
            tokio::time::sleep(Duration::from_millis((20 - entry.id.min(20)) as u64)).await;
            let hit = entry
                .question
                .as_deref()
                .is_some_and(|q| q.contains(query));
            Ok(RelevanceVerdict {
                is_relevant: hit,
                reason: format!("#{} erwähnt {}", entry.id, query),
            })
        }

        async fn synthesize_insights(
            &self,
            entries: &[ParsedEntry],
            top_n: usize,
            _: &CancellationToken,
        ) -> WorkbenchResult<KeyInsights> {
            *self.insight_batch.lock().unwrap() = entries.len();
            Ok(KeyInsights {
                summary: "Zusammenfassung".into(),
                insights: (0..top_n + 2)
                    .map(|i| KeyInsightItem {
                        title: format!("T{}", i),
                        description: "D".into(),
                        references: "#1".into(),
                    })
                    .collect(),
            })
        }
    }

    fn question(id: i64, text: &str) -> ParsedEntry {
        ParsedEntry::exchange(id, "WP20/1", Some("X".into()), Some(text.into()), None, None)
    }

    fn orchestrator(
        service: Arc<KeywordService>,
        status: Arc<RecordingStatus>,
    ) -> SearchOrchestrator {
        SearchOrchestrator::new(
            service,
            status,
            SearchConfig::default(),
            InsightsConfig::default(),
        )
    }

    #[tokio::test]
    async fn keeps_relevant_records_in_input_order() {
        let service = Arc::new(KeywordService::default());
        let status = Arc::new(RecordingStatus::new());
        let entries: Vec<ParsedEntry> = (1..=10)
            .map(|i| question(i, if i % 3 == 0 { "Ministerium" } else { "Wetter" }))
            .collect();
        let hits = orchestrator(service.clone(), status.clone())
            .find_relevant(&entries, "Ministerium", &CancellationToken::new())
            .await
            .unwrap();
        let ids: Vec<i64> = hits.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 6, 9]);
        assert_eq!(hits[0].search_reason.as_deref(), Some("#3 erwähnt Ministerium"));
        assert_eq!(service.calls.load(Ordering::SeqCst), 10);
        assert_eq!(
            status.terminal()[0].message,
            "Suche abgeschlossen. 3 relevante Einträge gefunden."
        );
    }

    #[tokio::test]
    async fn empty_records_are_not_sent() {
        let service = Arc::new(KeywordService::default());
        let status = Arc::new(RecordingStatus::new());
        let entries = vec![ParsedEntry::exchange(1, "WP20/1", Some("X".into()), None, None, None)];
        let hits = orchestrator(service.clone(), status)
            .find_relevant(&entries, "X", &CancellationToken::new())
            .await
            .unwrap();
        assert!(hits.is_empty());
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancelled_search_reports_neutral_status() {
        let status = Arc::new(RecordingStatus::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = orchestrator(Arc::new(KeywordService::default()), status.clone())
            .find_relevant(&[question(1, "a")], "a", &cancel)
            .await
            .unwrap_err();
        assert!(err.is_aborted());
        assert_eq!(status.terminal()[0].kind, StatusKind::Status);
    }

    #[tokio::test]
    async fn insights_need_three_analysed_records() {
        let status = Arc::new(RecordingStatus::new());
        let mut entries = vec![question(1, "a"), question(2, "b")];
        for e in &mut entries {
            e.kernaussage = Some("K".into());
        }
        let mut note = ParsedEntry::note(3, "WP20/1", "Vors.: Pause".into());
        note.kernaussage = Some("K".into());
        entries.push(note);

        let err = orchestrator(Arc::new(KeywordService::default()), status.clone())
            .key_insights(&entries, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            WorkbenchError::InsufficientData { found, required } => {
                assert_eq!((found, required), (2, 3));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(status.terminal()[0].kind, StatusKind::Error);
    }

    #[tokio::test]
    async fn insights_are_capped_and_trimmed() {
        let service = Arc::new(KeywordService::default());
        let status = Arc::new(RecordingStatus::new());
        let entries: Vec<ParsedEntry> = (1..=250)
            .map(|i| {
                let mut e = question(i, "q");
                e.kernaussage = Some(format!("K{}", i));
                e
            })
            .collect();
        let insights = orchestrator(service.clone(), status)
            .key_insights(&entries, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(insights.insights.len(), 3);
        assert_eq!(*service.insight_batch.lock().unwrap(), 200);
    }
}
