//! Thematic analysis and the record table's filter/sort helpers.
//!
//! [`AnalysisOrchestrator::analyze_dataset`] sends the stored question and
//! answer records in batches to the reasoning service together with a
//! category catalogue ([`CorpusItem`] tree), merges the returned
//! `kernaussage` / `zugeordneteKategorien` / `begruendung` back by id and
//! writes the changed records through the dataset.
//!
//! The free functions below implement the table view: full-text, Fraktion
//! and category filters, column sorting and the distinct filter values.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AnalysisConfig;
use crate::dataset::Dataset;
use crate::error::{WorkbenchError, WorkbenchResult};
use crate::models::{CorpusItem, EntryAnalysis, EntryField, FieldValue, ParsedEntry};
use crate::pool::{run_pool, PoolHooks, Progress};
use crate::reasoning::ReasoningService;
use crate::status::StatusSink;

#[derive(Deserialize)]
struct CorpusFile {
    items: Vec<CorpusItem>,
}

/// Load a category catalogue from `.json` (a bare array) or `.toml`
/// (`[[items]]` tables).
pub fn load_corpus(path: &Path) -> Result<Vec<CorpusItem>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read corpus file: {}", path.display()))?;
    let items = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str::<Vec<CorpusItem>>(&content)
            .with_context(|| "Failed to parse corpus JSON")?,
        Some("toml") => {
            toml::from_str::<CorpusFile>(&content)
                .with_context(|| "Failed to parse corpus TOML")?
                .items
        }
        _ => bail!(
            "Unsupported corpus format: {} (expected .json or .toml)",
            path.display()
        ),
    };
    if items.is_empty() {
        bail!("Corpus file {} defines no categories", path.display());
    }
    Ok(items)
}

/// Overlay analysis results onto records with the same id. Records the
/// service did not return are left as they were. Returns the number of
/// records updated.
pub fn merge_analysis(entries: &mut [ParsedEntry], analyses: Vec<EntryAnalysis>) -> usize {
    let by_id: HashMap<i64, EntryAnalysis> = analyses.into_iter().map(|a| (a.id, a)).collect();
    let mut merged = 0;
    for entry in entries.iter_mut() {
        if let Some(analysis) = by_id.get(&entry.id) {
            entry.kernaussage = Some(analysis.kernaussage.clone());
            entry.zugeordnete_kategorien = Some(analysis.zugeordnete_kategorien.clone());
            entry.begruendung = Some(analysis.begruendung.clone());
            merged += 1;
        }
    }
    merged
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnalysisSummary {
    pub batches: usize,
    pub analysed: usize,
}

pub struct AnalysisOrchestrator {
    service: Arc<dyn ReasoningService>,
    dataset: Arc<Dataset>,
    status: Arc<dyn StatusSink>,
    config: AnalysisConfig,
}

impl AnalysisOrchestrator {
    pub fn new(
        service: Arc<dyn ReasoningService>,
        dataset: Arc<Dataset>,
        status: Arc<dyn StatusSink>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            service,
            dataset,
            status,
            config,
        }
    }

    pub async fn analyze_dataset(
        &self,
        corpus: &[CorpusItem],
        cancel: &CancellationToken,
    ) -> WorkbenchResult<AnalysisSummary> {
        let outcome = self.run(corpus, cancel).await;
        match &outcome {
            Ok(summary) => {
                info!(batches = summary.batches, analysed = summary.analysed, "analysis completed");
                self.status
                    .show_status(&format!("{} Einträge analysiert.", summary.analysed));
            }
            Err(e) if e.is_aborted() => self.status.show_status("Analyse vom Benutzer abgebrochen."),
            Err(e) => {
                warn!(error = %e, "analysis failed");
                self.status.show_error(&format!("Analyse fehlgeschlagen: {}", e));
            }
        }
        outcome
    }

    async fn run(
        &self,
        corpus: &[CorpusItem],
        cancel: &CancellationToken,
    ) -> WorkbenchResult<AnalysisSummary> {
        let candidates: Vec<ParsedEntry> = self
            .dataset
            .entries()
            .iter()
            .filter(|e| !e.is_note() && (e.question.is_some() || e.answer.is_some()))
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Err(WorkbenchError::NoUsableEntries);
        }

        let batches: Vec<&[ParsedEntry]> = candidates.chunks(self.config.batch_size.max(1)).collect();
        let batch_count = batches.len();
        self.status.show_loading("Analyse... 0% abgeschlossen.");

        let service = self.service.as_ref();
        let status = self.status.as_ref();
        let results = run_pool(
            batches,
            self.config.workers,
            |batch, _index| async move {
                if cancel.is_cancelled() {
                    return Err(WorkbenchError::Aborted);
                }
                service.analyze_entries(batch, corpus, cancel).await
            },
            PoolHooks::new().on_progress(move |p: Progress| {
                status.show_loading(&format!("Analyse... {}% abgeschlossen.", p.percent()))
            }),
        )
        .await?;

        if cancel.is_cancelled() {
            return Err(WorkbenchError::Aborted);
        }

        let mut updated = candidates.clone();
        merge_analysis(&mut updated, results.into_iter().flatten().collect());
        let changed: Vec<ParsedEntry> = updated
            .into_iter()
            .zip(&candidates)
            .filter(|(after, before)| after != *before)
            .map(|(after, _)| after)
            .collect();
        self.dataset.update_entries(&changed).await?;

        Ok(AnalysisSummary {
            batches: batch_count,
            analysed: changed.len(),
        })
    }
}

/// Table filters; `None` or blank means "any".
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    /// Case-insensitive substring of question, answer, kernaussage or
    /// begruendung.
    pub text: Option<String>,
    pub fraktion: Option<String>,
    /// One of the `;`-separated category ids.
    pub kategorie: Option<String>,
}

fn active(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl EntryFilter {
    pub fn matches(&self, entry: &ParsedEntry) -> bool {
        if let Some(text) = active(&self.text) {
            let haystack = [
                &entry.question,
                &entry.answer,
                &entry.kernaussage,
                &entry.begruendung,
            ]
            .iter()
            .filter_map(|v| v.as_deref())
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
            if !haystack.contains(&text.to_lowercase()) {
                return false;
            }
        }
        if let Some(fraktion) = active(&self.fraktion) {
            if entry.fraktion.as_deref() != Some(fraktion) {
                return false;
            }
        }
        if let Some(kategorie) = active(&self.kategorie) {
            if !categories(entry).any(|k| k == kategorie) {
                return false;
            }
        }
        true
    }
}

fn categories(entry: &ParsedEntry) -> impl Iterator<Item = &str> {
    entry
        .zugeordnete_kategorien
        .as_deref()
        .unwrap_or("")
        .split(';')
        .map(str::trim)
        .filter(|k| !k.is_empty())
}

pub fn filter_entries(entries: &[ParsedEntry], filter: &EntryFilter) -> Vec<ParsedEntry> {
    entries
        .iter()
        .filter(|e| filter.matches(e))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortDirection::Ascending),
            "desc" | "descending" => Ok(SortDirection::Descending),
            other => Err(format!("unknown sort direction '{}'", other)),
        }
    }
}

fn compare_values(a: FieldValue<'_>, b: FieldValue<'_>) -> Ordering {
    match (a, b) {
        (FieldValue::Null, FieldValue::Null) => Ordering::Equal,
        (FieldValue::Null, _) => Ordering::Greater,
        (_, FieldValue::Null) => Ordering::Less,
        (FieldValue::Number(x), FieldValue::Number(y)) => x.cmp(&y),
        (x, y) => text_of(x).to_lowercase().cmp(&text_of(y).to_lowercase()),
    }
}

fn text_of(value: FieldValue<'_>) -> String {
    match value {
        FieldValue::Null => String::new(),
        FieldValue::Number(n) => n.to_string(),
        FieldValue::Text(s) => s.to_string(),
    }
}

/// Sort by one column: missing values last, numbers numerically, text
/// case-insensitively. Descending is the reversed ascending order.
pub fn sort_entries(entries: &mut [ParsedEntry], field: EntryField, direction: SortDirection) {
    entries.sort_by(|a, b| compare_values(a.field(field), b.field(field)));
    if direction == SortDirection::Descending {
        entries.reverse();
    }
}

/// Distinct Fraktion values, sorted.
pub fn unique_fraktionen(entries: &[ParsedEntry]) -> Vec<String> {
    entries
        .iter()
        .filter_map(|e| active(&e.fraktion))
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Distinct category ids across all records, sorted.
pub fn unique_kategorien(entries: &[ParsedEntry]) -> Vec<String> {
    entries
        .iter()
        .flat_map(categories)
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
