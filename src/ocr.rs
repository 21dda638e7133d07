//! Page-wise text recognition for PDF protocols.
//!
//! A [`PageRecognizer`] turns one page into text plus a confidence score
//! (0–100). [`extract_document`] runs it over every page through the pool
//! and joins the pages in page order, each framed by
//! `==Start of OCR for page N==` / `==End of OCR for page N==` lines.
//! The parser strips exactly these frames again.
//!
//! [`PdfTextLayer`] reads the embedded text layer with `pdf-extract`. It
//! reports full confidence because no image recognition is involved.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::OcrConfig;
use crate::error::{WorkbenchError, WorkbenchResult};
use crate::pool::{run_pool, PoolHooks, Progress};
use crate::status::StatusSink;

/// Recognised text of one page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub text: String,
    /// 0–100.
    pub confidence: f32,
}

#[async_trait]
pub trait PageRecognizer: Send + Sync {
    fn page_count(&self) -> usize;

    /// Recognise page `page` (1-based).
    async fn recognize(&self, page: usize, cancel: &CancellationToken) -> WorkbenchResult<PageText>;
}

/// Text layer of a born-digital PDF.
pub struct PdfTextLayer {
    pages: Vec<String>,
}

impl PdfTextLayer {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
            .map_err(|e| anyhow::anyhow!("PDF extraction failed: {}", e))?;
        Ok(Self { pages })
    }

    /// Read and extract `path` on the blocking pool.
    pub async fn open(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read PDF: {}", path.display()))?;
        tokio::task::spawn_blocking(move || Self::from_bytes(&bytes)).await?
    }
}

#[async_trait]
impl PageRecognizer for PdfTextLayer {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    async fn recognize(&self, page: usize, _cancel: &CancellationToken) -> WorkbenchResult<PageText> {
        let text = page
            .checked_sub(1)
            .and_then(|i| self.pages.get(i))
            .ok_or_else(|| WorkbenchError::InvalidResponse(format!("no page {}", page)))?;
        Ok(PageText {
            text: text.trim_end().to_string(),
            confidence: 100.0,
        })
    }
}

/// Joined, marker-framed text of a whole document.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrDocument {
    pub text: String,
    /// Mean confidence over recognised pages; 0 when none were.
    pub average_confidence: f32,
    pub pages: usize,
}

pub fn frame_page(page: usize, text: &str) -> String {
    format!(
        "==Start of OCR for page {page}==\n{text}\n==End of OCR for page {page}==\n\n"
    )
}

/// Recognise every page of `recognizer` with `config.workers()` pages in
/// flight.
///
/// Pages not yet started when `cancel` fires are skipped and the run ends
/// with [`WorkbenchError::Aborted`].
pub async fn extract_document(
    recognizer: &dyn PageRecognizer,
    config: &OcrConfig,
    label: &str,
    status: &dyn StatusSink,
    cancel: &CancellationToken,
) -> WorkbenchResult<OcrDocument> {
    let total = recognizer.page_count();
    let workers = config.workers();
    info!(label, pages = total, workers, "ocr started");
    status.show_loading(&format!(
        "OCR mit {} Workern bereit. Verarbeite {} Seiten...",
        workers, total
    ));

    let outcome = run_pool(
        (1..=total).collect(),
        workers,
        |page: usize, _index| async move {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            recognizer
                .recognize(page, cancel)
                .await
                .map(|text| Some((page, text)))
        },
        PoolHooks::new().on_progress(|p: Progress| {
            if !cancel.is_cancelled() {
                status.show_loading(&format!(
                    "Verarbeite PDF... {}% abgeschlossen.",
                    p.percent()
                ));
            }
        }),
    )
    .await;

    let pages = match outcome {
        Ok(pages) if !cancel.is_cancelled() => pages,
        Err(e) if !e.is_aborted() => {
            status.show_error(&format!("PDF-Verarbeitung fehlgeschlagen: {}", e));
            return Err(e);
        }
        _ => {
            info!(label, "ocr aborted");
            status.show_status("Vorgang vom Benutzer abgebrochen.");
            return Err(WorkbenchError::Aborted);
        }
    };

    // Pool output is already in page order.
    let recognised: Vec<(usize, PageText)> = pages.into_iter().flatten().collect();
    let average_confidence = if recognised.is_empty() {
        0.0
    } else {
        recognised.iter().map(|(_, p)| p.confidence).sum::<f32>() / recognised.len() as f32
    };
    let text: String = recognised
        .iter()
        .map(|(page, p)| frame_page(*page, &p.text))
        .collect();

    status.show_status(&format!(
        "Text aus {} extrahiert. Geschätzte Genauigkeit: {:.1}%",
        label, average_confidence
    ));
    Ok(OcrDocument {
        text,
        average_confidence,
        pages: recognised.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::strip_page_markers;
    use crate::status::{RecordingStatus, StatusKind};
    use std::time::Duration;

    /// Page n reads "Seite n"; later pages finish first.
    struct FakeScanner {
        pages: usize,
        cancel_after: Option<usize>,
        token: CancellationToken,
    }

    #[async_trait]
    impl PageRecognizer for FakeScanner {
        fn page_count(&self) -> usize {
            self.pages
        }

        async fn recognize(&self, page: usize, _cancel: &CancellationToken) -> WorkbenchResult<PageText> {
            tokio::time::sleep(Duration::from_millis((self.pages - page) as u64 * 3)).await;
            if self.cancel_after == Some(page) {
                self.token.cancel();
            }
            Ok(PageText {
                text: format!("Seite {}", page),
                confidence: if page % 2 == 0 { 80.0 } else { 90.0 },
            })
        }
    }

    #[tokio::test]
    async fn pages_are_framed_in_page_order() {
        let cancel = CancellationToken::new();
        let scanner = FakeScanner {
            pages: 4,
            cancel_after: None,
            token: cancel.clone(),
        };
        let status = RecordingStatus::new();
        let doc = extract_document(&scanner, &OcrConfig { min_workers: 4 }, "p.pdf", &status, &cancel)
            .await
            .unwrap();
        assert_eq!(doc.pages, 4);
        assert!((doc.average_confidence - 85.0).abs() < f32::EPSILON);
        assert!(doc.text.starts_with("==Start of OCR for page 1==\nSeite 1\n==End of OCR for page 1==\n\n"));
        assert_eq!(strip_page_markers(&doc.text), "Seite 1\nSeite 2\nSeite 3\nSeite 4\n");
        assert_eq!(
            status.latest().unwrap().message,
            "Text aus p.pdf extrahiert. Geschätzte Genauigkeit: 85.0%"
        );
    }

    #[tokio::test]
    async fn cancellation_skips_remaining_pages() {
        let cancel = CancellationToken::new();
        let scanner = FakeScanner {
            pages: 6,
            cancel_after: Some(1),
            token: cancel.clone(),
        };
        let status = RecordingStatus::new();
        let err = extract_document(&scanner, &OcrConfig { min_workers: 1 }, "p.pdf", &status, &cancel)
            .await;
        assert!(err.unwrap_err().is_aborted());
        let terminal = status.terminal();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].kind, StatusKind::Status);
    }

    #[test]
    fn invalid_pdf_is_an_error() {
        assert!(PdfTextLayer::from_bytes(b"not a pdf").is_err());
    }

    #[tokio::test]
    async fn text_layer_pages_are_one_based() {
        let layer = PdfTextLayer {
            pages: vec!["eins\n".into(), "zwei".into()],
        };
        let cancel = CancellationToken::new();
        assert_eq!(layer.recognize(1, &cancel).await.unwrap().text, "eins");
        assert!(layer.recognize(0, &cancel).await.is_err());
        assert!(layer.recognize(3, &cancel).await.is_err());
    }
}
