//! # UA-Protokoll
//!
//! A workbench for the verbatim protocols of parliamentary investigation
//! committees (Untersuchungsausschüsse).
//!
//! Raw transcript text, typically the page-framed output of the OCR pass,
//! is split into chunks that a remote reasoning service structures into
//! speaker utterances. The utterances are ordered, collated into
//! question/answer records, deduplicated, renumbered and persisted as one
//! dataset. The dataset can then be analysed thematically, searched for
//! relevance against a free-text query, summarised into key insights, and
//! exported.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────────────┐   ┌──────────┐
//! │ PDF/OCR  │──▶│ chunk → pool(structure) →    │──▶│  SQLite   │
//! │  text    │   │ collate → finalize           │   │ entries  │
//! └──────────┘   └──────────────────────────────┘   └────┬─────┘
//!                                                        │
//!                   ┌───────────────┬────────────────────┤
//!                   ▼               ▼                    ▼
//!             ┌──────────┐   ┌────────────┐        ┌──────────┐
//!             │ analyze  │   │  search /  │        │ CSV/XLSX │
//!             │ (batches)│   │  insights  │        │  export  │
//!             └──────────┘   └────────────┘        └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Utterances, records, analysis and insight types |
//! | [`error`] | Error taxonomy |
//! | [`status`] | User-facing status reporting |
//! | [`pool`] | Bounded-concurrency task pool with progress hooks |
//! | [`chunk`] | Line-boundary text chunking |
//! | [`collate`] | Chronological ordering and question/answer pairing |
//! | [`finalize`] | Deduplication and renumbering |
//! | [`reasoning`] | Remote reasoning service (Gemini) |
//! | [`parse`] | Parsing orchestrator |
//! | [`analyze`] | Thematic analysis, table filters and sorting |
//! | [`search`] | Relevance search and key insights |
//! | [`ocr`] | Page-wise PDF text extraction |
//! | [`import`] / [`export`] | CSV import, CSV/XLSX/Markdown export |
//! | [`dataset`] | The persisted dataset and its single writer |
//! | [`store`] / [`db`] | SQLite and in-memory record storage |
//! | [`server`] | Local JSON HTTP API |

pub mod analyze;
pub mod chunk;
pub mod collate;
pub mod config;
pub mod dataset;
pub mod db;
pub mod error;
pub mod export;
pub mod finalize;
pub mod import;
pub mod models;
pub mod ocr;
pub mod parse;
pub mod pool;
pub mod reasoning;
pub mod search;
pub mod server;
pub mod status;
pub mod store;
