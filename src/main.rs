//! # Protocol workbench CLI (`uap`)
//!
//! Turns raw transcripts of investigation-committee hearings into a
//! structured, searchable record dataset stored in SQLite.
//!
//! ## Usage
//!
//! ```bash
//! uap --config ./config/uap.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `uap init` | Create the SQLite database and schema |
//! | `uap ocr <pdf>` | Extract page-framed text from a PDF |
//! | `uap parse <file> --protocol <n>` | Structure a transcript (text or PDF) into records |
//! | `uap analyze --corpus <file>` | Thematic analysis against a category catalogue |
//! | `uap search "<query>"` | Relevance search over the dataset or a CSV file |
//! | `uap insights` | Summary and key insights of the analysed records |
//! | `uap list` | Filter, sort and print records |
//! | `uap import <csv>` | Replace the dataset with a CSV export |
//! | `uap edit <id> --set field=value` | Change one record |
//! | `uap export --format csv\|xlsx` | Write the dataset to a file |
//! | `uap reset` | Delete every record |
//! | `uap serve` | Start the local HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! uap init
//! uap parse ./protokoll-20.pdf --protocol 20
//! uap analyze --corpus ./config/kategorien.toml
//! uap search "Weisung des Ministeriums" --output treffer.csv
//! uap export --format xlsx
//! ```
//!
//! Ctrl-C cancels a running parse, analysis, search or OCR pass; the run
//! ends with a neutral "abgebrochen" status and the dataset is untouched.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use ua_protokoll::analyze::{
    filter_entries, load_corpus, sort_entries, unique_fraktionen, unique_kategorien,
    AnalysisOrchestrator, EntryFilter, SortDirection,
};
use ua_protokoll::config::{self, Config};
use ua_protokoll::dataset::Dataset;
use ua_protokoll::error::WorkbenchResult;
use ua_protokoll::export::{
    export_filename, protocol_number, write_export, write_insights_markdown, ExportFormat,
    ExportStep,
};
use ua_protokoll::import::import_csv;
use ua_protokoll::models::{EntryField, ParsedEntry};
use ua_protokoll::ocr::{extract_document, PdfTextLayer};
use ua_protokoll::parse::ParsingOrchestrator;
use ua_protokoll::reasoning::{self, ReasoningService};
use ua_protokoll::search::SearchOrchestrator;
use ua_protokoll::server;
use ua_protokoll::status::{StatusMode, StatusSink};
use ua_protokoll::store::SqliteEntryStore;

/// Structuring, analysis and search workbench for committee protocols.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Only `[db]` is required; every other section has defaults.
#[derive(Parser)]
#[command(
    name = "uap",
    about = "Structuring, analysis and search workbench for parliamentary investigation-committee protocols",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/uap.toml")]
    config: PathBuf,

    /// Status output on stderr: `off`, `human` or `json`.
    /// Defaults to `human` when stderr is a terminal.
    #[arg(long, global = true)]
    status: Option<StatusMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database file and schema. Idempotent.
    Init,

    /// Extract the text layer of a PDF, one framed block per page.
    Ocr {
        pdf: PathBuf,

        /// Write the text here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Structure a transcript into records and replace the dataset.
    ///
    /// PDF input runs through `ocr` first.
    Parse {
        file: PathBuf,

        /// Protocol number used in source references (`WP<protocol>/<page>`).
        #[arg(long)]
        protocol: String,
    },

    /// Assign key statements and categories to the stored records.
    Analyze {
        /// Category catalogue (`.json` array or `.toml` with `[[items]]`).
        #[arg(long)]
        corpus: PathBuf,
    },

    /// Find records relevant to a free-text query.
    Search {
        query: String,

        /// Search the records of this CSV file instead of the dataset.
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Write the hits to this file (`.csv` or `.xlsx`).
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Summarise the analysed records and pick the key insights.
    Insights {
        /// Write Markdown here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print records, optionally filtered and sorted.
    List {
        /// Field to sort by (e.g. `id`, `questioner`, `Fraktion`).
        #[arg(long)]
        sort: Option<EntryField>,

        #[arg(long)]
        desc: bool,

        /// Case-insensitive text in question, answer or analysis.
        #[arg(long)]
        text: Option<String>,

        #[arg(long)]
        fraktion: Option<String>,

        /// Category id.
        #[arg(long)]
        kategorie: Option<String>,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,

        /// Print the distinct Fraktion and category values instead.
        #[arg(long)]
        facets: bool,
    },

    /// Replace the dataset with the records of a CSV export.
    Import { csv: PathBuf },

    /// Change fields of one record.
    Edit {
        id: i64,

        /// `field=value`; an empty value clears the field.
        #[arg(long = "set", value_parser = parse_key_val, required = true)]
        set: Vec<(String, String)>,
    },

    /// Write the dataset to a CSV or XLSX file.
    Export {
        #[arg(long, default_value = "csv")]
        format: ExportFormat,

        /// Defaults to `wp<protocol>-<step>-<timestamp>.<ext>` in the
        /// current directory.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Delete every record.
    Reset,

    /// Start the local HTTP API on `[server].bind`.
    Serve,
}

/// Parse a `key=value` pair for `--set` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// A token cancelled by the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    token
}

/// `Ok(None)` for a cancelled run; its status was already reported.
fn unless_aborted<T>(outcome: WorkbenchResult<T>) -> Result<Option<T>> {
    match outcome {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_aborted() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn open_dataset(cfg: &Config) -> Result<Arc<Dataset>> {
    let store = SqliteEntryStore::open(&cfg.db.path).await?;
    Ok(Arc::new(Dataset::open(Arc::new(store)).await?))
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

fn format_for(path: &Path) -> ExportFormat {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("xlsx") => ExportFormat::Xlsx,
        _ => ExportFormat::Csv,
    }
}

/// Run the PDF text pass; `None` when cancelled.
async fn read_pdf(
    cfg: &Config,
    pdf: &Path,
    status: &dyn StatusSink,
    cancel: &CancellationToken,
) -> Result<Option<String>> {
    let layer = PdfTextLayer::open(pdf).await?;
    let label = pdf
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| pdf.display().to_string());
    let document = extract_document(&layer, &cfg.ocr, &label, status, cancel).await;
    Ok(unless_aborted(document)?.map(|d| d.text))
}

fn print_entries(entries: &[ParsedEntry]) {
    for entry in entries {
        match &entry.note {
            Some(note) => println!("#{:<4} {:<10} Anmerkung: {}", entry.id, entry.source_reference, note),
            None => {
                println!(
                    "#{:<4} {:<10} {}: {}",
                    entry.id,
                    entry.source_reference,
                    entry.questioner.as_deref().unwrap_or("-"),
                    entry.question.as_deref().unwrap_or("-")
                );
                println!(
                    "{:16}{}: {}",
                    "",
                    entry.witness.as_deref().unwrap_or("-"),
                    entry.answer.as_deref().unwrap_or("-")
                );
                if let Some(reason) = &entry.search_reason {
                    println!("{:16}Relevanz: {}", "", reason);
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;
    let status: Arc<dyn StatusSink> = Arc::from(
        cli.status
            .unwrap_or_else(StatusMode::default_for_tty)
            .sink(),
    );

    match cli.command {
        Commands::Init => {
            let store = SqliteEntryStore::open(&cfg.db.path).await?;
            store.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Ocr { pdf, output } => {
            let cancel = cancel_on_ctrl_c();
            if let Some(text) = read_pdf(&cfg, &pdf, status.as_ref(), &cancel).await? {
                match output {
                    Some(path) => std::fs::write(&path, text)
                        .with_context(|| format!("Failed to write {}", path.display()))?,
                    None => print!("{}", text),
                }
            }
        }
        Commands::Parse { file, protocol } => {
            let cancel = cancel_on_ctrl_c();
            let text = if is_pdf(&file) {
                match read_pdf(&cfg, &file, status.as_ref(), &cancel).await? {
                    Some(text) => text,
                    None => return Ok(()),
                }
            } else {
                std::fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read {}", file.display()))?
            };
            let service = reasoning::create_service(&cfg.llm)?;
            let orchestrator =
                ParsingOrchestrator::new(service, open_dataset(&cfg).await?, status, cfg.parsing.clone());
            if let Some(summary) = unless_aborted(orchestrator.parse(&text, &protocol, &cancel).await)? {
                println!(
                    "{} records stored ({} duplicates removed).",
                    summary.persisted_count, summary.duplicates_removed
                );
            }
        }
        Commands::Analyze { corpus } => {
            let corpus = load_corpus(&corpus)?;
            let cancel = cancel_on_ctrl_c();
            let orchestrator = AnalysisOrchestrator::new(
                reasoning::create_service(&cfg.llm)?,
                open_dataset(&cfg).await?,
                status,
                cfg.analysis.clone(),
            );
            if let Some(summary) = unless_aborted(orchestrator.analyze_dataset(&corpus, &cancel).await)? {
                println!(
                    "{} records analysed in {} batches.",
                    summary.analysed, summary.batches
                );
            }
        }
        Commands::Search { query, csv, output } => {
            let entries = match csv {
                Some(path) => {
                    let import = import_csv(&path)?;
                    for warning in &import.warnings {
                        status.show_status(warning);
                    }
                    import.entries
                }
                None => open_dataset(&cfg).await?.entries().as_ref().clone(),
            };
            let cancel = cancel_on_ctrl_c();
            let service: Arc<dyn ReasoningService> = reasoning::create_service(&cfg.llm)?;
            let search = SearchOrchestrator::new(
                service,
                status,
                cfg.search.clone(),
                cfg.insights.clone(),
            );
            if let Some(hits) = unless_aborted(search.find_relevant(&entries, &query, &cancel).await)? {
                match output {
                    Some(path) => {
                        write_export(&hits, format_for(&path), &path)?;
                        println!("{} hits written to {}", hits.len(), path.display());
                    }
                    None => print_entries(&hits),
                }
            }
        }
        Commands::Insights { output } => {
            let entries = open_dataset(&cfg).await?.entries();
            let cancel = cancel_on_ctrl_c();
            let search = SearchOrchestrator::new(
                reasoning::create_service(&cfg.llm)?,
                status,
                cfg.search.clone(),
                cfg.insights.clone(),
            );
            if let Some(insights) = unless_aborted(search.key_insights(&entries, &cancel).await)? {
                match output {
                    Some(path) => {
                        write_insights_markdown(&insights, &path)?;
                        println!("Insights written to {}", path.display());
                    }
                    None => println!("{}", insights.to_markdown()),
                }
            }
        }
        Commands::List {
            sort,
            desc,
            text,
            fraktion,
            kategorie,
            json,
            facets,
        } => {
            let dataset = open_dataset(&cfg).await?;
            let all = dataset.entries();
            if facets {
                println!("Fraktionen: {}", unique_fraktionen(&all).join(", "));
                println!("Kategorien: {}", unique_kategorien(&all).join(", "));
                return Ok(());
            }
            let filter = EntryFilter {
                text,
                fraktion,
                kategorie,
            };
            let mut entries = filter_entries(&all, &filter);
            if let Some(field) = sort {
                let direction = if desc {
                    SortDirection::Descending
                } else {
                    SortDirection::Ascending
                };
                sort_entries(&mut entries, field, direction);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                print_entries(&entries);
                println!("{} of {} records", entries.len(), all.len());
            }
        }
        Commands::Import { csv } => {
            let import = import_csv(&csv)?;
            for warning in &import.warnings {
                status.show_status(warning);
            }
            open_dataset(&cfg).await?.replace_all(&import.entries).await?;
            println!("{} records imported.", import.entries.len());
        }
        Commands::Edit { id, set } => {
            let dataset = open_dataset(&cfg).await?;
            let mut entry = dataset
                .get(id)
                .with_context(|| format!("no record with id {}", id))?;
            for (key, value) in &set {
                let field: EntryField = key.parse().map_err(anyhow::Error::msg)?;
                entry.set_field(field, value)?;
            }
            dataset.update_entry(&entry).await?;
            println!("Record #{} updated.", id);
        }
        Commands::Export { format, output } => {
            let entries = open_dataset(&cfg).await?.entries();
            if entries.is_empty() {
                anyhow::bail!("the dataset is empty; run `uap parse` first");
            }
            let path = output.unwrap_or_else(|| {
                let step = if entries.iter().any(|e| e.has_analysis()) {
                    ExportStep::Analyzed
                } else {
                    ExportStep::Parsed
                };
                let name = export_filename(&protocol_number(&entries), step, chrono::Local::now());
                PathBuf::from(format!("{}.{}", name, format.extension()))
            });
            write_export(&entries, format, &path)?;
            println!("{} records written to {}", entries.len(), path.display());
        }
        Commands::Reset => {
            open_dataset(&cfg).await?.clear().await?;
            status.show_status("Alle Daten wurden zurückgesetzt.");
        }
        Commands::Serve => {
            let service = reasoning::create_service(&cfg.llm)?;
            let dataset = open_dataset(&cfg).await?;
            server::run_server(&cfg, service, dataset).await?;
        }
    }

    Ok(())
}
