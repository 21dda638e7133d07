//! Local JSON HTTP API.
//!
//! Exposes the dataset and the pooled operations to a browser front end.
//! Only one pooled run (parse, analyze, search, insights) may be active at
//! a time; a second request gets `409 busy` until the first finishes.
//! `POST /abort` cancels the active run, which then answers `409 aborted`.
//!
//! # Endpoints
//!
//! | Method   | Path            | Description |
//! |----------|-----------------|-------------|
//! | `GET`    | `/health`       | Version and reasoning provider |
//! | `GET`    | `/status`       | Latest status message |
//! | `GET`    | `/entries`      | Records, with optional filter and sort query |
//! | `PUT`    | `/entries/{id}` | Replace one record |
//! | `DELETE` | `/entries`      | Clear the dataset |
//! | `POST`   | `/parse`        | `{ "text", "protocol" }` → parse summary |
//! | `POST`   | `/analyze`      | `{ "corpus": [...] }` → analysis summary |
//! | `POST`   | `/search`       | `{ "query", "entries"? }` → relevant records |
//! | `POST`   | `/insights`     | Summary and key insights |
//! | `POST`   | `/abort`        | Cancel the active run |
//! | `GET`    | `/export/csv`   | CSV download of the dataset |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "Bitte geben Sie Text zum Parsen ein." } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_configured` (400), `not_found`
//! (404), `busy` (409), `aborted` (409), `upstream_error` (502),
//! `internal` (500).

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::analyze::{
    filter_entries, sort_entries, AnalysisOrchestrator, AnalysisSummary, EntryFilter,
    SortDirection,
};
use crate::config::Config;
use crate::dataset::Dataset;
use crate::error::WorkbenchError;
use crate::export::{export_filename, protocol_number, to_csv, ExportStep};
use crate::models::{CorpusItem, EntryField, KeyInsights, ParsedEntry};
use crate::parse::{ParseSummary, ParsingOrchestrator};
use crate::reasoning::ReasoningService;
use crate::search::SearchOrchestrator;
use crate::status::{RecordingStatus, StatusMessage, StatusSink};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    service: Arc<dyn ReasoningService>,
    dataset: Arc<Dataset>,
    status: Arc<RecordingStatus>,
    active: Arc<Mutex<Option<CancellationToken>>>,
}

impl AppState {
    pub fn new(config: Config, service: Arc<dyn ReasoningService>, dataset: Arc<Dataset>) -> Self {
        Self {
            config: Arc::new(config),
            service,
            dataset,
            status: Arc::new(RecordingStatus::new()),
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Claim the single run slot.
    fn begin_run(&self) -> Result<RunGuard, AppError> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| internal("run slot poisoned"))?;
        if active.is_some() {
            return Err(AppError {
                status: StatusCode::CONFLICT,
                code: "busy".to_string(),
                message: "Es läuft bereits ein Vorgang.".to_string(),
            });
        }
        let token = CancellationToken::new();
        *active = Some(token.clone());
        Ok(RunGuard {
            slot: self.active.clone(),
            token,
        })
    }

    /// Cancel the active run, if any.
    fn abort(&self) -> bool {
        match self.active.lock() {
            Ok(active) => match active.as_ref() {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }
}

/// Releases the run slot when the handler returns or is dropped.
struct RunGuard {
    slot: Arc<Mutex<Option<CancellationToken>>>,
    token: CancellationToken,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}

/// Build the router with CORS open to any origin.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/entries", get(handle_list).delete(handle_clear))
        .route("/entries/{id}", put(handle_update))
        .route("/parse", post(handle_parse))
        .route("/analyze", post(handle_analyze))
        .route("/search", post(handle_search))
        .route("/insights", post(handle_insights))
        .route("/abort", post(handle_abort))
        .route("/export/csv", get(handle_export_csv))
        .layer(cors)
        .with_state(state)
}

/// Serve the API on `config.server.bind` until the process is terminated.
pub async fn run_server(
    config: &Config,
    service: Arc<dyn ReasoningService>,
    dataset: Arc<Dataset>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(AppState::new(config.clone(), service, dataset));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind = %bind_addr, "http api listening");
    println!("uap API listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<WorkbenchError> for AppError {
    fn from(err: WorkbenchError) -> Self {
        let message = err.to_string();
        let (status, code) = match err {
            WorkbenchError::EmptyInput
            | WorkbenchError::NoUsableEntries
            | WorkbenchError::InsufficientData { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
            WorkbenchError::NotConfigured(_) => (StatusCode::BAD_REQUEST, "not_configured"),
            WorkbenchError::Aborted => (StatusCode::CONFLICT, "aborted"),
            WorkbenchError::RemoteCallFailed { .. } | WorkbenchError::InvalidResponse(_) => {
                (StatusCode::BAD_GATEWAY, "upstream_error")
            }
            WorkbenchError::PersistenceFailed(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        AppError {
            status,
            code: code.to_string(),
            message,
        }
    }
}

// ============ GET /health, GET /status ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    provider: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        provider: state.service.name().to_string(),
    })
}

async fn handle_status(State(state): State<AppState>) -> Json<Option<StatusMessage>> {
    Json(state.status.latest())
}

// ============ /entries ============

/// Query string of `GET /entries`.
#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    sort: Option<String>,
    direction: Option<String>,
    text: Option<String>,
    fraktion: Option<String>,
    kategorie: Option<String>,
}

async fn handle_list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ParsedEntry>>, AppError> {
    let filter = EntryFilter {
        text: query.text,
        fraktion: query.fraktion,
        kategorie: query.kategorie,
    };
    let mut entries = filter_entries(&state.dataset.entries(), &filter);
    if let Some(sort) = query.sort {
        let field: EntryField = sort.parse().map_err(bad_request)?;
        let direction: SortDirection = match query.direction {
            Some(d) => d.parse().map_err(bad_request)?,
            None => SortDirection::default(),
        };
        sort_entries(&mut entries, field, direction);
    }
    Ok(Json(entries))
}

async fn handle_update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(entry): Json<ParsedEntry>,
) -> Result<Json<ParsedEntry>, AppError> {
    if entry.id != id {
        return Err(bad_request(format!(
            "record id {} does not match path id {}",
            entry.id, id
        )));
    }
    if state.dataset.get(id).is_none() {
        return Err(not_found(format!("no record with id {}", id)));
    }
    state.dataset.update_entry(&entry).await?;
    Ok(Json(entry))
}

async fn handle_clear(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    let _run = state.begin_run()?;
    state.dataset.clear().await?;
    state.status.show_status("Alle Daten wurden zurückgesetzt.");
    Ok(StatusCode::NO_CONTENT)
}

// ============ Pooled runs ============

#[derive(Deserialize)]
struct ParseRequest {
    text: String,
    protocol: String,
}

async fn handle_parse(
    State(state): State<AppState>,
    Json(req): Json<ParseRequest>,
) -> Result<Json<ParseSummary>, AppError> {
    let run = state.begin_run()?;
    let orchestrator = ParsingOrchestrator::new(
        state.service.clone(),
        state.dataset.clone(),
        state.status.clone(),
        state.config.parsing.clone(),
    );
    let summary = orchestrator
        .parse(&req.text, &req.protocol, &run.token)
        .await?;
    Ok(Json(summary))
}

#[derive(Deserialize)]
struct AnalyzeRequest {
    corpus: Vec<CorpusItem>,
}

async fn handle_analyze(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<AnalysisSummary>, AppError> {
    let run = state.begin_run()?;
    let orchestrator = AnalysisOrchestrator::new(
        state.service.clone(),
        state.dataset.clone(),
        state.status.clone(),
        state.config.analysis.clone(),
    );
    let summary = orchestrator.analyze_dataset(&req.corpus, &run.token).await?;
    Ok(Json(summary))
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    /// Searched instead of the stored dataset when present.
    #[serde(default)]
    entries: Option<Vec<ParsedEntry>>,
}

fn search_orchestrator(state: &AppState) -> SearchOrchestrator {
    SearchOrchestrator::new(
        state.service.clone(),
        state.status.clone(),
        state.config.search.clone(),
        state.config.insights.clone(),
    )
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<Vec<ParsedEntry>>, AppError> {
    let run = state.begin_run()?;
    let entries = match req.entries {
        Some(entries) => entries,
        None => state.dataset.entries().as_ref().clone(),
    };
    let hits = search_orchestrator(&state)
        .find_relevant(&entries, &req.query, &run.token)
        .await?;
    Ok(Json(hits))
}

async fn handle_insights(State(state): State<AppState>) -> Result<Json<KeyInsights>, AppError> {
    let run = state.begin_run()?;
    let entries = state.dataset.entries();
    let insights = search_orchestrator(&state)
        .key_insights(&entries, &run.token)
        .await?;
    Ok(Json(insights))
}

#[derive(Serialize)]
struct AbortResponse {
    aborted: bool,
}

async fn handle_abort(State(state): State<AppState>) -> Json<AbortResponse> {
    Json(AbortResponse {
        aborted: state.abort(),
    })
}

// ============ GET /export/csv ============

async fn handle_export_csv(State(state): State<AppState>) -> Response {
    let entries = state.dataset.entries();
    let step = if entries.iter().any(|e| e.has_analysis()) {
        ExportStep::Analyzed
    } else {
        ExportStep::Parsed
    };
    let filename = export_filename(&protocol_number(&entries), step, chrono::Local::now());
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.csv\"", filename),
            ),
        ],
        to_csv(&entries),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::DisabledService;
    use crate::store::memory::InMemoryStore;
    use serde_json::{json, Value};

    async fn spawn_api(entries: Vec<ParsedEntry>) -> (String, AppState) {
        let dataset = Arc::new(Dataset::open(Arc::new(InMemoryStore::new())).await.unwrap());
        dataset.replace_all(&entries).await.unwrap();
        let state = AppState::new(
            Config::with_db("unused.sqlite"),
            Arc::new(DisabledService),
            dataset,
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), state)
    }

    fn sample() -> Vec<ParsedEntry> {
        let mut first = ParsedEntry::exchange(
            1,
            "WP20/1",
            Some("Abg. X".into()),
            Some("Beta".into()),
            None,
            None,
        );
        first.fraktion = Some("SPD".into());
        vec![
            first,
            ParsedEntry::exchange(2, "WP20/1", Some("Abg. Y".into()), Some("Alpha".into()), None, None),
            ParsedEntry::note(3, "WP20/2", "Vors.: Pause".into()),
        ]
    }

    #[tokio::test]
    async fn lists_filters_and_sorts_entries() {
        let (base, _) = spawn_api(sample()).await;
        let client = reqwest::Client::new();

        let all: Vec<ParsedEntry> = client
            .get(format!("{}/entries", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let sorted: Vec<ParsedEntry> = client
            .get(format!("{}/entries?sort=question&direction=asc&text=a", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let ids: Vec<i64> = sorted.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 1]);

        let spd: Vec<ParsedEntry> = client
            .get(format!("{}/entries?fraktion=SPD", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(spd.len(), 1);

        let bad = client
            .get(format!("{}/entries?sort=nope", base))
            .send()
            .await
            .unwrap();
        assert_eq!(bad.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn updates_one_record() {
        let (base, state) = spawn_api(sample()).await;
        let client = reqwest::Client::new();
        let mut edited = sample()[1].clone();
        edited.answer = Some("Ja".into());

        let resp = client
            .put(format!("{}/entries/2", base))
            .json(&edited)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(state.dataset.get(2).unwrap().answer.as_deref(), Some("Ja"));

        let mismatch = client
            .put(format!("{}/entries/7", base))
            .json(&edited)
            .send()
            .await
            .unwrap();
        assert_eq!(mismatch.status(), reqwest::StatusCode::BAD_REQUEST);

        edited.id = 9;
        let missing = client
            .put(format!("{}/entries/9", base))
            .json(&edited)
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unconfigured_provider_is_reported() {
        let (base, state) = spawn_api(Vec::new()).await;
        let resp = reqwest::Client::new()
            .post(format!("{}/parse", base))
            .json(&json!({ "text": "Frage: Warum?", "protocol": "20" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "not_configured");
        assert!(state.dataset.is_empty());
        // The slot is released after a failed run.
        assert!(state.begin_run().is_ok());
    }

    #[tokio::test]
    async fn exports_csv_and_clears() {
        let (base, state) = spawn_api(sample()).await;
        let client = reqwest::Client::new();

        let resp = client.get(format!("{}/export/csv", base)).send().await.unwrap();
        let disposition = resp
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.contains("wp20-parsed-"));
        let body = resp.text().await.unwrap();
        assert!(body.contains("#,Fundstelle,Fragesteller"));

        let cleared = client.delete(format!("{}/entries", base)).send().await.unwrap();
        assert_eq!(cleared.status(), reqwest::StatusCode::NO_CONTENT);
        assert!(state.dataset.is_empty());

        let status: serde_json::Value = client
            .get(format!("{}/status", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["kind"], "status");
        assert_eq!(status["message"], "Alle Daten wurden zurückgesetzt.");
    }

    #[tokio::test]
    async fn one_run_at_a_time() {
        let (base, state) = spawn_api(Vec::new()).await;
        let guard = state.begin_run().unwrap();

        let resp = reqwest::Client::new()
            .post(format!("{}/insights", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::CONFLICT);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "busy");

        assert!(state.abort());
        assert!(guard.token.is_cancelled());
        drop(guard);
        assert!(!state.abort());
    }

    #[tokio::test]
    async fn health_names_provider() {
        let (base, _) = spawn_api(Vec::new()).await;
        let body: Value = reqwest::get(format!("{}/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["provider"], "disabled");
    }
}
