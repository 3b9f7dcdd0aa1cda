//! Atlas Memory Server
//!
//! HTTP API for the memory engine.

use std::path::Path as FilePath;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use atlas_memory::{
    config::Config,
    decay::RecallSignal,
    embedding::LocalEmbedder,
    error::Error,
    record::{MemoryRecord, MemoryState},
    service::{IngestDecision, MemoryService, SweepReport},
    storage::{MemoryStore, StoreStats},
};

/// Application state shared across handlers
///
/// The service is shared directly: all synchronization lives in the store,
/// so concurrent recalls run in parallel instead of queueing on an outer
/// lock.
struct AppState {
    service: MemoryService,
}

type SharedState = Arc<AppState>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match std::env::var("ATLAS_MEMORY_CONFIG") {
        Ok(path) => Config::load(FilePath::new(&path))?,
        Err(_) => Config::default(),
    };
    config.ensure_dirs()?;
    tracing::info!("Starting Atlas Memory Server on port {}", config.server_port);
    tracing::info!("Data directory: {:?}", config.data_dir);

    // Initialize components
    let store = Arc::new(MemoryStore::open(&config)?);
    let embedder = Arc::new(LocalEmbedder::new(&config)?);
    let service = MemoryService::new(&config, store, embedder);

    let state = Arc::new(AppState { service });

    // Background maintenance sweep; an interval of zero disables it
    let interval_secs = state.service.sweep_config().interval_secs;
    if interval_secs > 0 {
        let sweeper = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = sweeper.service.run_maintenance_sweep() {
                    tracing::error!(error = %e, "maintenance sweep failed");
                }
            }
        });
    } else {
        tracing::info!("Background sweep disabled");
    }

    // Build router
    let app = Router::new()
        // Health and stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        // Ingest, search, listing
        .route("/memories", get(list_memories).post(ingest_memory))
        .route("/memories/search", post(search_memories))
        // Single records and their supersede history
        .route("/memories/:id", get(get_memory))
        .route("/memories/:id/history", get(get_history))
        // Feedback and reviews
        .route("/memories/:id/promote", post(promote_memory))
        .route("/memories/:id/demote", post(demote_memory))
        .route("/memories/:id/review", post(review_memory))
        // Maintenance
        .route("/maintenance/sweep", post(run_sweep))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state);

    let port = config.server_port;
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!("Server listening on http://127.0.0.1:{}", port);

    axum::serve(listener, app).await?;

    Ok(())
}

// === Handlers ===

async fn health() -> &'static str {
    "ok"
}

async fn stats(State(state): State<SharedState>) -> Result<Json<StoreStats>, StatusCode> {
    let stats = state.service.stats().map_err(error_status)?;
    Ok(Json(stats))
}

// --- Ingest and search ---

#[derive(Debug, Deserialize)]
struct IngestRequest {
    content: String,
    tags: Option<Vec<String>>,
    high_leverage: Option<bool>,
}

async fn ingest_memory(
    State(state): State<SharedState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, StatusCode> {
    let decision = state
        .service
        .ingest(
            &req.content,
            req.tags.unwrap_or_default(),
            req.high_leverage.unwrap_or(false),
        )
        .await
        .map_err(error_status)?;

    let response = match decision {
        IngestDecision::Created { record } => IngestResponse {
            decision: "created".into(),
            memory: Some(state.memory_response(&record)),
            replaced: None,
            candidates: Vec::new(),
        },
        IngestDecision::Updated { record } => IngestResponse {
            decision: "updated".into(),
            memory: Some(state.memory_response(&record)),
            replaced: None,
            candidates: Vec::new(),
        },
        IngestDecision::Superseded { record, replaced } => IngestResponse {
            decision: "superseded".into(),
            memory: Some(state.memory_response(&record)),
            replaced: Some(replaced.to_string()),
            candidates: Vec::new(),
        },
        IngestDecision::Ambiguous { candidates } => IngestResponse {
            decision: "ambiguous".into(),
            memory: None,
            replaced: None,
            candidates: candidates
                .into_iter()
                .map(|c| CandidateResponse {
                    id: c.id.to_string(),
                    similarity: c.similarity,
                    content: c.content,
                })
                .collect(),
        },
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
    tags: Option<Vec<String>>,
    top_k: Option<usize>,
    high_leverage: Option<bool>,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
    stale_fallback: bool,
}

#[derive(Debug, Serialize)]
struct SearchResult {
    memory: MemoryResponse,
    score: f64,
    similarity: f64,
    retrievability: f64,
    context_score: f64,
}

async fn search_memories(
    State(state): State<SharedState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, StatusCode> {
    let outcome = state
        .service
        .retrieve(
            &req.query,
            req.tags.unwrap_or_default(),
            req.top_k.unwrap_or(5),
            req.high_leverage.unwrap_or(false),
        )
        .await
        .map_err(error_status)?;

    Ok(Json(SearchResponse {
        stale_fallback: outcome.stale_fallback,
        results: outcome
            .results
            .into_iter()
            .map(|r| SearchResult {
                memory: state.memory_response(&r.record),
                score: r.score,
                similarity: r.similarity,
                retrievability: r.retrievability,
                context_score: r.context_score,
            })
            .collect(),
    }))
}

// --- Record handlers ---

#[derive(Debug, Deserialize)]
struct ListMemoriesQuery {
    state: Option<String>,
    limit: Option<usize>,
}

async fn list_memories(
    State(state): State<SharedState>,
    Query(query): Query<ListMemoriesQuery>,
) -> Result<Json<Vec<MemoryResponse>>, StatusCode> {
    let filter = match query.state.as_deref() {
        Some(s) => Some(s.parse::<MemoryState>().map_err(|_| StatusCode::BAD_REQUEST)?),
        None => None,
    };

    let records = state
        .service
        .list(filter, query.limit.unwrap_or(50))
        .map_err(error_status)?;

    Ok(Json(records.iter().map(|r| state.memory_response(r)).collect()))
}

async fn get_memory(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<MemoryResponse>, StatusCode> {
    let id = parse_id(&id)?;
    let record = state.service.get(id).map_err(error_status)?;
    Ok(Json(state.memory_response(&record)))
}

async fn get_history(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<MemoryResponse>>, StatusCode> {
    let id = parse_id(&id)?;
    let chain = state.service.history(id).map_err(error_status)?;
    Ok(Json(chain.iter().map(|r| state.memory_response(r)).collect()))
}

// --- Feedback handlers ---

async fn promote_memory(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<MemoryResponse>, StatusCode> {
    let id = parse_id(&id)?;
    let record = state.service.promote(id).map_err(error_status)?;
    Ok(Json(state.memory_response(&record)))
}

async fn demote_memory(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<MemoryResponse>, StatusCode> {
    let id = parse_id(&id)?;
    let record = state.service.demote(id).map_err(error_status)?;
    Ok(Json(state.memory_response(&record)))
}

#[derive(Debug, Deserialize)]
struct ReviewRequest {
    signal: String,
}

async fn review_memory(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<ReviewRequest>,
) -> Result<Json<MemoryResponse>, StatusCode> {
    let id = parse_id(&id)?;
    let signal = parse_signal(&req.signal).ok_or(StatusCode::BAD_REQUEST)?;
    let record = state.service.record_review(id, signal).map_err(error_status)?;
    Ok(Json(state.memory_response(&record)))
}

// --- Maintenance handlers ---

async fn run_sweep(
    State(state): State<SharedState>,
) -> Result<Json<SweepReport>, StatusCode> {
    let report = state.service.run_maintenance_sweep().map_err(error_status)?;
    Ok(Json(report))
}

// === Response types ===

#[derive(Debug, Serialize)]
struct IngestResponse {
    decision: String,
    memory: Option<MemoryResponse>,
    replaced: Option<String>,
    candidates: Vec<CandidateResponse>,
}

#[derive(Debug, Serialize)]
struct CandidateResponse {
    id: String,
    similarity: f64,
    content: String,
}

/// Wire shape of a record: embedding omitted, retrievability derived at
/// response time
#[derive(Debug, Serialize)]
struct MemoryResponse {
    id: String,
    content: String,
    state: String,
    context_tags: Vec<String>,
    stability: f64,
    difficulty: f64,
    importance: f64,
    retrievability: f64,
    review_count: u32,
    supersedes: Option<String>,
    superseded_by: Option<String>,
    created_at: String,
    last_reviewed_at: String,
}

impl AppState {
    fn memory_response(&self, record: &MemoryRecord) -> MemoryResponse {
        MemoryResponse {
            id: record.id.to_string(),
            content: record.content.clone(),
            state: record.state.to_string(),
            context_tags: record.context_tags.iter().cloned().collect(),
            stability: record.stability,
            difficulty: record.difficulty,
            importance: record.importance,
            retrievability: self.service.current_retrievability(record),
            review_count: record.review_count,
            supersedes: record.supersedes.map(|id| id.to_string()),
            superseded_by: record.superseded_by.map(|id| id.to_string()),
            created_at: record.created_at.to_rfc3339(),
            last_reviewed_at: record.last_reviewed_at.to_rfc3339(),
        }
    }
}

// === Helpers ===

fn parse_id(raw: &str) -> Result<Uuid, StatusCode> {
    Uuid::parse_str(raw).map_err(|_| StatusCode::BAD_REQUEST)
}

/// Accept a recall signal by name or by its numeric 1..4 wire form
fn parse_signal(raw: &str) -> Option<RecallSignal> {
    if let Ok(value) = raw.parse::<u8>() {
        return RecallSignal::from_value(value);
    }
    match raw {
        "failed" => Some(RecallSignal::Failed),
        "hard" => Some(RecallSignal::Hard),
        "good" => Some(RecallSignal::Good),
        "easy" => Some(RecallSignal::Easy),
        _ => None,
    }
}

fn error_status(err: Error) -> StatusCode {
    let status = match &err {
        Error::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::StaleWrite { .. } => StatusCode::CONFLICT,
        Error::InvariantViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::warn!(error = %err, status = %status, "request failed");
    status
}
