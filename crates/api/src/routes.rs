use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use index::IndexStats;
use ingest::{Document, FileReader};
use pipeline::{CacheStats, IngestReport, MetricsSnapshot, Pipeline, QueryOutcome};
use query::{RetrievalResult, RetrievalStrategy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::ApiError;

pub type AppState = Arc<Pipeline>;

pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ingest", post(ingest))
        .route("/retrieve", post(retrieve))
        .route("/query", post(answer))
        .route("/stats", get(get_stats))
        .route("/metrics", get(get_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(pipeline)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

async fn health_check(State(pipeline): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    // a stats round trip touches both stores
    match pipeline.stats().await {
        Ok(_) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: format!("error: {}", e),
            }),
        ),
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IngestRequest {
    Path {
        path: String,
    },
    Text {
        text: String,
        source: Option<String>,
        doc_id: Option<String>,
    },
}

#[derive(Debug, Serialize)]
struct DocumentFailure {
    source: String,
    error: String,
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    documents: Vec<IngestReport>,
    failures: Vec<DocumentFailure>,
}

async fn ingest(
    State(pipeline): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, ApiError> {
    let documents = match req {
        IngestRequest::Path { path } => {
            let path = PathBuf::from(path);
            if path.is_dir() {
                FileReader::read_directory(&path).await?
            } else if path.is_file() {
                vec![FileReader::read_file(&path).await?]
            } else {
                return Err(ApiError::new(
                    StatusCode::NOT_FOUND,
                    format!("{} does not exist", path.display()),
                ));
            }
        }
        IngestRequest::Text {
            text,
            source,
            doc_id,
        } => {
            let source = source.unwrap_or_else(|| format!("inline-{}", uuid::Uuid::new_v4()));
            let mut document = Document::from_text(source, text);
            if let Some(doc_id) = doc_id {
                document.doc_id = doc_id;
            }
            vec![document]
        }
    };

    info!(documents = documents.len(), "Ingest request");

    if let [document] = documents.as_slice() {
        let report = pipeline.ingest_document(document).await?;
        return Ok(Json(IngestResponse {
            documents: vec![report],
            failures: Vec::new(),
        }));
    }

    let sources: Vec<String> = documents.iter().map(|d| d.source.clone()).collect();
    let mut response = IngestResponse {
        documents: Vec::new(),
        failures: Vec::new(),
    };
    for (source, result) in sources.into_iter().zip(pipeline.ingest_documents(documents).await) {
        match result {
            Ok(report) => response.documents.push(report),
            Err(e) => response.failures.push(DocumentFailure {
                source,
                error: format!("{:#}", e),
            }),
        }
    }

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct RetrieveRequest {
    query: String,
    strategy: Option<RetrievalStrategy>,
    top_k: Option<usize>,
}

async fn retrieve(
    State(pipeline): State<AppState>,
    Json(req): Json<RetrieveRequest>,
) -> Result<Json<RetrievalResult>, ApiError> {
    let defaults = &pipeline.config().retrieval;
    let result = pipeline
        .retrieve(
            &req.query,
            req.strategy.unwrap_or(defaults.strategy),
            req.top_k.unwrap_or(defaults.top_k),
        )
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    question: String,
    strategy: Option<RetrievalStrategy>,
    top_k: Option<usize>,
}

async fn answer(
    State(pipeline): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryOutcome>, ApiError> {
    if req.question.trim().is_empty() {
        return Err(ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "question must not be empty",
        ));
    }

    let defaults = &pipeline.config().retrieval;
    let outcome = pipeline
        .answer(
            &req.question,
            req.strategy.unwrap_or(defaults.strategy),
            req.top_k.unwrap_or(defaults.top_k),
        )
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    index: IndexStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    embedding_cache: Option<CacheStats>,
}

async fn get_stats(State(pipeline): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let index = pipeline.stats().await?;
    Ok(Json(StatsResponse {
        index,
        embedding_cache: pipeline.cache_stats(),
    }))
}

async fn get_metrics(State(pipeline): State<AppState>) -> Json<MetricsSnapshot> {
    Json(pipeline.metrics().snapshot())
}
