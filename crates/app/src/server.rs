//! HTTP surface over a [`Retriever`] for the voice agent.
//!
//! Core calls block, so every handler hops onto `spawn_blocking`.

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use pdf_rag_core::{
    import_document, list_documents, AskOptions, DocumentSummary, ErrorKind, HostedRetriever,
    IndexStatus, IngestError, KnowledgeBase, Retriever, SearchError, SourcePreview,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::task;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

pub const MAX_QUERY_K: usize = 12;
pub const MAX_SEARCH_K: usize = 20;

/// The retrieval backend chosen at startup.
#[derive(Clone)]
pub enum Backend {
    Local(Arc<KnowledgeBase>),
    Hosted(Arc<HostedRetriever>),
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Local(_) => "local",
            Backend::Hosted(_) => "hosted",
        }
    }

    pub fn retriever(&self) -> Arc<dyn Retriever> {
        match self {
            Backend::Local(kb) => kb.clone() as Arc<dyn Retriever>,
            Backend::Hosted(hosted) => hosted.clone() as Arc<dyn Retriever>,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub backend: Backend,
    pub documents_dir: PathBuf,
    pub default_top_k: usize,
    pub max_document_bytes: usize,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("background task failed: {0}")]
    Task(#[from] task::JoinError),
}

impl From<IngestError> for ApiError {
    fn from(error: IngestError) -> Self {
        ApiError::Search(error.into())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Task(_) => (StatusCode::INTERNAL_SERVER_ERROR, "TASK_FAILED"),
            ApiError::Search(SearchError::Ingest(IngestError::DocumentTooLarge { .. })) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE")
            }
            ApiError::Search(SearchError::Ingest(IngestError::Io(_))) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR")
            }
            ApiError::Search(error) => match error.kind() {
                ErrorKind::Input => (StatusCode::BAD_REQUEST, "INPUT_ERROR"),
                ErrorKind::Corpus => (StatusCode::UNPROCESSABLE_ENTITY, "CORPUS_ERROR"),
                ErrorKind::Consistency => (StatusCode::SERVICE_UNAVAILABLE, "INDEX_UNAVAILABLE"),
                ErrorKind::CapabilityUnavailable => {
                    (StatusCode::SERVICE_UNAVAILABLE, "CAPABILITY_UNAVAILABLE")
                }
                ErrorKind::Backend => (StatusCode::BAD_GATEWAY, "BACKEND_ERROR"),
            },
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            warn!(%status, error = %self, "request failed");
        }
        let body = ErrorBody {
            error: code,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub rerank: bool,
    #[serde(default)]
    pub final_m: Option<usize>,
    #[serde(default)]
    pub answer_lang: Option<String>,
}

impl QueryRequest {
    fn into_options(self, default_top_k: usize) -> ApiResult<(String, AskOptions)> {
        let question = self.question.trim().to_string();
        if question.is_empty() {
            return Err(ApiError::BadRequest("question must not be empty".to_string()));
        }
        let k = bounded("k", self.k.unwrap_or(default_top_k), MAX_QUERY_K)?;
        let final_m = bounded("final_m", self.final_m.unwrap_or(k), MAX_QUERY_K)?;

        Ok((
            question,
            AskOptions {
                k,
                use_rerank: self.rerank,
                final_m,
                answer_lang: self.answer_lang.filter(|lang| !lang.trim().is_empty()),
            },
        ))
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub k: Option<usize>,
}

fn bounded(name: &str, value: usize, max: usize) -> ApiResult<usize> {
    if (1..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ApiError::BadRequest(format!("{name} must be between 1 and {max}")))
    }
}

#[derive(Serialize)]
struct QueryResponse {
    answer: String,
    sources: Vec<SourcePreview>,
}

#[derive(Serialize)]
struct SearchResponse {
    sources: Vec<SourcePreview>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    backend: &'static str,
    index_loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    chunks: Option<usize>,
}

#[derive(Serialize)]
struct DocumentListResponse {
    backend: &'static str,
    documents: Vec<DocumentSummary>,
}

#[derive(Serialize)]
struct DocumentIngestResponse {
    document: DocumentSummary,
    indexed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    vector_store_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadParams {
    filename: Option<String>,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (index_loaded, chunks) = match &state.backend {
        Backend::Local(kb) => (kb.is_loaded(), kb.chunk_count()),
        Backend::Hosted(_) => (true, None),
    };
    Json(HealthResponse {
        status: "ok",
        backend: state.backend.name(),
        index_loaded,
        chunks,
    })
}

async fn query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> ApiResult<Json<QueryResponse>> {
    let Json(request) = payload?;
    let (question, options) = request.into_options(state.default_top_k)?;

    let retriever = state.backend.retriever();
    let answer = task::spawn_blocking(move || retriever.ask(&question, &options)).await??;

    Ok(Json(QueryResponse {
        answer: answer.text,
        sources: answer.hits.iter().map(|hit| hit.preview()).collect(),
    }))
}

async fn search(
    State(state): State<AppState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> ApiResult<Json<SearchResponse>> {
    let Json(request) = payload?;
    let query = request.query.trim().to_string();
    if query.is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }
    let k = bounded("k", request.k.unwrap_or(state.default_top_k), MAX_SEARCH_K)?;

    let retriever = state.backend.retriever();
    let hits = task::spawn_blocking(move || retriever.search(&query, k)).await??;

    Ok(Json(SearchResponse {
        sources: hits.iter().map(|hit| hit.preview()).collect(),
    }))
}

async fn documents(State(state): State<AppState>) -> ApiResult<Json<DocumentListResponse>> {
    let dir = state.documents_dir.clone();
    let documents = task::spawn_blocking(move || list_documents(&dir)).await??;
    Ok(Json(DocumentListResponse {
        backend: state.backend.name(),
        documents,
    }))
}

async fn upload_document(
    State(state): State<AppState>,
    params: Result<Query<UploadParams>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<DocumentIngestResponse>)> {
    let Query(params) = params?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase());
    if let Some(content_type) = content_type {
        if !content_type.starts_with("application/pdf")
            && !content_type.starts_with("application/octet-stream")
        {
            return Err(ApiError::BadRequest("only pdf uploads are supported".to_string()));
        }
    }

    let name = params.filename.unwrap_or_else(|| "document.pdf".to_string());
    let dir = state.documents_dir.clone();
    let max_bytes = state.max_document_bytes;
    let document =
        task::spawn_blocking(move || import_document(&dir, &name, &body, max_bytes)).await??;

    let (indexed, vector_store_id) = match &state.backend {
        Backend::Local(kb) => {
            let kb = kb.clone();
            let status = task::spawn_blocking(move || kb.ensure_index()).await??;
            info!(file = %document.filename, ?status, "index refreshed after upload");
            (status != IndexStatus::AlreadyLoaded, None)
        }
        Backend::Hosted(hosted) => {
            let hosted = hosted.clone();
            let path = state.documents_dir.join(&document.filename);
            let store = hosted.vector_store_id().to_string();
            let uploaded = task::spawn_blocking(move || hosted.ingest_document(&path)).await??;
            info!(file = %document.filename, uploaded, %store, "vector store updated after upload");
            (uploaded, Some(store))
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(DocumentIngestResponse {
            document,
            indexed,
            vector_store_id,
        }),
    ))
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.max_document_bytes;
    Router::new()
        .route("/health", get(health))
        .route("/query", post(query))
        .route("/search", post(search))
        .route("/documents", get(documents).post(upload_document))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Any origin when `origins` is empty or contains `*`.
pub fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return Ok(layer.allow_origin(Any));
    }

    let origins = origins
        .iter()
        .map(|origin| HeaderValue::from_str(origin.trim()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(layer.allow_origin(AllowOrigin::list(origins)))
}

pub async fn serve(state: AppState, addr: SocketAddr, cors: CorsLayer) -> anyhow::Result<()> {
    let backend = state.backend.name();
    let app = router(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, backend, "rag service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("rag service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "cannot listen for ctrl-c, shutting down");
    }
}
