use std::sync::Arc;

use answer_core::{AnswerEngine, AnswerError, HistoryTurn, QueryParams, RagMode, SourceRef};
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use doc_store::VectorStore;
use ingest_core::{IngestError, IngestErrorKind, Ingestor};
use serde::{Deserialize, Serialize};

const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;
const MAX_QUESTION_CHARS: usize = 8_000;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<VectorStore>,
    pub ingestor: Arc<Ingestor>,
    pub engine: Arc<AnswerEngine>,
    pub emb_url: String,
    pub llm_url: String,
    pub storage: String,
    pub fast_mode: bool,
    pub render_pages: bool,
    pub enable_table_index: bool,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/upload",
            post(upload_handler).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/query", post(query_post_handler))
        .route("/query/{question}", get(query_get_handler))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
    emb_url: String,
    llm_url: String,
    storage: String,
    index_loaded: bool,
    index_size: usize,
    fast_mode: bool,
    render_pages: bool,
    enable_table_index: bool,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    ok: bool,
    chunks: usize,
    stored: String,
    tables: usize,
    pages: usize,
    image_caption_chunks: usize,
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    question: Option<String>,
    match_count: Option<usize>,
    history: Option<Vec<HistoryTurn>>,
    max_new_tokens: Option<u32>,
    temperature: Option<f32>,
    top_p: Option<f32>,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    ok: bool,
    mode: &'static str,
    answer: String,
    sources: Vec<SourceRef>,
    rag_mode: RagMode,
}

/// Error body: `{"ok":false,"error":{"code","message"}}`.
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "ok": false,
            "error": { "code": self.code, "message": self.message }
        });
        (self.status, Json(body)).into_response()
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        emb_url: state.emb_url.clone(),
        llm_url: state.llm_url.clone(),
        storage: state.storage.clone(),
        index_loaded: state.store.loaded(),
        index_size: state.store.index_len(),
        fast_mode: state.fast_mode,
        render_pages: state.render_pages,
        enable_table_index: state.enable_table_index,
    })
}

async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| ApiError::new(error.status(), "MALFORMED_MULTIPART", error.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or("upload").to_string();
        let mime = field.content_type().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(|error| {
            ApiError::new(error.status(), "UPLOAD_READ_FAILED", error.body_text())
        })?;

        let report = state
            .ingestor
            .ingest(&bytes, &filename, &mime)
            .await
            .map_err(ingest_error_to_http)?;

        return Ok(Json(UploadResponse {
            ok: true,
            chunks: report.chunks,
            stored: report.stored,
            tables: report.tables,
            pages: report.pages,
            image_caption_chunks: report.image_caption_chunks,
        }));
    }

    Err(ApiError::new(
        StatusCode::BAD_REQUEST,
        "MISSING_FILE",
        "multipart field 'file' is required",
    ))
}

async fn query_post_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let question = request.question.unwrap_or_default();
    let history = request.history.unwrap_or_default();
    let params = QueryParams {
        max_new_tokens: request.max_new_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        match_count: request.match_count,
    };

    run_query(&state, &question, &history, &params).await
}

async fn query_get_handler(
    State(state): State<AppState>,
    Path(question): Path<String>,
) -> Result<Json<QueryResponse>, ApiError> {
    run_query(&state, &question, &[], &QueryParams::default()).await
}

async fn run_query(
    state: &AppState,
    question: &str,
    history: &[HistoryTurn],
    params: &QueryParams,
) -> Result<Json<QueryResponse>, ApiError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "MISSING_QUESTION",
            "question is required",
        ));
    }
    if question.chars().count() > MAX_QUESTION_CHARS {
        return Err(ApiError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "QUESTION_TOO_LONG",
            format!("question exceeds {MAX_QUESTION_CHARS} characters"),
        ));
    }

    let answer = state
        .engine
        .answer(question, history, params)
        .await
        .map_err(answer_error_to_http)?;

    Ok(Json(QueryResponse {
        ok: true,
        mode: "json",
        answer: answer.answer,
        sources: answer.sources,
        rag_mode: answer.rag_mode,
    }))
}

fn ingest_error_to_http(error: IngestError) -> ApiError {
    let code = match &error {
        IngestError::EmptyFile => "EMPTY_FILE",
        IngestError::Unsupported { .. } => "UNSUPPORTED_TYPE",
        IngestError::EmptyText { .. } => "EMPTY_TEXT",
        IngestError::HwpConverterUnavailable => "HWP_CONVERTER_MISSING",
        IngestError::Parse(_) => "PARSE_FAILED",
        IngestError::Embedding { .. } => "EMBEDDING_FAILED",
        _ => "INGEST_FAILED",
    };

    let status = match error.kind() {
        IngestErrorKind::Input => StatusCode::BAD_REQUEST,
        IngestErrorKind::UnsupportedConversion => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        IngestErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::error!("upload failed: {error}");
    }

    ApiError::new(status, code, error.to_string())
}

fn answer_error_to_http(error: AnswerError) -> ApiError {
    tracing::error!("query failed: {error}");
    let code = match &error {
        AnswerError::Embedding(_) => "EMBEDDING_FAILED",
        AnswerError::Store(_) => "RETRIEVAL_FAILED",
        AnswerError::Generation(_) => "GENERATION_FAILED",
    };
    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, code, error.to_string())
}
