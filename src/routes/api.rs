use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{header, Method},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use crate::{
    AppState,
    error::AppError,
    models::{CellValue, FileSummary, Parsed, SetOperation},
    services::{
        exporter::{self, ExportFile},
        normalizer, parser,
        session_store::{AppendOutcome, NewSessionReason},
        set_ops::{self, SetOpRequest},
        upload::{self, IncomingFile},
    },
};
use tower_http::cors::{Any, CorsLayer};

pub fn routes(state: &AppState) -> Router<Arc<AppState>> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route(
            "/api/upload",
            post(upload_files).layer(DefaultBodyLimit::max(state.config.upload_body_limit())),
        )
        .route("/api/parse", post(parse_file))
        .route("/api/normalize", post(normalize_columns))
        .route("/api/common_columns", post(common_columns))
        .route("/api/setops", post(run_set_operation))
        .route("/api/export", get(export_result))
        .route("/api/export_raw", post(export_raw))
        .layer(cors)
}

/// Runs synchronous table work off the async executor.
async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("worker task failed: {}", e)))?
}

fn download(file: ExportFile) -> Response {
    (
        [
            (header::CONTENT_TYPE, file.content_type.to_string()),
            (header::CONTENT_DISPOSITION, content_disposition(&file.filename)),
        ],
        file.bytes,
    )
        .into_response()
}

/// Attachment header with an ASCII-only `filename` and the exact name as
/// RFC 5987 `filename*`.
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(filename)
    )
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    session_id: String,
    files: Vec<FileSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_session_reason: Option<&'static str>,
}

async fn upload_files(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut session_id: Option<String> = None;
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidInput(format!("Failed to read multipart field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "session_id" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::InvalidInput(format!("Failed to read session_id: {}", e)))?;
                let value = value.trim();
                if !value.is_empty() {
                    session_id = Some(value.to_string());
                }
            }
            "files" => {
                let filename = field.file_name().unwrap_or("").to_string();
                let content = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::InvalidInput(format!("Failed to read {}: {}", filename, e)))?;
                files.push(IncomingFile { filename, content });
            }
            other => tracing::debug!("Ignoring multipart field '{}'", other),
        }
    }

    tracing::info!("Upload of {} files (session: {:?})", files.len(), session_id);
    let outcome = blocking(move || {
        upload::upload(
            state.store.as_ref(),
            session_id.as_deref(),
            files,
            state.config.max_file_size,
        )
    })
    .await?;

    let new_session_reason = match outcome.placement {
        AppendOutcome::Appended => None,
        AppendOutcome::CreatedNew(NewSessionReason::NoSessionGiven) => Some("no_session_given"),
        AppendOutcome::CreatedNew(NewSessionReason::SessionNotFound) => Some("session_not_found"),
    };
    Ok(Json(UploadResponse {
        session_id: outcome.session_id,
        files: outcome.files,
        new_session_reason,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ParseRequest {
    session_id: String,
    file_id: String,
    sheet_name: Option<String>,
}

async fn parse_file(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ParseRequest>,
) -> Result<Json<Parsed>, AppError> {
    let parsed = blocking(move || {
        parser::parse(
            state.store.as_ref(),
            &state.analyzer,
            &request.session_id,
            &request.file_id,
            request.sheet_name.as_deref(),
        )
    })
    .await?;
    Ok(Json(parsed))
}

#[derive(Debug, Deserialize)]
pub struct NormalizeRequest {
    session_id: String,
    file_id: String,
    rename_map: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct NormalizeResponse {
    columns_normalized: Vec<String>,
}

async fn normalize_columns(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NormalizeRequest>,
) -> Result<Json<NormalizeResponse>, AppError> {
    let columns_normalized = normalizer::normalize(
        state.store.as_ref(),
        &request.session_id,
        &request.file_id,
        &request.rename_map,
    )?;
    Ok(Json(NormalizeResponse { columns_normalized }))
}

#[derive(Debug, Deserialize)]
pub struct CommonColumnsRequest {
    session_id: String,
    file_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CommonColumnsResponse {
    columns: Vec<String>,
}

async fn common_columns(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CommonColumnsRequest>,
) -> Result<Json<CommonColumnsResponse>, AppError> {
    let columns =
        set_ops::common_columns_for(state.store.as_ref(), &request.session_id, &request.file_ids)?;
    Ok(Json(CommonColumnsResponse { columns }))
}

fn default_drop_na() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct SetOpsRequest {
    session_id: String,
    file_ids: Vec<String>,
    column_name: String,
    op: SetOperation,
    base_file_id: Option<String>,
    #[serde(default = "default_drop_na")]
    drop_na: bool,
}

#[derive(Debug, Serialize)]
pub struct SetOpsResponse {
    result_id: String,
    count: usize,
    values_preview: Vec<CellValue>,
}

async fn run_set_operation(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SetOpsRequest>,
) -> Result<Json<SetOpsResponse>, AppError> {
    let start = std::time::Instant::now();
    let summary = blocking(move || {
        set_ops::run(
            state.store.as_ref(),
            &request.session_id,
            SetOpRequest {
                file_ids: request.file_ids,
                column_name: request.column_name,
                op: request.op,
                base_file_id: request.base_file_id,
                drop_na: request.drop_na,
            },
            state.set_op_limits,
        )
    })
    .await?;
    tracing::info!("Set operation finished in {:?}", start.elapsed());

    Ok(Json(SetOpsResponse {
        result_id: summary.result_id,
        count: summary.count,
        values_preview: summary.values_preview,
    }))
}

fn default_format() -> String {
    "csv".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    session_id: String,
    result_id: String,
    #[serde(default = "default_format")]
    format: String,
}

async fn export_result(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, AppError> {
    let file = blocking(move || {
        exporter::export_result(
            state.store.as_ref(),
            &query.session_id,
            &query.result_id,
            &query.format,
        )
    })
    .await?;
    Ok(download(file))
}

#[derive(Debug, Deserialize)]
pub struct ExportRawRequest {
    session_id: String,
    result_id: String,
    file_ids: Vec<String>,
    column_name: String,
}

async fn export_raw(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExportRawRequest>,
) -> Result<Response, AppError> {
    let file = blocking(move || {
        exporter::export_raw(
            state.store.as_ref(),
            &request.session_id,
            &request.result_id,
            &request.file_ids,
            &request.column_name,
        )
    })
    .await?;
    Ok(download(file))
}
