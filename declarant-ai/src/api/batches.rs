//! Batch API handlers
//!
//! POST /batches, POST /batches/preview, GET /batches/:id/progress,
//! POST /batches/:id/cancel

use std::sync::Arc;

use axum::{
    extract::{multipart::Field, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use declarant_common::config::AgentType;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{BatchProgress, BatchState, ColumnMapping, RowError};
use crate::services::{spreadsheet, ProgressTracker, RowNormalizer};
use crate::{ActiveBatch, AppState};

/// Rows returned by the upload preview
const PREVIEW_ROWS: usize = 5;

/// Cap on the text parts (`mapping`, `agent_type`) of an upload
const MAX_TEXT_FIELD_BYTES: u64 = 64 * 1024;

/// POST /batches response
#[derive(Debug, Serialize)]
pub struct BatchCreatedResponse {
    pub session_id: Uuid,
    pub filename: String,
    pub agent_type: AgentType,
    pub state: BatchState,
    pub mapping: ColumnMapping,
    pub total_rows: usize,
    pub classifiable: usize,
    pub excluded: usize,
    /// Rows excluded for a missing required field
    pub row_errors: Vec<RowError>,
}

/// POST /batches/preview response
#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub filename: String,
    pub headers: Vec<String>,
    pub inferred_mapping: ColumnMapping,
    pub total_rows: usize,
    pub max_batch_size: usize,
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// POST /batches/:id/cancel response
#[derive(Debug, Serialize)]
pub struct CancelBatchResponse {
    pub session_id: Uuid,
    pub cancelled: bool,
    pub completed: usize,
    pub total: usize,
}

/// Parsed multipart upload
struct Upload {
    filename: String,
    bytes: Vec<u8>,
    mapping: Option<ColumnMapping>,
    agent_type: Option<AgentType>,
}

/// Read a part chunk by chunk, failing as soon as it passes `max_bytes`
async fn read_field_limited(mut field: Field<'_>, max_bytes: u64) -> ApiResult<Result<Vec<u8>, u64>> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?
    {
        bytes.extend_from_slice(&chunk);
        if bytes.len() as u64 > max_bytes {
            return Ok(Err(bytes.len() as u64));
        }
    }
    Ok(Ok(bytes))
}

async fn read_text_field(field: Field<'_>, name: &str) -> ApiResult<String> {
    let bytes = read_field_limited(field, MAX_TEXT_FIELD_BYTES)
        .await?
        .map_err(|_| ApiError::BadRequest(format!("'{}' field is too large", name)))?;
    String::from_utf8(bytes).map_err(|_| ApiError::BadRequest(format!("'{}' field is not UTF-8", name)))
}

/// Read `file`, optional `mapping` (JSON object) and optional `agent_type`
///
/// The file part is rejected with 413 once it passes `max_file_bytes`.
async fn read_upload(mut multipart: Multipart, max_file_bytes: u64) -> ApiResult<Upload> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut mapping = None;
    let mut agent_type = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::BadRequest("Uploaded file has no filename".to_string()))?;
                let bytes = read_field_limited(field, max_file_bytes).await?.map_err(|size| {
                    spreadsheet::SpreadsheetError::FileTooLarge {
                        size,
                        max: max_file_bytes,
                    }
                })?;
                file = Some((filename, bytes));
            }
            "mapping" => {
                let text = read_text_field(field, "mapping").await?;
                if !text.trim().is_empty() {
                    let parsed: ColumnMapping = serde_json::from_str(&text)
                        .map_err(|e| ApiError::BadRequest(format!("Invalid column mapping: {}", e)))?;
                    mapping = Some(parsed);
                }
            }
            "agent_type" => {
                let text = read_text_field(field, "agent_type").await?;
                if !text.trim().is_empty() {
                    agent_type = Some(text.trim().parse::<AgentType>()?);
                }
            }
            other => {
                tracing::debug!(field = %other, "Ignoring unknown multipart field");
            }
        }
    }

    let (filename, bytes) = file.ok_or_else(|| ApiError::BadRequest("Missing 'file' field".to_string()))?;
    Ok(Upload {
        filename,
        bytes,
        mapping,
        agent_type,
    })
}

/// POST /batches
///
/// Creates the session and starts classification in the background.
/// Returns 202 Accepted; oversized uploads are rejected with 413 and no
/// session is created.
pub async fn create_batch(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<BatchCreatedResponse>)> {
    let workflow = state.workflow().await;
    let upload = read_upload(multipart, workflow.config().max_file_size_bytes()).await?;

    let prepared = workflow
        .prepare(&upload.filename, &upload.bytes, upload.mapping, upload.agent_type)
        .await?;
    let session_id = prepared.session_id;

    let response = BatchCreatedResponse {
        session_id,
        filename: prepared.filename.clone(),
        agent_type: prepared.agent,
        state: BatchState::Processing,
        mapping: prepared.mapping.clone(),
        total_rows: prepared.total_rows,
        classifiable: prepared.items.len(),
        excluded: prepared.excluded(),
        row_errors: prepared.row_errors.clone(),
    };

    let progress = Arc::new(ProgressTracker::new(prepared.items.len()));
    let cancel = CancellationToken::new();
    state.active_batches.write().await.insert(
        session_id,
        ActiveBatch {
            cancel: cancel.clone(),
            progress: Arc::clone(&progress),
        },
    );

    let bg_state = state.clone();
    tokio::spawn(async move {
        tracing::info!(session_id = %session_id, "Background batch task started");

        let result = workflow.run(prepared, progress, cancel).await;
        bg_state.active_batches.write().await.remove(&session_id);

        match result {
            Ok(report) => tracing::info!(
                session_id = %session_id,
                state = report.state.as_str(),
                "Background batch task finished"
            ),
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Batch run failed");
                bg_state.record_error(format!("Batch {}: {}", session_id, e)).await;
            }
        }
    });

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// POST /batches/preview
///
/// Parses the upload and reports headers, inferred mapping and the first
/// rows. No session is created.
pub async fn preview_batch(State(state): State<AppState>, multipart: Multipart) -> ApiResult<Json<PreviewResponse>> {
    let config = state.config.read().await.clone();
    let upload = read_upload(multipart, config.max_file_size_bytes()).await?;

    let table = spreadsheet::read_table(&upload.filename, &upload.bytes, config.max_file_size_bytes())?;
    let inferred_mapping = RowNormalizer::resolve_mapping(&table, upload.mapping);

    Ok(Json(PreviewResponse {
        filename: upload.filename,
        headers: table.headers.clone(),
        inferred_mapping,
        total_rows: table.rows.len(),
        max_batch_size: config.max_batch_size,
        rows: table.preview(PREVIEW_ROWS),
    }))
}

/// GET /batches/:id/progress
///
/// Live counters while the run is in flight, stored counters afterwards.
pub async fn get_progress(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<BatchProgress>> {
    if let Some(active) = state.active_batches.read().await.get(&session_id) {
        let p = &active.progress;
        return Ok(Json(BatchProgress::new(
            session_id,
            BatchState::Processing,
            p.completed(),
            p.total(),
            p.failed(),
        )));
    }

    Ok(Json(crate::db::sessions::get_progress(&state.db, session_id).await?))
}

/// POST /batches/:id/cancel
///
/// Stops issuing calls; in-flight results are discarded. 409 when the
/// session is not running.
pub async fn cancel_batch(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<CancelBatchResponse>> {
    let active = state.active_batches.read().await.get(&session_id).cloned();

    match active {
        Some(active) => {
            active.cancel.cancel();
            tracing::info!(session_id = %session_id, "Batch cancellation requested");
            Ok(Json(CancelBatchResponse {
                session_id,
                cancelled: true,
                completed: active.progress.completed(),
                total: active.progress.total(),
            }))
        }
        None => {
            let progress = crate::db::sessions::get_progress(&state.db, session_id).await?;
            Err(ApiError::Conflict(format!(
                "Batch {} is not running (state: {})",
                session_id,
                progress.state.as_str()
            )))
        }
    }
}

/// Build batch routes
pub fn batch_routes() -> Router<AppState> {
    Router::new()
        .route("/batches", post(create_batch))
        .route("/batches/preview", post(preview_batch))
        .route("/batches/:session_id/progress", get(get_progress))
        .route("/batches/:session_id/cancel", post(cancel_batch))
        // Upload size follows `max_file_size_mb`, checked while reading
        .layer(DefaultBodyLimit::disable())
}
