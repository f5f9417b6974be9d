//! Session history, review and statistics handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::sessions::{self, StoreStatistics};
use crate::error::{ApiError, ApiResult};
use crate::models::{BatchSession, ReviewStatus, SessionRow, SessionSummary};
use crate::services::{SessionView, ViewQuery};
use crate::AppState;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
    pub limit: usize,
    pub offset: usize,
}

/// PUT /sessions/:id/rows/:row_index/note request
///
/// Omitted fields are left unchanged; an empty note clears it.
#[derive(Debug, Deserialize)]
pub struct AnnotateRequest {
    pub note: Option<String>,
    pub review_status: Option<String>,
}

/// GET /sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<SessionListResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let offset = query.offset.unwrap_or(0);

    let sessions = sessions::list_sessions(&state.db, limit, offset).await?;
    Ok(Json(SessionListResponse { sessions, limit, offset }))
}

/// GET /sessions/:id
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<BatchSession>> {
    Ok(Json(sessions::get_session(&state.db, session_id).await?))
}

/// GET /sessions/:id/view
pub async fn get_session_view(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<ViewQuery>,
) -> ApiResult<Json<SessionView>> {
    let session = sessions::get_session(&state.db, session_id).await?;
    let (threshold, per_page) = {
        let config = state.config.read().await;
        (config.confidence_threshold, config.results_per_page)
    };

    let view = SessionView::build(&session, &query, threshold, per_page).map_err(ApiError::BadRequest)?;
    Ok(Json(view))
}

/// PUT /sessions/:id/rows/:row_index/note
pub async fn annotate_row(
    State(state): State<AppState>,
    Path((session_id, row_index)): Path<(Uuid, usize)>,
    Json(request): Json<AnnotateRequest>,
) -> ApiResult<Json<SessionRow>> {
    if request.note.is_none() && request.review_status.is_none() {
        return Err(ApiError::BadRequest(
            "Provide 'note' and/or 'review_status'".to_string(),
        ));
    }

    let review_status = request
        .review_status
        .as_deref()
        .map(str::parse::<ReviewStatus>)
        .transpose()?;

    let row = sessions::annotate(&state.db, session_id, row_index, request.note.as_deref(), review_status).await?;
    Ok(Json(row))
}

/// DELETE /sessions/:id
///
/// 409 while the batch is still running.
pub async fn delete_session(State(state): State<AppState>, Path(session_id): Path<Uuid>) -> ApiResult<StatusCode> {
    if state.active_batches.read().await.contains_key(&session_id) {
        return Err(ApiError::Conflict(format!(
            "Batch {} is still running; cancel it first",
            session_id
        )));
    }

    sessions::delete_session(&state.db, session_id).await?;
    tracing::info!(session_id = %session_id, "Session deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /statistics
pub async fn get_statistics(State(state): State<AppState>) -> ApiResult<Json<StoreStatistics>> {
    Ok(Json(sessions::statistics(&state.db).await?))
}

/// Build session routes
pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", get(list_sessions))
        .route("/sessions/:session_id", get(get_session).delete(delete_session))
        .route("/sessions/:session_id/view", get(get_session_view))
        .route("/sessions/:session_id/rows/:row_index/note", put(annotate_row))
        .route("/statistics", get(get_statistics))
}
