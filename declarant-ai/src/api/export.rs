//! GET /sessions/:id/export

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::services::exporter::{self, ExportFormat};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    /// `csv` or `xlsx` (default)
    pub format: Option<String>,
}

pub async fn export_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    let format = match query.format.as_deref() {
        Some(f) => f.parse::<ExportFormat>()?,
        None => ExportFormat::default(),
    };

    let session = crate::db::sessions::get_session(&state.db, session_id).await?;
    let bytes = exporter::export(&session, format)?;
    let filename = exporter::export_filename(&session, format);

    tracing::info!(
        session_id = %session_id,
        format = format.extension(),
        bytes = bytes.len(),
        "Session exported"
    );

    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response())
}

pub fn export_routes() -> Router<AppState> {
    Router::new().route("/sessions/:session_id/export", get(export_session))
}
