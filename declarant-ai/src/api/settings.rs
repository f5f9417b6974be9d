//! Settings API
//!
//! GET /settings returns the effective classifier parameters and whether an
//! API key is configured (never the key itself). PUT /settings accepts any
//! subset of the classifier fields plus `openai_api_key`, stores only the
//! fields it names as overrides and rebuilds the classification client.
//! Running batches keep the parameters they started with.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use declarant_common::config::ClassifierConfig;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::services::OpenAiClassifier;
use crate::AppState;

const API_KEY_FIELD: &str = "openai_api_key";

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub classifier: ClassifierConfig,
    pub openai_api_key_configured: bool,
}

/// GET /settings
pub async fn get_settings(State(state): State<AppState>) -> Json<SettingsResponse> {
    Json(SettingsResponse {
        classifier: state.config.read().await.clone(),
        openai_api_key_configured: state.api_key.read().await.is_some(),
    })
}

/// PUT /settings
///
/// **Errors:**
/// - 400: unknown field, wrong type, empty API key or out-of-range value
/// - 500: database write failure
pub async fn update_settings(
    State(state): State<AppState>,
    Json(mut payload): Json<Map<String, Value>>,
) -> ApiResult<Json<SettingsResponse>> {
    let new_key = match payload.remove(API_KEY_FIELD) {
        None => None,
        Some(Value::String(key)) if crate::config::is_valid_key(&key) => Some(key.trim().to_string()),
        Some(_) => {
            return Err(ApiError::BadRequest(
                "openai_api_key must be a non-empty string".to_string(),
            ))
        }
    };

    let current = state.config.read().await.clone();
    let mut merged = match serde_json::to_value(&current) {
        Ok(Value::Object(map)) => map,
        _ => return Err(ApiError::Internal("Classifier config is not an object".to_string())),
    };
    let mut changed = Vec::with_capacity(payload.len());
    for (field, value) in payload {
        if !merged.contains_key(&field) {
            return Err(ApiError::BadRequest(format!("Unknown setting: {}", field)));
        }
        merged.insert(field.clone(), value);
        changed.push(field);
    }

    let updated: ClassifierConfig = serde_json::from_value(Value::Object(merged))
        .map_err(|e| ApiError::BadRequest(format!("Invalid settings: {}", e)))?;
    updated.validate()?;

    crate::db::settings::save_classifier_config(&state.db, &updated, changed.iter().map(String::as_str)).await?;
    if let Some(key) = &new_key {
        crate::db::settings::set_openai_api_key(&state.db, key).await?;
        info!("OpenAI API key updated");
    }

    let api_key = match new_key {
        Some(key) => Some(key),
        None => state.api_key.read().await.clone(),
    };
    let classifier = OpenAiClassifier::new(updated.clone(), api_key.clone())
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    *state.config.write().await = updated.clone();
    *state.classifier.write().await = Arc::new(classifier);
    *state.api_key.write().await = api_key.clone();

    info!(
        agent_type = updated.agent_type.as_str(),
        concurrency_limit = updated.concurrency_limit,
        max_batch_size = updated.max_batch_size,
        "Classifier settings updated"
    );

    Ok(Json(SettingsResponse {
        classifier: updated,
        openai_api_key_configured: api_key.is_some(),
    }))
}

/// Build settings routes
pub fn settings_routes() -> Router<AppState> {
    Router::new().route("/settings", get(get_settings).put(update_settings))
}
