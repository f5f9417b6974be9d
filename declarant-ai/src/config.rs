//! Configuration resolution for declarant-ai
//!
//! API key priority: database → environment → TOML. Classifier parameters:
//! TOML `[classifier]` with database overrides applied on top.

use declarant_common::config::{ClassifierConfig, TomlConfig};
use declarant_common::Result;
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};

/// Environment variables checked for the API key, in order
pub const API_KEY_ENV_VARS: [&str; 2] = ["DECLARANT_OPENAI_API_KEY", "OPENAI_API_KEY"];

/// Non-empty, non-whitespace
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Resolve the classification service API key
///
/// `None` when no source has one: the service still runs (history and export
/// work) and every classification fails with a configuration error.
pub async fn resolve_openai_api_key(db: &Pool<Sqlite>, toml_config: &TomlConfig) -> Result<Option<String>> {
    let db_key = crate::db::settings::get_openai_api_key(db)
        .await?
        .filter(|k| is_valid_key(k));

    let env_key = API_KEY_ENV_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|k| is_valid_key(k));

    let toml_key = toml_config.openai_api_key.clone().filter(|k| is_valid_key(k));

    let sources: Vec<&str> = [
        db_key.as_ref().map(|_| "database"),
        env_key.as_ref().map(|_| "environment"),
        toml_key.as_ref().map(|_| "TOML"),
    ]
    .into_iter()
    .flatten()
    .collect();

    if sources.len() > 1 {
        warn!(
            "OpenAI API key found in multiple sources: {}. Using {}.",
            sources.join(", "),
            sources[0]
        );
    }

    let resolved = db_key.or(env_key).or(toml_key);
    match sources.first() {
        Some(source) => info!("OpenAI API key loaded from {}", source),
        None => warn!(
            "OpenAI API key not configured; classifications will fail until it is set \
             (PUT /settings, {} or openai_api_key in the TOML file)",
            API_KEY_ENV_VARS[0]
        ),
    }

    Ok(resolved)
}

/// Effective classifier parameters: TOML values with stored overrides applied
pub async fn resolve_classifier_config(db: &Pool<Sqlite>, toml_config: &TomlConfig) -> Result<ClassifierConfig> {
    let config = crate::db::settings::load_classifier_config(db, &toml_config.classifier).await?;
    if config != toml_config.classifier {
        info!("Classifier parameters overridden by stored settings");
    }
    Ok(config)
}
