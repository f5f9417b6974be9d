//! Settings table accessors
//!
//! Key/value rows. Classifier parameters are stored under `classifier.<field>`
//! as JSON text and applied over the TOML configuration at startup and on
//! `PUT /settings`.

use declarant_common::config::ClassifierConfig;
use declarant_common::{Error, Result};
use serde_json::{Map, Value};
use sqlx::{Pool, Sqlite};

const OPENAI_API_KEY: &str = "openai_api_key";
const MAX_LOCK_WAIT_MS: &str = "database_max_lock_wait_ms";
const CLASSIFIER_PREFIX: &str = "classifier.";

/// Default budget for retrying locked writes
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

pub async fn get_openai_api_key(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, OPENAI_API_KEY).await
}

pub async fn set_openai_api_key(db: &Pool<Sqlite>, key: &str) -> Result<()> {
    set_setting(db, OPENAI_API_KEY, key).await
}

pub async fn get_max_lock_wait_ms(db: &Pool<Sqlite>) -> Result<u64> {
    get_setting(db, MAX_LOCK_WAIT_MS)
        .await
        .map(|opt| opt.unwrap_or(DEFAULT_MAX_LOCK_WAIT_MS))
}

/// Apply stored classifier overrides on top of `base`
///
/// Unknown keys are ignored; a stored value that makes the config invalid is
/// an error rather than silently dropped.
pub async fn load_classifier_config(db: &Pool<Sqlite>, base: &ClassifierConfig) -> Result<ClassifierConfig> {
    let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM settings WHERE key LIKE 'classifier.%'")
        .fetch_all(db)
        .await?;

    if rows.is_empty() {
        return Ok(base.clone());
    }

    let mut merged = match serde_json::to_value(base)? {
        Value::Object(map) => map,
        _ => return Err(Error::Internal("Classifier config is not an object".to_string())),
    };

    for (key, raw) in rows {
        let field = key.trim_start_matches(CLASSIFIER_PREFIX);
        if !merged.contains_key(field) {
            tracing::warn!(key = %key, "Ignoring unknown classifier setting");
            continue;
        }
        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("Setting {} is not valid JSON: {}", key, e)))?;
        merged.insert(field.to_string(), value);
    }

    let config: ClassifierConfig = serde_json::from_value(Value::Object(merged))
        .map_err(|e| Error::Config(format!("Stored classifier settings are invalid: {}", e)))?;
    config.validate()?;
    Ok(config)
}

/// Persist the named classifier fields as overrides
///
/// Only `fields` are written; everything else keeps following the TOML file.
/// A `null` value is stored too, so clearing an optional field overrides a
/// value set in TOML.
pub async fn save_classifier_config<'a>(
    db: &Pool<Sqlite>,
    config: &ClassifierConfig,
    fields: impl IntoIterator<Item = &'a str>,
) -> Result<()> {
    config.validate()?;

    let values: Map<String, Value> = match serde_json::to_value(config)? {
        Value::Object(map) => map,
        _ => return Err(Error::Internal("Classifier config is not an object".to_string())),
    };

    let mut tx = db.begin().await?;
    for field in fields {
        let value = values
            .get(field)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown classifier setting: {}", field)))?;
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(format!("{}{}", CLASSIFIER_PREFIX, field))
        .bind(value.to_string())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    Ok(())
}

async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    value
        .map(|v| {
            v.parse::<T>()
                .map_err(|e| Error::Config(format!("Setting {} is invalid: {}", key, e)))
        })
        .transpose()
}

async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;

    Ok(())
}
