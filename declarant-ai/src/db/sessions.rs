//! Batch session persistence
//!
//! Sessions are created with every row slot up front. Results are appended
//! into pending slots only, so a stored result is never overwritten; reading a
//! session always returns rows ordered by `row_index` whatever order results
//! arrived in.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use declarant_common::config::AgentType;
use declarant_common::{Error, Result};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::settings;
use crate::models::{
    BatchProgress, BatchSession, BatchState, BatchStatistics, ClassificationResult, ClassificationStatus,
    NormalizedItem, ReviewStatus, RowError, RowStatus, SessionRow, SessionSummary,
};
use crate::services::confidence_bucketer::{HIGH_THRESHOLD, MEDIUM_THRESHOLD};
use crate::services::row_normalizer::NormalizationOutcome;
use crate::utils::db_retry::retry_on_lock;

/// Aggregate numbers across all stored sessions
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStatistics {
    pub total_sessions: usize,
    pub completed_sessions: usize,
    pub total_rows: usize,
    pub successful: usize,
    pub high_confidence: usize,
    pub medium_confidence: usize,
    pub low_confidence: usize,
    pub failed: usize,
    pub excluded: usize,
    pub average_confidence: Option<f64>,
    /// Mean wall time of completed sessions
    pub average_processing_seconds: Option<f64>,
    pub review_counts: BTreeMap<ReviewStatus, usize>,
}

fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

/// Create a session with one slot per row
///
/// Classifiable items start `pending`; excluded rows are stored `excluded`
/// together with their error. Everything is written in one transaction.
pub async fn create_session(
    pool: &SqlitePool,
    filename: &str,
    agent: AgentType,
    outcome: &NormalizationOutcome,
) -> Result<Uuid> {
    let session_id = Uuid::new_v4();
    let id = session_id.to_string();
    let row_errors = serde_json::to_string(&outcome.row_errors())?;

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO batch_sessions (
            session_id, filename, agent_type, state, item_count,
            classifiable_count, excluded_count, row_errors, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(filename)
    .bind(agent.as_str())
    .bind(BatchState::Processing.as_str())
    .bind(outcome.total_rows as i64)
    .bind(outcome.items.len() as i64)
    .bind(outcome.excluded.len() as i64)
    .bind(&row_errors)
    .bind(timestamp(Utc::now()))
    .execute(&mut *tx)
    .await?;

    let pending = outcome.items.iter().map(|item| (item, RowStatus::Pending, None));
    let excluded = outcome
        .excluded
        .iter()
        .map(|row| (&row.item, RowStatus::Excluded, Some(row.error.to_string())));

    for (item, status, reason) in pending.chain(excluded) {
        sqlx::query(
            r#"
            INSERT INTO session_rows (
                session_id, row_index, status, description, quantity, unit,
                attributes, exclusion_reason
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(item.row_index as i64)
        .bind(status.as_str())
        .bind(&item.description)
        .bind(item.quantity)
        .bind(&item.unit)
        .bind(serde_json::to_string(&item.attributes)?)
        .bind(reason)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::debug!(
        session_id = %session_id,
        rows = outcome.total_rows,
        excluded = outcome.excluded.len(),
        "Session created"
    );

    Ok(session_id)
}

/// Store a classification result into its pending slot
///
/// `Conflict` if the slot already holds a result or is excluded, `NotFound`
/// if the session or row does not exist. Retries on lock contention.
pub async fn append_result(pool: &SqlitePool, session_id: Uuid, result: &ClassificationResult) -> Result<()> {
    let id = session_id.to_string();
    let row_index = result.row_index as i64;
    let status = match result.status {
        ClassificationStatus::Success => RowStatus::Success,
        ClassificationStatus::Failed => RowStatus::Failed,
    };
    let failed_increment: i64 = if result.is_success() { 0 } else { 1 };
    let alternatives = serde_json::to_string(&result.alternative_codes)?;
    let classified_at = timestamp(Utc::now());
    let max_wait_ms = settings::get_max_lock_wait_ms(pool).await?;

    retry_on_lock("append_result", max_wait_ms, || async {
        let mut tx = pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE session_rows
            SET status = ?, suggested_code = ?, code_description = ?, confidence = ?,
                rationale = ?, alternative_codes = ?, classified_at = ?
            WHERE session_id = ? AND row_index = ? AND status = 'pending'
            "#,
        )
        .bind(status.as_str())
        .bind(&result.suggested_code)
        .bind(&result.code_description)
        .bind(result.confidence)
        .bind(&result.rationale)
        .bind(&alternatives)
        .bind(&classified_at)
        .bind(&id)
        .bind(row_index)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            let existing: Option<String> =
                sqlx::query_scalar("SELECT status FROM session_rows WHERE session_id = ? AND row_index = ?")
                    .bind(&id)
                    .bind(row_index)
                    .fetch_optional(&mut *tx)
                    .await?;
            return Err(match existing {
                Some(status) => Error::Conflict(format!(
                    "Row {} of session {} is already {}",
                    row_index, id, status
                )),
                None => Error::NotFound(format!("Row {} of session {}", row_index, id)),
            });
        }

        sqlx::query(
            r#"
            UPDATE batch_sessions
            SET completed_count = completed_count + 1, failed_count = failed_count + ?
            WHERE session_id = ?
            "#,
        )
        .bind(failed_increment)
        .bind(&id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    })
    .await
}

/// Move a session to a terminal state and record run-level errors
///
/// `errors` are appended to the row error summary written at creation.
pub async fn finish_session(
    pool: &SqlitePool,
    session_id: Uuid,
    state: BatchState,
    errors: &[RowError],
    error_message: Option<&str>,
) -> Result<()> {
    let id = session_id.to_string();

    let stored: Option<String> = sqlx::query_scalar("SELECT row_errors FROM batch_sessions WHERE session_id = ?")
        .bind(&id)
        .fetch_optional(pool)
        .await?;
    let stored = stored.ok_or_else(|| Error::NotFound(format!("Session {}", id)))?;

    let mut all_errors: Vec<RowError> = serde_json::from_str(&stored)?;
    all_errors.extend_from_slice(errors);
    all_errors.sort_by_key(|e| e.row_index);
    let row_errors = serde_json::to_string(&all_errors)?;
    let completed_at = timestamp(Utc::now());
    let max_wait_ms = settings::get_max_lock_wait_ms(pool).await?;

    retry_on_lock("finish_session", max_wait_ms, || async {
        sqlx::query(
            r#"
            UPDATE batch_sessions
            SET state = ?, completed_at = ?, row_errors = ?, error_message = ?
            WHERE session_id = ?
            "#,
        )
        .bind(state.as_str())
        .bind(&completed_at)
        .bind(&row_errors)
        .bind(error_message)
        .bind(&id)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

/// Full session with rows in row order
pub async fn get_session(pool: &SqlitePool, session_id: Uuid) -> Result<BatchSession> {
    let id = session_id.to_string();

    let row = sqlx::query(
        r#"
        SELECT session_id, filename, agent_type, state, item_count, classifiable_count,
               completed_count, failed_count, excluded_count, row_errors, error_message,
               created_at, completed_at
        FROM batch_sessions
        WHERE session_id = ?
        "#,
    )
    .bind(&id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("Session {}", id)))?;

    let summary = summary_from_row(&row)?;
    let errors: Vec<RowError> = serde_json::from_str(&row.get::<String, _>("row_errors"))?;
    let error_message: Option<String> = row.get("error_message");

    let rows = sqlx::query(
        r#"
        SELECT row_index, status, description, quantity, unit, attributes, suggested_code,
               code_description, confidence, rationale, alternative_codes, exclusion_reason,
               note, review_status
        FROM session_rows
        WHERE session_id = ?
        ORDER BY row_index
        "#,
    )
    .bind(&id)
    .fetch_all(pool)
    .await?
    .iter()
    .map(session_row_from_row)
    .collect::<Result<Vec<_>>>()?;

    let mut statistics = BatchStatistics::from_rows(&rows);
    statistics.processing_seconds = summary
        .completed_at
        .map(|end| (end - summary.created_at).num_milliseconds() as f64 / 1000.0);

    Ok(BatchSession {
        session_id,
        filename: summary.filename,
        agent_type: summary.agent_type,
        state: summary.state,
        created_at: summary.created_at,
        completed_at: summary.completed_at,
        item_count: summary.item_count,
        rows,
        errors,
        error_message,
        statistics,
    })
}

/// Session summaries, newest first
pub async fn list_sessions(pool: &SqlitePool, limit: usize, offset: usize) -> Result<Vec<SessionSummary>> {
    sqlx::query(
        r#"
        SELECT session_id, filename, agent_type, state, item_count, classifiable_count,
               completed_count, failed_count, excluded_count, created_at, completed_at
        FROM batch_sessions
        ORDER BY created_at DESC, rowid DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(limit as i64)
    .bind(offset as i64)
    .fetch_all(pool)
    .await?
    .iter()
    .map(summary_from_row)
    .collect()
}

/// Stored counters as a progress snapshot
pub async fn get_progress(pool: &SqlitePool, session_id: Uuid) -> Result<BatchProgress> {
    let id = session_id.to_string();
    let row = sqlx::query(
        "SELECT state, classifiable_count, completed_count, failed_count FROM batch_sessions WHERE session_id = ?",
    )
    .bind(&id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("Session {}", id)))?;

    let state: BatchState = row.get::<String, _>("state").parse()?;
    Ok(BatchProgress::new(
        session_id,
        state,
        row.get::<i64, _>("completed_count") as usize,
        row.get::<i64, _>("classifiable_count") as usize,
        row.get::<i64, _>("failed_count") as usize,
    ))
}

/// Attach a reviewer note and/or review status to a row
///
/// `None` leaves the field unchanged; an empty note clears it.
pub async fn annotate(
    pool: &SqlitePool,
    session_id: Uuid,
    row_index: usize,
    note: Option<&str>,
    review_status: Option<ReviewStatus>,
) -> Result<SessionRow> {
    let id = session_id.to_string();

    let current = sqlx::query("SELECT note, review_status FROM session_rows WHERE session_id = ? AND row_index = ?")
        .bind(&id)
        .bind(row_index as i64)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Row {} of session {}", row_index, id)))?;

    let note = match note {
        Some(text) if text.trim().is_empty() => None,
        Some(text) => Some(text.trim().to_string()),
        None => current.get("note"),
    };
    let review_status = match review_status {
        Some(status) => status,
        None => current.get::<String, _>("review_status").parse()?,
    };
    let max_wait_ms = settings::get_max_lock_wait_ms(pool).await?;

    retry_on_lock("annotate", max_wait_ms, || async {
        sqlx::query("UPDATE session_rows SET note = ?, review_status = ? WHERE session_id = ? AND row_index = ?")
            .bind(&note)
            .bind(review_status.as_str())
            .bind(&id)
            .bind(row_index as i64)
            .execute(pool)
            .await?;
        Ok(())
    })
    .await?;

    tracing::debug!(session_id = %session_id, row_index, review_status = review_status.as_str(), "Row annotated");

    get_row(pool, session_id, row_index).await
}

pub async fn get_row(pool: &SqlitePool, session_id: Uuid, row_index: usize) -> Result<SessionRow> {
    let id = session_id.to_string();
    let row = sqlx::query(
        r#"
        SELECT row_index, status, description, quantity, unit, attributes, suggested_code,
               code_description, confidence, rationale, alternative_codes, exclusion_reason,
               note, review_status
        FROM session_rows
        WHERE session_id = ? AND row_index = ?
        "#,
    )
    .bind(&id)
    .bind(row_index as i64)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("Row {} of session {}", row_index, id)))?;

    session_row_from_row(&row)
}

/// Delete a session and its rows
pub async fn delete_session(pool: &SqlitePool, session_id: Uuid) -> Result<()> {
    let id = session_id.to_string();
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM session_rows WHERE session_id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?;
    let deleted = sqlx::query("DELETE FROM batch_sessions WHERE session_id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    if deleted == 0 {
        return Err(Error::NotFound(format!("Session {}", id)));
    }

    tx.commit().await?;
    Ok(())
}

/// Mark sessions left `processing` by a previous process as cancelled
pub async fn cleanup_stale_sessions(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE batch_sessions
        SET state = ?, completed_at = ?, error_message = 'Interrupted by service restart'
        WHERE state = ?
        "#,
    )
    .bind(BatchState::Cancelled.as_str())
    .bind(timestamp(Utc::now()))
    .bind(BatchState::Processing.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Review status counts, for one session or all of them
pub async fn review_counts(pool: &SqlitePool, session_id: Option<Uuid>) -> Result<BTreeMap<ReviewStatus, usize>> {
    let rows: Vec<(String, i64)> = match session_id {
        Some(id) => {
            sqlx::query_as(
                "SELECT review_status, COUNT(*) FROM session_rows WHERE session_id = ? GROUP BY review_status",
            )
            .bind(id.to_string())
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as("SELECT review_status, COUNT(*) FROM session_rows GROUP BY review_status")
                .fetch_all(pool)
                .await?
        }
    };

    let mut counts: BTreeMap<ReviewStatus, usize> = ReviewStatus::ALL.into_iter().map(|s| (s, 0)).collect();
    for (status, count) in rows {
        counts.insert(status.parse()?, count as usize);
    }
    Ok(counts)
}

pub async fn statistics(pool: &SqlitePool) -> Result<StoreStatistics> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total_rows,
            COALESCE(SUM(status = 'success'), 0) AS successful,
            COALESCE(SUM(status = 'success' AND confidence >= ?1), 0) AS high,
            COALESCE(SUM(status = 'success' AND confidence >= ?2 AND confidence < ?1), 0) AS medium,
            COALESCE(SUM(status = 'failed' OR (status = 'success' AND confidence < ?2)), 0) AS low,
            COALESCE(SUM(status = 'failed'), 0) AS failed,
            COALESCE(SUM(status = 'excluded'), 0) AS excluded,
            AVG(CASE WHEN status = 'success' THEN confidence END) AS average_confidence
        FROM session_rows
        "#,
    )
    .bind(HIGH_THRESHOLD)
    .bind(MEDIUM_THRESHOLD)
    .fetch_one(pool)
    .await?;

    let sessions: Vec<(String, String, Option<String>)> =
        sqlx::query_as("SELECT state, created_at, completed_at FROM batch_sessions")
            .fetch_all(pool)
            .await?;

    let mut durations = Vec::new();
    for (state, created_at, completed_at) in &sessions {
        if state != BatchState::Completed.as_str() {
            continue;
        }
        if let Some(completed_at) = completed_at {
            let start = parse_timestamp(created_at, "created_at")?;
            let end = parse_timestamp(completed_at, "completed_at")?;
            durations.push((end - start).num_milliseconds() as f64 / 1000.0);
        }
    }

    let count = |column: &str| row.get::<i64, _>(column) as usize;

    Ok(StoreStatistics {
        total_sessions: sessions.len(),
        completed_sessions: durations.len(),
        total_rows: count("total_rows"),
        successful: count("successful"),
        high_confidence: count("high"),
        medium_confidence: count("medium"),
        low_confidence: count("low"),
        failed: count("failed"),
        excluded: count("excluded"),
        average_confidence: row.get("average_confidence"),
        average_processing_seconds: if durations.is_empty() {
            None
        } else {
            Some(durations.iter().sum::<f64>() / durations.len() as f64)
        },
        review_counts: review_counts(pool, None).await?,
    })
}

fn summary_from_row(row: &SqliteRow) -> Result<SessionSummary> {
    let session_id: String = row.get("session_id");
    let session_id = Uuid::parse_str(&session_id)
        .map_err(|e| Error::Internal(format!("Invalid session id {}: {}", session_id, e)))?;

    let agent_type: AgentType = row
        .get::<String, _>("agent_type")
        .parse()
        .map_err(|e| Error::Internal(format!("Stored agent type: {}", e)))?;

    let completed_at: Option<String> = row.get("completed_at");

    Ok(SessionSummary {
        session_id,
        filename: row.get("filename"),
        agent_type,
        state: row.get::<String, _>("state").parse()?,
        item_count: row.get::<i64, _>("item_count") as usize,
        classifiable_count: row.get::<i64, _>("classifiable_count") as usize,
        completed_count: row.get::<i64, _>("completed_count") as usize,
        failed_count: row.get::<i64, _>("failed_count") as usize,
        excluded_count: row.get::<i64, _>("excluded_count") as usize,
        created_at: parse_timestamp(&row.get::<String, _>("created_at"), "created_at")?,
        completed_at: completed_at
            .map(|s| parse_timestamp(&s, "completed_at"))
            .transpose()?,
    })
}

fn session_row_from_row(row: &SqliteRow) -> Result<SessionRow> {
    let row_index = row.get::<i64, _>("row_index") as usize;
    let status: RowStatus = row.get::<String, _>("status").parse()?;

    let mut item = NormalizedItem::new(row_index, row.get::<String, _>("description"));
    item.quantity = row.get("quantity");
    item.unit = row.get("unit");
    item.attributes = serde_json::from_str(&row.get::<String, _>("attributes"))?;

    let result = match status {
        RowStatus::Success | RowStatus::Failed => {
            let alternatives: Option<String> = row.get("alternative_codes");
            let alternative_codes = match alternatives {
                Some(json) => serde_json::from_str(&json)?,
                None => Vec::new(),
            };
            Some(ClassificationResult {
                row_index,
                suggested_code: row.get::<Option<String>, _>("suggested_code").unwrap_or_default(),
                code_description: row.get::<Option<String>, _>("code_description").unwrap_or_default(),
                confidence: row.get::<Option<f64>, _>("confidence").unwrap_or(0.0),
                rationale: row.get::<Option<String>, _>("rationale").unwrap_or_default(),
                alternative_codes,
                status: if status == RowStatus::Success {
                    ClassificationStatus::Success
                } else {
                    ClassificationStatus::Failed
                },
            })
        }
        RowStatus::Pending | RowStatus::Excluded => None,
    };

    Ok(SessionRow {
        row_index,
        status,
        item,
        result,
        exclusion_reason: row.get("exclusion_reason"),
        note: row.get("note"),
        review_status: row.get::<String, _>("review_status").parse()?,
    })
}
