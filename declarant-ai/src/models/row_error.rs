//! Row-level error reports
//!
//! Row errors never abort a batch. They are collected into the summary that
//! accompanies the results and persisted on the session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What went wrong with a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowErrorKind {
    /// Required field empty; row excluded from classification
    MissingField,
    /// Classification call failed; row stored as failed with confidence 0
    Classification,
}

/// One entry of the per-row error summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    pub row_index: usize,
    pub kind: RowErrorKind,
    /// Human-readable message
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl RowError {
    pub fn missing_field(row_index: usize, field: &str) -> Self {
        Self {
            row_index,
            kind: RowErrorKind::MissingField,
            message: format!("Row {}: required field '{}' is empty", row_index + 1, field),
            occurred_at: Utc::now(),
        }
    }

    pub fn classification(row_index: usize, message: impl Into<String>) -> Self {
        Self {
            row_index,
            kind: RowErrorKind::Classification,
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }
}
