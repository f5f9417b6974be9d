//! Persisted batch sessions
//!
//! A session is created at upload time with one slot per data row. Classifiable
//! slots start `Pending` and are filled as results arrive; excluded slots are
//! written once at creation. After completion only the reviewer fields
//! (note, review status) change.

use chrono::{DateTime, Utc};
use declarant_common::config::AgentType;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ClassificationResult, ConfidenceTier, NormalizedItem, ReviewStatus, RowError, UserNote};

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    /// Classification running
    Processing,
    /// Every classifiable row has a result
    Completed,
    /// Stopped by the operator, or abandoned by a previous process
    Cancelled,
    /// Aborted by a structural error; rows written so far stay readable
    Failed,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Processing => "processing",
            BatchState::Completed => "completed",
            BatchState::Cancelled => "cancelled",
            BatchState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchState::Processing)
    }
}

impl std::str::FromStr for BatchState {
    type Err = declarant_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(BatchState::Processing),
            "completed" => Ok(BatchState::Completed),
            "cancelled" => Ok(BatchState::Cancelled),
            "failed" => Ok(BatchState::Failed),
            other => Err(declarant_common::Error::Internal(format!(
                "Unknown batch state in database: {}",
                other
            ))),
        }
    }
}

/// State of a single row slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    /// Waiting for a classification result
    Pending,
    Success,
    /// Classification failed; needs manual classification
    Failed,
    /// Missing required field; never sent to the classifier
    Excluded,
}

impl RowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowStatus::Pending => "pending",
            RowStatus::Success => "success",
            RowStatus::Failed => "failed",
            RowStatus::Excluded => "excluded",
        }
    }
}

impl std::str::FromStr for RowStatus {
    type Err = declarant_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RowStatus::Pending),
            "success" => Ok(RowStatus::Success),
            "failed" => Ok(RowStatus::Failed),
            "excluded" => Ok(RowStatus::Excluded),
            other => Err(declarant_common::Error::Internal(format!(
                "Unknown row status in database: {}",
                other
            ))),
        }
    }
}

/// One row slot of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRow {
    pub row_index: usize,
    pub status: RowStatus,
    /// Item fields as uploaded; description is empty for excluded rows
    pub item: NormalizedItem,
    pub result: Option<ClassificationResult>,
    /// Why the row was excluded
    pub exclusion_reason: Option<String>,
    pub note: Option<String>,
    pub review_status: ReviewStatus,
}

impl SessionRow {
    /// Tier of the stored result; `None` while pending and for excluded rows
    pub fn tier(&self) -> Option<ConfidenceTier> {
        self.result.as_ref().map(ClassificationResult::tier)
    }

    pub fn confidence(&self) -> Option<f64> {
        self.result.as_ref().map(|r| r.confidence)
    }
}

/// Counters derived from a session's rows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStatistics {
    pub total_rows: usize,
    pub successful: usize,
    pub high_confidence: usize,
    pub medium_confidence: usize,
    pub low_confidence: usize,
    pub failed: usize,
    pub excluded: usize,
    pub pending: usize,
    /// Mean confidence of successful rows
    pub average_confidence: Option<f64>,
    /// Wall time from creation to completion
    pub processing_seconds: Option<f64>,
}

impl BatchStatistics {
    pub fn from_rows(rows: &[SessionRow]) -> Self {
        let mut stats = BatchStatistics {
            total_rows: rows.len(),
            ..Default::default()
        };
        let mut confidence_sum = 0.0;

        for row in rows {
            match row.status {
                RowStatus::Pending => stats.pending += 1,
                RowStatus::Excluded => stats.excluded += 1,
                RowStatus::Failed => {
                    stats.failed += 1;
                    stats.low_confidence += 1;
                }
                RowStatus::Success => {
                    stats.successful += 1;
                    let confidence = row.confidence().unwrap_or(0.0);
                    confidence_sum += confidence;
                    match row.tier() {
                        Some(ConfidenceTier::High) => stats.high_confidence += 1,
                        Some(ConfidenceTier::Medium) => stats.medium_confidence += 1,
                        Some(ConfidenceTier::Low) | None => stats.low_confidence += 1,
                    }
                }
            }
        }

        if stats.successful > 0 {
            stats.average_confidence = Some(confidence_sum / stats.successful as f64);
        }
        stats
    }
}

/// Full session with rows in original row order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSession {
    pub session_id: Uuid,
    pub filename: String,
    pub agent_type: AgentType,
    pub state: BatchState,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Row slots, classifiable and excluded
    pub item_count: usize,
    pub rows: Vec<SessionRow>,
    /// Per-row error summary
    pub errors: Vec<RowError>,
    /// Structural failure that stopped the run
    pub error_message: Option<String>,
    pub statistics: BatchStatistics,
}

impl BatchSession {
    /// Stored classification results in row order
    pub fn results(&self) -> impl Iterator<Item = &ClassificationResult> {
        self.rows.iter().filter_map(|row| row.result.as_ref())
    }

    /// Reviewer notes in row order
    pub fn notes(&self) -> Vec<UserNote> {
        self.rows
            .iter()
            .filter_map(|row| {
                row.note.as_ref().map(|text| UserNote {
                    row_index: row.row_index,
                    note_text: text.clone(),
                })
            })
            .collect()
    }

    pub fn row(&self, row_index: usize) -> Option<&SessionRow> {
        self.rows.iter().find(|row| row.row_index == row_index)
    }
}

/// Chronological listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub filename: String,
    pub agent_type: AgentType,
    pub state: BatchState,
    pub item_count: usize,
    pub classifiable_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub excluded_count: usize,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// "N of M complete" snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProgress {
    pub session_id: Uuid,
    pub state: BatchState,
    pub completed: usize,
    pub total: usize,
    pub failed: usize,
    /// Percentage complete (0.0 - 100.0)
    pub percentage: f64,
}

impl BatchProgress {
    pub fn new(session_id: Uuid, state: BatchState, completed: usize, total: usize, failed: usize) -> Self {
        let percentage = if total > 0 {
            (completed as f64 / total as f64) * 100.0
        } else {
            100.0
        };
        Self {
            session_id,
            state,
            completed,
            total,
            failed,
            percentage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(row_index: usize, status: RowStatus, confidence: Option<f64>) -> SessionRow {
        let result = match (status, confidence) {
            (RowStatus::Success, Some(c)) => Some(ClassificationResult::success(row_index, "0101", c, "ok")),
            (RowStatus::Failed, _) => Some(ClassificationResult::failed(row_index, "boom")),
            _ => None,
        };
        SessionRow {
            row_index,
            status,
            item: NormalizedItem::new(row_index, "item"),
            result,
            exclusion_reason: None,
            note: None,
            review_status: ReviewStatus::Pending,
        }
    }

    #[test]
    fn test_statistics_from_rows() {
        let rows = vec![
            row(0, RowStatus::Success, Some(90.0)),
            row(1, RowStatus::Success, Some(50.0)),
            row(2, RowStatus::Success, Some(10.0)),
            row(3, RowStatus::Failed, None),
            row(4, RowStatus::Excluded, None),
            row(5, RowStatus::Pending, None),
        ];

        let stats = BatchStatistics::from_rows(&rows);

        assert_eq!(stats.total_rows, 6);
        assert_eq!(stats.successful, 3);
        assert_eq!(stats.high_confidence, 1);
        assert_eq!(stats.medium_confidence, 1);
        // Failed rows count as low confidence
        assert_eq!(stats.low_confidence, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.excluded, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.average_confidence, Some(50.0));
    }

    #[test]
    fn test_progress_percentage() {
        let progress = BatchProgress::new(Uuid::new_v4(), BatchState::Processing, 1, 4, 0);
        assert_eq!(progress.percentage, 25.0);

        let empty = BatchProgress::new(Uuid::new_v4(), BatchState::Completed, 0, 0, 0);
        assert_eq!(empty.percentage, 100.0);
    }

    #[test]
    fn test_state_round_trip_through_text() {
        for state in [
            BatchState::Processing,
            BatchState::Completed,
            BatchState::Cancelled,
            BatchState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<BatchState>().unwrap(), state);
        }
        assert!(!BatchState::Processing.is_terminal());
        assert!(BatchState::Cancelled.is_terminal());
    }
}
