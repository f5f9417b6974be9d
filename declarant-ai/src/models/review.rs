//! Reviewer annotations attached to session rows

use serde::{Deserialize, Serialize};

/// Reviewer verdict on a suggested code
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    #[default]
    Pending,
    Confirmed,
    NeedsReview,
    Rejected,
}

impl ReviewStatus {
    pub const ALL: [ReviewStatus; 4] = [
        ReviewStatus::Pending,
        ReviewStatus::Confirmed,
        ReviewStatus::NeedsReview,
        ReviewStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Confirmed => "confirmed",
            ReviewStatus::NeedsReview => "needs_review",
            ReviewStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for ReviewStatus {
    type Err = declarant_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReviewStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                declarant_common::Error::InvalidInput(format!(
                    "Invalid review status '{}'. Allowed: pending, confirmed, needs_review, rejected",
                    s
                ))
            })
    }
}

/// Free-text correction attached to a row after classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserNote {
    pub row_index: usize,
    pub note_text: String,
}
