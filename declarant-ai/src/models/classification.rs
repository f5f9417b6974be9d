//! Classifier output and confidence tiers

use serde::{Deserialize, Serialize};

use crate::services::confidence_bucketer;

/// Outcome of one classification call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationStatus {
    Success,
    Failed,
}

impl ClassificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationStatus::Success => "success",
            ClassificationStatus::Failed => "failed",
        }
    }
}

/// Qualitative confidence bucket, always derived from a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl ConfidenceTier {
    pub const ALL: [ConfidenceTier; 3] = [ConfidenceTier::High, ConfidenceTier::Medium, ConfidenceTier::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTier::High => "high",
            ConfidenceTier::Medium => "medium",
            ConfidenceTier::Low => "low",
        }
    }
}

impl std::str::FromStr for ConfidenceTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(ConfidenceTier::High),
            "medium" => Ok(ConfidenceTier::Medium),
            "low" => Ok(ConfidenceTier::Low),
            other => Err(format!("Unknown confidence tier: {}", other)),
        }
    }
}

/// Suggested tariff code for one row
///
/// Never mutated after construction; corrections go into the reviewer note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub row_index: usize,
    /// Tariff code, empty when the call failed
    pub suggested_code: String,
    /// Official wording of the suggested code
    #[serde(default)]
    pub code_description: String,
    /// Confidence on the 0-100 scale
    pub confidence: f64,
    /// Classifier reasoning, or the failure reason
    pub rationale: String,
    /// Candidate codes offered alongside a low-confidence suggestion
    #[serde(default)]
    pub alternative_codes: Vec<String>,
    pub status: ClassificationStatus,
}

impl ClassificationResult {
    /// Successful result; confidence is clamped into 0-100
    pub fn success(
        row_index: usize,
        suggested_code: impl Into<String>,
        confidence: f64,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            row_index,
            suggested_code: suggested_code.into(),
            code_description: String::new(),
            confidence: confidence_bucketer::clamp_confidence(confidence),
            rationale: rationale.into(),
            alternative_codes: Vec::new(),
            status: ClassificationStatus::Success,
        }
    }

    /// Failed result: no code, confidence 0
    pub fn failed(row_index: usize, reason: impl Into<String>) -> Self {
        Self {
            row_index,
            suggested_code: String::new(),
            code_description: String::new(),
            confidence: 0.0,
            rationale: reason.into(),
            alternative_codes: Vec::new(),
            status: ClassificationStatus::Failed,
        }
    }

    pub fn with_code_description(mut self, description: impl Into<String>) -> Self {
        self.code_description = description.into();
        self
    }

    pub fn with_alternatives(mut self, codes: Vec<String>) -> Self {
        self.alternative_codes = codes;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ClassificationStatus::Success
    }

    pub fn tier(&self) -> ConfidenceTier {
        confidence_bucketer::bucket(self.confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_result_is_low_tier_with_zero_confidence() {
        let result = ClassificationResult::failed(0, "timed out");

        assert_eq!(result.status, ClassificationStatus::Failed);
        assert_eq!(result.confidence, 0.0);
        assert!(result.suggested_code.is_empty());
        assert_eq!(result.tier(), ConfidenceTier::Low);
    }

    #[test]
    fn test_success_clamps_confidence() {
        let result = ClassificationResult::success(3, "8517.12.000", 130.0, "phones");
        assert_eq!(result.confidence, 100.0);
        assert_eq!(result.tier(), ConfidenceTier::High);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_value(ClassificationResult::failed(1, "x")).unwrap();
        assert_eq!(json["status"], "failed");
    }
}
