//! Confidence score → qualitative tier
//!
//! Boundaries: [80, 100] high, [40, 80) medium, [0, 40) low. Scores outside
//! 0-100 are clamped first, never rejected.

use crate::models::ConfidenceTier;

/// Lowest score bucketed as high
pub const HIGH_THRESHOLD: f64 = 80.0;

/// Lowest score bucketed as medium
pub const MEDIUM_THRESHOLD: f64 = 40.0;

/// Clamp into 0-100; NaN becomes 0
pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        return 0.0;
    }
    confidence.clamp(0.0, 100.0)
}

pub fn bucket(confidence: f64) -> ConfidenceTier {
    let confidence = clamp_confidence(confidence);
    if confidence >= HIGH_THRESHOLD {
        ConfidenceTier::High
    } else if confidence >= MEDIUM_THRESHOLD {
        ConfidenceTier::Medium
    } else {
        ConfidenceTier::Low
    }
}

/// Per-tier counts, in high/medium/low order
pub fn tier_counts<I>(scores: I) -> [(ConfidenceTier, usize); 3]
where
    I: IntoIterator<Item = f64>,
{
    let mut counts = [0usize; 3];
    for score in scores {
        let slot = match bucket(score) {
            ConfidenceTier::High => 0,
            ConfidenceTier::Medium => 1,
            ConfidenceTier::Low => 2,
        };
        counts[slot] += 1;
    }
    [
        (ConfidenceTier::High, counts[0]),
        (ConfidenceTier::Medium, counts[1]),
        (ConfidenceTier::Low, counts[2]),
    ]
}
