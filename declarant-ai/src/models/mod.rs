//! Data models for declarant-ai
//!
//! - Upload rows and their canonical form (`item`)
//! - Classifier output and confidence tiers (`classification`)
//! - Persisted batch sessions (`batch_session`)
//! - Row-level error reports (`row_error`)
//! - Reviewer notes and statuses (`review`)

pub mod batch_session;
pub mod classification;
pub mod item;
pub mod review;
pub mod row_error;

pub use batch_session::{
    BatchProgress, BatchSession, BatchState, BatchStatistics, RowStatus, SessionRow, SessionSummary,
};
pub use classification::{ClassificationResult, ClassificationStatus, ConfidenceTier};
pub use item::{CanonicalField, ColumnMapping, InputRow, NormalizedItem};
pub use review::{ReviewStatus, UserNote};
pub use row_error::{RowError, RowErrorKind};
