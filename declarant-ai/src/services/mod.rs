//! Business logic services
//!
//! Pipeline order: spreadsheet → row_normalizer → batch_orchestrator
//! (classification_client per item) → confidence_bucketer → store →
//! exporter / result_view.

pub mod batch_orchestrator;
pub mod batch_workflow;
pub mod classification_client;
pub mod confidence_bucketer;
pub mod exporter;
pub mod result_view;
pub mod row_normalizer;
pub mod spreadsheet;

pub use batch_orchestrator::{BatchOrchestrator, BatchOutcome, ProgressTracker};
pub use batch_workflow::{BatchError, BatchReport, BatchWorkflow, PreparedBatch};
pub use classification_client::{ClassificationClient, ClassificationError, OpenAiClassifier};
pub use exporter::{ExportError, ExportFormat};
pub use result_view::{SessionView, ViewGroup, ViewQuery};
pub use row_normalizer::{MissingFieldError, NormalizeError, RowNormalizer};
pub use spreadsheet::{SpreadsheetError, Table};
