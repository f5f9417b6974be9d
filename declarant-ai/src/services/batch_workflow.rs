//! Upload-to-session pipeline
//!
//! `prepare` parses and normalizes an upload and creates the session; any
//! structural rejection happens before a session exists. `run` classifies the
//! prepared items and appends each result to the store as it arrives. A store
//! failure stops the run and marks the session failed; results already
//! written stay readable.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use declarant_common::config::{AgentType, ClassifierConfig};
use declarant_common::events::{DeclarantEvent, EventBus};
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::sessions;
use crate::models::{BatchState, ColumnMapping, NormalizedItem, RowError};
use crate::services::batch_orchestrator::{BatchOrchestrator, ProgressTracker};
use crate::services::classification_client::ClassificationClient;
use crate::services::row_normalizer::{NormalizeError, RowNormalizer};
use crate::services::spreadsheet::{self, SpreadsheetError, Table};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Spreadsheet(#[from] SpreadsheetError),

    /// Includes the oversized-upload rejection
    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error("Result store write failed: {0}")]
    StoreWrite(#[source] declarant_common::Error),
}

/// Session created and ready to classify
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    pub session_id: Uuid,
    pub filename: String,
    pub agent: AgentType,
    pub mapping: ColumnMapping,
    /// Classifiable items in row order
    pub items: Vec<NormalizedItem>,
    /// Missing-field reports for excluded rows
    pub row_errors: Vec<RowError>,
    pub total_rows: usize,
}

impl PreparedBatch {
    pub fn excluded(&self) -> usize {
        self.total_rows - self.items.len()
    }
}

/// How a run ended
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub session_id: Uuid,
    pub state: BatchState,
    pub successful: usize,
    pub failed: usize,
    pub excluded: usize,
    /// Every row error: exclusions and classification failures
    pub errors: Vec<RowError>,
    pub duration_seconds: f64,
}

pub struct BatchWorkflow {
    db: SqlitePool,
    event_bus: EventBus,
    client: Arc<dyn ClassificationClient>,
    config: ClassifierConfig,
}

impl BatchWorkflow {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        client: Arc<dyn ClassificationClient>,
        config: ClassifierConfig,
    ) -> Self {
        Self {
            db,
            event_bus,
            client,
            config,
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Parse an uploaded file and create its session
    pub async fn prepare(
        &self,
        filename: &str,
        bytes: &[u8],
        mapping: Option<ColumnMapping>,
        agent: Option<AgentType>,
    ) -> Result<PreparedBatch, BatchError> {
        let table = spreadsheet::read_table(filename, bytes, self.config.max_file_size_bytes())?;
        self.prepare_table(filename, &table, mapping, agent).await
    }

    /// Normalize a parsed table and create its session
    pub async fn prepare_table(
        &self,
        filename: &str,
        table: &Table,
        mapping: Option<ColumnMapping>,
        agent: Option<AgentType>,
    ) -> Result<PreparedBatch, BatchError> {
        let mapping = RowNormalizer::resolve_mapping(table, mapping);
        let outcome = RowNormalizer::from_config(&self.config).normalize(table, &mapping)?;
        let agent = agent.unwrap_or(self.config.agent_type);

        let session_id = sessions::create_session(&self.db, filename, agent, &outcome)
            .await
            .map_err(BatchError::StoreWrite)?;

        info!(
            session_id = %session_id,
            filename = %filename,
            rows = outcome.total_rows,
            classifiable = outcome.items.len(),
            excluded = outcome.excluded.len(),
            "Batch session created"
        );

        let row_errors = outcome.row_errors();
        Ok(PreparedBatch {
            session_id,
            filename: filename.to_string(),
            agent,
            mapping,
            total_rows: outcome.total_rows,
            items: outcome.items,
            row_errors,
        })
    }

    /// Classify a prepared batch
    ///
    /// A cancelled run returns `Ok` with state `Cancelled`; only store failures
    /// are errors.
    pub async fn run(
        &self,
        batch: PreparedBatch,
        progress: Arc<ProgressTracker>,
        cancel: CancellationToken,
    ) -> Result<BatchReport, BatchError> {
        let started = Instant::now();
        let session_id = batch.session_id;
        let excluded = batch.excluded();
        let total = batch.items.len();

        self.event_bus.emit_lossy(DeclarantEvent::BatchStarted {
            session_id,
            filename: batch.filename.clone(),
            item_count: batch.total_rows,
            classifiable_count: total,
            timestamp: Utc::now(),
        });

        // Child token: a store failure stops classification without looking
        // like an operator cancel
        let run_token = cancel.child_token();
        let store_error: Arc<Mutex<Option<declarant_common::Error>>> = Arc::new(Mutex::new(None));
        let (sink_tx, sink_rx) = mpsc::unbounded_channel();

        let orchestrator =
            BatchOrchestrator::from_config(Arc::clone(&self.client), &self.config).with_agent(batch.agent);

        let writer = self.write_results(
            session_id,
            sink_rx,
            Arc::clone(&progress),
            run_token.clone(),
            Arc::clone(&store_error),
        );
        let classify = orchestrator.run(batch.items, Arc::clone(&progress), run_token, Some(sink_tx));
        let (outcome, ()) = tokio::join!(classify, writer);

        let duration_seconds = started.elapsed().as_secs_f64();
        let mut errors = batch.row_errors;
        errors.extend(outcome.errors.iter().cloned());
        errors.sort_by_key(|e| e.row_index);

        let store_error = store_error.lock().ok().and_then(|mut guard| guard.take());
        if let Some(err) = store_error {
            return Err(self.fail(session_id, &outcome.errors, err).await);
        }

        let state = if outcome.cancelled {
            BatchState::Cancelled
        } else {
            BatchState::Completed
        };

        if let Err(e) = sessions::finish_session(&self.db, session_id, state, &outcome.errors, None).await {
            return Err(self.fail(session_id, &outcome.errors, e).await);
        }

        let report = BatchReport {
            session_id,
            state,
            successful: outcome.successful(),
            failed: outcome.failed(),
            excluded,
            errors,
            duration_seconds,
        };

        match state {
            BatchState::Cancelled => {
                info!(
                    session_id = %session_id,
                    completed = progress.completed(),
                    total,
                    "Batch cancelled"
                );
                self.event_bus.emit_lossy(DeclarantEvent::BatchCancelled {
                    session_id,
                    completed: progress.completed(),
                    total,
                    timestamp: Utc::now(),
                });
            }
            _ => {
                info!(
                    session_id = %session_id,
                    successful = report.successful,
                    failed = report.failed,
                    excluded,
                    duration_seconds,
                    "Batch completed"
                );
                self.event_bus.emit_lossy(DeclarantEvent::BatchCompleted {
                    session_id,
                    successful: report.successful,
                    failed: report.failed,
                    excluded,
                    duration_seconds,
                    timestamp: Utc::now(),
                });
            }
        }

        Ok(report)
    }

    /// Persist results as they arrive; on the first failure stop the run and
    /// drain the rest unwritten
    async fn write_results(
        &self,
        session_id: Uuid,
        mut results: mpsc::UnboundedReceiver<crate::models::ClassificationResult>,
        progress: Arc<ProgressTracker>,
        run_token: CancellationToken,
        store_error: Arc<Mutex<Option<declarant_common::Error>>>,
    ) {
        let mut failed_write = false;

        while let Some(result) = results.recv().await {
            if failed_write {
                continue;
            }
            if let Err(e) = sessions::append_result(&self.db, session_id, &result).await {
                error!(session_id = %session_id, row_index = result.row_index, error = %e, "Failed to store result");
                if let Ok(mut slot) = store_error.lock() {
                    *slot = Some(e);
                }
                failed_write = true;
                run_token.cancel();
                continue;
            }

            self.event_bus.emit_lossy(DeclarantEvent::BatchProgress {
                session_id,
                completed: progress.completed(),
                total: progress.total(),
                failed: progress.failed(),
                percentage: progress.percentage() as f32,
                timestamp: Utc::now(),
            });
        }
    }

    /// Mark the session failed (best effort) and announce it
    async fn fail(&self, session_id: Uuid, errors: &[RowError], cause: declarant_common::Error) -> BatchError {
        let message = cause.to_string();
        if let Err(e) =
            sessions::finish_session(&self.db, session_id, BatchState::Failed, errors, Some(&message)).await
        {
            warn!(session_id = %session_id, error = %e, "Could not mark session failed");
        }
        self.event_bus.emit_lossy(DeclarantEvent::BatchFailed {
            session_id,
            error: message,
            timestamp: Utc::now(),
        });
        BatchError::StoreWrite(cause)
    }
}
