//! Batch orchestration
//!
//! Worker pool over a bounded work queue: a feeder pushes items, a fixed
//! number of workers pull and classify them under a per-item timeout, and the
//! collector gathers results keyed by `row_index`. The final sequence is
//! re-sorted into input order whatever the completion order was.
//!
//! A failing or hanging item never stops the batch: it becomes a failed result
//! with confidence 0. Cancellation stops the feeder and the workers; calls
//! already in flight finish but their results are dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use declarant_common::config::{AgentType, ClassifierConfig};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::{ClassificationResult, NormalizedItem, RowError};
use crate::services::classification_client::{ClassificationClient, ClassificationError};

/// Progress logged every N completed items
const PROGRESS_LOG_INTERVAL: usize = 10;

/// Lock-free "N of M complete" counters, readable while the batch runs
#[derive(Debug)]
pub struct ProgressTracker {
    total: usize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    fn record(&self, success: bool) -> usize {
        if !success {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.completed.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.completed() as f64 / self.total as f64) * 100.0
    }
}

/// Result of one orchestrated run
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Results in input order; shorter than the input only when cancelled
    pub results: Vec<ClassificationResult>,
    /// Failed items, in input order
    pub errors: Vec<RowError>,
    pub cancelled: bool,
}

impl BatchOutcome {
    pub fn successful(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.successful()
    }
}

pub struct BatchOrchestrator {
    client: Arc<dyn ClassificationClient>,
    agent: AgentType,
    concurrency_limit: usize,
    item_timeout: Duration,
}

impl BatchOrchestrator {
    pub fn new(
        client: Arc<dyn ClassificationClient>,
        agent: AgentType,
        concurrency_limit: usize,
        item_timeout: Duration,
    ) -> Self {
        Self {
            client,
            agent,
            concurrency_limit: concurrency_limit.max(1),
            item_timeout,
        }
    }

    pub fn from_config(client: Arc<dyn ClassificationClient>, config: &ClassifierConfig) -> Self {
        Self::new(client, config.agent_type, config.concurrency_limit, config.item_timeout())
    }

    /// Use a different classification profile for this run
    pub fn with_agent(mut self, agent: AgentType) -> Self {
        self.agent = agent;
        self
    }

    /// Classify every item
    ///
    /// `sink` receives each result as soon as it is collected, in completion
    /// order, so a store can persist results while the batch is running.
    pub async fn run(
        &self,
        items: Vec<NormalizedItem>,
        progress: Arc<ProgressTracker>,
        cancel: CancellationToken,
        sink: Option<mpsc::UnboundedSender<ClassificationResult>>,
    ) -> BatchOutcome {
        let order: Vec<usize> = items.iter().map(|item| item.row_index).collect();
        let worker_count = self.concurrency_limit.min(items.len()).max(1);

        let (work_tx, work_rx) = mpsc::channel::<NormalizedItem>(worker_count * 2);
        let work_rx = Arc::new(Mutex::new(work_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<ClassificationResult>(worker_count * 2);

        debug!(items = items.len(), workers = worker_count, "Starting worker pool");

        let feeder = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                for item in items {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        sent = work_tx.send(item) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
                // Dropping the sender lets idle workers exit
            })
        };

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let worker = Worker {
                client: Arc::clone(&self.client),
                agent: self.agent,
                item_timeout: self.item_timeout,
                work_rx: Arc::clone(&work_rx),
                result_tx: result_tx.clone(),
                cancel: cancel.clone(),
            };
            workers.push(tokio::spawn(worker.run(worker_id)));
        }
        drop(result_tx);

        let mut collected: HashMap<usize, ClassificationResult> = HashMap::with_capacity(order.len());
        while let Some(result) = result_rx.recv().await {
            let completed = progress.record(result.is_success());
            if completed % PROGRESS_LOG_INTERVAL == 0 || completed == progress.total() {
                info!(
                    completed,
                    total = progress.total(),
                    failed = progress.failed(),
                    "Batch progress"
                );
            }
            if let Some(sink) = &sink {
                if sink.send(result.clone()).is_err() {
                    warn!(row_index = result.row_index, "Result sink closed");
                }
            }
            collected.insert(result.row_index, result);
        }

        if let Err(e) = feeder.await {
            warn!(error = %e, "Feeder task ended abnormally");
        }
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Classification worker ended abnormally");
            }
        }

        let cancel_seen = cancel.is_cancelled();
        let expected = order.len();
        let mut results = Vec::with_capacity(expected);
        for row_index in order {
            match collected.remove(&row_index) {
                Some(result) => results.push(result),
                None if cancel_seen => {}
                None => {
                    // Only reachable when a worker panicked mid-item
                    let result = ClassificationResult::failed(row_index, "Classification worker stopped unexpectedly");
                    progress.record(false);
                    if let Some(sink) = &sink {
                        let _ = sink.send(result.clone());
                    }
                    results.push(result);
                }
            }
        }

        let errors = results
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| RowError::classification(r.row_index, r.rationale.clone()))
            .collect();

        // A cancel that lands after the last result leaves a complete batch
        let cancelled = cancel_seen && results.len() < expected;

        BatchOutcome {
            results,
            errors,
            cancelled,
        }
    }
}

/// One pool member
struct Worker {
    client: Arc<dyn ClassificationClient>,
    agent: AgentType,
    item_timeout: Duration,
    work_rx: Arc<Mutex<mpsc::Receiver<NormalizedItem>>>,
    result_tx: mpsc::Sender<ClassificationResult>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self, worker_id: usize) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let next = { self.work_rx.lock().await.recv().await };
            let Some(item) = next else { break };
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.client.ready() => {}
            }

            let result = self.classify(&item).await;

            if self.cancel.is_cancelled() {
                debug!(worker_id, row_index = item.row_index, "Discarding result after cancellation");
                break;
            }
            if self.result_tx.send(result).await.is_err() {
                break;
            }
        }
    }

    async fn classify(&self, item: &NormalizedItem) -> ClassificationResult {
        let call = self.client.classify(item, self.agent);
        let outcome = match tokio::time::timeout(self.item_timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ClassificationError::Timeout(self.item_timeout)),
        };

        match outcome {
            // Keep the slot aligned even if the client echoes a different index
            Ok(mut result) => {
                result.row_index = item.row_index;
                result
            }
            Err(e) => {
                warn!(row_index = item.row_index, error = %e, "Classification failed");
                ClassificationResult::failed(item.row_index, e.to_string())
            }
        }
    }
}
