//! Batch event types and the broadcast event bus
//!
//! Events are emitted by the batch workflow and forwarded to SSE clients.
//! Emission is fire-and-forget: a batch never waits on a listener.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events broadcast while a batch is being classified
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DeclarantEvent {
    /// Upload accepted and session created
    BatchStarted {
        session_id: Uuid,
        /// Uploaded file name
        filename: String,
        /// Row slots in the session (classifiable + excluded)
        item_count: usize,
        /// Rows that will be sent to the classifier
        classifiable_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// One or more items finished classification
    BatchProgress {
        session_id: Uuid,
        completed: usize,
        total: usize,
        failed: usize,
        /// Progress percentage (0.0-100.0)
        percentage: f32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Every classifiable item has a stored result
    BatchCompleted {
        session_id: Uuid,
        successful: usize,
        failed: usize,
        excluded: usize,
        duration_seconds: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Run stopped by the operator
    BatchCancelled {
        session_id: Uuid,
        completed: usize,
        total: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Run aborted by a structural error (store unavailable)
    BatchFailed {
        session_id: Uuid,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl DeclarantEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            DeclarantEvent::BatchStarted { .. } => "BatchStarted",
            DeclarantEvent::BatchProgress { .. } => "BatchProgress",
            DeclarantEvent::BatchCompleted { .. } => "BatchCompleted",
            DeclarantEvent::BatchCancelled { .. } => "BatchCancelled",
            DeclarantEvent::BatchFailed { .. } => "BatchFailed",
        }
    }

    /// Session the event belongs to
    pub fn session_id(&self) -> Uuid {
        match self {
            DeclarantEvent::BatchStarted { session_id, .. }
            | DeclarantEvent::BatchProgress { session_id, .. }
            | DeclarantEvent::BatchCompleted { session_id, .. }
            | DeclarantEvent::BatchCancelled { session_id, .. }
            | DeclarantEvent::BatchFailed { session_id, .. } => *session_id,
        }
    }
}

/// Broadcast bus for [`DeclarantEvent`]
///
/// Cloning the bus shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DeclarantEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    ///
    /// ```
    /// use declarant_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<DeclarantEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: DeclarantEvent,
    ) -> Result<usize, broadcast::error::SendError<DeclarantEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: DeclarantEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
