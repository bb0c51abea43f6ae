//! Prediction change notifications
//!
//! Two delivery paths share one publish call:
//! - a `tokio::sync::broadcast` channel for async consumers
//! - synchronous callback listeners, detached when their [`Subscription`] drops
//!
//! Callbacks run on the publishing task and must not block.

use crate::jobs::JobId;
use parking_lot::RwLock;
use riskwatch_model::{PredictionId, PredictionKind};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;

/// Default broadcast channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Something changed in the prediction data set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredictionEvent {
    /// Partitions were replaced by a fetch
    Refreshed,
    /// A prediction was created
    Created {
        /// New prediction id
        id: PredictionId,
        /// Annual or quarterly
        kind: PredictionKind,
    },
    /// A prediction was updated
    Updated {
        /// Updated prediction id
        id: PredictionId,
        /// Annual or quarterly
        kind: PredictionKind,
    },
    /// A prediction was deleted
    Deleted {
        /// Deleted prediction id
        id: PredictionId,
        /// Annual or quarterly
        kind: PredictionKind,
    },
    /// A bulk upload job finished and its predictions are on the server
    BulkImportCompleted {
        /// Finished job
        job_id: JobId,
    },
}

impl PredictionEvent {
    /// Whether the server-side data set changed
    ///
    /// Derived caches (statistics) are invalidated on mutations only.
    #[inline]
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Refreshed)
    }

    /// Event name
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Refreshed => "predictions-updated",
            Self::Created { .. } => "prediction-created",
            Self::Updated { .. } => "prediction-updated",
            Self::Deleted { .. } => "prediction-deleted",
            Self::BulkImportCompleted { .. } => "bulk-import-completed",
        }
    }
}

impl fmt::Display for PredictionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refreshed => f.write_str(self.name()),
            Self::Created { id, kind }
            | Self::Updated { id, kind }
            | Self::Deleted { id, kind } => {
                write!(f, "{} {kind}/{id}", self.name())
            }
            Self::BulkImportCompleted { job_id } => write!(f, "{} {job_id}", self.name()),
        }
    }
}

type Listener = Arc<dyn Fn(&PredictionEvent) + Send + Sync>;
type ListenerList = RwLock<Vec<(u64, Listener)>>;

/// Fan-out hub for [`PredictionEvent`]s
pub struct EventBus {
    tx: broadcast::Sender<PredictionEvent>,
    listeners: Arc<ListenerList>,
    next_id: AtomicU64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.tx.receiver_count())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl EventBus {
    /// Create a bus with the given broadcast capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            listeners: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Receive every event published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PredictionEvent> {
        self.tx.subscribe()
    }

    /// Register a callback; it stays attached until the returned handle drops
    pub fn on_predictions_changed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&PredictionEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, Arc::new(callback)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Deliver an event to every listener and receiver
    ///
    /// Returns the number of callback listeners invoked.
    pub fn publish(&self, event: PredictionEvent) -> usize {
        tracing::debug!(%event, "publishing prediction event");
        // Snapshot so a callback may unsubscribe without deadlocking
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in &listeners {
            listener(&event);
        }
        // No receivers is not an error
        let _ = self.tx.send(event);
        listeners.len()
    }

    /// Number of attached callback listeners
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// Handle keeping a callback listener attached
#[must_use = "dropping a Subscription detaches its listener"]
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl Subscription {
    /// Detach the listener now
    pub fn unsubscribe(self) {}
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.write().retain(|(id, _)| *id != self.id);
        }
    }
}
