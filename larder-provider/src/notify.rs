//! Where retrieval results are observed.
//!
//! Work runs on the orchestrator's worker runtime; emissions are handed to
//! a [`NotificationContext`], which decides where they land. A context must
//! run deliveries in submission order.

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use larder_core::ConfigError;

/// A unit of delivery work.
pub type Delivery = Box<dyn FnOnce() + Send + 'static>;

/// Runs deliveries, in the order they were submitted.
pub trait NotificationContext: Send + Sync {
    fn deliver(&self, delivery: Delivery);
}

/// Delivers directly on the worker that produced the emission.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

impl NotificationContext for Inline {
    fn deliver(&self, delivery: Delivery) {
        delivery();
    }
}

/// FIFO queue drained by one dedicated task.
///
/// All deliveries submitted through one `SerialContext` (and its clones)
/// run one at a time on that task, in submission order.
#[derive(Debug, Clone)]
pub struct SerialContext {
    queue: mpsc::UnboundedSender<Delivery>,
}

impl SerialContext {
    /// Start the draining task on the current runtime.
    pub fn new() -> Result<Self, ConfigError> {
        let handle = Handle::try_current().map_err(|_| ConfigError::MissingRuntime)?;
        Ok(Self::spawn_on(&handle))
    }

    /// Start the draining task on the given runtime.
    pub fn spawn_on(handle: &Handle) -> Self {
        let (queue, mut deliveries) = mpsc::unbounded_channel::<Delivery>();
        handle.spawn(async move {
            while let Some(delivery) = deliveries.recv().await {
                delivery();
            }
        });
        Self { queue }
    }
}

impl NotificationContext for SerialContext {
    fn deliver(&self, delivery: Delivery) {
        if self.queue.send(delivery).is_err() {
            tracing::warn!("Notification context shut down, dropping delivery");
        }
    }
}
