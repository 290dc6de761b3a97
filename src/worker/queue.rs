//! Bounded FIFO handoff between orchestrator and agent.
//!
//! Backed by a `tokio::sync::mpsc` channel: `enqueue` waits while the queue
//! is full (it never drops work), and `dequeue` parks until an item arrives
//! or every sender is gone.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::dispatch::TaskDispatcher;
use crate::error::QueueError;
use crate::task::Task;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Constructor namespace for the two queue halves.
pub struct WorkQueue;

impl WorkQueue {
    /// Create a bounded queue. `capacity` is clamped to at least 1.
    pub fn bounded(capacity: usize) -> (WorkQueueSender, WorkQueueReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (WorkQueueSender { tx }, WorkQueueReceiver { rx })
    }
}

/// Producer half. Cheap to clone.
#[derive(Clone)]
pub struct WorkQueueSender {
    tx: mpsc::Sender<Task>,
}

impl WorkQueueSender {
    /// Append a task, waiting for space if the queue is full.
    pub async fn enqueue(&self, task: Task) -> Result<(), QueueError> {
        let task_id = task.id.clone();
        self.tx.send(task).await.map_err(|_| QueueError::Closed)?;
        debug!(task_id = %task_id, "Task enqueued");
        Ok(())
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    pub fn max_capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

#[async_trait]
impl TaskDispatcher for WorkQueueSender {
    async fn dispatch(&self, task: Task) -> Result<(), QueueError> {
        self.enqueue(task).await
    }
}

/// Consumer half, owned by exactly one agent loop.
pub struct WorkQueueReceiver {
    rx: mpsc::Receiver<Task>,
}

impl WorkQueueReceiver {
    /// Wait for the next task. `None` once the queue is closed and drained.
    pub async fn dequeue(&mut self) -> Option<Task> {
        self.rx.recv().await
    }

    /// Stop accepting new tasks; already-queued tasks can still be drained.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
