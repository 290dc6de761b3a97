//! Capability seams between the orchestrator and the worker pool.
//!
//! Two narrow traits instead of one shared concrete type:
//! - [`TaskDispatcher`]: orchestrator → work queue (outbound enqueue)
//! - [`ResultSink`]: agent → orchestrator (result intake, config read)

use async_trait::async_trait;

use crate::error::{QueueError, TaskError};
use crate::task::{OperationDurations, Task};

/// Hands freshly persisted tasks to the worker pool.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Enqueue a pending task. May wait while the queue is at capacity.
    async fn dispatch(&self, task: Task) -> Result<(), QueueError>;
}

/// Where the agent reads its budget config and reports finished tasks.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Accept a task whose status/result the worker has already set.
    async fn receive_result(&self, task: Task) -> Result<(), TaskError>;

    /// Current per-operator durations.
    async fn operation_durations(&self) -> Result<OperationDurations, TaskError>;
}
