//! Agent that evaluates dequeued tasks under a deadline with bounded retry.
//!
//! The run loop pulls one task at a time from the [`WorkQueueReceiver`] and
//! hands each to its own tokio task, so several evaluations can be in flight
//! while dequeueing stays FIFO. A semaphore caps the number in flight.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::dispatch::ResultSink;
use crate::error::AttemptError;
use crate::eval::Evaluator;
use crate::task::Task;
use crate::worker::queue::WorkQueueReceiver;

/// Worker that drains the queue.
pub struct Agent {
    queue: WorkQueueReceiver,
    processor: Arc<TaskProcessor>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        queue: WorkQueueReceiver,
        sink: Arc<dyn ResultSink>,
        evaluator: Arc<dyn Evaluator>,
    ) -> Self {
        Self {
            queue,
            processor: Arc::new(TaskProcessor::new(config, sink, evaluator)),
        }
    }

    /// Process tasks until the queue is drained and closed, then wait for
    /// every in-flight task to be reported.
    ///
    /// The queue closes when every sender is dropped or when `shutdown`
    /// fires. After `shutdown`, tasks already queued are still processed but
    /// new enqueues fail.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let config = self.processor.config();
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        let tracker = TaskTracker::new();
        let mut closing = false;

        info!(
            agent = %config.name,
            max_in_flight = config.max_in_flight,
            max_attempts = config.max_attempts,
            "Agent started"
        );

        loop {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let next = loop {
                tokio::select! {
                    task = self.queue.dequeue() => break task,
                    _ = shutdown.cancelled(), if !closing => {
                        info!(agent = %config.name, "Shutdown requested, draining queue");
                        self.queue.close();
                        closing = true;
                    }
                }
            };
            let Some(mut task) = next else {
                break;
            };
            debug!(task_id = %task.id, request_id = %task.request_id, "Task dequeued");

            let processor = Arc::clone(&self.processor);
            tracker.spawn(async move {
                processor.execute(&mut task).await;
                // Release the slot before reporting so intake never waits on it.
                drop(permit);
                processor.report(task).await;
            });
        }

        tracker.close();
        tracker.wait().await;
        info!(agent = %config.name, "Agent stopped, queue closed");
    }
}

/// Per-task attempt loop, shared by every in-flight unit.
pub struct TaskProcessor {
    config: AgentConfig,
    sink: Arc<dyn ResultSink>,
    evaluator: Arc<dyn Evaluator>,
}

impl TaskProcessor {
    pub fn new(
        config: AgentConfig,
        sink: Arc<dyn ResultSink>,
        evaluator: Arc<dyn Evaluator>,
    ) -> Self {
        Self {
            config,
            sink,
            evaluator,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run the attempts, then report the outcome exactly once.
    pub async fn process_task(&self, mut task: Task) {
        self.execute(&mut task).await;
        self.report(task).await;
    }

    /// Run up to `max_attempts` attempts and set the working copy's terminal
    /// status. Does not report.
    pub async fn execute(&self, task: &mut Task) {
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.attempt(&task.expression).await {
                Ok(value) => {
                    debug!(task_id = %task.id, attempt, result = %value, "Attempt succeeded");
                    task.complete(value);
                    return;
                }
                Err(AttemptError::ConfigUnavailable(reason)) => {
                    warn!(
                        task_id = %task.id,
                        attempt,
                        error = %reason,
                        "Operation durations unavailable, backing off"
                    );
                    tokio::time::sleep(self.config.config_retry_delay).await;
                }
                Err(AttemptError::Timeout { deadline }) => {
                    warn!(
                        task_id = %task.id,
                        attempt,
                        deadline_ms = deadline.as_millis() as u64,
                        "Attempt timed out"
                    );
                }
                Err(e) => {
                    warn!(task_id = %task.id, attempt, error = %e, "Attempt failed");
                }
            }
        }

        warn!(task_id = %task.id, attempts = max_attempts, "Attempts exhausted");
        task.fail();
    }

    /// Hand the task back to the registry.
    pub async fn report(&self, task: Task) {
        let task_id = task.id.clone();
        let status = task.status;
        if let Err(e) = self.sink.receive_result(task).await {
            error!(task_id = %task_id, status = %status, error = %e, "Failed to report result");
        }
    }

    /// One attempt: read the current budget, then race evaluation against it.
    async fn attempt(&self, expression: &str) -> Result<String, AttemptError> {
        let durations = self
            .sink
            .operation_durations()
            .await
            .map_err(|e| AttemptError::ConfigUnavailable(e.to_string()))?;

        let cancel = CancellationToken::new();
        let mut handle = {
            let evaluator = Arc::clone(&self.evaluator);
            let expression = expression.to_string();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || evaluator.evaluate(&expression, &cancel))
        };

        let value = if durations.is_unset() {
            handle
                .await
                .map_err(|e| AttemptError::Aborted(e.to_string()))??
        } else {
            let deadline = durations.budget_for(expression);
            tokio::select! {
                joined = &mut handle => joined.map_err(|e| AttemptError::Aborted(e.to_string()))??,
                _ = tokio::time::sleep(deadline) => {
                    cancel.cancel();
                    collect_abandoned(handle, self.config.abandon_grace).await;
                    return Err(AttemptError::Timeout { deadline });
                }
            }
        };

        if value.is_empty() {
            return Err(AttemptError::EmptyResult);
        }
        Ok(value)
    }
}

/// Wait up to `grace` for a cancelled evaluation to wind down; its outcome
/// is discarded. An evaluation that ignores cancellation is left running on
/// the blocking pool.
async fn collect_abandoned<T>(handle: tokio::task::JoinHandle<T>, grace: Duration) {
    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(_)) => debug!("Abandoned evaluation collected"),
        Ok(Err(e)) => debug!(error = %e, "Abandoned evaluation did not finish cleanly"),
        Err(_) => warn!(
            grace_ms = grace.as_millis() as u64,
            "Abandoned evaluation ignored cancellation, detaching"
        ),
    }
}
