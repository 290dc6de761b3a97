//! Orchestrator: owns the task lifecycle.
//!
//! Creates and deduplicates tasks, persists them before handing them to the
//! dispatcher, and finalizes results reported back by the agent. Registry
//! operations are serialized by one coarse lock; the store remains the
//! system of record.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dispatch::{ResultSink, TaskDispatcher};
use crate::error::{DatabaseError, TaskError};
use crate::store::Store;
use crate::task::{OperationDurations, Task, TaskStatus};

pub struct Orchestrator {
    store: Arc<dyn Store>,
    dispatcher: Arc<dyn TaskDispatcher>,
    lock: Mutex<()>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn Store>, dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            lock: Mutex::new(()),
        }
    }

    /// Register a new calculation and dispatch it. Returns the task id.
    ///
    /// The task is persisted as `pending` before it is dispatched; if the
    /// write fails nothing is enqueued.
    pub async fn add_calculation(
        &self,
        expression: &str,
        request_id: &str,
    ) -> Result<String, TaskError> {
        if request_id.trim().is_empty() {
            return Err(TaskError::Validation("request id must not be empty".to_string()));
        }
        if expression.trim().is_empty() {
            return Err(TaskError::Validation("expression must not be empty".to_string()));
        }

        let _guard = self.lock.lock().await;

        if self.store.request_exists(request_id).await? {
            return Err(TaskError::DuplicateRequest {
                request_id: request_id.to_string(),
            });
        }

        let task = Task::new(Uuid::new_v4().to_string(), request_id, expression);
        match self.store.create_task(&task).await {
            Ok(()) => {}
            Err(DatabaseError::Constraint(_)) => {
                return Err(TaskError::DuplicateRequest {
                    request_id: request_id.to_string(),
                });
            }
            Err(e) => {
                error!(request_id = %request_id, error = %e, "Failed to persist task");
                return Err(e.into());
            }
        }
        info!(task_id = %task.id, request_id = %request_id, "Task created");

        let task_id = task.id.clone();
        self.dispatcher.dispatch(task).await.inspect_err(|e| {
            error!(task_id = %task_id, error = %e, "Failed to dispatch task");
        })?;
        debug!(task_id = %task_id, "Task dispatched");

        Ok(task_id)
    }

    pub async fn get_task_by_request_id(&self, request_id: &str) -> Result<Task, TaskError> {
        let _guard = self.lock.lock().await;
        self.store
            .get_task_by_request_id(request_id)
            .await?
            .ok_or_else(|| TaskError::NotFound {
                request_id: request_id.to_string(),
            })
    }

    pub async fn list_tasks(&self) -> Result<Vec<Task>, TaskError> {
        let _guard = self.lock.lock().await;
        Ok(self.store.list_tasks().await?)
    }

    pub async fn request_exists(&self, request_id: &str) -> Result<bool, TaskError> {
        let _guard = self.lock.lock().await;
        Ok(self.store.request_exists(request_id).await?)
    }

    pub async fn get_operation_durations(&self) -> Result<OperationDurations, TaskError> {
        let _guard = self.lock.lock().await;
        Ok(self.store.get_operation_durations().await?)
    }

    /// Replace the durations record. No merge with previous values.
    pub async fn set_operation_durations(
        &self,
        durations: OperationDurations,
    ) -> Result<OperationDurations, TaskError> {
        let _guard = self.lock.lock().await;
        self.store.set_operation_durations(&durations).await?;
        info!(?durations, "Operation durations updated");
        Ok(durations)
    }

    /// Finalize a task the agent has finished with.
    ///
    /// Stamps `finished`/`duration` and persists the task as given. A task
    /// that is still pending, or whose stored row is already terminal, is
    /// rejected. A failed write is not retried.
    pub async fn receive_result(&self, mut task: Task) -> Result<(), TaskError> {
        if !TaskStatus::Pending.can_transition_to(task.status) {
            return Err(TaskError::InvalidTransition {
                id: task.id,
                state: TaskStatus::Pending.to_string(),
                target: task.status.to_string(),
            });
        }

        let _guard = self.lock.lock().await;

        match self.store.get_task_by_request_id(&task.request_id).await? {
            Some(stored) if stored.is_terminal() => {
                warn!(task_id = %task.id, state = %stored.status, "Result for already finalized task");
                return Err(TaskError::InvalidTransition {
                    id: task.id,
                    state: stored.status.to_string(),
                    target: task.status.to_string(),
                });
            }
            Some(_) => {}
            None => warn!(task_id = %task.id, "Result for unknown task, inserting"),
        }

        task.finalize(Utc::now());
        if let Err(e) = self.store.update_task(&task).await {
            error!(task_id = %task.id, error = %e, "Failed to persist task result");
            return Err(e.into());
        }

        info!(
            task_id = %task.id,
            request_id = %task.request_id,
            status = %task.status,
            duration_ms = task.duration.map(|d| d.num_milliseconds()).unwrap_or_default(),
            "Task finalized"
        );
        Ok(())
    }
}

#[async_trait]
impl ResultSink for Orchestrator {
    async fn receive_result(&self, task: Task) -> Result<(), TaskError> {
        Orchestrator::receive_result(self, task).await
    }

    /// Read straight from the store, outside the registry lock: an agent
    /// unit holding an in-flight slot must not wait behind an
    /// `add_calculation` that is itself waiting for queue space.
    async fn operation_durations(&self) -> Result<OperationDurations, TaskError> {
        Ok(self.store.get_operation_durations().await?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::QueueError;
    use crate::store::LibSqlBackend;

    /// Records dispatched tasks instead of enqueueing them.
    #[derive(Default)]
    struct RecordingDispatcher {
        dispatched: std::sync::Mutex<Vec<Task>>,
    }

    impl RecordingDispatcher {
        fn dispatched(&self) -> Vec<Task> {
            self.dispatched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TaskDispatcher for RecordingDispatcher {
        async fn dispatch(&self, task: Task) -> Result<(), QueueError> {
            self.dispatched.lock().unwrap().push(task);
            Ok(())
        }
    }

    struct ClosedDispatcher;

    #[async_trait]
    impl TaskDispatcher for ClosedDispatcher {
        async fn dispatch(&self, _task: Task) -> Result<(), QueueError> {
            Err(QueueError::Closed)
        }
    }

    /// Store whose writes always fail.
    struct BrokenStore;

    #[async_trait]
    impl Store for BrokenStore {
        async fn run_migrations(&self) -> Result<(), DatabaseError> {
            Ok(())
        }
        async fn create_task(&self, _task: &Task) -> Result<(), DatabaseError> {
            Err(DatabaseError::Query("disk full".to_string()))
        }
        async fn get_task_by_request_id(
            &self,
            _request_id: &str,
        ) -> Result<Option<Task>, DatabaseError> {
            Ok(None)
        }
        async fn list_tasks(&self) -> Result<Vec<Task>, DatabaseError> {
            Ok(Vec::new())
        }
        async fn update_task(&self, _task: &Task) -> Result<(), DatabaseError> {
            Err(DatabaseError::Query("disk full".to_string()))
        }
        async fn request_exists(&self, _request_id: &str) -> Result<bool, DatabaseError> {
            Ok(false)
        }
        async fn get_operation_durations(&self) -> Result<OperationDurations, DatabaseError> {
            Ok(OperationDurations::default())
        }
        async fn set_operation_durations(
            &self,
            _durations: &OperationDurations,
        ) -> Result<(), DatabaseError> {
            Err(DatabaseError::Query("disk full".to_string()))
        }
    }

    async fn setup() -> (Orchestrator, Arc<RecordingDispatcher>) {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        (Orchestrator::new(store, dispatcher.clone()), dispatcher)
    }

    #[tokio::test]
    async fn add_calculation_persists_then_dispatches() {
        let (orch, dispatcher) = setup().await;

        let task_id = orch.add_calculation("2+2", "r1").await.unwrap();

        let stored = orch.get_task_by_request_id("r1").await.unwrap();
        assert_eq!(stored.id, task_id);
        assert_eq!(stored.status, TaskStatus::Pending);
        assert_eq!(stored.expression, "2+2");
        assert!(stored.finished.is_none());

        let dispatched = dispatcher.dispatched();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].id, task_id);
    }

    #[tokio::test]
    async fn duplicate_request_is_rejected() {
        let (orch, dispatcher) = setup().await;
        orch.add_calculation("2+2", "r1").await.unwrap();

        let err = orch.add_calculation("1+1", "r1").await.unwrap_err();
        assert!(matches!(err, TaskError::DuplicateRequest { ref request_id } if request_id == "r1"));

        let tasks = orch.list_tasks().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].expression, "2+2");
        assert_eq!(dispatcher.dispatched().len(), 1);
    }

    #[tokio::test]
    async fn empty_inputs_are_validation_errors() {
        let (orch, dispatcher) = setup().await;

        assert!(matches!(
            orch.add_calculation("2+2", "").await,
            Err(TaskError::Validation(_))
        ));
        assert!(matches!(
            orch.add_calculation("  ", "r1").await,
            Err(TaskError::Validation(_))
        ));
        assert!(dispatcher.dispatched().is_empty());
        assert!(!orch.request_exists("r1").await.unwrap());
    }

    #[tokio::test]
    async fn persistence_failure_dispatches_nothing() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let orch = Orchestrator::new(Arc::new(BrokenStore), dispatcher.clone());

        let err = orch.add_calculation("2+2", "r1").await.unwrap_err();
        assert!(matches!(err, TaskError::Persistence(_)));
        assert!(dispatcher.dispatched().is_empty());
    }

    #[tokio::test]
    async fn closed_queue_is_a_dispatch_error() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let orch = Orchestrator::new(store, Arc::new(ClosedDispatcher));

        let err = orch.add_calculation("2+2", "r1").await.unwrap_err();
        assert!(matches!(err, TaskError::Dispatch(QueueError::Closed)));
    }

    #[tokio::test]
    async fn unknown_request_is_not_found() {
        let (orch, _) = setup().await;
        let err = orch.get_task_by_request_id("unknown").await.unwrap_err();
        assert!(matches!(err, TaskError::NotFound { .. }));
    }

    #[tokio::test]
    async fn receive_result_finalizes_task() {
        let (orch, dispatcher) = setup().await;
        orch.add_calculation("2+2", "r1").await.unwrap();

        let mut task = dispatcher.dispatched().remove(0);
        task.complete("4");
        orch.receive_result(task).await.unwrap();

        let stored = orch.get_task_by_request_id("r1").await.unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(stored.result, "4");
        let finished = stored.finished.unwrap();
        assert!(finished >= stored.created);
        assert_eq!(stored.duration, Some(finished - stored.created));
    }

    #[tokio::test]
    async fn receive_result_rejects_pending_task() {
        let (orch, dispatcher) = setup().await;
        orch.add_calculation("2+2", "r1").await.unwrap();

        let task = dispatcher.dispatched().remove(0);
        let err = orch.receive_result(task).await.unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));

        let stored = orch.get_task_by_request_id("r1").await.unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn receive_result_never_rewrites_terminal_task() {
        let (orch, dispatcher) = setup().await;
        orch.add_calculation("2+2", "r1").await.unwrap();
        let task = dispatcher.dispatched().remove(0);

        let mut first = task.clone();
        first.complete("4");
        orch.receive_result(first).await.unwrap();

        let mut second = task;
        second.fail();
        let err = orch.receive_result(second).await.unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { ref state, .. } if state == "completed"));

        let stored = orch.get_task_by_request_id("r1").await.unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(stored.result, "4");
    }

    #[tokio::test]
    async fn receive_result_surfaces_store_failure() {
        let orch = Orchestrator::new(Arc::new(BrokenStore), Arc::new(RecordingDispatcher::default()));
        let mut task = Task::new("t1", "r1", "2+2");
        task.fail();

        let err = orch.receive_result(task).await.unwrap_err();
        assert!(matches!(err, TaskError::Persistence(_)));
    }

    #[tokio::test]
    async fn set_durations_replaces_without_merge() {
        let (orch, _) = setup().await;

        orch.set_operation_durations(OperationDurations::uniform(Duration::from_secs(1)))
            .await
            .unwrap();
        let replacement = OperationDurations {
            summation: Some(Duration::from_secs(2)),
            ..OperationDurations::default()
        };
        let echoed = orch.set_operation_durations(replacement.clone()).await.unwrap();
        assert_eq!(echoed, replacement);

        let current = orch.get_operation_durations().await.unwrap();
        assert_eq!(current, replacement);
        assert!(current.subtraction.is_none());

        let via_sink = ResultSink::operation_durations(&orch).await.unwrap();
        assert_eq!(via_sink, replacement);
    }

    #[tokio::test]
    async fn concurrent_duplicates_create_one_task() {
        let (orch, dispatcher) = setup().await;
        let orch = Arc::new(orch);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let orch = Arc::clone(&orch);
            handles.push(tokio::spawn(async move {
                orch.add_calculation("1+1", "same").await
            }));
        }

        let mut created = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(TaskError::DuplicateRequest { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(orch.list_tasks().await.unwrap().len(), 1);
        assert_eq!(dispatcher.dispatched().len(), 1);
    }
}
