//! `Store` trait — the single async interface the orchestrator persists through.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::task::{OperationDurations, Task};

/// Backend-agnostic durable storage for tasks and the duration config.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Tasks ───────────────────────────────────────────────────────

    /// Insert a new task. Fails with [`DatabaseError::Constraint`] if the
    /// id or request id is already taken.
    async fn create_task(&self, task: &Task) -> Result<(), DatabaseError>;

    /// Look up a task by its caller-supplied request id.
    async fn get_task_by_request_id(&self, request_id: &str)
    -> Result<Option<Task>, DatabaseError>;

    /// All tasks, oldest first.
    async fn list_tasks(&self) -> Result<Vec<Task>, DatabaseError>;

    /// Insert or replace a task row by id.
    async fn update_task(&self, task: &Task) -> Result<(), DatabaseError>;

    /// Check whether any task carries this request id.
    async fn request_exists(&self, request_id: &str) -> Result<bool, DatabaseError>;

    // ── Operation durations ─────────────────────────────────────────

    /// Current durations; the all-empty record if none were ever set.
    async fn get_operation_durations(&self) -> Result<OperationDurations, DatabaseError>;

    /// Replace the durations record wholesale.
    async fn set_operation_durations(
        &self,
        durations: &OperationDurations,
    ) -> Result<(), DatabaseError>;
}
