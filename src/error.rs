//! Error types for calcflow.

use std::time::Duration;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors raised by the orchestrator's task lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Request {request_id} already exists")]
    DuplicateRequest { request_id: String },

    #[error("Task for request {request_id} not found")]
    NotFound { request_id: String },

    #[error("Persistence failed: {0}")]
    Persistence(#[from] DatabaseError),

    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] QueueError),

    #[error("Task {id} already in state {state}, cannot transition to {target}")]
    InvalidTransition {
        id: String,
        state: String,
        target: String,
    },
}

/// Expression parse/evaluation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("Expression is empty")]
    Empty,

    #[error("Unexpected token '{token}' at position {position}")]
    UnexpectedToken { token: String, position: usize },

    #[error("Unexpected end of expression")]
    UnexpectedEnd,

    #[error("Invalid number literal '{0}'")]
    InvalidNumber(String),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Arithmetic overflow")]
    Overflow,

    #[error("Expression nests deeper than {limit} levels")]
    TooDeep { limit: usize },

    #[error("Evaluation cancelled")]
    Cancelled,
}

/// Why a single agent attempt did not produce a result.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error("Evaluation failed: {0}")]
    Evaluation(#[from] EvalError),

    #[error("Evaluator returned an empty result")]
    EmptyResult,

    #[error("Deadline of {deadline:?} elapsed before evaluation finished")]
    Timeout { deadline: Duration },

    #[error("Operation durations unavailable: {0}")]
    ConfigUnavailable(String),

    #[error("Evaluation aborted: {0}")]
    Aborted(String),
}

/// Work queue errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Work queue is closed")]
    Closed,
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
