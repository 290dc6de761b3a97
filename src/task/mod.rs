//! Task and operation-duration records.

pub mod durations;
pub mod model;

pub use durations::{OperationDurations, OperationKind};
pub use model::{Task, TaskStatus};
