//! Worker system — queue and agent.
//!
//! Core components:
//! - `queue` — Bounded FIFO handoff from the orchestrator
//! - `agent` — Dequeue loop, deadline race, bounded retry, result reporting

pub mod agent;
pub mod queue;

pub use agent::{Agent, TaskProcessor};
pub use queue::{WorkQueue, WorkQueueReceiver, WorkQueueSender};
