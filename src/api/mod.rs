//! HTTP boundary over the orchestrator.

pub mod routes;

pub use routes::{AppState, router};
