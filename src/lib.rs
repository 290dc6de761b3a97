//! calcflow: asynchronous arithmetic task orchestrator.

pub mod api;
pub mod app;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod eval;
pub mod orchestrator;
pub mod store;
pub mod task;
pub mod worker;
