//! Persistence layer — libSQL-backed storage for tasks and operation durations.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::Store;
