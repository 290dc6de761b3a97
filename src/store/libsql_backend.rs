//! libSQL backend — async `Store` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::Store;
use crate::task::durations::{format_duration, parse_duration};
use crate::task::{OperationDurations, Task};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// RFC 3339 with nanoseconds, so `finished - created` survives a round trip.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Serialization(format!("bad timestamp '{s}': {e}")))
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn opt_integer(n: Option<i64>) -> libsql::Value {
    match n {
        Some(n) => libsql::Value::Integer(n),
        None => libsql::Value::Null,
    }
}

fn duration_to_str(d: Option<std::time::Duration>) -> String {
    d.map(format_duration).unwrap_or_default()
}

fn str_to_duration(s: &str) -> Result<Option<std::time::Duration>, DatabaseError> {
    if s.is_empty() {
        return Ok(None);
    }
    parse_duration(s)
        .map(Some)
        .map_err(|e| DatabaseError::Serialization(format!("bad operation duration: {e}")))
}

fn is_unique_violation(e: &libsql::Error) -> bool {
    e.to_string().contains("UNIQUE constraint failed")
}

/// Map a libsql Row to a Task.
///
/// Column order matches TASK_COLUMNS:
/// 0:id, 1:request_id, 2:expression, 3:status, 4:result, 5:created_at,
/// 6:finished_at, 7:duration_ns
fn row_to_task(row: &libsql::Row) -> Result<Task, DatabaseError> {
    let get_text = |idx: i32| -> Result<String, DatabaseError> {
        row.get::<String>(idx)
            .map_err(|e| DatabaseError::Query(format!("task column {idx}: {e}")))
    };

    let status_str = get_text(3)?;
    let created_str = get_text(5)?;
    let finished_str: Option<String> = row.get(6).ok();
    let duration_ns: Option<i64> = row.get(7).ok();

    Ok(Task {
        id: get_text(0)?,
        request_id: get_text(1)?,
        expression: get_text(2)?,
        status: status_str.parse().map_err(DatabaseError::Serialization)?,
        result: get_text(4)?,
        created: parse_datetime(&created_str)?,
        finished: finished_str.as_deref().map(parse_datetime).transpose()?,
        duration: duration_ns.map(TimeDelta::nanoseconds),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const TASK_COLUMNS: &str =
    "id, request_id, expression, status, result, created_at, finished_at, duration_ns";

#[async_trait]
impl Store for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Tasks ───────────────────────────────────────────────────────

    async fn create_task(&self, task: &Task) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            &format!("INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                task.id.clone(),
                task.request_id.clone(),
                task.expression.clone(),
                task.status.as_str(),
                task.result.clone(),
                format_datetime(&task.created),
                opt_text_owned(task.finished.as_ref().map(format_datetime)),
                opt_integer(task.duration.and_then(|d| d.num_nanoseconds())),
            ],
        )
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                DatabaseError::Constraint(format!("create_task: {e}"))
            } else {
                DatabaseError::Query(format!("create_task: {e}"))
            }
        })?;

        debug!(task_id = %task.id, request_id = %task.request_id, "Task inserted into DB");
        Ok(())
    }

    async fn get_task_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<Task>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE request_id = ?1"),
                params![request_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_task_by_request_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_task(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_task_by_request_id: {e}"))),
        }
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_tasks: {e}")))?;

        let mut tasks = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_tasks: {e}")))?
        {
            tasks.push(row_to_task(&row)?);
        }
        Ok(tasks)
    }

    async fn update_task(&self, task: &Task) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    result = excluded.result,
                    finished_at = excluded.finished_at,
                    duration_ns = excluded.duration_ns"
            ),
            params![
                task.id.clone(),
                task.request_id.clone(),
                task.expression.clone(),
                task.status.as_str(),
                task.result.clone(),
                format_datetime(&task.created),
                opt_text_owned(task.finished.as_ref().map(format_datetime)),
                opt_integer(task.duration.and_then(|d| d.num_nanoseconds())),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("update_task: {e}")))?;

        debug!(task_id = %task.id, status = %task.status, "Task updated in DB");
        Ok(())
    }

    async fn request_exists(&self, request_id: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM tasks WHERE request_id = ?1",
                params![request_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("request_exists: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row.get(0).unwrap_or(0);
                Ok(count > 0)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(DatabaseError::Query(format!("request_exists: {e}"))),
        }
    }

    // ── Operation durations ─────────────────────────────────────────

    async fn get_operation_durations(&self) -> Result<OperationDurations, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT summation, subtraction, multiplication, division
                 FROM operation_durations WHERE id = 1",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_operation_durations: {e}")))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(OperationDurations::default()),
            Err(e) => {
                return Err(DatabaseError::Query(format!("get_operation_durations: {e}")));
            }
        };

        let field = |idx: i32| -> Result<Option<std::time::Duration>, DatabaseError> {
            let raw: String = row.get(idx).unwrap_or_default();
            str_to_duration(&raw)
        };

        Ok(OperationDurations {
            summation: field(0)?,
            subtraction: field(1)?,
            multiplication: field(2)?,
            division: field(3)?,
        })
    }

    async fn set_operation_durations(
        &self,
        durations: &OperationDurations,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO operation_durations (id, summation, subtraction, multiplication, division, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                summation = excluded.summation,
                subtraction = excluded.subtraction,
                multiplication = excluded.multiplication,
                division = excluded.division,
                updated_at = excluded.updated_at",
            params![
                duration_to_str(durations.summation),
                duration_to_str(durations.subtraction),
                duration_to_str(durations.multiplication),
                duration_to_str(durations.division),
                now,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("set_operation_durations: {e}")))?;

        info!(?durations, "Operation durations replaced");
        Ok(())
    }
}
