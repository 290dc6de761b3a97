//! Task data model: lifecycle status and the task record itself.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Current lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for (or undergoing) evaluation.
    Pending,
    /// Evaluated successfully; `result` holds the value.
    Completed,
    /// All attempts failed.
    Error,
}

impl TaskStatus {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!((self, target), (Pending, Completed) | (Pending, Error))
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

/// One submitted expression and its lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Registry-generated identifier.
    pub id: String,
    /// Caller-supplied deduplication key, unique across all tasks.
    pub request_id: String,
    /// Source text of the expression.
    pub expression: String,
    pub status: TaskStatus,
    /// Empty until the task completes.
    pub result: String,
    pub created: DateTime<Utc>,
    /// Set exactly once, at the terminal transition.
    pub finished: Option<DateTime<Utc>>,
    /// `finished - created`, serialized as integer nanoseconds.
    #[serde(default, with = "duration_nanos")]
    pub duration: Option<TimeDelta>,
}

impl Task {
    /// Create a new pending task.
    pub fn new(
        id: impl Into<String>,
        request_id: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            request_id: request_id.into(),
            expression: expression.into(),
            status: TaskStatus::Pending,
            result: String::new(),
            created: Utc::now(),
            finished: None,
            duration: None,
        }
    }

    /// Mark the working copy as completed with the given value.
    pub fn complete(&mut self, result: impl Into<String>) {
        self.status = TaskStatus::Completed;
        self.result = result.into();
    }

    /// Mark the working copy as failed. The result is cleared.
    pub fn fail(&mut self) {
        self.status = TaskStatus::Error;
        self.result.clear();
    }

    /// Stamp the finish time and derive the duration from it.
    ///
    /// Clamps `finished` to `created` if the clock went backwards, so
    /// `finished >= created` always holds.
    pub fn finalize(&mut self, now: DateTime<Utc>) {
        let finished = now.max(self.created);
        self.finished = Some(finished);
        self.duration = Some(finished - self.created);
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Serde helper: `Option<TimeDelta>` as integer nanoseconds.
pub(crate) mod duration_nanos {
    use chrono::TimeDelta;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<TimeDelta>, s: S) -> Result<S::Ok, S::Error> {
        match value.and_then(|d| d.num_nanoseconds()) {
            Some(ns) => s.serialize_i64(ns),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<TimeDelta>, D::Error> {
        Ok(Option::<i64>::deserialize(d)?.map(TimeDelta::nanoseconds))
    }
}
