//! Server-side tasks.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SchedError, SchedResult};

/// Task status code.
///
/// The service reports codes as strings (`"100"`); they are ordered as
/// numbers so "reached the final status" is a plain comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawStatus", into = "String")]
pub struct TaskStatus(u32);

impl TaskStatus {
    /// Waiting to be picked up.
    pub const QUEUED: TaskStatus = TaskStatus(100);
    /// Being processed.
    pub const IN_PROGRESS: TaskStatus = TaskStatus(101);
    /// External upload to the staging area failed.
    pub const UPLOAD_FAILED: TaskStatus = TaskStatus(115);
    /// External download from the staging area failed.
    pub const DOWNLOAD_FAILED: TaskStatus = TaskStatus(118);
    /// Finished.
    pub const SUCCESS: TaskStatus = TaskStatus(200);
    /// Codes from here on are failures.
    pub const FAILURE_THRESHOLD: TaskStatus = TaskStatus(400);

    pub const fn new(code: u32) -> Self {
        Self(code)
    }

    pub fn code(&self) -> u32 {
        self.0
    }

    pub fn is_failure(&self) -> bool {
        *self == Self::UPLOAD_FAILED
            || *self == Self::DOWNLOAD_FAILED
            || *self >= Self::FAILURE_THRESHOLD
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskStatus {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse()
            .map(Self)
            .map_err(|_| SchedError::Payload(format!("invalid task status: {s:?}")))
    }
}

impl From<TaskStatus> for String {
    fn from(status: TaskStatus) -> Self {
        status.to_string()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawStatus {
    Code(u32),
    Text(String),
}

impl TryFrom<RawStatus> for TaskStatus {
    type Error = SchedError;

    fn try_from(raw: RawStatus) -> Result<Self, Self::Error> {
        match raw {
            RawStatus::Code(code) => Ok(Self(code)),
            RawStatus::Text(text) => text.parse(),
        }
    }
}

/// A long-running operation tracked by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "task_id", default)]
    pub id: String,
    pub status: TaskStatus,
    /// Operation result or progress message; opaque to the scheduler.
    #[serde(default)]
    pub data: Value,
    /// System the operation runs on, for storage transfers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modify: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_id: Option<String>,
}

/// Decode the `{"tasks": {"<id>": {...}}}` listing.
///
/// Entries without a `task_id` take the id from their key.
pub fn tasks_from_payload(payload: &Value) -> SchedResult<BTreeMap<String, Task>> {
    let Some(entries) = payload.get("tasks") else {
        return Err(SchedError::Payload("missing `tasks` in task listing".into()));
    };
    let mut tasks: BTreeMap<String, Task> = serde_json::from_value(entries.clone())
        .map_err(|e| SchedError::Payload(format!("task listing: {e}")))?;
    for (id, task) in tasks.iter_mut() {
        if task.id.is_empty() {
            task.id = id.clone();
        }
    }
    Ok(tasks)
}
