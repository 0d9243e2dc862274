//! Task instance (T): a concrete attempt at executing a WT.

use super::status::TaskStatus;
use super::workflow_def::TaskType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInstance {
    pub task_id: String,
    pub task_reference_name: String,
    pub task_def_name: String,
    pub task_type: TaskType,
    pub status: TaskStatus,

    #[serde(default)]
    pub input: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub output: serde_json::Map<String, serde_json::Value>,

    pub start_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,

    #[serde(default)]
    pub poll_count: u32,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub retried_task_id: Option<String>,

    #[serde(default)]
    pub start_delay_seconds: i64,
    #[serde(default)]
    pub callback_after_seconds: i64,

    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub reason_for_incompletion: Option<String>,

    /// Monotonic once true: predecessor has been superseded by either a
    /// retry or its successor in the graph (invariant 3, §3).
    #[serde(default)]
    pub executed: bool,
    /// True once a retry successor for this task has been produced
    /// (invariant 2, §3).
    #[serde(default)]
    pub retried: bool,

    #[serde(default)]
    pub external_input_path: Option<String>,
    #[serde(default)]
    pub external_output_path: Option<String>,
}

impl TaskInstance {
    #[must_use]
    pub fn is_system_task(&self) -> bool {
        self.task_type.is_system_task()
    }

    /// §4.D step 6: tasks whose predecessor has already been superseded.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.executed
    }

    #[must_use]
    pub fn has_children_flag(&self) -> bool {
        self.input
            .get("hasChildren")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}
