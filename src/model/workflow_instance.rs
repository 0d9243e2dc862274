//! Workflow instance (W): the mutable runtime record the Decider evaluates.

use super::status::WorkflowStatus;
use super::task_instance::TaskInstance;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub workflow_id: String,
    pub workflow_name: String,
    pub version: u32,
    pub status: WorkflowStatus,

    #[serde(default)]
    pub input: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub output: serde_json::Map<String, serde_json::Value>,

    #[serde(default)]
    pub rerun_from_workflow_id: Option<String>,
    #[serde(default)]
    pub reason_for_incompletion: Option<String>,

    #[serde(default)]
    pub tasks: Vec<TaskInstance>,

    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    #[serde(default)]
    pub external_input_path: Option<String>,
    #[serde(default)]
    pub external_output_path: Option<String>,
}

fn default_schema_version() -> u32 {
    1
}

impl WorkflowInstance {
    #[must_use]
    pub fn new(workflow_name: String, version: u32, input: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            workflow_id: uuid::Uuid::new_v4().to_string(),
            workflow_name,
            version,
            status: WorkflowStatus::Running,
            input,
            output: serde_json::Map::new(),
            rerun_from_workflow_id: None,
            reason_for_incompletion: None,
            tasks: Vec::new(),
            schema_version: 1,
            external_input_path: None,
            external_output_path: None,
        }
    }

    #[must_use]
    pub fn task_by_ref_name(&self, ref_name: &str) -> Option<&TaskInstance> {
        self.tasks.iter().find(|t| t.task_reference_name == ref_name)
    }

    #[must_use]
    pub fn task_by_id(&self, task_id: &str) -> Option<&TaskInstance> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn task_by_id_mut(&mut self, task_id: &str) -> Option<&mut TaskInstance> {
        self.tasks.iter_mut().find(|t| t.task_id == task_id)
    }
}
