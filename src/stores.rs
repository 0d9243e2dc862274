//! Abstract store interfaces (§4.G). The metadata, execution, and index
//! stores are external collaborators (§1): this module defines the traits
//! the Decider and Execution Service read/write through, plus one
//! in-memory reference implementation of each, following the teacher's
//! `PersistenceProvider`/`InMemoryPersistence` split.

use crate::model::{TaskDefinition, TaskInstance, WorkflowDefinition, WorkflowInstance};
use async_trait::async_trait;
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("workflow not found: {workflow_id}"))]
    WorkflowNotFound { workflow_id: String },

    #[snafu(display("task not found: {task_id}"))]
    TaskNotFound { task_id: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Read-mostly: workflow/task definitions. May be cached by implementations
/// (§5) since it rarely changes underneath a running workflow.
#[async_trait]
pub trait MetadataStore: Send + Sync + std::fmt::Debug {
    async fn task_def(&self, name: &str) -> Option<TaskDefinition>;
    async fn workflow_def(&self, name: &str, version: u32) -> Option<WorkflowDefinition>;
}

/// Read-your-writes per workflow id (§5).
#[async_trait]
pub trait ExecutionStore: Send + Sync + std::fmt::Debug {
    async fn get_workflow(&self, workflow_id: &str) -> Result<WorkflowInstance>;
    async fn update_workflow(&self, workflow: &WorkflowInstance) -> Result<()>;
    async fn get_task(&self, task_id: &str) -> Result<TaskInstance>;
    async fn update_task(&self, task: &TaskInstance) -> Result<()>;

    /// Backs the Execution Service's per-task-def concurrency back-pressure
    /// check (§4.F): how many instances of `task_def_name` are currently
    /// IN_PROGRESS across all workflows.
    async fn tasks_in_progress_count(&self, task_def_name: &str) -> usize;

    /// §4.F "log": free-form worker-supplied debug lines appended to a task,
    /// surfaced back verbatim. Never interpreted by the Decider.
    async fn append_task_log(&self, task_id: &str, message: String);
    async fn task_logs(&self, task_id: &str) -> Vec<String>;
}

/// Thin passthrough surface for search/list (§4.F names these "not part of
/// the hard core"); no indexing logic lives in this crate.
#[async_trait]
pub trait IndexStore: Send + Sync + std::fmt::Debug {
    async fn index_task(&self, task: &TaskInstance);
    async fn index_workflow(&self, workflow: &WorkflowInstance);

    /// Substring match over indexed workflow ids/names, returning workflow
    /// ids -- the shape `Execution Service::search` hands back verbatim.
    async fn search(&self, query: &str) -> Vec<String>;
    /// Most-recently-indexed workflow ids first, capped at `limit`.
    async fn list_recent(&self, limit: usize) -> Vec<String>;
}

#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    task_defs: Mutex<HashMap<String, TaskDefinition>>,
    workflow_defs: Mutex<HashMap<(String, u32), WorkflowDefinition>>,
}

impl InMemoryMetadataStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_task_def(&self, def: TaskDefinition) {
        self.task_defs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(def.name.clone(), def);
    }

    pub fn put_workflow_def(&self, def: WorkflowDefinition) {
        self.workflow_defs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert((def.name.clone(), def.version), def);
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn task_def(&self, name: &str) -> Option<TaskDefinition> {
        self.task_defs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    async fn workflow_def(&self, name: &str, version: u32) -> Option<WorkflowDefinition> {
        self.workflow_defs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&(name.to_string(), version))
            .cloned()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    workflows: Mutex<HashMap<String, WorkflowInstance>>,
    tasks: Mutex<HashMap<String, TaskInstance>>,
    task_logs: Mutex<HashMap<String, Vec<String>>>,
}

impl InMemoryExecutionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn get_workflow(&self, workflow_id: &str) -> Result<WorkflowInstance> {
        self.workflows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(workflow_id)
            .cloned()
            .context(WorkflowNotFoundSnafu { workflow_id })
    }

    async fn update_workflow(&self, workflow: &WorkflowInstance) -> Result<()> {
        self.workflows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(workflow.workflow_id.clone(), workflow.clone());
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<TaskInstance> {
        self.tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(task_id)
            .cloned()
            .context(TaskNotFoundSnafu { task_id })
    }

    async fn update_task(&self, task: &TaskInstance) -> Result<()> {
        self.tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    async fn tasks_in_progress_count(&self, task_def_name: &str) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .filter(|t| {
                t.task_def_name == task_def_name
                    && t.status == crate::model::TaskStatus::InProgress
            })
            .count()
    }

    async fn append_task_log(&self, task_id: &str, message: String) {
        self.task_logs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(task_id.to_string())
            .or_default()
            .push(message);
    }

    async fn task_logs(&self, task_id: &str) -> Vec<String> {
        self.task_logs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(task_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryIndexStore {
    /// Insertion-ordered `(workflow_id, workflow_name)`; re-indexing a known
    /// id moves it to the back so `list_recent` reflects last-touched order.
    workflows: Mutex<Vec<(String, String)>>,
}

impl InMemoryIndexStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IndexStore for InMemoryIndexStore {
    async fn index_task(&self, _task: &TaskInstance) {}

    async fn index_workflow(&self, workflow: &WorkflowInstance) {
        let mut entries = self.workflows.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.retain(|(id, _)| id != &workflow.workflow_id);
        entries.push((workflow.workflow_id.clone(), workflow.workflow_name.clone()));
    }

    async fn search(&self, query: &str) -> Vec<String> {
        let query = query.to_lowercase();
        self.workflows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|(id, name)| id.to_lowercase().contains(&query) || name.to_lowercase().contains(&query))
            .map(|(id, _)| id.clone())
            .collect()
    }

    async fn list_recent(&self, limit: usize) -> Vec<String> {
        self.workflows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .rev()
            .take(limit)
            .map(|(id, _)| id.clone())
            .collect()
    }
}
