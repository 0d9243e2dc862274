//! Execution Service (4.F): the worker-facing surface -- poll, ack, push a
//! completed/failed task back through the Decider, and requeue whatever a
//! crashed worker left unacked. Nothing here is itself "the algorithm" --
//! it is glue wiring the Queue Protocol (4.E), the stores (4.G), and the
//! Decider (4.D) together the way a real dispatcher loop would.

use crate::decider::{self, DeciderOutcome};
use crate::mapper::TaskMapperRegistry;
use crate::model::{TaskInstance, TaskStatus};
use crate::payload::{PayloadGateway, PayloadKind, PayloadStore, UploadOutcome};
use crate::queue::{queue_name, QueueProvider};
use crate::stores::{ExecutionStore, IndexStore, MetadataStore};
use chrono::{Duration as ChronoDuration, Utc};
use snafu::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info, warn};

/// Hard upper bound on a worker-supplied `poll` timeout (§4.F); unlike the
/// rest of the Execution Service's tuning knobs this isn't configurable.
const MAX_POLL_TIMEOUT_MS: u128 = 5000;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("workflow store error: {source}"))]
    Store { source: crate::stores::Error },

    #[snafu(display("payload gateway error: {source}"))]
    Payload { source: crate::payload::Error },

    #[snafu(display("workflow definition not found: {name} v{version}"))]
    DefinitionNotFound { name: String, version: u32 },

    #[snafu(display("task not found in workflow: {task_id}"))]
    TaskNotInWorkflow { task_id: String },

    #[snafu(display("invalid input: {message}"))]
    InvalidInput { message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<crate::stores::Error> for Error {
    fn from(source: crate::stores::Error) -> Self {
        Error::Store { source }
    }
}

impl From<crate::payload::Error> for Error {
    fn from(source: crate::payload::Error) -> Self {
        Error::Payload { source }
    }
}

pub struct ExecutionService<Q, E, M, I, P> {
    queue: Arc<Q>,
    execution_store: Arc<E>,
    metadata_store: Arc<M>,
    index_store: Arc<I>,
    registry: TaskMapperRegistry,
    payload_gateway: PayloadGateway<P>,
}

impl<Q, E, M, I, P> ExecutionService<Q, E, M, I, P>
where
    Q: QueueProvider,
    E: ExecutionStore,
    M: MetadataStore,
    I: IndexStore,
    P: PayloadStore,
{
    #[must_use]
    pub fn new(
        queue: Arc<Q>,
        execution_store: Arc<E>,
        metadata_store: Arc<M>,
        index_store: Arc<I>,
        payload_gateway: PayloadGateway<P>,
    ) -> Self {
        Self {
            queue,
            execution_store,
            metadata_store,
            index_store,
            registry: TaskMapperRegistry::new(),
            payload_gateway,
        }
    }

    /// Pop up to `count` task ids off `task_type`'s queue (suffixed by
    /// `domain` per §6), claim them for `worker_id`, and hand back the full
    /// instances. A popped task is unacked until [`Self::ack`] or the
    /// visibility timer expires and it becomes pollable again.
    pub async fn poll(
        &self,
        task_type: &str,
        domain: Option<&str>,
        count: usize,
        timeout: Duration,
        worker_id: &str,
    ) -> Result<Vec<TaskInstance>> {
        if timeout.as_millis() > MAX_POLL_TIMEOUT_MS {
            return InvalidInputSnafu {
                message: format!("poll timeoutMs {} exceeds the {MAX_POLL_TIMEOUT_MS}ms bound", timeout.as_millis()),
            }
            .fail();
        }

        let queue = queue_name(task_type, domain);
        let ids = self.queue.pop(&queue, count, timeout).await;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let Ok(mut task) = self.execution_store.get_task(&id).await else {
                warn!(task_id = %id, "polled task id has no execution record, dropping");
                continue;
            };

            if let Some(limit) = self.metadata_store.task_def(&task.task_def_name).await.and_then(|td| td.concurrency_limit) {
                let in_progress = self.execution_store.tasks_in_progress_count(&task.task_def_name).await;
                if u64::try_from(in_progress).unwrap_or(u64::MAX) >= u64::from(limit) {
                    self.queue.ack(&queue, &id).await;
                    continue;
                }
            }

            task.status = TaskStatus::InProgress;
            task.poll_count += 1;
            task.worker_id = Some(worker_id.to_string());
            task.update_time = Utc::now();
            self.execution_store.update_task(&task).await?;
            out.push(task);
        }
        Ok(out)
    }

    /// Acknowledge receipt of a polled task so it isn't requeued by its
    /// visibility timer.
    pub async fn ack(&self, task_type: &str, domain: Option<&str>, task_id: &str) -> bool {
        let queue = queue_name(task_type, domain);
        self.queue.ack(&queue, task_id).await
    }

    /// A worker reports a terminal (or in-progress, e.g. heartbeat) status
    /// for one task of `workflow_id`. Runs the Decider on the owning
    /// workflow and persists everything it produced, pushing freshly
    /// scheduled tasks onto their queues (§4.D + §4.E wired together).
    pub async fn update_task(&self, workflow_id: &str, task_update: TaskInstance) -> Result<DeciderOutcome> {
        let mut workflow = self.execution_store.get_workflow(workflow_id).await?;

        let slot = workflow
            .task_by_id_mut(&task_update.task_id)
            .context(TaskNotInWorkflowSnafu { task_id: task_update.task_id.clone() })?;
        *slot = task_update;

        let wd = self
            .metadata_store
            .workflow_def(&workflow.workflow_name, workflow.version)
            .await
            .context(DefinitionNotFoundSnafu {
                name: workflow.workflow_name.clone(),
                version: workflow.version,
            })?;

        let metadata_store = Arc::clone(&self.metadata_store);
        let mut def_cache = std::collections::HashMap::new();
        for t in &workflow.tasks {
            if !def_cache.contains_key(&t.task_def_name) {
                let def = metadata_store.task_def(&t.task_def_name).await;
                def_cache.insert(t.task_def_name.clone(), def);
            }
        }
        let lookup = move |name: &str| def_cache.get(name).cloned().flatten();

        // `decide` must stay synchronous, so queue presence (4.D.ii's
        // suppression of response-timeout) is resolved up front into a
        // snapshot rather than through a live async call inside the loop.
        let mut in_queue = HashSet::new();
        for t in &workflow.tasks {
            let queue = queue_name(&t.task_def_name, None);
            if self.queue.exists(&queue, &t.task_id).await {
                in_queue.insert(t.task_id.clone());
            }
        }
        let task_in_queue = move |task_id: &str| in_queue.contains(task_id);

        let mut outcome = decider::decide(&wd, &workflow, &self.registry, &lookup, &task_in_queue);

        // 4.D.iii: a freshly scheduled task's input is verified against the
        // externalization threshold before it ever reaches a queue.
        for t in &mut outcome.workflow.tasks {
            if t.external_input_path.is_none() && !t.input.is_empty() {
                if let UploadOutcome::Externalized { path } =
                    self.payload_gateway.verify_and_upload(&t.task_id, &t.input, PayloadKind::TaskInput).await?
                {
                    t.input.clear();
                    t.external_input_path = Some(path);
                }
            }
        }
        for t in &mut outcome.newly_scheduled {
            if let Some(stored) = outcome.workflow.task_by_id(&t.task_id) {
                t.input = stored.input.clone();
                t.external_input_path.clone_from(&stored.external_input_path);
            }
        }

        // 4.D.vii: a just-completed workflow's output goes through the same
        // gate before it's persisted.
        if outcome.workflow.status == crate::model::WorkflowStatus::Completed {
            if let UploadOutcome::Externalized { path } = self
                .payload_gateway
                .verify_and_upload(&outcome.workflow.workflow_id, &outcome.workflow.output, PayloadKind::WorkflowOutput)
                .await?
            {
                outcome.workflow.output.clear();
                outcome.workflow.external_output_path = Some(path);
            }
        }

        self.execution_store.update_workflow(&outcome.workflow).await?;
        self.index_store.index_workflow(&outcome.workflow).await;
        for t in &outcome.workflow.tasks {
            self.execution_store.update_task(t).await?;
            self.index_store.index_task(t).await;
        }
        for t in &outcome.newly_scheduled {
            let queue = queue_name(&t.task_def_name, None);
            self.queue
                .push_if_not_exists(&queue, &t.task_id, ChronoDuration::seconds(t.start_delay_seconds))
                .await;
        }
        info!(workflow_id = %outcome.workflow.workflow_id, status = ?outcome.workflow.status, "decision cycle applied");
        Ok(outcome)
    }

    /// Overload A (§4.F, the `requeuePendingTasks(taskType)` bump): remove
    /// `task` from its queue and reinsert it with its callback delay
    /// adjusted for time already spent waiting -- `callbackAfter -
    /// (now - updateTime)`, floored at zero, so a task that's been stale a
    /// while doesn't wait its full callback window again.
    pub async fn requeue_task(&self, task: &TaskInstance) {
        let queue = queue_name(&task.task_def_name, None);
        let elapsed_secs = (Utc::now() - task.update_time).num_seconds().max(0);
        let adjusted = (task.callback_after_seconds - elapsed_secs).max(0);
        self.queue.remove(&queue, &task.task_id).await;
        self.queue
            .push_if_not_exists(&queue, &task.task_id, ChronoDuration::seconds(adjusted))
            .await;
    }

    /// Overload B (§4.F): requeue every still-in-progress task belonging to
    /// `workflow_id` -- used after a crash-recovery sweep finds a workflow
    /// with unacked work nobody is actively polling.
    pub async fn requeue_pending_tasks(&self, workflow_id: &str) -> Result<usize> {
        let workflow = self.execution_store.get_workflow(workflow_id).await?;
        let mut requeued = 0;
        for task in &workflow.tasks {
            if task.status == TaskStatus::InProgress || task.status == TaskStatus::Scheduled {
                self.requeue_task(task).await;
                requeued += 1;
            }
        }
        if requeued > 0 {
            warn!(workflow_id, requeued, "requeued pending tasks");
        }
        Ok(requeued)
    }

    /// Thin passthrough (§4.F: "not part of the hard core") -- no query
    /// language lives in this crate, so this simply returns everything the
    /// execution store knows about the workflow.
    pub async fn get_workflow(&self, workflow_id: &str) -> Result<crate::model::WorkflowInstance> {
        Ok(self.execution_store.get_workflow(workflow_id).await?)
    }

    /// §4.F "search": thin passthrough to the index store.
    pub async fn search(&self, query: &str) -> Vec<String> {
        self.index_store.search(query).await
    }

    /// §4.F "list": thin passthrough to the index store.
    pub async fn list_recent(&self, limit: usize) -> Vec<String> {
        self.index_store.list_recent(limit).await
    }

    /// §4.F "log": a worker appends a free-form debug line to a task it
    /// holds. Never interpreted by the Decider.
    pub async fn log(&self, task_id: &str, message: impl Into<String>) {
        self.execution_store.append_task_log(task_id, message.into()).await;
    }

    /// §4.F "log" read side: everything a worker has logged for a task.
    pub async fn task_logs(&self, task_id: &str) -> Vec<String> {
        self.execution_store.task_logs(task_id).await
    }
}
