use super::{MapperContext, TaskMapper, TaskMapperRegistry};
use crate::model::{TaskInstance, TaskStatus};
use chrono::Utc;

/// Produces the marker task that represents a nested workflow invocation.
/// Actually starting the child workflow instance is an Execution Service /
/// out-of-core-decider concern (§1 lists cross-workflow orchestration out of
/// scope beyond this single marker task).
pub struct SubWorkflowMapper;

impl TaskMapper for SubWorkflowMapper {
    fn map(&self, ctx: &MapperContext<'_>, _registry: &TaskMapperRegistry) -> Vec<TaskInstance> {
        let now = Utc::now();
        let task_def_name = ctx
            .workflow_task
            .sub_workflow_name
            .clone()
            .unwrap_or_else(|| ctx.task_def_name());
        vec![TaskInstance {
            task_id: MapperContext::new_task_id(),
            task_reference_name: ctx.workflow_task.task_reference_name.clone(),
            task_def_name,
            task_type: ctx.workflow_task.task_type,
            status: TaskStatus::Scheduled,
            input: ctx.resolved_input.clone(),
            output: serde_json::Map::new(),
            start_time: now,
            update_time: now,
            poll_count: 0,
            retry_count: ctx.retry_count,
            retried_task_id: ctx.retried_task_id.clone(),
            start_delay_seconds: 0,
            callback_after_seconds: 0,
            worker_id: None,
            reason_for_incompletion: None,
            executed: false,
            retried: false,
            external_input_path: None,
            external_output_path: None,
        }]
    }
}
