use super::{MapperContext, TaskMapper, TaskMapperRegistry};
use crate::model::{TaskInstance, TaskStatus};
use chrono::Utc;

/// Static FORK_JOIN: the fork itself does no work and completes the instant
/// it is scheduled; its only job is fanning out one head task per branch.
/// The matching JOIN is reached the ordinary way -- once the fork marker is
/// terminal, `getNextTask` walks to the JOIN template that follows it at the
/// same nesting level (see `WorkflowDefinition`'s successor map).
pub struct ForkMapper;

impl TaskMapper for ForkMapper {
    fn map(&self, ctx: &MapperContext<'_>, registry: &TaskMapperRegistry) -> Vec<TaskInstance> {
        let now = Utc::now();
        let mut out = vec![TaskInstance {
            task_id: MapperContext::new_task_id(),
            task_reference_name: ctx.workflow_task.task_reference_name.clone(),
            task_def_name: ctx.task_def_name(),
            task_type: ctx.workflow_task.task_type,
            status: TaskStatus::Completed,
            input: ctx.resolved_input.clone(),
            output: serde_json::Map::new(),
            start_time: now,
            update_time: now,
            poll_count: 0,
            retry_count: 0,
            retried_task_id: None,
            start_delay_seconds: 0,
            callback_after_seconds: 0,
            worker_id: None,
            reason_for_incompletion: None,
            executed: false,
            retried: false,
            external_input_path: None,
            external_output_path: None,
        }];

        for branch in &ctx.workflow_task.fork_tasks {
            if let Some(head) = branch.first() {
                let child_ctx = ctx.child(head, None);
                out.extend(registry.map(&child_ctx));
            }
        }
        out
    }
}
