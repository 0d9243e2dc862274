use super::{MapperContext, TaskMapper, TaskMapperRegistry};
use crate::model::{TaskInstance, TaskStatus};
use chrono::Utc;
use serde_json::json;

/// JOIN is seeded exactly once, the first time `getNextTask` walks forward
/// from a now-terminal FORK marker and lands on this template -- not by the
/// fork mapper itself. It never re-maps itself past that point; its
/// transition to a terminal status is owned by the decider's per-cycle join
/// check (`decider::completion::try_complete_join`), which reads `joinOn`
/// back out of this instance's input.
pub struct JoinMapper;

impl TaskMapper for JoinMapper {
    fn map(&self, ctx: &MapperContext<'_>, _registry: &TaskMapperRegistry) -> Vec<TaskInstance> {
        let now = Utc::now();
        let mut input = ctx.resolved_input.clone();
        input.insert(
            "joinOn".to_string(),
            json!(ctx.workflow_task.join_on.clone()),
        );
        vec![TaskInstance {
            task_id: MapperContext::new_task_id(),
            task_reference_name: ctx.workflow_task.task_reference_name.clone(),
            task_def_name: ctx.task_def_name(),
            task_type: ctx.workflow_task.task_type,
            status: TaskStatus::InProgress,
            input,
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
        }]
    }
}
