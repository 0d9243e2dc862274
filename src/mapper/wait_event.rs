use super::{MapperContext, TaskMapper, TaskMapperRegistry};
use crate::model::{TaskInstance, TaskStatus};
use chrono::Utc;

fn base_instance(ctx: &MapperContext<'_>, status: TaskStatus, callback_after_seconds: i64) -> TaskInstance {
    let now = Utc::now();
    TaskInstance {
        task_id: MapperContext::new_task_id(),
        task_reference_name: ctx.workflow_task.task_reference_name.clone(),
        task_def_name: ctx.task_def_name(),
        task_type: ctx.workflow_task.task_type,
        status,
        input: ctx.resolved_input.clone(),
        output: serde_json::Map::new(),
        start_time: now,
        update_time: now,
        poll_count: 0,
        retry_count: ctx.retry_count,
        retried_task_id: ctx.retried_task_id.clone(),
        start_delay_seconds: 0,
        callback_after_seconds,
        worker_id: None,
        reason_for_incompletion: None,
        executed: false,
        retried: false,
        external_input_path: None,
        external_output_path: None,
    }
}

/// WAIT: no worker polls this type; it becomes due after `durationSeconds`
/// (resolved input) elapses, or is completed externally by signal. Modeled
/// as IN_PROGRESS with a callback delay rather than SCHEDULED since no queue
/// entry is ever pushed for it (out of the Execution Service's poll surface).
pub struct WaitMapper;

impl TaskMapper for WaitMapper {
    fn map(&self, ctx: &MapperContext<'_>, _registry: &TaskMapperRegistry) -> Vec<TaskInstance> {
        let duration = ctx
            .resolved_input
            .get("durationSeconds")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(0);
        vec![base_instance(ctx, TaskStatus::InProgress, duration)]
    }
}

/// EVENT: a passthrough marker for an external event-publish integration,
/// which is out of scope here -- mapped 1:1 like USER_DEFINED.
pub struct EventMapper;

impl TaskMapper for EventMapper {
    fn map(&self, ctx: &MapperContext<'_>, _registry: &TaskMapperRegistry) -> Vec<TaskInstance> {
        vec![base_instance(ctx, TaskStatus::Scheduled, 0)]
    }
}
