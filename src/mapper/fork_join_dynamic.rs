use super::{MapperContext, TaskMapper, TaskMapperRegistry};
use crate::model::{TaskInstance, TaskStatus, TaskType};
use chrono::Utc;

/// Dynamic fan-out: `dynamic_fork_tasks_param` names a key in the resolved
/// input holding an array of `{taskReferenceName, name, input}` descriptors,
/// one per branch, resolved entirely at runtime -- these branches have no
/// structural presence in the definition, so each is mapped as a single
/// USER_DEFINED task (no further nesting is supported for a dynamic branch).
pub struct ForkJoinDynamicMapper;

impl TaskMapper for ForkJoinDynamicMapper {
    fn map(&self, ctx: &MapperContext<'_>, _registry: &TaskMapperRegistry) -> Vec<TaskInstance> {
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

        let Some(param_key) = &ctx.workflow_task.dynamic_fork_tasks_param else {
            return out;
        };
        let Some(descriptors) = ctx.resolved_input.get(param_key).and_then(serde_json::Value::as_array) else {
            return out;
        };

        for descriptor in descriptors {
            let Some(ref_name) = descriptor.get("taskReferenceName").and_then(serde_json::Value::as_str) else {
                continue;
            };
            let name = descriptor
                .get("name")
                .and_then(serde_json::Value::as_str)
                .unwrap_or(ref_name)
                .to_string();
            let input = descriptor
                .get("input")
                .and_then(serde_json::Value::as_object)
                .cloned()
                .unwrap_or_default();

            out.push(TaskInstance {
                task_id: MapperContext::new_task_id(),
                task_reference_name: ref_name.to_string(),
                task_def_name: name,
                task_type: TaskType::UserDefined,
                status: TaskStatus::Scheduled,
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
            });
        }
        out
    }
}
