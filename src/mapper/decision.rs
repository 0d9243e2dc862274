use super::{MapperContext, TaskMapper, TaskMapperRegistry};
use crate::model::{TaskInstance, TaskStatus};
use chrono::Utc;
use serde_json::{json, Value};

/// DECISION: evaluate `case_expression` once, select a branch, and mark the
/// decision instance `hasChildren` so `getNextTask` (4.D.v) never re-walks
/// past it -- continuation after the branch is driven by its last task's own
/// successor, which the definition's successor map resolves to whatever
/// follows the whole DECISION construct.
pub struct DecisionMapper;

fn case_key(expression: &str, context: &Value) -> String {
    match crate::expressions::evaluate_value_null_safe(&json!(expression), context) {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl TaskMapper for DecisionMapper {
    fn map(&self, ctx: &MapperContext<'_>, registry: &TaskMapperRegistry) -> Vec<TaskInstance> {
        let now = Utc::now();
        let key = ctx
            .workflow_task
            .case_expression
            .as_deref()
            .map(|expr| case_key(expr, ctx.eval_context))
            .unwrap_or_default();

        let branch = ctx
            .workflow_task
            .decision_cases
            .get(&key)
            .or(Some(&ctx.workflow_task.default_case))
            .filter(|b| !b.is_empty());

        let mut input = ctx.resolved_input.clone();
        input.insert("hasChildren".to_string(), json!(branch.is_some()));
        input.insert("caseOutput".to_string(), json!(key));

        let mut out = vec![TaskInstance {
            task_id: MapperContext::new_task_id(),
            task_reference_name: ctx.workflow_task.task_reference_name.clone(),
            task_def_name: ctx.task_def_name(),
            task_type: ctx.workflow_task.task_type,
            status: TaskStatus::Completed,
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
        }];

        if let Some(head) = branch.and_then(|b| b.first()) {
            let child_ctx = ctx.child(head, None);
            out.extend(registry.map(&child_ctx));
        }
        out
    }
}
