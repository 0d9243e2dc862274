//! Parameter Resolver (4.B): turns an input-parameter expression map into a
//! concrete input map by evaluating each value against workflow + task
//! context. V1 does shallow dotted-path substitution (schema version 1);
//! V2 recursively evaluates jq expressions (schema version >= 2). Both are
//! referentially transparent: an unresolved path yields `null`, never an
//! error, matching 4.B's contract.

use crate::model::{TaskInstance, WorkflowInstance};
use indexmap::IndexMap;
use serde_json::Value;

/// Builds the evaluation context every resolver variant reads from:
/// `workflow.input`/`workflow.output`, and `<refName>.input`/`<refName>.output`
/// for every task currently recorded on the instance.
#[must_use]
pub fn build_context(workflow: &WorkflowInstance) -> Value {
    let mut root = serde_json::Map::new();
    root.insert(
        "workflow".to_string(),
        serde_json::json!({
            "input": Value::Object(workflow.input.clone()),
            "output": Value::Object(workflow.output.clone()),
        }),
    );
    for task in &workflow.tasks {
        root.insert(
            task.task_reference_name.clone(),
            serde_json::json!({
                "input": Value::Object(task.input.clone()),
                "output": Value::Object(task.output.clone()),
            }),
        );
    }
    Value::Object(root)
}

/// Same as [`build_context`] but overlays one task's in-flight output before
/// the task itself has been appended to `workflow.tasks` -- used by retry
/// production (4.D.iii) when resolving the V2 input for a brand-new retry
/// instance that the workflow snapshot doesn't know about yet.
#[must_use]
pub fn build_context_with_overlay(workflow: &WorkflowInstance, overlay: &TaskInstance) -> Value {
    let mut ctx = build_context(workflow);
    if let Value::Object(root) = &mut ctx {
        root.insert(
            overlay.task_reference_name.clone(),
            serde_json::json!({
                "input": Value::Object(overlay.input.clone()),
                "output": Value::Object(overlay.output.clone()),
            }),
        );
    }
    ctx
}

pub trait ParameterResolver {
    /// Resolve `expr_map` against `context` (as built by [`build_context`]).
    fn resolve(
        &self,
        expr_map: &IndexMap<String, Value>,
        context: &Value,
    ) -> serde_json::Map<String, Value>;
}

/// Schema version 1: shallow substitution. A string value that looks like a
/// dotted path (`workflow.input.foo`, `someTask.output.bar`) is traversed
/// one level at a time; anything else -- including nested objects/arrays --
/// passes through unevaluated.
pub struct V1Resolver;

impl V1Resolver {
    fn looks_like_path(s: &str) -> bool {
        !s.is_empty()
            && s.split('.').all(|seg| {
                !seg.is_empty()
                    && seg
                        .chars()
                        .next()
                        .map(|c| c.is_alphabetic() || c == '_')
                        .unwrap_or(false)
                    && seg.chars().all(|c| c.is_alphanumeric() || c == '_')
            })
            && s.contains('.')
    }

    fn traverse(path: &str, context: &Value) -> Value {
        let mut cur = context;
        for segment in path.split('.') {
            match cur.get(segment) {
                Some(v) => cur = v,
                None => return Value::Null,
            }
        }
        cur.clone()
    }
}

impl ParameterResolver for V1Resolver {
    fn resolve(
        &self,
        expr_map: &IndexMap<String, Value>,
        context: &Value,
    ) -> serde_json::Map<String, Value> {
        let mut out = serde_json::Map::new();
        for (key, value) in expr_map {
            let resolved = match value {
                Value::String(s) if Self::looks_like_path(s) => Self::traverse(s, context),
                other => other.clone(),
            };
            out.insert(key.clone(), resolved);
        }
        out
    }
}

/// Schema version >= 2: full nested/jq-expression resolution via
/// [`crate::expressions`].
pub struct V2Resolver;

impl ParameterResolver for V2Resolver {
    fn resolve(
        &self,
        expr_map: &IndexMap<String, Value>,
        context: &Value,
    ) -> serde_json::Map<String, Value> {
        let mut out = serde_json::Map::new();
        for (key, value) in expr_map {
            out.insert(
                key.clone(),
                crate::expressions::evaluate_value_null_safe(value, context),
            );
        }
        out
    }
}

/// Picks V1 or V2 by schema version, per 4.B.
#[must_use]
pub fn resolver_for_schema_version(schema_version: u32) -> Box<dyn ParameterResolver + Send + Sync> {
    if schema_version >= 2 {
        Box::new(V2Resolver)
    } else {
        Box::new(V1Resolver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TaskStatus, TaskType};
    use chrono::Utc;
    use serde_json::json;

    fn workflow_with_task() -> WorkflowInstance {
        let mut wf = WorkflowInstance::new(
            "wf".into(),
            1,
            serde_json::Map::from_iter([("greeting".to_string(), json!("hi"))]),
        );
        wf.tasks.push(TaskInstance {
            task_id: "t1".into(),
            task_reference_name: "a".into(),
            task_def_name: "a".into(),
            task_type: TaskType::UserDefined,
            status: TaskStatus::Completed,
            input: serde_json::Map::new(),
            output: serde_json::Map::from_iter([("result".to_string(), json!(42))]),
            start_time: Utc::now(),
            update_time: Utc::now(),
            poll_count: 1,
            retry_count: 0,
            retried_task_id: None,
            start_delay_seconds: 0,
            callback_after_seconds: 0,
            worker_id: None,
            reason_for_incompletion: None,
            executed: true,
            retried: false,
            external_input_path: None,
            external_output_path: None,
        });
        wf
    }

    #[test]
    fn v1_resolves_dotted_path() {
        let wf = workflow_with_task();
        let ctx = build_context(&wf);
        let mut expr = IndexMap::new();
        expr.insert("x".to_string(), json!("a.output.result"));
        expr.insert("y".to_string(), json!("literal value"));
        let resolved = V1Resolver.resolve(&expr, &ctx);
        assert_eq!(resolved.get("x"), Some(&json!(42)));
        assert_eq!(resolved.get("y"), Some(&json!("literal value")));
    }

    #[test]
    fn v1_unresolved_path_is_null_not_error() {
        let wf = workflow_with_task();
        let ctx = build_context(&wf);
        let mut expr = IndexMap::new();
        expr.insert("x".to_string(), json!("a.output.missing"));
        let resolved = V1Resolver.resolve(&expr, &ctx);
        assert_eq!(resolved.get("x"), Some(&Value::Null));
    }

    #[test]
    fn v2_resolves_nested_jq_expressions() {
        let wf = workflow_with_task();
        let ctx = build_context(&wf);
        let mut expr = IndexMap::new();
        expr.insert(
            "nested".to_string(),
            json!({"doubled": "${ .a.output.result * 2 }"}),
        );
        let resolved = V2Resolver.resolve(&expr, &ctx);
        assert_eq!(resolved.get("nested"), Some(&json!({"doubled": 84})));
    }

    #[test]
    fn resolver_for_schema_version_picks_variant() {
        let wf = workflow_with_task();
        let ctx = build_context(&wf);
        let mut expr = IndexMap::new();
        expr.insert("x".to_string(), json!("workflow.input.greeting"));
        let v1 = resolver_for_schema_version(1).resolve(&expr, &ctx);
        assert_eq!(v1.get("x"), Some(&json!("hi")));
    }
}
