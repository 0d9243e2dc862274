//! checkForCompletion (4.D.iv) and JOIN arrival (the "N branches, 1
//! continuation" rendezvous fork/join needs -- §9 open question on
//! fork/join ordering; see DESIGN.md for the decision taken here).

use crate::decider::successor;
use crate::model::{TaskInstance, TaskStatus, WorkflowDefinition, WorkflowInstance};
use chrono::Utc;
use std::collections::HashMap;

/// The most recent attempt recorded for each ref name -- retries append a
/// new `T'` with the same ref name, so "current status of this WT" means
/// the last entry, not the first.
fn latest_by_ref(workflow: &WorkflowInstance) -> HashMap<String, &TaskInstance> {
    let mut out = HashMap::new();
    for t in &workflow.tasks {
        out.insert(t.task_reference_name.clone(), t);
    }
    out
}

pub enum JoinResult {
    /// Not all `joinOn` predecessors are terminal yet.
    Pending,
    /// All predecessors terminal and successful; `output` should be merged
    /// onto the join task under each predecessor's own ref name.
    Completed { output: serde_json::Map<String, serde_json::Value> },
    /// At least one predecessor is terminal but unsuccessful: the join (and
    /// by extension the workflow, §4.D.iii precondition excludes system
    /// tasks from retry) fails with this reason.
    Failed { reason: String },
}

/// Evaluate whether `join_task` (identified by its `joinOn` input, set at
/// mapping time by [`crate::mapper`]'s join mapper) can transition.
#[must_use]
pub fn evaluate_join(workflow: &WorkflowInstance, join_task: &TaskInstance) -> JoinResult {
    let latest = latest_by_ref(workflow);
    let join_on = join_task
        .input
        .get("joinOn")
        .and_then(serde_json::Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut output = serde_json::Map::new();
    for ref_value in &join_on {
        let Some(ref_name) = ref_value.as_str() else {
            continue;
        };
        match latest.get(ref_name) {
            None => return JoinResult::Pending,
            Some(t) if !t.status.is_terminal() => return JoinResult::Pending,
            Some(t) if !t.status.is_successful() => {
                return JoinResult::Failed {
                    reason: format!("join predecessor '{ref_name}' did not complete successfully"),
                };
            }
            Some(t) => {
                output.insert(ref_name.to_string(), serde_json::Value::Object(t.output.clone()));
            }
        }
    }
    JoinResult::Completed { output }
}

/// Apply an [`evaluate_join`] verdict to the join task in place. Returns
/// `true` if the task transitioned (caller should then run the usual
/// executed/getNextTask handling on it).
pub fn try_complete_join(join_task: &mut TaskInstance, result: JoinResult) -> Option<String> {
    match result {
        JoinResult::Pending => None,
        JoinResult::Completed { output } => {
            join_task.status = TaskStatus::Completed;
            join_task.output = output;
            join_task.update_time = Utc::now();
            None
        }
        JoinResult::Failed { reason } => {
            join_task.status = TaskStatus::Failed;
            join_task.reason_for_incompletion = Some(reason.clone());
            join_task.update_time = Utc::now();
            Some(reason)
        }
    }
}

/// 4.D.iv: the workflow is complete when every recorded task is terminal,
/// every WT the definition names has a successful (or optional-terminal)
/// recorded status, and no recorded task has a pending successor that
/// hasn't been scheduled yet.
#[must_use]
pub fn check_for_completion(wd: &WorkflowDefinition, workflow: &WorkflowInstance) -> bool {
    if workflow.tasks.is_empty() {
        return false;
    }

    let latest = latest_by_ref(workflow);
    let successors = successor::build(wd);

    for wt in wd.flatten() {
        if let Some(t) = latest.get(&wt.task_reference_name) {
            let ok = t.status.is_terminal() && (t.status.is_successful() || wt.optional);
            if !ok {
                return false;
            }
        }
    }

    for t in latest.values() {
        if !t.status.is_terminal() {
            return false;
        }
    }

    for t in &workflow.tasks {
        if let Some(next_ref) = successor::next_schedulable_ref(&successors, workflow, &t.task_reference_name) {
            if !latest.contains_key(&next_ref) {
                return false;
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskType;
    use serde_json::json;

    fn task(ref_name: &str, status: TaskStatus) -> TaskInstance {
        let now = Utc::now();
        TaskInstance {
            task_id: format!("{ref_name}-1"),
            task_reference_name: ref_name.to_string(),
            task_def_name: ref_name.to_string(),
            task_type: TaskType::UserDefined,
            status,
            input: serde_json::Map::new(),
            output: serde_json::Map::from_iter([("v".to_string(), json!(1))]),
            start_time: now,
            update_time: now,
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
        }
    }

    #[test]
    fn join_pending_until_all_branches_terminal() {
        let mut wf = WorkflowInstance::new("wf".into(), 1, serde_json::Map::new());
        wf.tasks.push(task("b1", TaskStatus::Completed));
        wf.tasks.push(task("b2", TaskStatus::InProgress));
        let mut join = task("join1", TaskStatus::InProgress);
        join.input.insert("joinOn".to_string(), json!(["b1", "b2"]));
        assert!(matches!(evaluate_join(&wf, &join), JoinResult::Pending));
    }

    #[test]
    fn join_completes_and_merges_branch_outputs() {
        let mut wf = WorkflowInstance::new("wf".into(), 1, serde_json::Map::new());
        wf.tasks.push(task("b1", TaskStatus::Completed));
        wf.tasks.push(task("b2", TaskStatus::Completed));
        let mut join = task("join1", TaskStatus::InProgress);
        join.input.insert("joinOn".to_string(), json!(["b1", "b2"]));
        let result = evaluate_join(&wf, &join);
        let reason = try_complete_join(&mut join, result);
        assert!(reason.is_none());
        assert_eq!(join.status, TaskStatus::Completed);
        assert_eq!(join.output.get("b1"), Some(&json!({"v": 1})));
    }

    #[test]
    fn check_for_completion_false_while_task_unrecorded() {
        use indexmap::IndexMap;
        use crate::model::WorkflowTask;
        let wt = WorkflowTask {
            task_reference_name: "a".into(),
            task_type: TaskType::UserDefined,
            name: Some("a".into()),
            input_parameters: IndexMap::new(),
            optional: false,
            join_on: vec![],
            decision_cases: IndexMap::new(),
            default_case: vec![],
            case_expression: None,
            fork_tasks: vec![],
            dynamic_fork_tasks_param: None,
            sub_workflow_name: None,
            sub_workflow_version: None,
        };
        let wd = WorkflowDefinition {
            name: "wf".into(),
            version: 1,
            schema_version: 2,
            tasks: vec![wt],
            output_parameters: IndexMap::new(),
        };
        let wf = WorkflowInstance::new("wf".into(), 1, serde_json::Map::new());
        assert!(!check_for_completion(&wd, &wf));
    }
}
