#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! End-to-end scenarios driven entirely through `decider::decide`, the way
//! a dispatcher loop would call it: seed a workflow, feed back whatever
//! status a "worker" reports, call `decide` again, repeat.

use deciderflow::decider::decide;
use deciderflow::mapper::TaskMapperRegistry;
use deciderflow::model::{
    RetryLogic, TaskDefinition, TaskStatus, TaskType, TimeoutPolicy, WorkflowDefinition, WorkflowInstance,
    WorkflowStatus, WorkflowTask,
};
use indexmap::IndexMap;
use serde_json::json;

fn simple_task(ref_name: &str) -> WorkflowTask {
    WorkflowTask {
        task_reference_name: ref_name.to_string(),
        task_type: TaskType::UserDefined,
        name: Some(ref_name.to_string()),
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
    }
}

fn unlimited_def(name: &str) -> TaskDefinition {
    TaskDefinition {
        name: name.to_string(),
        retry_count: 3,
        retry_delay_seconds: 0,
        retry_logic: RetryLogic::Fixed,
        timeout_seconds: 0,
        timeout_policy: TimeoutPolicy::AlertOnly,
        response_timeout_seconds: 0,
        concurrency_limit: None,
    }
}

fn complete(task: &mut deciderflow::model::TaskInstance) {
    task.status = TaskStatus::Completed;
    task.output = serde_json::Map::from_iter([("ok".to_string(), json!(true))]);
}

#[test]
fn s1_linear_workflow_runs_to_completion() {
    let wd = WorkflowDefinition {
        name: "linear".into(),
        version: 1,
        schema_version: 2,
        tasks: vec![simple_task("a"), simple_task("b"), simple_task("c")],
        output_parameters: IndexMap::new(),
    };
    let lookup = |name: &str| Some(unlimited_def(name));
    let registry = TaskMapperRegistry::new();
    let not_queued = |_: &str| false;
    let mut w = WorkflowInstance::new("linear".into(), 1, serde_json::Map::new());

    for expected_ref in ["a", "b", "c"] {
        let outcome = decide(&wd, &w, &registry, &lookup, &not_queued);
        w = outcome.workflow;
        assert_eq!(w.tasks.last().unwrap().task_reference_name, expected_ref);
        complete(w.tasks.last_mut().unwrap());
    }
    let finished = decide(&wd, &w, &registry, &lookup, &not_queued);
    assert_eq!(finished.workflow.status, WorkflowStatus::Completed);
    assert_eq!(finished.workflow.tasks.len(), 3);
}

#[test]
fn s2_failed_task_retries_then_succeeds() {
    let wd = WorkflowDefinition {
        name: "retryable".into(),
        version: 1,
        schema_version: 2,
        tasks: vec![simple_task("a")],
        output_parameters: IndexMap::new(),
    };
    let lookup = |name: &str| Some(unlimited_def(name));
    let registry = TaskMapperRegistry::new();
    let not_queued = |_: &str| false;
    let mut w = WorkflowInstance::new("retryable".into(), 1, serde_json::Map::new());

    let started = decide(&wd, &w, &registry, &lookup, &not_queued);
    w = started.workflow;
    w.tasks[0].status = TaskStatus::Failed;

    let retried = decide(&wd, &w, &registry, &lookup, &not_queued);
    assert_eq!(retried.newly_scheduled.len(), 1, "one retry attempt should be produced");
    assert_eq!(retried.newly_scheduled[0].retry_count, 1);
    assert_eq!(retried.newly_scheduled[0].retried_task_id, Some(w.tasks[0].task_id.clone()));
    w = retried.workflow;

    let retry_idx = w.tasks.iter().position(|t| t.retry_count == 1).unwrap();
    complete(&mut w.tasks[retry_idx]);

    let finished = decide(&wd, &w, &registry, &lookup, &not_queued);
    assert_eq!(finished.workflow.status, WorkflowStatus::Completed);
}

#[test]
fn s3_decision_routes_to_matching_case_only() {
    let mut decision = simple_task("route");
    decision.task_type = TaskType::Decision;
    decision.case_expression = Some("${ .workflow.input.kind }".into());
    let mut cases = IndexMap::new();
    cases.insert("fast".to_string(), vec![simple_task("fast_path")]);
    cases.insert("slow".to_string(), vec![simple_task("slow_path")]);
    decision.decision_cases = cases;

    let wd = WorkflowDefinition {
        name: "routed".into(),
        version: 1,
        schema_version: 2,
        tasks: vec![decision, simple_task("after")],
        output_parameters: IndexMap::new(),
    };
    let lookup = |name: &str| Some(unlimited_def(name));
    let registry = TaskMapperRegistry::new();
    let not_queued = |_: &str| false;
    let mut w = WorkflowInstance::new(
        "routed".into(),
        1,
        serde_json::Map::from_iter([("kind".to_string(), json!("fast"))]),
    );

    let started = decide(&wd, &w, &registry, &lookup, &not_queued);
    w = started.workflow;
    let ref_names: Vec<_> = w.tasks.iter().map(|t| t.task_reference_name.clone()).collect();
    assert!(ref_names.contains(&"route".to_string()));
    assert!(ref_names.contains(&"fast_path".to_string()));
    assert!(!ref_names.contains(&"slow_path".to_string()));

    let fast_idx = w.tasks.iter().position(|t| t.task_reference_name == "fast_path").unwrap();
    complete(&mut w.tasks[fast_idx]);

    let after = decide(&wd, &w, &registry, &lookup, &not_queued);
    assert_eq!(after.newly_scheduled.last().unwrap().task_reference_name, "after");
}

#[test]
fn s4_fork_join_waits_for_both_branches() {
    let mut fork = simple_task("split");
    fork.task_type = TaskType::ForkJoin;
    fork.fork_tasks = vec![vec![simple_task("b1")], vec![simple_task("b2")]];
    let mut join = simple_task("merge");
    join.task_type = TaskType::Join;
    join.join_on = vec!["b1".into(), "b2".into()];

    let wd = WorkflowDefinition {
        name: "forked".into(),
        version: 1,
        schema_version: 2,
        tasks: vec![fork, join, simple_task("after")],
        output_parameters: IndexMap::new(),
    };
    let lookup = |name: &str| Some(unlimited_def(name));
    let registry = TaskMapperRegistry::new();
    let not_queued = |_: &str| false;
    let mut w = WorkflowInstance::new("forked".into(), 1, serde_json::Map::new());

    let started = decide(&wd, &w, &registry, &lookup, &not_queued);
    w = started.workflow;
    let ref_names: Vec<_> = w.tasks.iter().map(|t| t.task_reference_name.clone()).collect();
    assert!(ref_names.contains(&"b1".to_string()));
    assert!(ref_names.contains(&"b2".to_string()));

    let b1 = w.tasks.iter().position(|t| t.task_reference_name == "b1").unwrap();
    complete(&mut w.tasks[b1]);
    let only_b1_done = decide(&wd, &w, &registry, &lookup, &not_queued);
    let merge_status = only_b1_done
        .workflow
        .task_by_ref_name("merge")
        .map(|t| t.status);
    assert_eq!(merge_status, Some(TaskStatus::InProgress), "join waits for both branches");
    w = only_b1_done.workflow;

    let b2 = w.tasks.iter().position(|t| t.task_reference_name == "b2").unwrap();
    complete(&mut w.tasks[b2]);
    let both_done = decide(&wd, &w, &registry, &lookup, &not_queued);
    assert_eq!(both_done.workflow.task_by_ref_name("merge").unwrap().status, TaskStatus::Completed);
    assert!(both_done.newly_scheduled.iter().any(|t| t.task_reference_name == "after"));
}

#[test]
fn s5_optional_task_failure_does_not_block_completion() {
    let mut optional = simple_task("maybe");
    optional.optional = true;
    let wd = WorkflowDefinition {
        name: "optional".into(),
        version: 1,
        schema_version: 2,
        tasks: vec![optional],
        output_parameters: IndexMap::new(),
    };
    let lookup = |name: &str| {
        let mut def = unlimited_def(name);
        def.retry_count = 0;
        Some(def)
    };
    let registry = TaskMapperRegistry::new();
    let not_queued = |_: &str| false;
    let mut w = WorkflowInstance::new("optional".into(), 1, serde_json::Map::new());

    let started = decide(&wd, &w, &registry, &lookup, &not_queued);
    w = started.workflow;
    w.tasks[0].status = TaskStatus::Failed;

    let finished = decide(&wd, &w, &registry, &lookup, &not_queued);
    assert_eq!(finished.workflow.status, WorkflowStatus::Completed);
}

#[test]
fn s6_non_optional_task_exhausting_retries_fails_the_workflow() {
    let wd = WorkflowDefinition {
        name: "doomed".into(),
        version: 1,
        schema_version: 2,
        tasks: vec![simple_task("a")],
        output_parameters: IndexMap::new(),
    };
    let lookup = |name: &str| {
        let mut def = unlimited_def(name);
        def.retry_count = 0;
        Some(def)
    };
    let registry = TaskMapperRegistry::new();
    let not_queued = |_: &str| false;
    let mut w = WorkflowInstance::new("doomed".into(), 1, serde_json::Map::new());

    let started = decide(&wd, &w, &registry, &lookup, &not_queued);
    w = started.workflow;
    w.tasks[0].status = TaskStatus::Failed;

    let finished = decide(&wd, &w, &registry, &lookup, &not_queued);
    assert_eq!(finished.workflow.status, WorkflowStatus::Failed);
    assert!(finished.workflow.reason_for_incompletion.is_some());
}

#[test]
fn response_timeout_is_suppressed_while_task_is_present_in_its_queue() {
    let wd = WorkflowDefinition {
        name: "silent-worker".into(),
        version: 1,
        schema_version: 2,
        tasks: vec![simple_task("a")],
        output_parameters: IndexMap::new(),
    };
    let lookup = |name: &str| {
        let mut def = unlimited_def(name);
        def.response_timeout_seconds = 1;
        Some(def)
    };
    let registry = TaskMapperRegistry::new();
    let mut w = WorkflowInstance::new("silent-worker".into(), 1, serde_json::Map::new());

    let not_queued = |_: &str| false;
    let started = decide(&wd, &w, &registry, &lookup, &not_queued);
    w = started.workflow;
    w.tasks[0].status = TaskStatus::InProgress;
    w.tasks[0].update_time = w.tasks[0].update_time - chrono::Duration::seconds(5);

    let still_in_queue = |_: &str| true;
    let suppressed = decide(&wd, &w, &registry, &lookup, &still_in_queue);
    assert_eq!(
        suppressed.workflow.tasks[0].status,
        TaskStatus::InProgress,
        "a task still sitting in its queue hasn't been delivered yet, so silence is expected"
    );

    let delivered = decide(&wd, &w, &registry, &lookup, &not_queued);
    assert_eq!(delivered.workflow.tasks[0].status, TaskStatus::TimedOut);
}

#[test]
fn ready_for_rerun_task_is_rescheduled_and_nothing_else_is_touched() {
    let wd = WorkflowDefinition {
        name: "reran".into(),
        version: 1,
        schema_version: 2,
        tasks: vec![simple_task("a"), simple_task("b")],
        output_parameters: IndexMap::new(),
    };
    let lookup = |name: &str| Some(unlimited_def(name));
    let registry = TaskMapperRegistry::new();
    let not_queued = |_: &str| false;

    let mut w = WorkflowInstance::new("reran".into(), 1, serde_json::Map::new());
    w.rerun_from_workflow_id = Some("prior-run-id".to_string());
    let now = chrono::Utc::now();
    w.tasks.push(deciderflow::model::TaskInstance {
        task_id: "a-original".into(),
        task_reference_name: "a".into(),
        task_def_name: "a".into(),
        task_type: TaskType::UserDefined,
        status: TaskStatus::ReadyForRerun,
        input: serde_json::Map::new(),
        output: serde_json::Map::new(),
        start_time: now,
        update_time: now,
        poll_count: 2,
        retry_count: 1,
        retried_task_id: None,
        start_delay_seconds: 0,
        callback_after_seconds: 0,
        worker_id: None,
        reason_for_incompletion: Some("prior attempt failed".into()),
        executed: false,
        retried: false,
        external_input_path: None,
        external_output_path: None,
    });

    let outcome = decide(&wd, &w, &registry, &lookup, &not_queued);
    assert_eq!(outcome.newly_scheduled.len(), 1, "only the rerun target is (re)scheduled");
    let rescheduled = &outcome.workflow.tasks[0];
    assert_eq!(rescheduled.task_reference_name, "a");
    assert_eq!(rescheduled.status, TaskStatus::Scheduled);
    assert!(rescheduled.retried);
    assert_eq!(rescheduled.retry_count, 0);
}
