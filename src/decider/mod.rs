//! The Decider (4.D): a pure function from `(WD, W)` to a `DeciderOutcome`.
//! `decide` never mutates its inputs -- it clones the instance, applies the
//! full evaluation cycle to the clone, and hands back the result plus the
//! set of freshly materialized tasks the caller (Execution Service) still
//! needs to push onto queues.
//!
//! `idx` throughout this module indexes `w.tasks`, which only ever grows
//! within one `decide` call (`snapshot_len` is fixed per pass before any
//! push) -- every index handed around here stays in bounds by construction.
#![allow(clippy::indexing_slicing)]

mod completion;
mod retry;
mod successor;

use crate::mapper::{MapperContext, TaskMapperRegistry};
use crate::model::{
    TaskDefinition, TaskInstance, TaskStatus, TaskType, TimeoutPolicy, WorkflowDefinition, WorkflowInstance,
    WorkflowStatus,
};
use crate::resolver::{build_context, resolver_for_schema_version};
use chrono::{Duration as ChronoDuration, Utc};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct DeciderOutcome {
    pub workflow: WorkflowInstance,
    /// Tasks created this cycle that the caller must enqueue (§4.E); tasks
    /// that merely transitioned status (timeouts, retries, joins) are
    /// already reflected in `workflow.tasks` and need no queue action
    /// beyond what `newly_scheduled` lists.
    pub newly_scheduled: Vec<TaskInstance>,
}

/// Bounds the inner fixed-point loop (system tasks completing immediately
/// can cascade -- fork -> branch heads -> decision -> ... -- within one
/// decide() call); a real cycle converges in a handful of iterations.
const MAX_PASSES: usize = 64;

/// Run one decision cycle. `task_def_lookup` and `task_in_queue` are both
/// synchronous and side-effect free by contract -- callers resolve them from
/// an already-warmed cache/snapshot, not from a live store or queue round
/// trip, keeping `decide` itself pure (two calls against the same inputs
/// produce the same outcome).
#[must_use]
pub fn decide(
    wd: &WorkflowDefinition,
    workflow: &WorkflowInstance,
    registry: &TaskMapperRegistry,
    task_def_lookup: &dyn Fn(&str) -> Option<TaskDefinition>,
    task_in_queue: &dyn Fn(&str) -> bool,
) -> DeciderOutcome {
    let mut w = workflow.clone();
    let mut newly_scheduled = Vec::new();

    if w.status.is_terminal() {
        return DeciderOutcome { workflow: w, newly_scheduled };
    }

    if w.tasks.is_empty() {
        start_workflow(wd, &mut w, registry, task_def_lookup, &mut newly_scheduled);
        return DeciderOutcome { workflow: w, newly_scheduled };
    }

    if is_rerun_pending(&w) {
        if let Some(reason) = rerun_workflow(&mut w, &mut newly_scheduled) {
            w.status = WorkflowStatus::Failed;
            w.reason_for_incompletion = Some(reason);
        }
        return DeciderOutcome { workflow: w, newly_scheduled };
    }

    let successors = successor::build(wd);
    let mut terminate: Option<(WorkflowStatus, String)> = None;

    for _pass in 0..MAX_PASSES {
        if terminate.is_some() {
            break;
        }
        let mut changed = false;
        let snapshot_len = w.tasks.len();

        for idx in 0..snapshot_len {
            if w.tasks[idx].executed {
                continue;
            }

            apply_timeout_check(&mut w, idx, task_def_lookup, &mut changed, &mut terminate);
            if terminate.is_some() {
                break;
            }
            apply_response_timeout_check(&mut w, idx, task_def_lookup, task_in_queue, &mut changed);

            if w.tasks[idx].task_type == TaskType::Join && w.tasks[idx].status == TaskStatus::InProgress {
                let result = completion::evaluate_join(&w, &w.tasks[idx]);
                let fail_reason = completion::try_complete_join(&mut w.tasks[idx], result);
                if let Some(reason) = fail_reason {
                    terminate = Some((WorkflowStatus::Failed, reason));
                    break;
                }
                changed = true;
            }

            if w.tasks[idx].status.is_retriable() && !w.tasks[idx].retried {
                let retry_outcome = attempt_retry(wd, &mut w, idx, task_def_lookup, &mut newly_scheduled);
                if let Some(reason) = retry_outcome {
                    terminate = Some((WorkflowStatus::Failed, reason));
                    break;
                }
                changed = true;
            }

            let task_terminal_for_flow = {
                let t = &w.tasks[idx];
                let optional = wd
                    .task_by_ref_name(&t.task_reference_name)
                    .is_some_and(|wt| wt.optional);
                t.status.is_terminal() && (t.status.is_successful() || optional)
            };

            if task_terminal_for_flow && !w.tasks[idx].executed {
                w.tasks[idx].executed = true;
                changed = true;
                advance(wd, &mut w, idx, &successors, registry, task_def_lookup, &mut newly_scheduled);
            }
        }

        if !changed {
            break;
        }
    }

    if let Some((status, reason)) = terminate {
        w.status = status;
        w.reason_for_incompletion = Some(reason);
    } else if completion::check_for_completion(wd, &w) {
        complete_workflow(wd, &mut w);
    }

    DeciderOutcome { workflow: w, newly_scheduled }
}

/// 4.D.vi: seed the first top-level WT. An empty definition can never
/// complete (§4.D.iv needs at least one recorded task to reason about), so
/// it terminates the workflow immediately rather than leaving it stuck.
fn start_workflow(
    wd: &WorkflowDefinition,
    w: &mut WorkflowInstance,
    registry: &TaskMapperRegistry,
    task_def_lookup: &dyn Fn(&str) -> Option<TaskDefinition>,
    newly_scheduled: &mut Vec<TaskInstance>,
) {
    let Some(first) = wd.tasks.first() else {
        w.status = WorkflowStatus::Failed;
        w.reason_for_incompletion = Some("workflow definition has no tasks".to_string());
        return;
    };
    map_and_append(wd, w, first, registry, task_def_lookup, newly_scheduled);
}

/// 4.D.vi rerun branch: `W` carries a `rerunFromWorkflowId` and its task
/// list consists entirely of SKIPPED bookkeeping plus exactly one
/// READY_FOR_RERUN target -- nothing else is pending. `is_rerun_pending`
/// gates this so it fires exactly once: reactivating the target task moves
/// it out of READY_FOR_RERUN, so the condition no longer holds on the next
/// `decide` call.
fn is_rerun_pending(w: &WorkflowInstance) -> bool {
    w.rerun_from_workflow_id.is_some()
        && !w.tasks.is_empty()
        && w.tasks
            .iter()
            .all(|t| matches!(t.status, TaskStatus::ReadyForRerun | TaskStatus::Skipped))
        && w.tasks.iter().any(|t| t.status == TaskStatus::ReadyForRerun)
}

/// Reactivate the READY_FOR_RERUN task in place: SCHEDULED, `retried`
/// cleared, `retryCount` reset, returned alone as the sole newly-scheduled
/// task. Returns a termination reason if no such task is found.
fn rerun_workflow(w: &mut WorkflowInstance, newly_scheduled: &mut Vec<TaskInstance>) -> Option<String> {
    let Some(t) = w.tasks.iter_mut().find(|t| t.status == TaskStatus::ReadyForRerun) else {
        return Some("rerun requested but no task is READY_FOR_RERUN".to_string());
    };
    t.status = TaskStatus::Scheduled;
    t.retried = true;
    t.retry_count = 0;
    t.update_time = Utc::now();
    newly_scheduled.push(t.clone());
    None
}

fn resolved_input_for(w: &WorkflowInstance, wt: &crate::model::WorkflowTask) -> serde_json::Map<String, serde_json::Value> {
    let resolver = resolver_for_schema_version(w.schema_version);
    let ctx = build_context(w);
    resolver.resolve(&wt.input_parameters, &ctx)
}

fn map_and_append(
    wd: &WorkflowDefinition,
    w: &mut WorkflowInstance,
    wt: &crate::model::WorkflowTask,
    registry: &TaskMapperRegistry,
    task_def_lookup: &dyn Fn(&str) -> Option<TaskDefinition>,
    newly_scheduled: &mut Vec<TaskInstance>,
) {
    let resolved_input = resolved_input_for(w, wt);
    let resolver = resolver_for_schema_version(w.schema_version);
    let eval_context = build_context(w);
    let task_def_name = wt.name.as_deref().unwrap_or(&wt.task_reference_name);
    let task_def = task_def_lookup(task_def_name);

    let mapper_ctx = MapperContext {
        workflow_def: wd,
        workflow: w,
        task_def: task_def.as_ref(),
        workflow_task: wt,
        resolved_input,
        retry_count: 0,
        retried_task_id: None,
        resolver: resolver.as_ref(),
        eval_context: &eval_context,
    };
    let produced = registry.map(&mapper_ctx);
    for t in produced {
        newly_scheduled.push(t.clone());
        w.tasks.push(t);
    }
}

/// 4.D.v: find where flow continues from a just-completed task and map it.
/// A DECISION that already chose a branch (`hasChildren` set at mapping
/// time) never re-walks -- its children were already appended when it was
/// mapped.
fn advance(
    wd: &WorkflowDefinition,
    w: &mut WorkflowInstance,
    completed_idx: usize,
    successors: &std::collections::HashMap<String, Option<String>>,
    registry: &TaskMapperRegistry,
    task_def_lookup: &dyn Fn(&str) -> Option<TaskDefinition>,
    newly_scheduled: &mut Vec<TaskInstance>,
) {
    let completed = &w.tasks[completed_idx];
    if completed.task_type == TaskType::Decision && completed.has_children_flag() {
        return;
    }
    let ref_name = completed.task_reference_name.clone();

    let Some(next_ref) = successor::next_schedulable_ref(successors, w, &ref_name) else {
        return;
    };
    let Some(next_wt) = wd.task_by_ref_name(&next_ref) else {
        return;
    };
    // A JOIN is seeded once, at fork time, and never re-mapped here even if
    // getNextTask happens to land on it (it always does, right after the
    // fork marker completes): skip if it already has a recorded attempt.
    if next_wt.task_type == TaskType::Join && w.task_by_ref_name(&next_ref).is_some() {
        return;
    }
    let next_wt = next_wt.clone();
    map_and_append(wd, w, &next_wt, registry, task_def_lookup, newly_scheduled);
}

/// 4.D.i: a task stuck IN_PROGRESS past its task-def's `timeout_seconds`,
/// measured from `start_time + start_delay_seconds` (so a retried task's
/// clock starts at its own backoff-adjusted origin, not whenever it was last
/// touched) times out. SCHEDULED tasks are never subject to this check --
/// only a task a worker has actually picked up can time out this way.
/// `timeout_policy` governs the blast radius: ALERT_ONLY only logs (no state
/// mutation), RETRY flags TIMED_OUT so the next pass's retry check picks it
/// up, TIME_OUT_WORKFLOW additionally escalates to terminating `W`.
fn apply_timeout_check(
    w: &mut WorkflowInstance,
    idx: usize,
    task_def_lookup: &dyn Fn(&str) -> Option<TaskDefinition>,
    changed: &mut bool,
    terminate: &mut Option<(WorkflowStatus, String)>,
) {
    let ref_name = w.tasks[idx].task_reference_name.clone();
    let Some(task_def) = task_def_lookup(&w.tasks[idx].task_def_name) else {
        warn!(task_ref = %ref_name, "no task definition found, skipping timeout check");
        return;
    };
    let status = w.tasks[idx].status;
    if status.is_terminal() || task_def.timeout_seconds <= 0 || status != TaskStatus::InProgress {
        return;
    }

    let origin = w.tasks[idx].start_time + ChronoDuration::seconds(w.tasks[idx].start_delay_seconds);
    let elapsed = Utc::now() - origin;
    if elapsed < ChronoDuration::seconds(task_def.timeout_seconds) {
        return;
    }

    match task_def.timeout_policy {
        TimeoutPolicy::AlertOnly => {
            debug!(task_ref = %ref_name, "task exceeded its configured timeout (alert only)");
        }
        TimeoutPolicy::Retry => {
            w.tasks[idx].status = TaskStatus::TimedOut;
            w.tasks[idx].reason_for_incompletion = Some("task exceeded its configured timeout".to_string());
            w.tasks[idx].update_time = Utc::now();
            *changed = true;
        }
        TimeoutPolicy::TimeOutWorkflow => {
            let reason = format!("task '{ref_name}' timed out and its policy escalates to the workflow");
            w.tasks[idx].status = TaskStatus::TimedOut;
            w.tasks[idx].reason_for_incompletion = Some(reason.clone());
            w.tasks[idx].update_time = Utc::now();
            *changed = true;
            *terminate = Some((WorkflowStatus::TimedOut, reason));
        }
    }
}

/// 4.D.ii: an IN_PROGRESS task that has fallen silent since `update_time`
/// past its task-def's `response_timeout_seconds`. Suppressed while the
/// task is still sitting in its queue (not yet delivered to a worker, so
/// silence doesn't mean anything) -- `task_in_queue` is that check, supplied
/// synchronously by the caller.
fn apply_response_timeout_check(
    w: &mut WorkflowInstance,
    idx: usize,
    task_def_lookup: &dyn Fn(&str) -> Option<TaskDefinition>,
    task_in_queue: &dyn Fn(&str) -> bool,
    changed: &mut bool,
) {
    if w.tasks[idx].status != TaskStatus::InProgress {
        return;
    }
    let Some(task_def) = task_def_lookup(&w.tasks[idx].task_def_name) else {
        return;
    };
    if task_def.response_timeout_seconds <= 0 {
        return;
    }
    if task_in_queue(&w.tasks[idx].task_id) {
        return;
    }
    let elapsed = Utc::now() - w.tasks[idx].update_time;
    if elapsed < ChronoDuration::seconds(task_def.response_timeout_seconds) {
        return;
    }

    w.tasks[idx].status = TaskStatus::TimedOut;
    w.tasks[idx].reason_for_incompletion = Some("task exceeded its response timeout".to_string());
    w.tasks[idx].update_time = Utc::now();
    *changed = true;
}

fn attempt_retry(
    wd: &WorkflowDefinition,
    w: &mut WorkflowInstance,
    idx: usize,
    task_def_lookup: &dyn Fn(&str) -> Option<TaskDefinition>,
    newly_scheduled: &mut Vec<TaskInstance>,
) -> Option<String> {
    let ref_name = w.tasks[idx].task_reference_name.clone();
    let optional = wd.task_by_ref_name(&ref_name).is_some_and(|wt| wt.optional);
    let task_def_name = w.tasks[idx].task_def_name.clone();
    let task_def = task_def_lookup(&task_def_name);

    let can_retry = task_def
        .as_ref()
        .is_some_and(|td| w.tasks[idx].retry_count < td.retry_count);

    if can_retry {
        let td = task_def.expect("checked by can_retry");
        let retried = retry::produce_retry(&w.tasks[idx], &td);
        w.tasks[idx].retried = true;
        w.tasks[idx].executed = true;
        newly_scheduled.push(retried.clone());
        w.tasks.push(retried);
        None
    } else if optional {
        // Leave `executed` for the generic terminal-for-flow check below to
        // set, so it also calls `advance` -- flow must continue past an
        // optional task even once its retry budget is spent. `retried` stays
        // false: no successor T' was produced, and invariant 2 ties
        // `retried` to exactly that.
        None
    } else {
        let reason = format!(
            "task '{ref_name}' exhausted its retry budget in status {:?}",
            w.tasks[idx].status
        );
        Some(reason)
    }
}

/// 4.D.vii: resolve `output_parameters` against the finished instance.
fn complete_workflow(wd: &WorkflowDefinition, w: &mut WorkflowInstance) {
    let resolver = resolver_for_schema_version(w.schema_version);
    let ctx = build_context(w);
    w.output = resolver.resolve(&wd.output_parameters, &ctx);
    w.status = WorkflowStatus::Completed;
}
