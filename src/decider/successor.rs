//! Structural "next task" resolution (4.D.v). A naive index-into-the-flat-
//! list successor breaks at branch boundaries: a fork branch's last task
//! must NOT fall through into the next branch, and a decision branch's last
//! task must fall through to whatever follows the whole DECISION construct,
//! not into the next case. This precomputes one successor per reference
//! name by walking the structural (non-flattened) tree once.

use crate::model::{WorkflowDefinition, WorkflowInstance, WorkflowTask};
use std::collections::HashMap;

/// `None` means "end of branch" -- for a top-level/decision-branch task that
/// really is the end of the road; for a fork-branch task, flow resumes only
/// once the paired JOIN's `joinOn` set is satisfied, never through this map.
pub fn build(wd: &WorkflowDefinition) -> HashMap<String, Option<String>> {
    let mut map = HashMap::new();
    walk(&wd.tasks, None, &mut map);
    map
}

fn walk(tasks: &[WorkflowTask], after: Option<&str>, map: &mut HashMap<String, Option<String>>) {
    for (i, t) in tasks.iter().enumerate() {
        let next = tasks
            .get(i + 1)
            .map(|n| n.task_reference_name.clone())
            .or_else(|| after.map(str::to_string));
        map.insert(t.task_reference_name.clone(), next.clone());

        for branch in &t.fork_tasks {
            walk(branch, None, map);
        }
        for branch in t.decision_cases.values() {
            walk(branch, next.as_deref(), map);
        }
        if !t.default_case.is_empty() {
            walk(&t.default_case, next.as_deref(), map);
        }
    }
}

/// Walk forward from `from_ref`, skipping any successor already recorded as
/// SKIPPED on `workflow` (4.D.v), until a schedulable ref or the end of the
/// branch is found.
#[must_use]
pub fn next_schedulable_ref(
    successors: &HashMap<String, Option<String>>,
    workflow: &WorkflowInstance,
    from_ref: &str,
) -> Option<String> {
    let mut cur = successors.get(from_ref).cloned().flatten();
    loop {
        match &cur {
            None => return None,
            Some(ref_name) => {
                let skipped = workflow
                    .task_by_ref_name(ref_name)
                    .is_some_and(|t| t.status == crate::model::TaskStatus::Skipped);
                if !skipped {
                    return Some(ref_name.clone());
                }
                cur = successors.get(ref_name).cloned().flatten();
            }
        }
    }
}
