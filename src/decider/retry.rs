//! Retry production (4.D.iii): a failed/timed-out task whose retry budget
//! isn't exhausted produces a fresh `T'` -- same ref name, new task id,
//! reset counters, a `startDelaySeconds` derived from the task-def's retry
//! policy, and `retriedTaskId` pointing back at the attempt it supersedes.

use crate::model::{TaskDefinition, TaskInstance, TaskStatus};
use chrono::Utc;

#[must_use]
pub fn produce_retry(failed: &TaskInstance, task_def: &TaskDefinition) -> TaskInstance {
    let now = Utc::now();
    let delay = task_def.retry_delay_for(failed.retry_count);
    TaskInstance {
        task_id: uuid::Uuid::new_v4().to_string(),
        task_reference_name: failed.task_reference_name.clone(),
        task_def_name: failed.task_def_name.clone(),
        task_type: failed.task_type,
        status: TaskStatus::Scheduled,
        input: failed.input.clone(),
        output: serde_json::Map::new(),
        start_time: now,
        update_time: now,
        poll_count: 0,
        retry_count: failed.retry_count + 1,
        retried_task_id: Some(failed.task_id.clone()),
        start_delay_seconds: delay,
        callback_after_seconds: delay,
        worker_id: None,
        reason_for_incompletion: None,
        executed: false,
        retried: false,
        external_input_path: None,
        external_output_path: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RetryLogic, TaskType, TimeoutPolicy};

    fn failed_task() -> TaskInstance {
        let now = Utc::now();
        TaskInstance {
            task_id: "t1".into(),
            task_reference_name: "a".into(),
            task_def_name: "a".into(),
            task_type: TaskType::UserDefined,
            status: TaskStatus::Failed,
            input: serde_json::Map::new(),
            output: serde_json::Map::new(),
            start_time: now,
            update_time: now,
            poll_count: 1,
            retry_count: 0,
            retried_task_id: None,
            start_delay_seconds: 0,
            callback_after_seconds: 0,
            worker_id: None,
            reason_for_incompletion: Some("boom".into()),
            executed: false,
            retried: false,
            external_input_path: None,
            external_output_path: None,
        }
    }

    fn def() -> TaskDefinition {
        TaskDefinition {
            name: "a".into(),
            retry_count: 3,
            retry_delay_seconds: 5,
            retry_logic: RetryLogic::Fixed,
            timeout_seconds: 0,
            timeout_policy: TimeoutPolicy::AlertOnly,
            response_timeout_seconds: 0,
            concurrency_limit: None,
        }
    }

    #[test]
    fn retry_keeps_ref_name_and_links_back() {
        let failed = failed_task();
        let retry = produce_retry(&failed, &def());
        assert_eq!(retry.task_reference_name, "a");
        assert_eq!(retry.retried_task_id, Some("t1".to_string()));
        assert_eq!(retry.retry_count, 1);
        assert_eq!(retry.status, TaskStatus::Scheduled);
        assert_eq!(retry.start_delay_seconds, 5);
        assert_eq!(retry.callback_after_seconds, 5);
    }
}
