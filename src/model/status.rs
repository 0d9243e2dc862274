//! Status algebra for task and workflow instances.
//!
//! Wire values match §6 of the spec exactly; the `is_*` predicates implement
//! the status algebra from §3 so callers never hand-roll a match arm.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Scheduled,
    InProgress,
    Completed,
    CompletedWithErrors,
    Failed,
    Canceled,
    TimedOut,
    Skipped,
    ReadyForRerun,
}

impl TaskStatus {
    /// COMPLETED, COMPLETED_WITH_ERRORS, FAILED, TIMED_OUT, SKIPPED, CANCELED.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::CompletedWithErrors
                | TaskStatus::Failed
                | TaskStatus::TimedOut
                | TaskStatus::Skipped
                | TaskStatus::Canceled
        )
    }

    /// Subset of terminal: COMPLETED, COMPLETED_WITH_ERRORS, SKIPPED.
    #[must_use]
    pub fn is_successful(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::CompletedWithErrors | TaskStatus::Skipped
        )
    }

    /// FAILED, TIMED_OUT.
    #[must_use]
    pub fn is_retriable(self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::TimedOut)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Running,
    Paused,
    Completed,
    Failed,
    TimedOut,
    Terminated,
}

impl WorkflowStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed
                | WorkflowStatus::Failed
                | WorkflowStatus::TimedOut
                | WorkflowStatus::Terminated
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeoutPolicy {
    AlertOnly,
    Retry,
    TimeOutWorkflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryLogic {
    Fixed,
    ExponentialBackoff,
}
