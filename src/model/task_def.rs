//! Task definition (TD): the static retry/timeout policy for a task type.

use super::status::{RetryLogic, TimeoutPolicy};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,

    #[serde(default)]
    pub retry_count: u32,

    #[serde(default)]
    pub retry_delay_seconds: i64,

    #[serde(default = "default_retry_logic")]
    pub retry_logic: RetryLogic,

    /// <= 0 disables the timeout check (4.D.i).
    #[serde(default)]
    pub timeout_seconds: i64,

    #[serde(default = "default_timeout_policy")]
    pub timeout_policy: TimeoutPolicy,

    /// <= 0 disables the response-timeout check (4.D.ii).
    #[serde(default)]
    pub response_timeout_seconds: i64,

    /// Concurrent IN_PROGRESS instances of this task-def the Execution
    /// Service will admit before applying poll back-pressure (§4.F). `None`
    /// means unbounded.
    #[serde(default)]
    pub concurrency_limit: Option<u32>,
}

fn default_retry_logic() -> RetryLogic {
    RetryLogic::Fixed
}

fn default_timeout_policy() -> TimeoutPolicy {
    TimeoutPolicy::AlertOnly
}

impl TaskDefinition {
    /// Delay in seconds before the given retry attempt becomes visible,
    /// per 4.D.iii: FIXED uses a flat delay, EXPONENTIAL_BACKOFF scales by
    /// `1 + retry_count` of the *failed* attempt.
    #[must_use]
    pub fn retry_delay_for(&self, failed_attempt_retry_count: u32) -> i64 {
        match self.retry_logic {
            RetryLogic::Fixed => self.retry_delay_seconds,
            RetryLogic::ExponentialBackoff => {
                self.retry_delay_seconds * i64::from(1 + failed_attempt_retry_count)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn td(logic: RetryLogic, delay: i64) -> TaskDefinition {
        TaskDefinition {
            name: "t".into(),
            retry_count: 3,
            retry_delay_seconds: delay,
            retry_logic: logic,
            timeout_seconds: 0,
            timeout_policy: TimeoutPolicy::AlertOnly,
            response_timeout_seconds: 0,
            concurrency_limit: None,
        }
    }

    #[test]
    fn fixed_delay_is_constant() {
        let def = td(RetryLogic::Fixed, 5);
        assert_eq!(def.retry_delay_for(0), 5);
        assert_eq!(def.retry_delay_for(1), 5);
    }

    #[test]
    fn exponential_backoff_scales_with_attempt() {
        let def = td(RetryLogic::ExponentialBackoff, 5);
        assert_eq!(def.retry_delay_for(0), 5);
        assert_eq!(def.retry_delay_for(1), 10);
        assert_eq!(def.retry_delay_for(2), 15);
    }
}
