//! Ambient configuration, loaded the way the teacher's CLI config loads --
//! defaults, then an optional `deciderflow.yaml`, then `DECIDERFLOW__*`
//! environment variables, each source overriding the last.

use serde::{Deserialize, Serialize};

/// Top-level settings for an embedding process (an Execution Service host,
/// a worker, a test harness).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub payload: PayloadSettings,
    #[serde(default)]
    pub workflow: WorkflowSettings,
    #[serde(default)]
    pub task: TaskSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// `queue.default.visibility.timeout` (ms): visibility window applied to
    /// a polled task (§4.E) when a worker neither acks nor the task-def
    /// overrides it.
    pub default_visibility_timeout_ms: i64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            default_visibility_timeout_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadSettings {
    /// `payload.external.threshold.bytes` (§4.C): in-memory maps larger than
    /// this move to the External Payload Gateway's backing store.
    pub externalization_threshold_bytes: usize,
}

impl Default for PayloadSettings {
    fn default() -> Self {
        Self {
            externalization_threshold_bytes: 10 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// `workflow.max.search.size`: the cap `search`/`list` results are
    /// truncated to.
    pub max_search_size: usize,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self { max_search_size: 5000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSettings {
    /// `task.requeue.timeout` (ms): a pending task untouched longer than
    /// this is a candidate for the crash-recovery `requeuePendingTasks()`
    /// sweep (§4.F).
    pub requeue_timeout_ms: i64,

    /// `task.def.concurrency.limit.default`: applied to a task-def that
    /// doesn't set its own `concurrency_limit`. `None` means unbounded.
    pub concurrency_limit_default: Option<u32>,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            requeue_timeout_ms: 60_000,
            concurrency_limit_default: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `tracing-subscriber` env-filter directive, e.g. `deciderflow=debug`.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (`DECIDERFLOW__*`, highest priority)
    /// 2. Config file (`deciderflow.yaml` in the current directory)
    /// 3. Defaults (lowest priority)
    ///
    /// # Errors
    /// Returns an error if a config file is malformed or an environment
    /// override can't be coerced into its target type.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&Settings::default())?)
            .add_source(
                config::File::with_name("deciderflow")
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("DECIDERFLOW")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}
