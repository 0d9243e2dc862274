//! # deciderflow - a decider and task dispatch engine for graph workflows
//!
//! `deciderflow` implements the decision core of a Conductor-shaped workflow
//! orchestrator: given a workflow definition (a directed graph of task
//! templates) and the mutable instance tracking one run of it, the
//! [`decider`] module computes what should happen next -- which templates
//! become concrete tasks, which in-flight tasks have timed out or exhausted
//! their retries, and when the whole run is done.
//!
//! ## Core modules
//!
//! - [`model`] - workflow/task definitions and their runtime instances (§3)
//! - [`mapper`] - the Task Mapper Registry: template -> concrete task(s)
//! - [`resolver`] / [`expressions`] - the Parameter Resolver (V1 shallow
//!   substitution, V2 jq-based nested evaluation)
//! - [`decider`] - the pure decision function itself
//! - [`queue`] - the Queue Protocol: FIFO with visibility delay and ack
//! - [`stores`] - metadata/execution/index store traits plus in-memory
//!   reference implementations
//! - [`payload`] - the External Payload Gateway
//! - [`execution_service`] - the worker-facing poll/ack/update surface
//!   wiring all of the above together
//!
//! ## Example
//!
//! ```rust,no_run
//! use deciderflow::decider::decide;
//! use deciderflow::mapper::TaskMapperRegistry;
//! use deciderflow::model::{WorkflowDefinition, WorkflowInstance};
//!
//! # fn example(wd: WorkflowDefinition, workflow: WorkflowInstance) {
//! let registry = TaskMapperRegistry::new();
//! let outcome = decide(&wd, &workflow, &registry, &|_name| None, &|_task_id| false);
//! println!("workflow now {:?}, {} new tasks", outcome.workflow.status, outcome.newly_scheduled.len());
//! # }
//! ```

pub mod config;
pub mod decider;
pub mod execution_service;
pub mod expressions;
pub mod mapper;
pub mod model;
pub mod payload;
pub mod queue;
pub mod resolver;
pub mod stores;

use snafu::prelude::*;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("execution service error: {source}"))]
    ExecutionService { source: execution_service::Error },

    #[snafu(display("store error: {source}"))]
    Store { source: stores::Error },

    #[snafu(display("payload error: {source}"))]
    Payload { source: payload::Error },

    #[snafu(display("expression error: {source}"))]
    Expression { source: expressions::Error },

    #[snafu(display("configuration error: {source}"))]
    Configuration { source: ::config::ConfigError },
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<execution_service::Error> for Error {
    fn from(source: execution_service::Error) -> Self {
        Error::ExecutionService { source }
    }
}

impl From<stores::Error> for Error {
    fn from(source: stores::Error) -> Self {
        Error::Store { source }
    }
}

impl From<payload::Error> for Error {
    fn from(source: payload::Error) -> Self {
        Error::Payload { source }
    }
}

impl From<expressions::Error> for Error {
    fn from(source: expressions::Error) -> Self {
        Error::Expression { source }
    }
}

impl From<::config::ConfigError> for Error {
    fn from(source: ::config::ConfigError) -> Self {
        Error::Configuration { source }
    }
}
