//! Task Mapper Registry (4.A): given a workflow-task template, materialize
//! one or more concrete task instances. Mappers are tagged-variant
//! dispatch (type tag -> mapper function), not a class hierarchy, per
//! Design Note "Task mappers as polymorphism" -- the registry is built once
//! and closed over the set of supported tags.

mod decision;
mod fork;
mod fork_join_dynamic;
mod join;
mod sub_workflow;
mod user_defined;
mod wait_event;

use crate::model::{TaskDefinition, TaskInstance, TaskType, WorkflowDefinition, WorkflowInstance, WorkflowTask};
use crate::resolver::ParameterResolver;
use std::collections::HashMap;

/// Everything a mapper needs to deterministically produce task instances.
/// A mapper must not mutate `workflow` -- it only reads through this view.
/// `resolver`/`eval_context` let FORK/DECISION recurse into a chosen
/// branch's head task, resolving that task's own `input_parameters`
/// against the same evaluation context the parent was resolved against.
pub struct MapperContext<'a> {
    pub workflow_def: &'a WorkflowDefinition,
    pub workflow: &'a WorkflowInstance,
    pub task_def: Option<&'a TaskDefinition>,
    pub workflow_task: &'a WorkflowTask,
    pub resolved_input: serde_json::Map<String, serde_json::Value>,
    pub retry_count: u32,
    pub retried_task_id: Option<String>,
    pub resolver: &'a (dyn ParameterResolver + Send + Sync),
    pub eval_context: &'a serde_json::Value,
}

impl<'a> MapperContext<'a> {
    fn new_task_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn task_def_name(&self) -> String {
        self.workflow_task
            .name
            .clone()
            .unwrap_or_else(|| self.workflow_task.task_reference_name.clone())
    }

    /// Build the context for one nested branch-head task, resolving its own
    /// `input_parameters` against the same evaluation context. The caller
    /// supplies `task_def` since looking it up requires an async store call
    /// the mapper layer deliberately has no access to.
    fn child(&self, workflow_task: &'a WorkflowTask, task_def: Option<&'a TaskDefinition>) -> MapperContext<'a> {
        let resolved_input = self.resolver.resolve(&workflow_task.input_parameters, self.eval_context);
        MapperContext {
            workflow_def: self.workflow_def,
            workflow: self.workflow,
            task_def,
            workflow_task,
            resolved_input,
            retry_count: 0,
            retried_task_id: None,
            resolver: self.resolver,
            eval_context: self.eval_context,
        }
    }
}

pub trait TaskMapper: Send + Sync {
    /// Produce zero or more task instances for this context. `registry` is
    /// passed back in so mappers that spawn nested work (FORK's branch
    /// heads, DECISION's chosen branch head) can recurse through the same
    /// dispatch table instead of hard-coding a sibling mapper.
    fn map(&self, ctx: &MapperContext<'_>, registry: &TaskMapperRegistry) -> Vec<TaskInstance>;
}

pub struct TaskMapperRegistry {
    mappers: HashMap<TaskType, Box<dyn TaskMapper>>,
}

impl std::fmt::Debug for TaskMapperRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskMapperRegistry")
            .field("types", &self.mappers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for TaskMapperRegistry {
    fn default() -> Self {
        let mut mappers: HashMap<TaskType, Box<dyn TaskMapper>> = HashMap::new();
        mappers.insert(TaskType::UserDefined, Box::new(user_defined::UserDefinedMapper));
        mappers.insert(TaskType::Decision, Box::new(decision::DecisionMapper));
        mappers.insert(TaskType::ForkJoin, Box::new(fork::ForkMapper));
        mappers.insert(
            TaskType::ForkJoinDynamic,
            Box::new(fork_join_dynamic::ForkJoinDynamicMapper),
        );
        mappers.insert(TaskType::Join, Box::new(join::JoinMapper));
        mappers.insert(TaskType::SubWorkflow, Box::new(sub_workflow::SubWorkflowMapper));
        mappers.insert(TaskType::Wait, Box::new(wait_event::WaitMapper));
        mappers.insert(TaskType::Event, Box::new(wait_event::EventMapper));
        Self { mappers }
    }
}

impl TaskMapperRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatch by the template's type tag. Returns an empty vec for an
    /// unregistered tag rather than panicking -- callers treat that as "no
    /// tasks produced", consistent with `decide` never failing on a mapper
    /// miss (mapper *errors* terminate the workflow; an unknown tag simply
    /// yields nothing to schedule).
    #[must_use]
    pub fn map(&self, ctx: &MapperContext<'_>) -> Vec<TaskInstance> {
        match self.mappers.get(&ctx.workflow_task.task_type) {
            Some(mapper) => mapper.map(ctx, self),
            None => Vec::new(),
        }
    }
}
