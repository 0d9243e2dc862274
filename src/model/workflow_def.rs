//! Workflow definition (WD): an ordered sequence of task templates (WT).
//!
//! Nested control-flow templates (decision cases, static fork branches) are
//! stored structurally, the way a parsed definition naturally nests, but the
//! Decider never walks that nesting directly. [`WorkflowDefinition::flatten`]
//! produces one pre-order list the same shape the Decider's `getNextTask`
//! (4.D.v) expects to scan forward through.

use indexmap::IndexMap;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    UserDefined,
    Decision,
    ForkJoin,
    ForkJoinDynamic,
    Join,
    SubWorkflow,
    Wait,
    Event,
}

impl TaskType {
    /// Built-in system tasks are re-seeded into `toSchedule` on every decide
    /// while non-terminal (4.D step 8a) and are never subject to retry
    /// production (4.D.iii precondition).
    #[must_use]
    pub fn is_system_task(self) -> bool {
        matches!(
            self,
            TaskType::Decision | TaskType::ForkJoin | TaskType::ForkJoinDynamic | TaskType::Join
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTask {
    pub task_reference_name: String,
    pub task_type: TaskType,

    /// Target task-def name; absent for pure control-flow tasks (JOIN).
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub input_parameters: IndexMap<String, serde_json::Value>,

    #[serde(default)]
    pub optional: bool,

    /// JOIN: reference names of the predecessors it waits on.
    #[serde(default)]
    pub join_on: Vec<String>,

    /// DECISION: case value -> branch (ordered list of nested tasks).
    #[serde(default)]
    pub decision_cases: IndexMap<String, Vec<WorkflowTask>>,

    /// DECISION: branch taken when no case value matches.
    #[serde(default)]
    pub default_case: Vec<WorkflowTask>,

    /// DECISION: expression evaluated against resolved input to pick a case key.
    #[serde(default)]
    pub case_expression: Option<String>,

    /// FORK_JOIN (static): one ordered branch per parallel arm.
    #[serde(default)]
    pub fork_tasks: Vec<Vec<WorkflowTask>>,

    /// FORK_JOIN_DYNAMIC: input key holding the runtime-resolved array of
    /// branch descriptors (4.A).
    #[serde(default)]
    pub dynamic_fork_tasks_param: Option<String>,

    /// SUB_WORKFLOW: name/version of the nested workflow definition.
    #[serde(default)]
    pub sub_workflow_name: Option<String>,
    #[serde(default)]
    pub sub_workflow_version: Option<u32>,
}

impl WorkflowTask {
    /// All reference names reachable from this task's nested branches,
    /// pre-order. Does not include `self`.
    fn nested_flatten<'a>(&'a self, out: &mut Vec<&'a WorkflowTask>) {
        for branch in &self.fork_tasks {
            for t in branch {
                out.push(t);
                t.nested_flatten(out);
            }
        }
        for branch in self.decision_cases.values() {
            for t in branch {
                out.push(t);
                t.nested_flatten(out);
            }
        }
        for t in &self.default_case {
            out.push(t);
            t.nested_flatten(out);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    /// Schema version gates the Parameter Resolver variant (4.B): 1 -> V1
    /// shallow substitution, >=2 -> V2 nested/JSON-path resolution.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub tasks: Vec<WorkflowTask>,
    #[serde(default)]
    pub output_parameters: IndexMap<String, serde_json::Value>,
}

fn default_version() -> u32 {
    1
}

fn default_schema_version() -> u32 {
    2
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("task reference name not found: {ref_name}"))]
    TaskNotFound { ref_name: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl WorkflowDefinition {
    /// Pre-order flattening of the whole definition: top-level tasks
    /// interleaved with their nested fork/decision branches, in the order
    /// `getNextTask` (4.D.v) is expected to scan.
    #[must_use]
    pub fn flatten(&self) -> Vec<&WorkflowTask> {
        let mut out = Vec::new();
        for t in &self.tasks {
            out.push(t);
            t.nested_flatten(&mut out);
        }
        out
    }

    #[must_use]
    pub fn task_by_ref_name(&self, ref_name: &str) -> Option<&WorkflowTask> {
        self.flatten()
            .into_iter()
            .find(|t| t.task_reference_name == ref_name)
    }

    /// Index of `ref_name` within the flattened ordering, used by
    /// `getNextTask` to find "the WT after this one" (4.D.v).
    pub fn flattened_index_of(&self, ref_name: &str) -> Result<usize> {
        self.flatten()
            .iter()
            .position(|t| t.task_reference_name == ref_name)
            .context(TaskNotFoundSnafu { ref_name })
    }

    /// First non-system-task-empty definition check used by `startWorkflow`
    /// (4.D.vi): the flattened task list must be non-empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Build a `petgraph` view of the flattened ordering for structural
    /// validation (acyclicity is a contract, not something `decide` checks
    /// at runtime -- see Design Notes "Graph cycles").
    #[must_use]
    pub fn build_graph(&self) -> (DiGraph<String, ()>, IndexMap<String, petgraph::graph::NodeIndex>) {
        let mut graph = DiGraph::new();
        let mut nodes = IndexMap::new();
        let flattened = self.flatten();
        for t in &flattened {
            let idx = graph.add_node(t.task_reference_name.clone());
            nodes.insert(t.task_reference_name.clone(), idx);
        }
        for window in flattened.windows(2) {
            if let [a, b] = window {
                if let (Some(&ia), Some(&ib)) =
                    (nodes.get(&a.task_reference_name), nodes.get(&b.task_reference_name))
                {
                    graph.add_edge(ia, ib, ());
                }
            }
        }
        (graph, nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple(name: &str) -> WorkflowTask {
        WorkflowTask {
            task_reference_name: name.to_string(),
            task_type: TaskType::UserDefined,
            name: Some(name.to_string()),
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

    #[test]
    fn flatten_preserves_linear_order() {
        let wd = WorkflowDefinition {
            name: "wf".into(),
            version: 1,
            schema_version: 2,
            tasks: vec![simple("a"), simple("b")],
            output_parameters: IndexMap::new(),
        };
        let names: Vec<_> = wd
            .flatten()
            .iter()
            .map(|t| t.task_reference_name.clone())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn flatten_inlines_fork_branches() {
        let mut fork = simple("fork1");
        fork.task_type = TaskType::ForkJoin;
        fork.fork_tasks = vec![vec![simple("b1")], vec![simple("b2")]];
        let mut join = simple("join1");
        join.task_type = TaskType::Join;
        join.join_on = vec!["b1".into(), "b2".into()];

        let wd = WorkflowDefinition {
            name: "wf".into(),
            version: 1,
            schema_version: 2,
            tasks: vec![fork, join],
            output_parameters: IndexMap::new(),
        };
        let names: Vec<_> = wd
            .flatten()
            .iter()
            .map(|t| t.task_reference_name.clone())
            .collect();
        assert_eq!(names, vec!["fork1", "b1", "b2", "join1"]);
    }
}
