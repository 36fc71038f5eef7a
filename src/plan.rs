//! Plan and Task data model.
//!
//! Illegal states are kept hard to construct: tasks are built through
//! [`Plan::new`], which rejects cyclic dependency graphs and computes the
//! topological `execution_order` once, up front.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Unique identifier for a [`Task`] within a [`Plan`].
#[nutype(derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into
))]
pub struct TaskId(String);

/// Unique identifier for a [`Plan`].
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into
))]
pub struct PlanId(Uuid);

impl PlanId {
    /// Generates a new random plan id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// The documented capability tags a [`Task::required_capabilities`] may draw
/// from. Planners are free to use tags outside this set — it exists to give
/// the fallback heuristic and tests a shared vocabulary, not to close the
/// set at the type level.
pub const KNOWN_CAPABILITIES: &[&str] = &[
    "code_generation",
    "analysis",
    "problem_solving",
    "testing",
    "verification",
    "system_operations",
    "file_management",
    "execute_command",
    "process_management",
    "information_retrieval",
    "search",
    "summarization",
    "general_processing",
    "echo",
];

/// The status of a [`Task`] in its lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    /// Not yet started.
    Pending,
    /// Currently executing.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Never attempted because a dependency failed.
    Skipped,
}

impl TaskStatus {
    /// Whether `self -> next` is an allowed transition:
    /// `PENDING -> IN_PROGRESS -> {COMPLETED, FAILED}`, plus the
    /// dependency-failure-induced `PENDING -> SKIPPED`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
                | (Self::Pending, Self::Skipped)
        )
    }
}

/// A single unit of work within a [`Plan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique within the owning plan.
    pub task_id: TaskId,
    /// Free-text description of the work.
    pub description: String,
    /// Capability tags an executing agent must be able to satisfy.
    pub required_capabilities: HashSet<String>,
    /// Ids of tasks that must complete before this one is eligible.
    pub dependencies: HashSet<TaskId>,
    /// The agent selected to execute this task, once chosen.
    pub assigned_agent: Option<String>,
    /// Current status.
    pub status: TaskStatus,
    /// Set iff `status == Completed`.
    pub result: Option<String>,
    /// Set iff `status == Failed`.
    pub error: Option<String>,
}

impl Task {
    /// Builds a new, pending task.
    #[must_use]
    pub fn new(
        task_id: impl Into<TaskId>,
        description: impl Into<String>,
        required_capabilities: HashSet<String>,
        dependencies: HashSet<TaskId>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            description: description.into(),
            required_capabilities,
            dependencies,
            assigned_agent: None,
            status: TaskStatus::Pending,
            result: None,
            error: None,
        }
    }

    /// Applies a status transition, enforcing that `result` is set iff
    /// `COMPLETED` and `error` is set iff `FAILED`.
    pub fn transition(
        &mut self,
        new_status: TaskStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> CoreResult<()> {
        if !self.status.can_transition_to(new_status) {
            return Err(CoreError::InvalidTaskTransition {
                task_id: self.task_id.clone(),
                from: self.status,
                to: new_status,
            });
        }
        self.status = new_status;
        match new_status {
            TaskStatus::Completed => {
                self.result = result;
                self.error = None;
            }
            TaskStatus::Failed => {
                self.error = error;
                self.result = None;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Overall status of a [`Plan`] / running [`crate::orchestrator::Workflow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    /// Built but not yet started.
    Planned,
    /// Currently executing.
    Running,
    /// All tasks completed or were skipped.
    Completed,
    /// At least one task failed, ending the run.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

/// An ordered, acyclic collection of [`Task`]s derived from a task
/// description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Unique id.
    pub plan_id: PlanId,
    /// The free-text task description this plan was built from.
    pub original_task: String,
    /// All tasks in the plan, keyed by id.
    pub tasks: HashMap<TaskId, Task>,
    /// A topological order of `tasks` under their dependency edges.
    pub execution_order: Vec<TaskId>,
    /// Current status.
    pub status: PlanStatus,
    /// When the plan was constructed.
    pub created_at: DateTime<Utc>,
    /// When execution started, if it has.
    pub started_at: Option<DateTime<Utc>>,
    /// When execution ended, if it has.
    pub ended_at: Option<DateTime<Utc>>,
    /// Arbitrary context carried alongside the plan.
    pub context: HashMap<String, String>,
}

impl Plan {
    /// Builds a plan from its tasks, validating that the dependency graph is
    /// acyclic and computing a topological `execution_order`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPlan`] if `tasks` is empty, references an
    /// unknown dependency, or its dependency graph contains a cycle.
    pub fn new(
        original_task: impl Into<String>,
        tasks: Vec<Task>,
        context: HashMap<String, String>,
    ) -> CoreResult<Self> {
        let plan_id = PlanId::generate();
        if tasks.is_empty() {
            return Err(CoreError::InvalidPlan {
                plan_id,
                reason: "a plan must contain at least one task".to_string(),
            });
        }

        let task_map: HashMap<TaskId, Task> = tasks
            .into_iter()
            .map(|t| (t.task_id.clone(), t))
            .collect();

        for task in task_map.values() {
            for dep in &task.dependencies {
                if !task_map.contains_key(dep) {
                    return Err(CoreError::InvalidPlan {
                        plan_id,
                        reason: format!(
                            "task {} depends on unknown task {}",
                            task.task_id, dep
                        ),
                    });
                }
            }
        }

        let execution_order = topological_order(&task_map).ok_or_else(|| CoreError::InvalidPlan {
            plan_id,
            reason: "dependency graph contains a cycle".to_string(),
        })?;

        Ok(Self {
            plan_id,
            original_task: original_task.into(),
            tasks: task_map,
            execution_order,
            status: PlanStatus::Planned,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            context,
        })
    }

    /// A task is eligible to run once every dependency has completed.
    #[must_use]
    pub fn is_eligible(&self, task_id: &TaskId) -> bool {
        self.tasks.get(task_id).is_some_and(|task| {
            task.dependencies
                .iter()
                .all(|dep| self.tasks.get(dep).is_some_and(|d| d.status == TaskStatus::Completed))
        })
    }

    /// Whether any dependency of `task_id` has failed or been skipped,
    /// meaning the task itself must be skipped rather than run.
    #[must_use]
    pub fn has_failed_dependency(&self, task_id: &TaskId) -> bool {
        self.tasks.get(task_id).is_some_and(|task| {
            task.dependencies.iter().any(|dep| {
                self.tasks
                    .get(dep)
                    .is_some_and(|d| matches!(d.status, TaskStatus::Failed | TaskStatus::Skipped))
            })
        })
    }
}

/// Computes a topological order of `tasks` under their dependency edges
/// using Kahn's algorithm, returning `None` if the graph has a cycle.
fn topological_order(tasks: &HashMap<TaskId, Task>) -> Option<Vec<TaskId>> {
    let mut in_degree: HashMap<&TaskId, usize> =
        tasks.keys().map(|id| (id, 0)).collect();
    for task in tasks.values() {
        for _dep in &task.dependencies {
            *in_degree.get_mut(&task.task_id).unwrap() += 1;
        }
    }

    // dependents[x] = tasks that depend on x, i.e. edges x -> dependent
    let mut dependents: HashMap<&TaskId, Vec<&TaskId>> =
        tasks.keys().map(|id| (id, Vec::new())).collect();
    for task in tasks.values() {
        for dep in &task.dependencies {
            dependents.get_mut(dep).unwrap().push(&task.task_id);
        }
    }

    let mut ready: Vec<&TaskId> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();
    ready.sort();

    let mut order = Vec::with_capacity(tasks.len());
    while let Some(next) = ready.pop() {
        order.push(next.clone());
        if let Some(deps) = dependents.get(next) {
            let mut newly_ready = Vec::new();
            for dependent in deps {
                let degree = in_degree.get_mut(dependent).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    newly_ready.push(*dependent);
                }
            }
            newly_ready.sort();
            ready.extend(newly_ready);
        }
        ready.sort();
    }

    if order.len() == tasks.len() {
        Some(order)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task::new(
            TaskId::new(id.to_string()),
            format!("do {id}"),
            HashSet::new(),
            deps.iter().map(|d| TaskId::new((*d).to_string())).collect(),
        )
    }

    #[test]
    fn execution_order_is_topological() {
        let plan = Plan::new(
            "build a thing",
            vec![task("t1", &[]), task("t2", &["t1"]), task("t3", &["t1", "t2"])],
            HashMap::new(),
        )
        .unwrap();

        let pos = |id: &str| {
            plan.execution_order
                .iter()
                .position(|t| t.as_ref() == id)
                .unwrap()
        };
        assert!(pos("t1") < pos("t2"));
        assert!(pos("t2") < pos("t3"));
    }

    #[test]
    fn cyclic_dependencies_are_rejected() {
        let result = Plan::new(
            "cycle",
            vec![task("t1", &["t2"]), task("t2", &["t1"])],
            HashMap::new(),
        );
        assert!(matches!(result, Err(CoreError::InvalidPlan { .. })));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let result = Plan::new("bad", vec![task("t1", &["ghost"])], HashMap::new());
        assert!(matches!(result, Err(CoreError::InvalidPlan { .. })));
    }

    #[test]
    fn empty_plan_is_rejected() {
        let result = Plan::new("empty", vec![], HashMap::new());
        assert!(matches!(result, Err(CoreError::InvalidPlan { .. })));
    }

    #[test]
    fn completed_transition_clears_error_and_sets_result() {
        let mut t = task("t1", &[]);
        t.transition(TaskStatus::InProgress, None, None).unwrap();
        t.transition(TaskStatus::Completed, Some("ok".to_string()), None)
            .unwrap();
        assert_eq!(t.result.as_deref(), Some("ok"));
        assert!(t.error.is_none());
    }

    #[test]
    fn failed_transition_clears_result_and_sets_error() {
        let mut t = task("t1", &[]);
        t.transition(TaskStatus::InProgress, None, None).unwrap();
        t.transition(TaskStatus::Failed, None, Some("boom".to_string()))
            .unwrap();
        assert_eq!(t.error.as_deref(), Some("boom"));
        assert!(t.result.is_none());
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut t = task("t1", &[]);
        let result = t.transition(TaskStatus::Completed, Some("x".to_string()), None);
        assert!(matches!(result, Err(CoreError::InvalidTaskTransition { .. })));
    }

    #[test]
    fn is_eligible_requires_all_dependencies_completed() {
        let mut plan = Plan::new(
            "x",
            vec![task("t1", &[]), task("t2", &["t1"])],
            HashMap::new(),
        )
        .unwrap();
        let t2 = TaskId::new("t2".to_string());
        assert!(!plan.is_eligible(&t2));

        let t1 = TaskId::new("t1".to_string());
        plan.tasks.get_mut(&t1).unwrap().transition(TaskStatus::InProgress, None, None).unwrap();
        plan.tasks
            .get_mut(&t1)
            .unwrap()
            .transition(TaskStatus::Completed, Some("done".to_string()), None)
            .unwrap();
        assert!(plan.is_eligible(&t2));
    }
}
