//! Task Planner: turns a free-text task description into a [`Plan`], tracks
//! running plans, and applies task status updates pushed in by the
//! orchestrator.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use tracing::{instrument, warn};

use crate::error::{CoreError, CoreResult};
use crate::plan::{Plan, PlanId, Task, TaskId, TaskStatus};

/// A source of externally generated plan text, e.g. an LLM-backed planning
/// agent.
#[async_trait]
pub trait PlannerBackend: Send + Sync {
    /// Produces raw plan text for `task_description`. Implementations may
    /// return either supported textual format (see [`parse_plan_text`]).
    async fn generate_plan(&self, task_description: &str) -> CoreResult<String>;
}

/// Builds and tracks [`Plan`]s.
///
/// When no [`PlannerBackend`] is configured, or the backend's output fails
/// to parse, falls back to [`internal_task_planning`] — a single-task plan
/// derived from keyword heuristics, matching `_internal_task_planning`.
pub struct Planner {
    backend: Option<Arc<dyn PlannerBackend>>,
    plans: DashMap<PlanId, Plan>,
}

impl Planner {
    /// Builds a planner with no external backend; it always falls back to
    /// the internal heuristic.
    #[must_use]
    pub fn new() -> Self {
        Self {
            backend: None,
            plans: DashMap::new(),
        }
    }

    /// Builds a planner that prefers `backend`-generated plans, falling
    /// back to the internal heuristic if the backend errors or its output
    /// does not parse.
    #[must_use]
    pub fn with_backend(backend: Arc<dyn PlannerBackend>) -> Self {
        Self {
            backend: Some(backend),
            plans: DashMap::new(),
        }
    }

    /// Builds a [`Plan`] for `task_description`, registers it, and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPlan`] if neither the backend's output
    /// nor the internal heuristic can produce a valid plan.
    #[instrument(skip(self))]
    pub async fn plan(&self, task_description: &str) -> CoreResult<Plan> {
        let tasks = match &self.backend {
            Some(backend) => match backend.generate_plan(task_description).await {
                Ok(text) => match parse_plan_text(&text) {
                    Some(tasks) if !tasks.is_empty() => tasks,
                    _ => {
                        warn!("planner backend output did not parse, falling back to heuristic");
                        internal_task_planning(task_description)
                    }
                },
                Err(err) => {
                    warn!(error = %err, "planner backend failed, falling back to heuristic");
                    internal_task_planning(task_description)
                }
            },
            None => internal_task_planning(task_description),
        };

        let plan = Plan::new(task_description, tasks, HashMap::new())?;
        self.plans.insert(plan.plan_id, plan.clone());
        Ok(plan)
    }

    /// Applies a status update to one task within a tracked plan, enforcing
    /// the legal-transition invariants in [`TaskStatus::can_transition_to`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PlanNotFound`] if `plan_id` is untracked, or
    /// propagates [`CoreError::InvalidTaskTransition`] from the task itself.
    pub fn update_task(
        &self,
        plan_id: PlanId,
        task_id: &TaskId,
        new_status: TaskStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> CoreResult<()> {
        let mut plan = self
            .plans
            .get_mut(&plan_id)
            .ok_or(CoreError::PlanNotFound { plan_id })?;
        let task = plan
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| CoreError::InvalidPlan {
                plan_id,
                reason: format!("unknown task {task_id}"),
            })?;
        task.transition(new_status, result, error)
    }

    /// Returns a clone of a tracked plan, if it exists.
    #[must_use]
    pub fn get_plan(&self, plan_id: PlanId) -> Option<Plan> {
        self.plans.get(&plan_id).map(|entry| entry.clone())
    }

    /// Lists the ids of all tracked plans.
    #[must_use]
    pub fn list_plans(&self) -> Vec<PlanId> {
        self.plans.iter().map(|entry| *entry.key()).collect()
    }
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses planner-agent output in either of two supported textual formats:
///
/// ```text
/// 1. [code] Write a function that reverses a string
/// 2. [testing] Verify the function against edge cases
/// ```
///
/// or the Spanish-language step format:
///
/// ```text
/// Paso 1: Codigo - Escribe una funcion
/// Paso 2: Pruebas - Verifica la funcion
/// ```
///
/// Returns `None` if no line in `text` matches either format.
#[must_use]
pub fn parse_plan_text(text: &str) -> Option<Vec<Task>> {
    let numbered = numbered_list_pattern();
    let paso = paso_pattern();

    let mut tasks = Vec::new();
    let mut previous: Option<TaskId> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (index, kind, description) = if let Some(caps) = numbered.captures(line) {
            (
                caps[1].to_string(),
                caps[2].trim().to_string(),
                caps[3].trim().to_string(),
            )
        } else if let Some(caps) = paso.captures(line) {
            (
                caps[1].to_string(),
                caps[2].trim().to_string(),
                caps[3].trim().to_string(),
            )
        } else {
            continue;
        };

        let task_id = TaskId::new(format!("task-{index}"));
        let mut dependencies = HashSet::new();
        if let Some(prev) = &previous {
            dependencies.insert(prev.clone());
        }

        tasks.push(Task::new(
            task_id.clone(),
            description,
            capabilities_for_type(&kind),
            dependencies,
        ));
        previous = Some(task_id);
    }

    if tasks.is_empty() {
        None
    } else {
        Some(tasks)
    }
}

fn numbered_list_pattern() -> Regex {
    Regex::new(r"^(\d+)\.\s*\[([^\]]+)\]\s*(.+)$").expect("valid regex")
}

fn paso_pattern() -> Regex {
    Regex::new(r"(?i)^paso\s+(\d+):\s*([^-]+)-\s*(.+)$").expect("valid regex")
}

/// Maps a planner-supplied step "type" tag to the capability set
/// [`crate::orchestrator`] uses for agent selection.
fn capabilities_for_type(kind: &str) -> HashSet<String> {
    let normalized = kind.trim().to_lowercase();
    let tags: &[&str] = match normalized.as_str() {
        "code" | "codigo" | "código" => &["code_generation", "problem_solving"],
        "testing" | "pruebas" | "test" => &["testing", "verification"],
        "system" | "sistema" => &["system_operations", "execute_command"],
        "echo" => &["echo"],
        "analysis" | "analisis" | "análisis" => &["analysis"],
        _ => &["general_processing"],
    };
    tags.iter().map(|s| (*s).to_string()).collect()
}

/// Single-task heuristic fallback when no structured plan can be produced,
/// mirroring `_internal_task_planning`. Detects a handful of task shapes
/// (Fibonacci sequence generation, echo requests, system/file operations)
/// and otherwise emits one general-processing task for the whole
/// description.
#[must_use]
pub fn internal_task_planning(task_description: &str) -> Vec<Task> {
    let normalized = task_description.to_lowercase();

    let capabilities = if normalized.contains("fibonacci") {
        // Fibonacci requests are common enough in practice to special-case.
        ["code_generation", "problem_solving"]
            .iter()
            .map(|s| (*s).to_string())
            .collect()
    } else if normalized.contains("echo") || normalized.contains("repeat") {
        ["echo"].iter().map(|s| (*s).to_string()).collect()
    } else if contains_any(
        &normalized,
        &["file", "directory", "folder", "process", "command", "system"],
    ) {
        ["system_operations", "execute_command"]
            .iter()
            .map(|s| (*s).to_string())
            .collect()
    } else if contains_any(
        &normalized,
        &["code", "function", "program", "script", "implement"],
    ) {
        ["code_generation", "problem_solving"]
            .iter()
            .map(|s| (*s).to_string())
            .collect()
    } else {
        ["general_processing"].iter().map(|s| (*s).to_string()).collect()
    };

    vec![Task::new(
        TaskId::new("task-1".to_string()),
        task_description.to_string(),
        capabilities,
        HashSet::new(),
    )]
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numbered_bracket_format() {
        let text = "1. [code] Write a reversing function\n2. [testing] Verify edge cases";
        let tasks = parse_plan_text(text).expect("should parse");
        assert_eq!(tasks.len(), 2);
        assert!(tasks[0].required_capabilities.contains("code_generation"));
        assert!(tasks[1].dependencies.contains(&tasks[0].task_id));
    }

    #[test]
    fn parses_paso_format() {
        let text = "Paso 1: Codigo - Escribe una funcion\nPaso 2: Pruebas - Verifica la funcion";
        let tasks = parse_plan_text(text).expect("should parse");
        assert_eq!(tasks.len(), 2);
        assert!(tasks[0].required_capabilities.contains("code_generation"));
        assert!(tasks[1].required_capabilities.contains("testing"));
    }

    #[test]
    fn unparseable_text_returns_none() {
        assert!(parse_plan_text("just some prose, no structure here").is_none());
    }

    #[test]
    fn fibonacci_defaults_to_code_generation() {
        let tasks = internal_task_planning("generate the fibonacci sequence");
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].required_capabilities.contains("code_generation"));
    }

    #[test]
    fn echo_request_maps_to_echo_capability() {
        let tasks = internal_task_planning("please echo this back to me");
        assert!(tasks[0].required_capabilities.contains("echo"));
    }

    #[tokio::test]
    async fn plan_without_backend_uses_internal_heuristic() {
        let planner = Planner::new();
        let plan = planner.plan("echo hello").await.unwrap();
        assert_eq!(plan.tasks.len(), 1);
    }

    #[tokio::test]
    async fn update_task_rejects_unknown_plan() {
        let planner = Planner::new();
        let result = planner.update_task(
            PlanId::generate(),
            &TaskId::new("task-1".to_string()),
            TaskStatus::InProgress,
            None,
            None,
        );
        assert!(matches!(result, Err(CoreError::PlanNotFound { .. })));
    }

    #[tokio::test]
    async fn update_task_transitions_tracked_plan() {
        let planner = Planner::new();
        let plan = planner.plan("echo hello").await.unwrap();
        let task_id = plan.execution_order[0].clone();

        planner
            .update_task(plan.plan_id, &task_id, TaskStatus::InProgress, None, None)
            .unwrap();
        planner
            .update_task(
                plan.plan_id,
                &task_id,
                TaskStatus::Completed,
                Some("done".to_string()),
                None,
            )
            .unwrap();

        let updated = planner.get_plan(plan.plan_id).unwrap();
        assert_eq!(updated.tasks[&task_id].status, TaskStatus::Completed);
    }
}
