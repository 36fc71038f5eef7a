//! The Workflow Orchestrator: turns a task description into a running
//! [`Plan`] executed against registered agents.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use nutype::nutype;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::agent::{AgentResponse, AgentState, ResponseStatus};
use crate::bus::Bus;
use crate::config::RuntimeConfig;
use crate::error::{CoreError, CoreResult};
use crate::message::Context;
use crate::plan::{Plan, PlanId, PlanStatus, Task, TaskId, TaskStatus};
use crate::planner::Planner;

/// Unique identifier for a running [`Workflow`]. Distinct from [`PlanId`] so
/// a plan could in principle be re-run as a fresh workflow, though this
/// crate always derives one from the other.
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into
))]
pub struct WorkflowId(Uuid);

impl WorkflowId {
    #[must_use]
    fn from_plan(plan_id: PlanId) -> Self {
        Self::new(Uuid::from(plan_id))
    }
}

/// +5 for an exact type-tag match.
const SCORE_EXACT_TYPE: i32 = 5;
/// +3 per required capability the agent advertises.
const SCORE_CAPABILITY: i32 = 3;
/// +1 per related-capability partial match.
const SCORE_RELATED: i32 = 1;
/// +30 if the agent is idle.
const SCORE_IDLE: i32 = 30;
/// -20 if the agent is busy (processing).
const SCORE_BUSY: i32 = -20;
/// +25 if `context.preferred_agent` names this agent.
const SCORE_PREFERRED: i32 = 25;
/// +15 domain bonus (e.g. type `code` + capability `code_generation`).
const SCORE_DOMAIN_BONUS: i32 = 15;

/// Tie-break order when two agents score equally.
const TIE_BREAK_PRIORITY: &[&str] = &["code", "system", "memory", "echo"];

/// A running (or finished) execution of a [`Plan`].
#[derive(Debug, Clone)]
pub struct Workflow {
    /// Unique id for this execution.
    pub workflow_id: WorkflowId,
    /// The plan being executed.
    pub plan: Plan,
    /// Per-task result content, populated as steps complete.
    pub step_results: HashMap<TaskId, String>,
    /// Per-task failure detail, populated as steps fail.
    pub step_errors: HashMap<TaskId, String>,
}

impl Workflow {
    fn new(plan: Plan) -> Self {
        Self {
            workflow_id: WorkflowId::from_plan(plan.plan_id),
            plan,
            step_results: HashMap::new(),
            step_errors: HashMap::new(),
        }
    }
}

/// Executes [`Plan`]s against registered agents, selecting an agent per
/// step and consolidating results.
pub struct Orchestrator {
    bus: Arc<Bus>,
    planner: Arc<Planner>,
    config: RuntimeConfig,
    workflows: DashMap<WorkflowId, Workflow>,
    cancellations: DashMap<WorkflowId, CancellationToken>,
}

impl Orchestrator {
    /// Builds an orchestrator over `bus` and `planner`, using `config` for
    /// timeouts and concurrency limits.
    #[must_use]
    pub fn new(bus: Arc<Bus>, planner: Arc<Planner>, config: RuntimeConfig) -> Self {
        Self {
            bus,
            planner,
            config,
            workflows: DashMap::new(),
            cancellations: DashMap::new(),
        }
    }

    /// Summary info for every agent the bus has registered, mirroring
    /// `get_agent_status()`.
    #[must_use]
    pub fn get_agent_status(&self) -> Vec<crate::agent::AgentInfo> {
        self.bus.registry().list_all()
    }

    /// Plans and fully executes `task_description`, returning a single
    /// consolidated [`AgentResponse`].
    ///
    /// # Errors
    ///
    /// Propagates planner and workflow-execution errors.
    #[instrument(skip(self, context))]
    pub async fn execute_task(
        &self,
        task_description: &str,
        context: Context,
    ) -> CoreResult<AgentResponse> {
        let plan = self.plan_workflow(task_description).await?;
        self.execute_workflow(plan.plan_id, context).await
    }

    /// Builds and registers a [`Plan`] without executing it.
    ///
    /// # Errors
    ///
    /// Propagates [`Planner::plan`] errors.
    pub async fn plan_workflow(&self, task_description: &str) -> CoreResult<Plan> {
        let plan = self.planner.plan(task_description).await?;
        let workflow = Workflow::new(plan.clone());
        self.workflows.insert(workflow.workflow_id, workflow);
        Ok(plan)
    }

    /// Executes a previously planned workflow, running steps in
    /// `execution_order` sequentially.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PlanNotFound`] if `plan_id` has no tracked
    /// workflow; otherwise propagates per-step selection/dispatch errors.
    #[instrument(skip(self, context))]
    pub async fn execute_workflow(
        &self,
        plan_id: PlanId,
        context: Context,
    ) -> CoreResult<AgentResponse> {
        let workflow_id = WorkflowId::from_plan(plan_id);
        let cancellation = CancellationToken::new();
        self.cancellations.insert(workflow_id, cancellation.clone());

        {
            let mut workflow = self
                .workflows
                .get_mut(&workflow_id)
                .ok_or(CoreError::PlanNotFound { plan_id })?;
            workflow.plan.status = PlanStatus::Running;
            workflow.plan.started_at = Some(chrono::Utc::now());
        }

        let execution_order = {
            let workflow = self.workflows.get(&workflow_id).unwrap();
            workflow.plan.execution_order.clone()
        };

        let mut failed = false;
        for task_id in &execution_order {
            if cancellation.is_cancelled() {
                self.finish_workflow(workflow_id, PlanStatus::Cancelled);
                self.cancellations.remove(&workflow_id);
                return Ok(AgentResponse {
                    content: "workflow cancelled".to_string(),
                    status: ResponseStatus::Cancelled,
                    metadata: HashMap::new(),
                });
            }

            if failed {
                self.skip_task(workflow_id, task_id);
                continue;
            }

            let has_failed_dep = {
                let workflow = self.workflows.get(&workflow_id).unwrap();
                workflow.plan.has_failed_dependency(task_id)
            };
            if has_failed_dep {
                self.skip_task(workflow_id, task_id);
                continue;
            }

            match self
                .run_step(workflow_id, plan_id, task_id, &context, &cancellation)
                .await
            {
                Ok(()) => {}
                Err(_) => failed = true,
            }
        }

        self.cancellations.remove(&workflow_id);
        let final_status = if failed { PlanStatus::Failed } else { PlanStatus::Completed };
        self.finish_workflow(workflow_id, final_status);

        let workflow = self.workflows.get(&workflow_id).unwrap();
        Ok(consolidate(&workflow))
    }

    fn finish_workflow(&self, workflow_id: WorkflowId, status: PlanStatus) {
        if let Some(mut workflow) = self.workflows.get_mut(&workflow_id) {
            workflow.plan.status = status;
            workflow.plan.ended_at = Some(chrono::Utc::now());
        }
    }

    fn skip_task(&self, workflow_id: WorkflowId, task_id: &TaskId) {
        if let Some(mut workflow) = self.workflows.get_mut(&workflow_id) {
            let plan_id = workflow.plan.plan_id;
            if let Some(task) = workflow.plan.tasks.get_mut(task_id) {
                let _ = task.transition(TaskStatus::Skipped, None, None);
            }
            let _ = self.planner.update_task(plan_id, task_id, TaskStatus::Skipped, None, None);
        }
    }

    async fn run_step(
        &self,
        workflow_id: WorkflowId,
        plan_id: PlanId,
        task_id: &TaskId,
        outer_context: &Context,
        cancellation: &CancellationToken,
    ) -> CoreResult<()> {
        let task = {
            let workflow = self.workflows.get(&workflow_id).unwrap();
            workflow.plan.tasks[task_id].clone()
        };

        let agent = match self.select_agent(&task, outer_context) {
            Ok(agent) => agent,
            Err(err) => {
                let detail = err.to_string();
                let mut workflow = self.workflows.get_mut(&workflow_id).unwrap();
                if let Some(t) = workflow.plan.tasks.get_mut(task_id) {
                    let _ = t.transition(TaskStatus::InProgress, None, None);
                    let _ = t.transition(TaskStatus::Failed, None, Some(detail.clone()));
                }
                workflow.step_errors.insert(task_id.clone(), detail.clone());
                drop(workflow);
                let _ = self.planner.update_task(plan_id, task_id, TaskStatus::InProgress, None, None);
                let _ = self.planner.update_task(plan_id, task_id, TaskStatus::Failed, None, Some(detail));
                return Err(err);
            }
        };

        {
            let mut workflow = self.workflows.get_mut(&workflow_id).unwrap();
            if let Some(t) = workflow.plan.tasks.get_mut(task_id) {
                t.assigned_agent = Some(agent.name.clone());
                let _ = t.transition(TaskStatus::InProgress, None, None);
            }
        }
        let _ = self
            .planner
            .update_task(plan_id, task_id, TaskStatus::InProgress, None, None);

        let prompt = self.build_step_prompt(&workflow_id, &task);

        let request = self.bus.send_request(
            "orchestrator",
            &agent.name,
            prompt,
            outer_context.clone(),
            self.config.step_timeout(),
        );

        let outcome = tokio::select! {
            result = request => result,
            () = cancellation.cancelled() => Err(CoreError::Cancelled),
        };

        let mut workflow = self.workflows.get_mut(&workflow_id).unwrap();
        match outcome {
            Ok(response) if response.kind != crate::message::MessageKind::Error => {
                if let Some(t) = workflow.plan.tasks.get_mut(task_id) {
                    let _ = t.transition(TaskStatus::Completed, Some(response.content.clone()), None);
                }
                workflow.step_results.insert(task_id.clone(), response.content.clone());
                drop(workflow);
                let _ = self.planner.update_task(
                    plan_id,
                    task_id,
                    TaskStatus::Completed,
                    Some(response.content),
                    None,
                );
                Ok(())
            }
            Ok(response) => {
                let detail = response.content;
                if let Some(t) = workflow.plan.tasks.get_mut(task_id) {
                    let _ = t.transition(TaskStatus::Failed, None, Some(detail.clone()));
                }
                workflow.step_errors.insert(task_id.clone(), detail.clone());
                drop(workflow);
                let _ = self.planner.update_task(
                    plan_id,
                    task_id,
                    TaskStatus::Failed,
                    None,
                    Some(detail.clone()),
                );
                Err(CoreError::AgentError { agent_id: agent.name, detail })
            }
            Err(err) => {
                let detail = err.to_string();
                if let Some(t) = workflow.plan.tasks.get_mut(task_id) {
                    let _ = t.transition(TaskStatus::Failed, None, Some(detail.clone()));
                }
                workflow.step_errors.insert(task_id.clone(), detail.clone());
                drop(workflow);
                let _ = self.planner.update_task(
                    plan_id,
                    task_id,
                    TaskStatus::Failed,
                    None,
                    Some(detail),
                );
                Err(err)
            }
        }
    }

    fn build_step_prompt(&self, workflow_id: &WorkflowId, task: &Task) -> String {
        let workflow = self.workflows.get(workflow_id).unwrap();
        if task.dependencies.is_empty() || workflow.step_results.is_empty() {
            return task.description.clone();
        }
        let mut prompt = task.description.clone();
        prompt.push_str("\n\nCONTEXT FROM PREVIOUS STEPS:\n");
        for dep in &task.dependencies {
            if let Some(result) = workflow.step_results.get(dep) {
                prompt.push_str(&format!("- {dep}: {result}\n"));
            }
        }
        prompt
    }

    /// Scores every registered agent against `task` and returns the winner.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoAgentAvailable`] if no agent scores above
    /// zero and no `general`/`default`-capability fallback exists.
    pub fn select_agent(
        &self,
        task: &Task,
        context: &Context,
    ) -> CoreResult<SelectedAgent> {
        let preferred = context
            .get("preferred_agent")
            .and_then(crate::message::ContextValue::as_str);
        let step_type = infer_step_type(task);

        let candidates = self.get_agent_status();
        let mut best: Option<(i32, SelectedAgent)> = None;

        for agent in &candidates {
            let score = score_agent(agent, task, &step_type, preferred);
            if score <= 0 {
                continue;
            }
            let candidate = SelectedAgent { name: agent.name.clone(), score };
            best = Some(match best {
                None => (score, candidate),
                Some((best_score, best_candidate)) => {
                    if score > best_score
                        || (score == best_score && ranks_higher(&candidate.name, &best_candidate.name))
                    {
                        (score, candidate)
                    } else {
                        (best_score, best_candidate)
                    }
                }
            });
        }

        if let Some((_, selected)) = best {
            return Ok(selected);
        }

        if let Some(agent) = candidates
            .iter()
            .find(|a| a.capabilities.contains("general") || a.capabilities.contains("default"))
        {
            return Ok(SelectedAgent { name: agent.name.clone(), score: 0 });
        }

        warn!(task = %task.description, "no agent available for step");
        Err(CoreError::NoAgentAvailable {
            reason: format!("no agent satisfies capabilities {:?}", task.required_capabilities),
        })
    }

    /// Marks a workflow as cancelled; any in-flight step request is
    /// cancelled and remaining steps are not started.
    #[must_use]
    pub fn cancel_workflow(&self, plan_id: PlanId) -> bool {
        let workflow_id = WorkflowId::from_plan(plan_id);
        if let Some(token) = self.cancellations.get(&workflow_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Returns the current state of a tracked plan/workflow.
    #[must_use]
    pub fn get_workflow_status(&self, plan_id: PlanId) -> Option<Plan> {
        let workflow_id = WorkflowId::from_plan(plan_id);
        self.workflows.get(&workflow_id).map(|w| w.plan.clone())
    }

    /// Lists tracked workflows, optionally filtered by status.
    #[must_use]
    pub fn list_workflows(&self, status: Option<PlanStatus>) -> Vec<Plan> {
        self.workflows
            .iter()
            .map(|entry| entry.value().plan.clone())
            .filter(|plan| status.is_none_or(|s| plan.status == s))
            .collect()
    }
}

/// The agent [`Orchestrator::select_agent`] chose for a step, and the score
/// it won with (useful for tests and diagnostics).
#[derive(Debug, Clone)]
pub struct SelectedAgent {
    /// The winning agent's name.
    pub name: String,
    /// The score it won with.
    pub score: i32,
}

fn infer_step_type(task: &Task) -> Option<String> {
    for tag in ["code", "system", "memory", "echo"] {
        if task.required_capabilities.iter().any(|c| c.contains(tag)) {
            return Some(tag.to_string());
        }
    }
    None
}

fn score_agent(
    agent: &crate::agent::AgentInfo,
    task: &Task,
    step_type: &Option<String>,
    preferred: Option<&str>,
) -> i32 {
    let mut score = 0;

    if let Some(step_type) = step_type {
        if agent.capabilities.contains(step_type) {
            score += SCORE_EXACT_TYPE;
        }
    }

    for capability in &task.required_capabilities {
        if agent.capabilities.contains(capability) {
            score += SCORE_CAPABILITY;
        } else if agent
            .capabilities
            .iter()
            .any(|c| c.contains(capability.as_str()) || capability.contains(c.as_str()))
        {
            score += SCORE_RELATED;
        }
    }

    score += match agent.state {
        AgentState::Idle => SCORE_IDLE,
        AgentState::Processing => SCORE_BUSY,
        AgentState::Error => 0,
    };

    if preferred == Some(agent.name.as_str()) {
        score += SCORE_PREFERRED;
    }

    if let Some(step_type) = step_type {
        let domain_capability = match step_type.as_str() {
            "code" => Some("code_generation"),
            "system" => Some("system_operations"),
            _ => None,
        };
        if let Some(domain_capability) = domain_capability {
            if agent.capabilities.contains(domain_capability) {
                score += SCORE_DOMAIN_BONUS;
            }
        }
    }

    score
}

/// Whether `a` should win a tie over `b`, per `TIE_BREAK_PRIORITY`. Names
/// absent from the list rank lowest and below each other arbitrarily but
/// deterministically (lexicographic), so ties never depend on hash order.
fn ranks_higher(a: &str, b: &str) -> bool {
    let rank = |name: &str| {
        TIE_BREAK_PRIORITY
            .iter()
            .position(|p| *p == name)
            .unwrap_or(TIE_BREAK_PRIORITY.len())
    };
    match rank(a).cmp(&rank(b)) {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Greater => false,
        std::cmp::Ordering::Equal => a < b,
    }
}

/// Builds the consolidated response for a finished workflow: original task,
/// one line per step, then per-step content with code-first suppression of
/// plain echoes.
fn consolidate(workflow: &Workflow) -> AgentResponse {
    let plan = &workflow.plan;
    let mut summary = format!("Task: {}\n", plan.original_task);

    let mut has_code_step = false;
    for task_id in &plan.execution_order {
        let task = &plan.tasks[task_id];
        if task.required_capabilities.contains("code_generation") && task.status == TaskStatus::Completed {
            has_code_step = true;
        }
        let truncated: String = task.description.chars().take(60).collect();
        summary.push_str(&format!(
            "- Step {}: {} ({:?}, agent: {})\n",
            task_id,
            truncated,
            task.status,
            task.assigned_agent.as_deref().unwrap_or("none"),
        ));
    }

    summary.push('\n');
    for task_id in &plan.execution_order {
        let task = &plan.tasks[task_id];
        let is_echo_only = task.required_capabilities.len() == 1
            && task.required_capabilities.contains("echo");
        if has_code_step && is_echo_only {
            continue;
        }
        if let Some(result) = workflow.step_results.get(task_id) {
            summary.push_str(result);
            summary.push('\n');
        } else if let Some(error) = workflow.step_errors.get(task_id) {
            summary.push_str(&format!("[failed: {error}]\n"));
        }
    }

    let status = match plan.status {
        PlanStatus::Completed => ResponseStatus::Success,
        PlanStatus::Cancelled => ResponseStatus::Cancelled,
        _ => ResponseStatus::Error,
    };

    info!(plan_id = %plan.plan_id, status = ?plan.status, "workflow finished");

    AgentResponse {
        content: summary,
        status,
        metadata: HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{CodeAgent, EchoAgent, SystemAgent};
    use std::collections::HashSet;

    fn build_orchestrator() -> Orchestrator {
        let bus = Arc::new(Bus::new());
        bus.register_agent(Arc::new(EchoAgent::new()));
        bus.register_agent(Arc::new(CodeAgent::new()));
        bus.register_agent(Arc::new(SystemAgent::new()));
        Orchestrator::new(bus, Arc::new(Planner::new()), RuntimeConfig::default())
    }

    #[test]
    fn code_capability_outscores_echo_for_a_code_step() {
        let orchestrator = build_orchestrator();
        let task = Task::new(
            TaskId::new("t1".to_string()),
            "write a function",
            ["code_generation".to_string()].into_iter().collect(),
            HashSet::new(),
        );
        let selected = orchestrator.select_agent(&task, &Context::new()).unwrap();
        assert_eq!(selected.name, "code");
    }

    #[test]
    fn preferred_agent_context_wins_a_close_tie() {
        let orchestrator = build_orchestrator();
        let task = Task::new(
            TaskId::new("t1".to_string()),
            "do general work",
            HashSet::new(),
            HashSet::new(),
        );
        let mut context = Context::new();
        context.insert("preferred_agent".to_string(), "echo".into());
        let selected = orchestrator.select_agent(&task, &context).unwrap();
        assert_eq!(selected.name, "echo");
    }

    #[test]
    fn no_capable_agent_is_an_error() {
        let bus = Arc::new(Bus::new());
        let orchestrator = Orchestrator::new(bus, Arc::new(Planner::new()), RuntimeConfig::default());
        let task = Task::new(
            TaskId::new("t1".to_string()),
            "do anything",
            ["code_generation".to_string()].into_iter().collect(),
            HashSet::new(),
        );
        let result = orchestrator.select_agent(&task, &Context::new());
        assert!(matches!(result, Err(CoreError::NoAgentAvailable { .. })));
    }

    #[tokio::test]
    async fn execute_task_end_to_end_succeeds_for_an_echo_request() {
        let orchestrator = build_orchestrator();
        orchestrator.bus.start().await;

        let response = orchestrator
            .execute_task("please echo hello world", Context::new())
            .await
            .unwrap();

        assert!(response.content.contains("Task: please echo hello world"));
        orchestrator.bus.stop().await;
    }

    #[tokio::test]
    async fn completed_workflow_has_only_completed_tasks() {
        let orchestrator = build_orchestrator();
        orchestrator.bus.start().await;

        let plan = orchestrator.plan_workflow("please echo hello").await.unwrap();
        orchestrator.execute_workflow(plan.plan_id, Context::new()).await.unwrap();

        let status = orchestrator.get_workflow_status(plan.plan_id).unwrap();
        assert!(status
            .tasks
            .values()
            .all(|t| matches!(t.status, TaskStatus::Completed | TaskStatus::Skipped)));
        orchestrator.bus.stop().await;
    }
}
