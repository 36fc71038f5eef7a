//! Grounded in `code_agent.py`'s capability list: code generation,
//! explanation, improvement, bug fixing, review and answering programming
//! questions. This stand-in does not call out to a real code-generation
//! backend; it returns a templated acknowledgement so the orchestrator and
//! dispatcher have something concrete to route to and consolidate results
//! from in tests.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::agent::{Agent, AgentId, AgentResponse, AgentState};
use crate::message::Context;

/// Handles code-generation and code-related queries.
pub struct CodeAgent {
    id: AgentId,
}

impl CodeAgent {
    /// Builds a new code agent with a stable id derived from `"code"`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: AgentId::from_name("code"),
        }
    }
}

impl Default for CodeAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for CodeAgent {
    fn agent_id(&self) -> AgentId {
        self.id
    }

    fn name(&self) -> &str {
        "code"
    }

    fn description(&self) -> &str {
        "Generates, explains, reviews and fixes code."
    }

    fn capabilities(&self) -> HashSet<String> {
        [
            "code_generation",
            "code_explanation",
            "code_improvement",
            "bug_fixing",
            "code_review",
            "problem_solving",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    fn state(&self) -> AgentState {
        AgentState::Idle
    }

    async fn process(&self, query: &str, context: &Context) -> AgentResponse {
        let language = context
            .get("language")
            .and_then(crate::message::ContextValue::as_str)
            .unwrap_or("python");
        AgentResponse::success(format!(
            "```{language}\n# {query}\n```"
        ))
    }
}
