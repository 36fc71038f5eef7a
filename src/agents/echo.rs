//! Grounded in `echo_agent.py`: the simplest possible agent, used mainly to
//! exercise the bus and as the orchestrator's fallback capability.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;

use crate::agent::{Agent, AgentId, AgentResponse, AgentState};
use crate::message::Context;

/// Echoes its input back, optionally prefixed.
pub struct EchoAgent {
    id: AgentId,
    state: AtomicU8,
}

impl EchoAgent {
    /// Builds a new echo agent with a stable id derived from `"echo"`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: AgentId::from_name("echo"),
            state: AtomicU8::new(state_to_u8(AgentState::Idle)),
        }
    }
}

impl Default for EchoAgent {
    fn default() -> Self {
        Self::new()
    }
}

fn state_to_u8(state: AgentState) -> u8 {
    match state {
        AgentState::Idle => 0,
        AgentState::Processing => 1,
        AgentState::Error => 2,
    }
}

fn u8_to_state(value: u8) -> AgentState {
    match value {
        1 => AgentState::Processing,
        2 => AgentState::Error,
        _ => AgentState::Idle,
    }
}

#[async_trait]
impl Agent for EchoAgent {
    fn agent_id(&self) -> AgentId {
        self.id
    }

    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Repeats back whatever it is given; useful for testing the bus."
    }

    fn capabilities(&self) -> HashSet<String> {
        ["echo".to_string(), "general_processing".to_string()]
            .into_iter()
            .collect()
    }

    fn state(&self) -> AgentState {
        u8_to_state(self.state.load(Ordering::SeqCst))
    }

    async fn process(&self, query: &str, _context: &Context) -> AgentResponse {
        self.state.store(state_to_u8(AgentState::Processing), Ordering::SeqCst);
        let response = AgentResponse::success(query.to_string());
        self.state.store(state_to_u8(AgentState::Idle), Ordering::SeqCst);
        response
    }
}
