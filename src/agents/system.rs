//! Grounded in `system_agent.py`'s capability list: executing commands,
//! reading/writing/listing files, and reporting system/process info. This
//! stand-in never touches the real filesystem or spawns processes — it
//! acknowledges the operation requested so the orchestrator and dispatcher
//! have a real `system_operations` endpoint to route to in tests.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::agent::{Agent, AgentId, AgentResponse, AgentState};
use crate::message::Context;

/// Handles system/file/process operations.
pub struct SystemAgent {
    id: AgentId,
}

impl SystemAgent {
    /// Builds a new system agent with a stable id derived from `"system"`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: AgentId::from_name("system"),
        }
    }
}

impl Default for SystemAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for SystemAgent {
    fn agent_id(&self) -> AgentId {
        self.id
    }

    fn name(&self) -> &str {
        "system"
    }

    fn description(&self) -> &str {
        "Executes system operations: commands, file management, process info."
    }

    fn capabilities(&self) -> HashSet<String> {
        [
            "execute_command",
            "read_file",
            "write_file",
            "list_files",
            "system_info",
            "process_info",
            "system_operations",
            "file_management",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    fn state(&self) -> AgentState {
        AgentState::Idle
    }

    async fn process(&self, query: &str, _context: &Context) -> AgentResponse {
        AgentResponse::success(format!("acknowledged system operation: {query}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acknowledges_the_requested_operation() {
        let agent = SystemAgent::new();
        let response = agent.process("list files in /tmp", &Context::new()).await;
        assert!(response.content.contains("list files in /tmp"));
    }

    #[test]
    fn advertises_system_capabilities() {
        let agent = SystemAgent::new();
        assert!(agent.capabilities().contains("execute_command"));
        assert!(agent.capabilities().contains("file_management"));
    }
}
