//! Agent registration and capability lookup.
//!
//! A `DashMap<AgentId, Arc<dyn Agent>>` plus a capability index kept in sync
//! on every register/unregister, so capability lookups never scan the whole
//! table.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::agent::{Agent, AgentId, AgentInfo};

/// Tracks registered agents and a capability -> agent-ids index, so the
/// orchestrator can ask "who can do X" without scanning every agent.
#[derive(Default)]
pub struct AgentRegistry {
    agents: DashMap<AgentId, Arc<dyn Agent>>,
    capability_index: DashMap<String, HashSet<AgentId>>,
}

impl AgentRegistry {
    /// Builds an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `agent`, indexing it under every capability it advertises.
    /// Re-registering an already-known [`AgentId`] is a no-op: the existing
    /// entry and its index rows are left untouched, and the duplicate is
    /// logged.
    pub fn register(&self, agent: Arc<dyn Agent>) {
        let agent_id = agent.agent_id();

        if self.agents.contains_key(&agent_id) {
            warn!(agent = agent.name(), %agent_id, "ignoring duplicate agent registration");
            return;
        }

        let capabilities = agent.capabilities();
        debug!(agent = agent.name(), capabilities = ?capabilities, "registering agent");
        self.agents.insert(agent_id, agent);
        for capability in capabilities {
            self.capability_index.entry(capability).or_default().insert(agent_id);
        }
    }

    /// Removes an agent and its capability index entries.
    pub fn unregister(&self, agent_id: AgentId) {
        if let Some((_, agent)) = self.agents.remove(&agent_id) {
            for capability in agent.capabilities() {
                if let Some(mut ids) = self.capability_index.get_mut(&capability) {
                    ids.remove(&agent_id);
                }
            }
        }
    }

    /// Looks up a registered agent by id.
    #[must_use]
    pub fn get(&self, agent_id: AgentId) -> Option<Arc<dyn Agent>> {
        self.agents.get(&agent_id).map(|entry| Arc::clone(&entry))
    }

    /// Looks up a registered agent by its human-readable name.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents
            .iter()
            .find(|entry| entry.value().name() == name)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Returns every agent id registered for `capability`.
    #[must_use]
    pub fn find_by_capability(&self, capability: &str) -> Vec<AgentId> {
        self.capability_index
            .get(capability)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Summaries for every registered agent.
    #[must_use]
    pub fn list_all(&self) -> Vec<AgentInfo> {
        self.agents.iter().map(|entry| entry.value().info()).collect()
    }

    /// Number of registered agents.
    #[must_use]
    pub fn count(&self) -> usize {
        self.agents.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::agent::{AgentResponse, AgentState};
    use crate::message::Context;

    struct StubAgent {
        id: AgentId,
        name: String,
        capabilities: HashSet<String>,
    }

    #[async_trait]
    impl Agent for StubAgent {
        fn agent_id(&self) -> AgentId {
            self.id
        }
        fn name(&self) -> &str {
            &self.name
        }
        fn capabilities(&self) -> HashSet<String> {
            self.capabilities.clone()
        }
        fn state(&self) -> AgentState {
            AgentState::Idle
        }
        async fn process(&self, _query: &str, _context: &Context) -> AgentResponse {
            AgentResponse::success("stub")
        }
    }

    fn stub(name: &str, capabilities: &[&str]) -> Arc<dyn Agent> {
        Arc::new(StubAgent {
            id: AgentId::from_name(name),
            name: name.to_string(),
            capabilities: capabilities.iter().map(|s| (*s).to_string()).collect(),
        })
    }

    #[test]
    fn find_by_capability_returns_registered_agents() {
        let registry = AgentRegistry::new();
        registry.register(stub("echo", &["echo"]));
        registry.register(stub("code", &["code_generation"]));

        let ids = registry.find_by_capability("code_generation");
        assert_eq!(ids, vec![AgentId::from_name("code")]);
    }

    #[test]
    fn reregistering_the_same_id_is_a_no_op() {
        let registry = AgentRegistry::new();
        registry.register(stub("echo", &["echo"]));
        registry.register(stub("echo", &["code_generation"]));

        assert_eq!(registry.find_by_capability("echo").len(), 1);
        assert!(registry.find_by_capability("code_generation").is_empty());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn unregister_removes_from_index_and_map() {
        let registry = AgentRegistry::new();
        let id = AgentId::from_name("echo");
        registry.register(stub("echo", &["echo"]));
        registry.unregister(id);

        assert!(registry.get(id).is_none());
        assert!(registry.find_by_capability("echo").is_empty());
    }
}
