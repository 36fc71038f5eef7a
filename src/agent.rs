//! The contract every bus endpoint satisfies.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::Context;

/// Unique, stable identifier for an agent.
///
/// Wraps a `Uuid` rather than a bare `String`, but agents are usually
/// addressed by a short human-chosen name (`"echo"`, `"code"`), so
/// [`AgentId::from_name`] derives a stable id deterministically from that
/// name instead of generating a random one.
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into
))]
pub struct AgentId(Uuid);

impl AgentId {
    /// Generates a new random agent id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }

    /// Derives a stable id from a human-readable name, so the same name
    /// always maps to the same id across registrations.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self::new(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
    }
}

/// The lifecycle state an [`Agent`] reports: idle -> processing -> {idle,
/// error}; error -> idle. Agents own and
/// mutate their own state; the bus never reads or writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    /// Not currently handling a request.
    Idle,
    /// Handling a request.
    Processing,
    /// The last request ended in an error; must transition back to idle.
    Error,
}

impl AgentState {
    /// Whether `self -> next` is an allowed transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Processing)
                | (Self::Processing, Self::Idle)
                | (Self::Processing, Self::Error)
                | (Self::Error, Self::Idle)
        )
    }
}

/// The status of an [`AgentResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// The agent completed the request successfully.
    Success,
    /// The agent failed to complete the request.
    Error,
    /// The agent did not respond before a deadline.
    Timeout,
    /// The request was abandoned before completion.
    Cancelled,
}

/// The standard response structure every [`Agent::process`] call returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Main content of the response.
    pub content: String,
    /// Outcome of the request.
    pub status: ResponseStatus,
    /// Additional metadata about the response (e.g. `error` kind tags).
    pub metadata: HashMap<String, String>,
}

impl AgentResponse {
    /// Builds a successful response with no metadata.
    #[must_use]
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            status: ResponseStatus::Success,
            metadata: HashMap::new(),
        }
    }

    /// Builds an error response, tagging `metadata["error"]` with `kind`.
    #[must_use]
    pub fn error(content: impl Into<String>, kind: &str) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("error".to_string(), kind.to_string());
        Self {
            content: content.into(),
            status: ResponseStatus::Error,
            metadata,
        }
    }

    /// Whether this response represents success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

/// Summary information about an agent, mirroring `BaseAgent.get_info()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    /// The agent's id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Capabilities the agent advertises.
    pub capabilities: HashSet<String>,
    /// Current lifecycle state.
    pub state: AgentState,
}

/// The contract every endpoint registered with the [`crate::bus::Bus`]
/// satisfies.
///
/// `process` is potentially long-running; callers must treat it as
/// suspending and expect a single value back. Implementors own their
/// `state` field and are responsible for driving it through the
/// idle/processing/error transitions themselves — the bus only reads
/// `capabilities()` and invokes `process`.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identifier for this agent.
    fn agent_id(&self) -> AgentId;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// Human-readable description of what the agent does.
    fn description(&self) -> &str {
        ""
    }

    /// The set of capability tags this agent advertises.
    fn capabilities(&self) -> HashSet<String>;

    /// The agent's current lifecycle state.
    fn state(&self) -> AgentState;

    /// Processes a query, returning a single [`AgentResponse`].
    async fn process(&self, query: &str, context: &Context) -> AgentResponse;

    /// Summary information about this agent (id/name/description/capabilities/state).
    fn info(&self) -> AgentInfo {
        AgentInfo {
            id: self.agent_id().to_string(),
            name: self.name().to_string(),
            description: self.description().to_string(),
            capabilities: self.capabilities(),
            state: self.state(),
        }
    }
}
