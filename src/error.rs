//! Error types for the agent mesh core.

use thiserror::Error;

use crate::plan::{PlanId, TaskId, TaskStatus};

/// Error taxonomy shared by `AgentResponse.status` and the `metadata.error`
/// field of ERROR messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The bus could not locate the message's receiver.
    #[error("agent not found: {agent_id}")]
    RecipientNotFound {
        /// The id that was looked up.
        agent_id: String,
    },

    /// No response arrived before the deadline.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The operation was explicitly cancelled by its caller.
    #[error("operation cancelled")]
    Cancelled,

    /// The orchestrator could not match any registered agent to a step.
    #[error("no agent available for step: {reason}")]
    NoAgentAvailable {
        /// Human-readable detail about what was required.
        reason: String,
    },

    /// A plan failed its own invariants (cycle, unknown capability, empty tasks).
    #[error("invalid plan {plan_id}: {reason}")]
    InvalidPlan {
        /// The plan that failed validation.
        plan_id: PlanId,
        /// Why it was rejected.
        reason: String,
    },

    /// A downstream `process` call reported `status != success`.
    #[error("agent {agent_id} reported an error: {detail}")]
    AgentError {
        /// The agent that reported failure.
        agent_id: String,
        /// The detail it reported.
        detail: String,
    },

    /// An illegal task status transition was attempted.
    #[error("task {task_id} cannot transition from {from:?} to {to:?}")]
    InvalidTaskTransition {
        /// The task whose transition was rejected.
        task_id: TaskId,
        /// The status it was in.
        from: TaskStatus,
        /// The status that was requested.
        to: TaskStatus,
    },

    /// An unreferenced plan or workflow id was looked up.
    #[error("plan not found: {plan_id}")]
    PlanNotFound {
        /// The plan id that was looked up.
        plan_id: PlanId,
    },

    /// Something failed that no other variant describes; always logged.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The lowercase taxonomy tag used on the wire (`metadata.error`).
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RecipientNotFound { .. } => "recipient_not_found",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::NoAgentAvailable { .. } => "no_agent_available",
            Self::InvalidPlan { .. } => "invalid_plan",
            Self::AgentError { .. } => "agent_error",
            Self::InvalidTaskTransition { .. } | Self::PlanNotFound { .. } => "internal_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// Convenience alias used throughout the crate.
pub type CoreResult<T> = Result<T, CoreError>;
