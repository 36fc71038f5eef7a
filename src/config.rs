//! Runtime configuration, loaded from an optional TOML file and falling
//! back to documented defaults: a plain serde-`Deserialize` struct with a
//! `Default` impl, loaded with `toml::from_str`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration for the bus, planner and orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How long [`crate::bus::Bus::send_request`] waits for a correlated
    /// response before giving up. Default 10s.
    pub send_request_timeout_ms: u64,
    /// How long the orchestrator waits for a single workflow step to
    /// complete. Default 15s.
    pub step_timeout_ms: u64,
    /// How long the planner waits for a [`crate::planner::PlannerBackend`]
    /// to produce plan text before falling back to the internal heuristic.
    /// Default 30s.
    pub planner_timeout_ms: u64,
    /// Maximum number of workflow steps the orchestrator may have
    /// in-flight at once. Default 3.
    pub max_concurrent_tasks: usize,
    /// Maximum number of turns kept in a dispatcher's conversation history
    /// before the oldest is evicted. Default 50.
    pub max_conversation_history: usize,
    /// Relevance threshold applied when enriching a query with memory.
    /// Default 0.15.
    pub memory_enrichment_threshold: f64,
    /// Importance threshold above which a memory is returned directly
    /// instead of merely enriching context. Default 0.8.
    pub memory_direct_response_threshold: f64,
}

impl RuntimeConfig {
    /// `send_request_timeout_ms` as a [`Duration`].
    #[must_use]
    pub fn send_request_timeout(&self) -> Duration {
        Duration::from_millis(self.send_request_timeout_ms)
    }

    /// `step_timeout_ms` as a [`Duration`].
    #[must_use]
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    /// `planner_timeout_ms` as a [`Duration`].
    #[must_use]
    pub fn planner_timeout(&self) -> Duration {
        Duration::from_millis(self.planner_timeout_ms)
    }

    /// Parses a [`RuntimeConfig`] from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if `text` is not valid TOML or doesn't match this
    /// struct's shape.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            send_request_timeout_ms: 10_000,
            step_timeout_ms: 15_000,
            planner_timeout_ms: 30_000,
            max_concurrent_tasks: 3,
            max_conversation_history: 50,
            memory_enrichment_threshold: crate::memory::ENRICHMENT_THRESHOLD,
            memory_direct_response_threshold: crate::memory::DIRECT_RESPONSE_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = RuntimeConfig::default();
        assert_eq!(config.send_request_timeout(), Duration::from_secs(10));
        assert_eq!(config.step_timeout(), Duration::from_secs(15));
        assert_eq!(config.max_concurrent_tasks, 3);
        assert_eq!(config.max_conversation_history, 50);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config = RuntimeConfig::from_toml("max_concurrent_tasks = 8\n").unwrap();
        assert_eq!(config.max_concurrent_tasks, 8);
        assert_eq!(config.max_conversation_history, 50);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(RuntimeConfig::from_toml("not = [valid").is_err());
    }
}
