//! Conversational memory lookup used by the dispatcher's enrichment step.
//!
//! Grounded in `main_assistant.py::_enrich_with_memory`, which calls out to
//! an external `memory_manager.search_memories(query, limit, threshold)`.
//! This crate models that boundary as a trait so the dispatcher is testable
//! without a real memory backend, and ships a deterministic in-memory
//! implementation for tests and the demo binary.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single memory record returned by a [`MemoryProvider`] search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique id of the stored memory.
    pub id: String,
    /// The remembered content.
    pub content: String,
    /// Relevance/confidence score in `[0.0, 1.0]` the provider assigned.
    pub importance: f64,
    /// A free-text category (e.g. `"conversation"`, `"fact"`).
    pub memory_type: String,
    /// Arbitrary provider-specific metadata.
    pub metadata: HashMap<String, String>,
}

/// A source of conversational memory, searchable by relevance and
/// importance.
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    /// Returns up to `limit` memories relevant to `query` with importance at
    /// or above `threshold`, optionally restricted to `memory_type`.
    async fn search(
        &self,
        query: &str,
        limit: usize,
        threshold: f64,
        memory_type: Option<&str>,
    ) -> Vec<MemoryRecord>;

    /// Persists `content` as a new memory. Providers that don't need
    /// durability may no-op.
    async fn store(&self, content: &str, memory_type: &str, importance: f64);
}

/// An in-memory [`MemoryProvider`] backed by a flat list, doing simple
/// substring relevance scoring. Intended for tests and the demo binary, not
/// production use.
#[derive(Default)]
pub struct InMemoryMemoryProvider {
    records: tokio::sync::Mutex<Vec<MemoryRecord>>,
}

impl InMemoryMemoryProvider {
    /// Builds an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the provider with a record up front, useful in tests.
    #[must_use]
    pub fn with_seed(mut self, record: MemoryRecord) -> Self {
        self.records.get_mut().push(record);
        self
    }
}

#[async_trait]
impl MemoryProvider for InMemoryMemoryProvider {
    async fn search(
        &self,
        query: &str,
        limit: usize,
        threshold: f64,
        memory_type: Option<&str>,
    ) -> Vec<MemoryRecord> {
        let query = query.to_lowercase();
        let records = self.records.lock().await;
        let mut matches: Vec<MemoryRecord> = records
            .iter()
            .filter(|record| record.importance >= threshold)
            .filter(|record| memory_type.is_none_or(|t| record.memory_type == t))
            .filter(|record| record.content.to_lowercase().contains(&query))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        matches.truncate(limit);
        matches
    }

    async fn store(&self, content: &str, memory_type: &str, importance: f64) {
        let mut records = self.records.lock().await;
        records.push(MemoryRecord {
            id: format!("mem-{}", records.len() + 1),
            content: content.to_string(),
            importance,
            memory_type: memory_type.to_string(),
            metadata: HashMap::new(),
        });
    }
}

/// Relevance threshold `_enrich_with_memory` applies before surfacing a
/// memory to the dispatcher's classification pipeline.
pub const ENRICHMENT_THRESHOLD: f64 = 0.15;

/// Importance threshold above which a single highly relevant memory is
/// returned directly rather than merely enriching the query's context.
pub const DIRECT_RESPONSE_THRESHOLD: f64 = 0.8;
