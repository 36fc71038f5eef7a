//! The Dispatcher: the single entry point for a user query, classifying it
//! and delegating to the right agent or orchestrator.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::agent::{AgentResponse, ResponseStatus};
use crate::bus::Bus;
use crate::config::RuntimeConfig;
use crate::memory::MemoryProvider;
use crate::message::Context;
use crate::orchestrator::Orchestrator;

/// A post-processing side-channel for finalized responses. The original
/// system feeds every response through text-to-speech; that feature is out
/// of scope here, but the hook is kept so `_finalize_response`'s shape
/// survives without pulling in an audio backend.
pub trait TtsSink: Send + Sync {
    /// Called with the final response content after delegation completes.
    fn speak(&self, _content: &str) {}
}

/// The default, silent [`TtsSink`].
#[derive(Default)]
pub struct NullTts;

impl TtsSink for NullTts {}

/// One turn of conversation history, appended by `_finalize_response`.
#[derive(Debug, Clone)]
pub struct Turn {
    /// The user's query.
    pub query: String,
    /// The response content returned.
    pub response: String,
    /// Which agent (or `"direct"`) produced the response.
    pub agent_used: String,
}

/// Where the dispatcher routed a (classified) query.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Direct,
    Agent(String),
    Orchestrator,
}

/// The single entry point for a user query: enriches with memory,
/// classifies, delegates, and finalizes.
pub struct Dispatcher {
    bus: Arc<Bus>,
    orchestrator: Arc<Orchestrator>,
    memory: Arc<dyn MemoryProvider>,
    tts: Arc<dyn TtsSink>,
    config: RuntimeConfig,
    history: tokio::sync::Mutex<VecDeque<Turn>>,
}

impl Dispatcher {
    /// Builds a dispatcher with a no-op TTS sink.
    #[must_use]
    pub fn new(
        bus: Arc<Bus>,
        orchestrator: Arc<Orchestrator>,
        memory: Arc<dyn MemoryProvider>,
        config: RuntimeConfig,
    ) -> Self {
        Self::with_tts(bus, orchestrator, memory, config, Arc::new(NullTts))
    }

    /// Builds a dispatcher with an explicit [`TtsSink`].
    #[must_use]
    pub fn with_tts(
        bus: Arc<Bus>,
        orchestrator: Arc<Orchestrator>,
        memory: Arc<dyn MemoryProvider>,
        config: RuntimeConfig,
        tts: Arc<dyn TtsSink>,
    ) -> Self {
        Self {
            bus,
            orchestrator,
            memory,
            tts,
            config,
            history: tokio::sync::Mutex::new(VecDeque::new()),
        }
    }

    /// The conversation history so far, oldest first.
    pub async fn history(&self) -> Vec<Turn> {
        self.history.lock().await.iter().cloned().collect()
    }

    /// Processes one query end to end, returning a consolidated
    /// [`AgentResponse`]. Cancellation via `cancellation` abandons any
    /// in-flight delegated request and returns `status = cancelled`.
    #[instrument(skip(self, cancellation))]
    pub async fn process(
        &self,
        query: &str,
        cancellation: CancellationToken,
    ) -> AgentResponse {
        let normalized = normalize_query(query);

        let mut context = Context::new();
        let memory_shortcut = self.enrich_with_memory(&normalized, &mut context).await;
        if let Some(shortcut) = memory_shortcut {
            self.finalize(query, &shortcut, "memory").await;
            return shortcut;
        }

        let route = classify(&normalized);

        let delegated = tokio::select! {
            response = self.delegate(&route, query, &context) => response,
            () = cancellation.cancelled() => AgentResponse {
                content: "request cancelled".to_string(),
                status: ResponseStatus::Cancelled,
                metadata: HashMap::new(),
            },
        };

        let agent_used = match &route {
            Route::Direct => "direct",
            Route::Agent(name) => name.as_str(),
            Route::Orchestrator => "orchestrator",
        };
        self.finalize(query, &delegated, agent_used).await;
        delegated
    }

    async fn enrich_with_memory(
        &self,
        normalized: &str,
        context: &mut Context,
    ) -> Option<AgentResponse> {
        let is_code_request = looks_like_code_generation(normalized);
        let memories = self
            .memory
            .search(
                normalized,
                5,
                self.config.memory_enrichment_threshold,
                None,
            )
            .await;

        if memories.is_empty() {
            return None;
        }

        let top = &memories[0];
        if top.importance >= self.config.memory_direct_response_threshold
            && !is_code_request
            && is_direct_memory_answer(&top.content)
        {
            let mut metadata = HashMap::new();
            metadata.insert("direct_memory_response".to_string(), "true".to_string());
            return Some(AgentResponse {
                content: top.content.clone(),
                status: ResponseStatus::Success,
                metadata,
            });
        }

        let summary = memories
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        context.insert("memory_context".to_string(), summary.into());
        None
    }

    async fn delegate(&self, route: &Route, query: &str, context: &Context) -> AgentResponse {
        match route {
            Route::Direct => direct_response(query),
            Route::Orchestrator => self
                .orchestrator
                .execute_task(query, context.clone())
                .await
                .unwrap_or_else(|err| AgentResponse::error(err.to_string(), err.kind())),
            Route::Agent(name) => {
                match self
                    .bus
                    .send_request(
                        "dispatcher",
                        name,
                        query,
                        context.clone(),
                        self.config.send_request_timeout(),
                    )
                    .await
                {
                    Ok(message) if message.kind != crate::message::MessageKind::Error => {
                        AgentResponse::success(message.content)
                    }
                    Ok(message) => AgentResponse::error(message.content, "agent_error"),
                    Err(err) => AgentResponse::error(err.to_string(), err.kind()),
                }
            }
        }
    }

    async fn finalize(&self, query: &str, response: &AgentResponse, agent_used: &str) {
        let mut history = self.history.lock().await;
        history.push_back(Turn {
            query: query.to_string(),
            response: response.content.clone(),
            agent_used: agent_used.to_string(),
        });
        while history.len() > self.config.max_conversation_history {
            history.pop_front();
        }
        drop(history);

        self.memory.store(&response.content, "conversation", 0.3).await;
        self.tts.speak(&response.content);
    }
}

/// Normalizes a raw query: lowercases, strips a handful of accented Latin
/// vowels, collapses whitespace, and re-joins a small set of compound words
/// that otherwise tokenize as two separate keywords.
#[must_use]
pub fn normalize_query(query: &str) -> String {
    let lowered = query.to_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .collect();

    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");

    const COMPOUND_FIXES: &[(&str, &str)] = &[
        ("how are you", "how are you"),
        ("finger nail", "fingernail"),
        ("lap top", "laptop"),
    ];
    let mut fixed = collapsed;
    for (split, joined) in COMPOUND_FIXES {
        fixed = fixed.replace(split, joined);
    }
    fixed
}

const GREETINGS: &[&str] = &["hello", "hi", "hey", "good morning", "good afternoon"];
const FAREWELLS: &[&str] = &["bye", "goodbye", "see you", "farewell"];
const HOW_ARE_YOU: &[&str] = &["how are you", "how are you doing"];
const THANKS: &[&str] = &["thank you", "thanks", "appreciate it"];
const EMOTION_PATTERNS: &[&str] = &["i am frustrated", "this is frustrating", "how do you feel"];
const CODE_VERBS: &[&str] = &["create", "generate", "write", "implement", "build"];
const CODE_NOUNS: &[&str] = &["function", "script", "program", "code", "class", "method"];
const EXPLANATION_PATTERNS: &[&str] = &["what is", "explain", "describe", "tell me about"];
const HARDWARE_TERMS: &[&str] = &["ram", "cpu", "disk", "memory usage", "command", "process"];
const ORCHESTRATION_CUES: &[&str] = &["step by step", "coordinate", "workflow", "multiple steps"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

fn looks_like_code_generation(query: &str) -> bool {
    contains_any(query, CODE_VERBS) && contains_any(query, CODE_NOUNS)
}

fn is_direct_memory_answer(content: &str) -> bool {
    let lowered = content.to_lowercase();
    (lowered.contains("question:") && lowered.contains("answer:")) || content.len() > 200
}

/// Classifies a normalized query into a [`Route`]: conversational/emotional
/// patterns first, then code-generation, explanation, hardware/system,
/// orchestration cues, and finally keyword scoring over {code, system,
/// memory}.
fn classify(normalized: &str) -> Route {
    if contains_any(normalized, GREETINGS)
        || contains_any(normalized, FAREWELLS)
        || contains_any(normalized, HOW_ARE_YOU)
        || contains_any(normalized, THANKS)
    {
        return Route::Direct;
    }
    if contains_any(normalized, EMOTION_PATTERNS) {
        return Route::Direct;
    }
    if looks_like_code_generation(normalized) {
        return Route::Agent("code".to_string());
    }
    if contains_any(normalized, EXPLANATION_PATTERNS)
        && (normalized.contains("language") || contains_any(normalized, &["python", "rust", "javascript"]))
    {
        return Route::Agent("memory".to_string());
    }
    if contains_any(normalized, HARDWARE_TERMS) {
        return Route::Agent("system".to_string());
    }
    if contains_any(normalized, ORCHESTRATION_CUES) {
        return Route::Orchestrator;
    }

    score_fallback(normalized)
}

/// Keyword scoring fallback: exact whole-word match +2, substring +1, with
/// a disambiguation rule subtracting from `memory`'s score when hardware
/// context is present. Ties broken `code > system > memory`; zero scores
/// fall through to direct handling.
fn score_fallback(normalized: &str) -> Route {
    let words: Vec<&str> = normalized.split_whitespace().collect();

    let word_score = |keyword: &str| -> i32 {
        let mut score = 0;
        if words.contains(&keyword) {
            score += 2;
        } else if normalized.contains(keyword) {
            score += 1;
        }
        score
    };

    let code_score = word_score("code") + word_score("program") + word_score("function");
    let system_score = word_score("system") + word_score("file") + word_score("command");
    let mut memory_score = word_score("memory") + word_score("remember") + word_score("recall");

    if contains_any(normalized, HARDWARE_TERMS) {
        memory_score -= 1;
    }

    let best = [
        ("code", code_score),
        ("system", system_score),
        ("memory", memory_score),
    ]
    .into_iter()
    .max_by_key(|(_, score)| *score);

    match best {
        Some((name, score)) if score > 0 => Route::Agent(name.to_string()),
        _ => Route::Direct,
    }
}

/// The deterministic direct-response table: greetings, counting, trivial
/// arithmetic, identity, capabilities summary, and a catch-all
/// acknowledgement.
fn direct_response(query: &str) -> AgentResponse {
    let normalized = normalize_query(query);

    if contains_any(&normalized, GREETINGS) {
        return AgentResponse::success("Hello! How can I help you today?");
    }
    if contains_any(&normalized, FAREWELLS) {
        return AgentResponse::success("Goodbye! Talk soon.");
    }
    if contains_any(&normalized, HOW_ARE_YOU) {
        return AgentResponse::success("I'm doing well, thanks for asking!");
    }
    if contains_any(&normalized, THANKS) {
        return AgentResponse::success("You're welcome!");
    }
    if contains_any(&normalized, EMOTION_PATTERNS) {
        return AgentResponse::success("I don't have feelings, but I'm here to help.");
    }
    if normalized.contains("who are you") || normalized.contains("what are you") {
        return AgentResponse::success(
            "I'm an orchestration assistant that routes your requests to specialized agents.",
        );
    }
    if normalized.contains("what can you do") || normalized.contains("capabilities") {
        return AgentResponse::success(
            "I can write and explain code, run system operations, recall prior context, and coordinate multi-step workflows.",
        );
    }
    if let Some(sum) = try_simple_arithmetic(&normalized) {
        return AgentResponse::success(sum);
    }
    if let Some(count) = try_counting(&normalized) {
        return AgentResponse::success(count);
    }

    AgentResponse::success("Got it.")
}

fn try_counting(normalized: &str) -> Option<String> {
    let rest = normalized.strip_prefix("count to ")?;
    let n: u32 = rest.trim().parse().ok()?;
    let n = n.min(1000);
    Some((1..=n).map(|i| i.to_string()).collect::<Vec<_>>().join(", "))
}

fn try_simple_arithmetic(normalized: &str) -> Option<String> {
    let parts: Vec<&str> = normalized.split('+').collect();
    if parts.len() != 2 {
        return None;
    }
    let a: f64 = parts[0].trim().parse().ok()?;
    let b: f64 = parts[1].trim().parse().ok()?;
    Some(format!("{}", a + b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{CodeAgent, EchoAgent, SystemAgent};
    use crate::memory::{InMemoryMemoryProvider, MemoryRecord};
    use crate::planner::Planner;

    fn build_dispatcher() -> Dispatcher {
        let bus = Arc::new(Bus::new());
        bus.register_agent(Arc::new(EchoAgent::new()));
        bus.register_agent(Arc::new(CodeAgent::new()));
        bus.register_agent(Arc::new(SystemAgent::new()));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&bus),
            Arc::new(Planner::new()),
            RuntimeConfig::default(),
        ));
        Dispatcher::new(
            bus,
            orchestrator,
            Arc::new(InMemoryMemoryProvider::new()),
            RuntimeConfig::default(),
        )
    }

    #[test]
    fn normalize_query_strips_accents_and_collapses_whitespace() {
        assert_eq!(normalize_query("  Cómo   estás  "), "como estas");
    }

    #[test]
    fn classifies_greeting_as_direct() {
        assert_eq!(classify("hello there"), Route::Direct);
    }

    #[test]
    fn classifies_code_generation_request() {
        assert_eq!(classify("write a function to sort a list"), Route::Agent("code".to_string()));
    }

    #[test]
    fn classifies_hardware_query_as_system() {
        assert_eq!(classify("how much ram is free"), Route::Agent("system".to_string()));
    }

    #[test]
    fn classifies_orchestration_cue() {
        assert_eq!(classify("coordinate multiple steps to deploy this"), Route::Orchestrator);
    }

    #[tokio::test]
    async fn greeting_gets_a_direct_response_without_touching_the_bus() {
        let dispatcher = build_dispatcher();
        let response = dispatcher.process("hi there", CancellationToken::new()).await;
        assert!(response.is_success());
        assert!(response.content.contains("Hello"));
    }

    #[tokio::test]
    async fn code_request_is_delegated_to_the_code_agent() {
        let dispatcher = build_dispatcher();
        dispatcher.bus.start().await;
        let response = dispatcher
            .process("write a function that adds two numbers", CancellationToken::new())
            .await;
        assert!(response.is_success());
        dispatcher.bus.stop().await;
    }

    #[tokio::test]
    async fn history_is_capped_at_the_configured_length() {
        let bus = Arc::new(Bus::new());
        bus.register_agent(Arc::new(EchoAgent::new()));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&bus),
            Arc::new(Planner::new()),
            RuntimeConfig::default(),
        ));
        let mut config = RuntimeConfig::default();
        config.max_conversation_history = 2;
        let dispatcher = Dispatcher::new(bus, orchestrator, Arc::new(InMemoryMemoryProvider::new()), config);

        for _ in 0..5 {
            dispatcher.process("hello", CancellationToken::new()).await;
        }
        assert_eq!(dispatcher.history().await.len(), 2);
    }

    #[tokio::test]
    async fn high_importance_memory_short_circuits_delegation() {
        let memory = Arc::new(InMemoryMemoryProvider::new().with_seed(MemoryRecord {
            id: "1".to_string(),
            content: "Question: what is rust? Answer: a systems language".to_string(),
            importance: 0.95,
            memory_type: "fact".to_string(),
            metadata: HashMap::new(),
        }));
        let bus = Arc::new(Bus::new());
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&bus),
            Arc::new(Planner::new()),
            RuntimeConfig::default(),
        ));
        let dispatcher = Dispatcher::new(bus, orchestrator, memory, RuntimeConfig::default());

        let response = dispatcher.process("what is rust", CancellationToken::new()).await;
        assert_eq!(response.metadata.get("direct_memory_response").map(String::as_str), Some("true"));
    }

    #[tokio::test]
    async fn cancellation_short_circuits_with_cancelled_status() {
        let dispatcher = build_dispatcher();
        let token = CancellationToken::new();
        token.cancel();
        let response = dispatcher.process("coordinate this workflow", token).await;
        assert_eq!(response.status, ResponseStatus::Cancelled);
    }
}
