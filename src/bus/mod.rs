//! The Agent Communication Bus: routes [`Message`]s between registered
//! agents, correlates REQUEST/RESPONSE pairs, and delivers
//! NOTIFICATION/STATUS traffic to any registered handler. A single inbound
//! `tokio::sync::mpsc` queue feeds one delivery-loop task.

mod correlation;
mod registry;

pub use correlation::CorrelationTable;
pub use registry::AgentRegistry;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::agent::{Agent, AgentId};
use crate::error::{CoreError, CoreResult};
use crate::message::{Context, ContextValue, Message, MessageKind};

/// A callback invoked for NOTIFICATION/STATUS messages addressed to a name
/// with no registered [`Agent`] (or that the recipient agent doesn't itself
/// need to see).
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Default bound on the bus's inbound message queue.
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Routes messages between agents and correlates requests with their
/// responses.
pub struct Bus {
    registry: Arc<AgentRegistry>,
    correlation: Arc<CorrelationTable>,
    handlers: Arc<dashmap::DashMap<String, MessageHandler>>,
    inbound_tx: mpsc::Sender<Message>,
    inbound_rx: Mutex<Option<mpsc::Receiver<Message>>>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Bus {
    /// Builds a bus with the default inbound queue capacity. Call
    /// [`Bus::start`] before routing any messages.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Builds a bus whose inbound queue holds at most `capacity` messages
    /// before `send_request`/`send_notification` callers start backing up.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        Self {
            registry: Arc::new(AgentRegistry::new()),
            correlation: Arc::new(CorrelationTable::new()),
            handlers: Arc::new(dashmap::DashMap::new()),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            shutdown: CancellationToken::new(),
            worker: Mutex::new(None),
        }
    }

    /// Registers an agent with the bus.
    pub fn register_agent(&self, agent: Arc<dyn Agent>) {
        self.registry.register(agent);
    }

    /// Removes a registered agent.
    pub fn unregister_agent(&self, agent_id: AgentId) {
        self.registry.unregister(agent_id);
    }

    /// Registers a callback invoked for NOTIFICATION/STATUS messages whose
    /// `receiver_id` equals `name`, overriding any previous handler for
    /// that name.
    pub fn register_handler(&self, name: impl Into<String>, handler: MessageHandler) {
        self.handlers.insert(name.into(), handler);
    }

    /// Looks up a registered agent's id by its name.
    #[must_use]
    pub fn find_agent(&self, name: &str) -> Option<AgentId> {
        self.registry.get_by_name(name).map(|agent| agent.agent_id())
    }

    /// Agent ids registered for `capability`.
    #[must_use]
    pub fn find_by_capability(&self, capability: &str) -> Vec<AgentId> {
        self.registry.find_by_capability(capability)
    }

    /// Read-only access to the agent registry, for callers (like the
    /// orchestrator) that need richer queries than `find_agent`.
    #[must_use]
    pub fn registry(&self) -> Arc<AgentRegistry> {
        Arc::clone(&self.registry)
    }

    /// Starts the worker task that drains the inbound queue and delivers
    /// messages. Calling this more than once without an intervening
    /// [`Bus::stop`] is a no-op.
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return;
        }
        let Some(inbound_rx) = self.inbound_rx.lock().await.take() else {
            return;
        };

        let registry = Arc::clone(&self.registry);
        let correlation = Arc::clone(&self.correlation);
        let handlers = Arc::clone(&self.handlers);
        let shutdown = self.shutdown.clone();

        *worker = Some(tokio::spawn(delivery_loop(
            inbound_rx, registry, correlation, handlers, shutdown,
        )));
    }

    /// Signals the worker task to stop and waits for it to exit.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.worker.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// Sends a REQUEST and awaits its correlated RESPONSE/ERROR, timing out
    /// after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Timeout`] if no response arrives in time, or
    /// [`CoreError::Internal`] if the bus's worker task has stopped.
    #[instrument(skip(self, context))]
    pub async fn send_request(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: impl Into<String>,
        context: Context,
        timeout: Duration,
    ) -> CoreResult<Message> {
        let request = Message::request(sender_id, receiver_id, content, context);
        self.send_request_message(request, timeout).await
    }

    /// Sends an already-built REQUEST message and awaits its correlated
    /// response. Prefer [`Bus::send_request`] unless you need to construct
    /// the [`Message`] yourself (e.g. to set a non-default `message_id`).
    ///
    /// # Errors
    ///
    /// See [`Bus::send_request`].
    pub async fn send_request_message(
        &self,
        request: Message,
        timeout: Duration,
    ) -> CoreResult<Message> {
        let request_id = request.message_id;
        let rx = self.correlation.register(request_id);

        if self.inbound_tx.send(request).await.is_err() {
            self.correlation.cancel(request_id);
            return Err(CoreError::Internal("bus worker is not running".to_string()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(CoreError::Internal("bus worker dropped the waiter".to_string())),
            Err(_) => {
                self.correlation.cancel(request_id);
                Err(CoreError::Timeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Enqueues a NOTIFICATION or STATUS message without waiting for a
    /// response.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Internal`] if the bus's worker task has stopped.
    pub async fn send_notification(&self, message: Message) -> CoreResult<()> {
        self.inbound_tx
            .send(message)
            .await
            .map_err(|_| CoreError::Internal("bus worker is not running".to_string()))
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_recipient(registry: &AgentRegistry, receiver_id: &str) -> Option<Arc<dyn Agent>> {
    if let Ok(uuid) = receiver_id.parse::<Uuid>() {
        if let Some(agent) = registry.get(AgentId::from(uuid)) {
            return Some(agent);
        }
    }
    registry.get_by_name(receiver_id)
}

/// The delivery algorithm:
/// 1. RESPONSE/ERROR messages resolve a pending correlation waiter, if any.
/// 2. Otherwise look up the recipient by id or name.
/// 3. REQUESTs to a found recipient are processed directly via
///    [`Agent::process`], and the result routed back as a RESPONSE/ERROR.
/// 4. NOTIFICATION/STATUS messages to a found recipient fall through to
///    any handler registered for that name.
/// 5. Anything left over is dropped with a warning.
async fn delivery_loop(
    mut inbound_rx: mpsc::Receiver<Message>,
    registry: Arc<AgentRegistry>,
    correlation: Arc<CorrelationTable>,
    handlers: Arc<dashmap::DashMap<String, MessageHandler>>,
    shutdown: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            () = shutdown.cancelled() => break,
            message = inbound_rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        if matches!(message.kind, MessageKind::Response | MessageKind::Error) {
            if !correlation.resolve(message.clone()) {
                warn!(
                    message_id = %message.message_id,
                    "dropping response with no registered waiter"
                );
            }
            continue;
        }

        let Some(recipient) = resolve_recipient(&registry, &message.receiver_id) else {
            if matches!(message.kind, MessageKind::Request) {
                warn!(receiver = %message.receiver_id, "recipient not found; replying with an error");
                let error = CoreError::RecipientNotFound { agent_id: message.receiver_id.clone() };
                let mut context = Context::new();
                context.insert("error".to_string(), error.kind().into());
                let reply = message.create_error(error.to_string(), context);
                correlation.resolve(reply);
            } else {
                warn!(receiver = %message.receiver_id, "dropping message: recipient not found");
            }
            continue;
        };

        match message.kind {
            MessageKind::Request => {
                let correlation = Arc::clone(&correlation);
                tokio::spawn(async move {
                    let response_agent = recipient.process(&message.content, &message.context).await;
                    let reply = if response_agent.is_success() {
                        message.create_response(response_agent.content, HashMap::new())
                    } else {
                        message.create_error(response_agent.content, HashMap::new())
                    };
                    correlation.resolve(reply);
                });
            }
            MessageKind::Notification | MessageKind::Status => {
                if let Some(handler) = handlers.get(&message.receiver_id) {
                    handler(message);
                } else {
                    tracing::debug!(
                        receiver = %message.receiver_id,
                        "no handler registered for notification; ignoring"
                    );
                }
            }
            MessageKind::Response | MessageKind::Error => unreachable!("handled above"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::agent::{AgentResponse, AgentState};

    struct EchoAgent {
        id: AgentId,
    }

    #[async_trait]
    impl Agent for EchoAgent {
        fn agent_id(&self) -> AgentId {
            self.id
        }
        fn name(&self) -> &str {
            "echo"
        }
        fn capabilities(&self) -> HashSet<String> {
            ["echo".to_string()].into_iter().collect()
        }
        fn state(&self) -> AgentState {
            AgentState::Idle
        }
        async fn process(&self, query: &str, _context: &Context) -> AgentResponse {
            AgentResponse::success(query.to_string())
        }
    }

    struct FailingAgent {
        id: AgentId,
    }

    #[async_trait]
    impl Agent for FailingAgent {
        fn agent_id(&self) -> AgentId {
            self.id
        }
        fn name(&self) -> &str {
            "failer"
        }
        fn capabilities(&self) -> HashSet<String> {
            HashSet::new()
        }
        fn state(&self) -> AgentState {
            AgentState::Idle
        }
        async fn process(&self, _query: &str, _context: &Context) -> AgentResponse {
            AgentResponse::error("boom", "internal")
        }
    }

    #[tokio::test]
    async fn send_request_round_trips_through_an_agent() {
        let bus = Bus::new();
        bus.register_agent(Arc::new(EchoAgent { id: AgentId::from_name("echo") }));
        bus.start().await;

        let response = bus
            .send_request_message(
                Message::request("caller", "echo", "hello", Context::new()),
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        assert_eq!(response.content, "hello");
        assert_eq!(response.kind, MessageKind::Response);
        bus.stop().await;
    }

    #[tokio::test]
    async fn agent_error_becomes_error_message() {
        let bus = Bus::new();
        bus.register_agent(Arc::new(FailingAgent { id: AgentId::from_name("failer") }));
        bus.start().await;

        let response = bus
            .send_request_message(
                Message::request("caller", "failer", "do it", Context::new()),
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        assert_eq!(response.kind, MessageKind::Error);
        bus.stop().await;
    }

    #[tokio::test]
    async fn send_request_to_an_unknown_recipient_resolves_fast_with_an_error() {
        let bus = Bus::new();
        bus.start().await;

        let response = bus
            .send_request_message(
                Message::request("caller", "ghost", "hello", Context::new()),
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert_eq!(response.kind, MessageKind::Error);
        assert_eq!(
            response.context.get("error").and_then(ContextValue::as_str),
            Some("recipient_not_found")
        );
        bus.stop().await;
    }

    #[tokio::test]
    async fn correlation_table_is_empty_after_a_completed_request() {
        let bus = Bus::new();
        bus.register_agent(Arc::new(EchoAgent { id: AgentId::from_name("echo") }));
        bus.start().await;

        bus.send_request_message(
            Message::request("caller", "echo", "hello", Context::new()),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert!(bus.correlation.is_empty());
        bus.stop().await;
    }

    #[tokio::test]
    async fn notification_dispatches_to_registered_handler() {
        let bus = Bus::new();
        bus.register_agent(Arc::new(EchoAgent { id: AgentId::from_name("echo") }));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        bus.register_handler(
            "echo",
            Arc::new(move |_message| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        bus.start().await;

        bus.send_notification(Message::new(
            "caller",
            "echo",
            MessageKind::Notification,
            "fyi",
            Context::new(),
        ))
        .await
        .unwrap();

        // Give the worker a tick to process the notification.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        bus.stop().await;
    }
}
