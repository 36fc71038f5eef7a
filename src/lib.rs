//! # agent-mesh-core
//!
//! An async multi-agent orchestration runtime: a typed message bus with
//! request/response correlation, a task planner, a workflow orchestrator
//! that selects and sequences agents, and a dispatcher that classifies and
//! routes a single user query.
//!
//! ## Architecture
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agent_mesh_core::agents::EchoAgent;
//! use agent_mesh_core::bus::Bus;
//! use agent_mesh_core::config::RuntimeConfig;
//! use agent_mesh_core::dispatcher::Dispatcher;
//! use agent_mesh_core::memory::InMemoryMemoryProvider;
//! use agent_mesh_core::orchestrator::Orchestrator;
//! use agent_mesh_core::planner::Planner;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = Arc::new(Bus::new());
//!     bus.register_agent(Arc::new(EchoAgent::new()));
//!     bus.start().await;
//!
//!     let orchestrator = Arc::new(Orchestrator::new(
//!         Arc::clone(&bus),
//!         Arc::new(Planner::new()),
//!         RuntimeConfig::default(),
//!     ));
//!     let dispatcher = Dispatcher::new(
//!         bus,
//!         orchestrator,
//!         Arc::new(InMemoryMemoryProvider::new()),
//!         RuntimeConfig::default(),
//!     );
//!
//!     let response = dispatcher.process("echo hello", CancellationToken::new()).await;
//!     println!("{}", response.content);
//! }
//! ```

pub mod agent;
pub mod agents;
pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod memory;
pub mod message;
pub mod orchestrator;
pub mod plan;
pub mod planner;

pub use agent::{Agent, AgentId, AgentResponse, AgentState, ResponseStatus};
pub use bus::Bus;
pub use config::RuntimeConfig;
pub use dispatcher::Dispatcher;
pub use error::{CoreError, CoreResult};
pub use message::{Message, MessageKind};
pub use orchestrator::Orchestrator;
pub use plan::{Plan, PlanId, Task, TaskId, TaskStatus};
pub use planner::Planner;
