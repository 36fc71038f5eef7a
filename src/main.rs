//! agent-mesh — interactive REPL entry point.
//!
//! Boots the bus with the demo agents registered, wires up the orchestrator
//! and dispatcher, and reads queries from stdin until EOF or `exit`.

use std::io::Write;
use std::sync::Arc;

use agent_mesh_core::agents::{CodeAgent, EchoAgent, SystemAgent};
use agent_mesh_core::config::RuntimeConfig;
use agent_mesh_core::dispatcher::Dispatcher;
use agent_mesh_core::memory::InMemoryMemoryProvider;
use agent_mesh_core::orchestrator::Orchestrator;
use agent_mesh_core::planner::Planner;
use agent_mesh_core::Bus;
use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("agent_mesh_core=info".parse()?),
        )
        .init();

    let bus = Arc::new(Bus::new());
    bus.register_agent(Arc::new(EchoAgent::new()));
    bus.register_agent(Arc::new(CodeAgent::new()));
    bus.register_agent(Arc::new(SystemAgent::new()));
    bus.start().await;

    let config = RuntimeConfig::default();
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&bus),
        Arc::new(Planner::new()),
        config.clone(),
    ));
    let dispatcher = Dispatcher::new(
        Arc::clone(&bus),
        orchestrator,
        Arc::new(InMemoryMemoryProvider::new()),
        config,
    );

    info!("agent mesh ready; type a query, or 'exit' to quit");
    println!("agent mesh ready. Type a query, or 'exit' to quit.");

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query.eq_ignore_ascii_case("exit") || query.eq_ignore_ascii_case("quit") {
            break;
        }

        let response = dispatcher.process(query, CancellationToken::new()).await;
        println!("{}", response.content);
    }

    bus.stop().await;
    info!("agent mesh shutting down");
    Ok(())
}
