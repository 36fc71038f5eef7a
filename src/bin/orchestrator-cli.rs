//! agent-mesh-cli — one-shot query invocation, for scripting and CI.

use std::sync::Arc;

use agent_mesh_core::agents::{CodeAgent, EchoAgent, SystemAgent};
use agent_mesh_core::config::RuntimeConfig;
use agent_mesh_core::dispatcher::Dispatcher;
use agent_mesh_core::memory::InMemoryMemoryProvider;
use agent_mesh_core::orchestrator::Orchestrator;
use agent_mesh_core::planner::Planner;
use agent_mesh_core::Bus;
use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;

/// Run a single query against the agent mesh and print the response.
#[derive(Parser, Debug)]
#[command(name = "agent-mesh-cli", version, about)]
struct Args {
    /// The query to dispatch.
    #[arg(long)]
    query: String,

    /// Path to a TOML config file overriding the runtime defaults.
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = match args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            RuntimeConfig::from_toml(&text)?
        }
        None => RuntimeConfig::default(),
    };

    let bus = Arc::new(Bus::new());
    bus.register_agent(Arc::new(EchoAgent::new()));
    bus.register_agent(Arc::new(CodeAgent::new()));
    bus.register_agent(Arc::new(SystemAgent::new()));
    bus.start().await;

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

    let response = dispatcher.process(&args.query, CancellationToken::new()).await;
    println!("{}", response.content);

    bus.stop().await;
    Ok(())
}
