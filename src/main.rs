use anyhow::{anyhow, Context};
use clap::Parser;
use metal_agent::command::mode_by_name;
use metal_agent::heartbeat::{HeartbeatPolicy, Heartbeater, TcpOrchestratorClient};
use metal_agent::listener::TcpListenerFactory;
use metal_agent::{Agent, AgentConfig};
use metal_shared::defaults;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Bare-metal provisioning agent
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Identifier reported to the orchestrator
    #[arg(long, env = "METAL_AGENT_ID", default_value = "agent-001")]
    agent_id: String,

    #[arg(long, env = "METAL_AGENT_LISTEN_HOST", default_value = defaults::LISTEN_HOST)]
    listen_host: String,

    #[arg(long, env = "METAL_AGENT_LISTEN_PORT", default_value_t = defaults::LISTEN_PORT)]
    listen_port: u16,

    /// Address the orchestrator should use to reach this agent
    #[arg(long, env = "METAL_AGENT_ADVERTISE_ADDRESS")]
    advertise_address: Option<String>,

    #[arg(long, env = "METAL_AGENT_ORCHESTRATOR", default_value = defaults::ORCHESTRATOR_ADDRESS)]
    orchestrator_address: String,

    /// Command set to serve
    #[arg(long, env = "METAL_AGENT_MODE", default_value = defaults::MODE)]
    mode: String,

    /// Initial retry delay after a failed heartbeat, in seconds
    #[arg(long, env = "METAL_AGENT_HEARTBEAT_ERROR_DELAY", default_value_t = defaults::HEARTBEAT_ERROR_DELAY_SECS)]
    heartbeat_error_delay: f64,

    #[arg(long, env = "METAL_AGENT_HEARTBEAT_BACKOFF", default_value_t = defaults::HEARTBEAT_BACKOFF_FACTOR)]
    heartbeat_backoff: f64,

    #[arg(long, env = "METAL_AGENT_HEARTBEAT_MAX_ERROR_DELAY", default_value_t = defaults::HEARTBEAT_MAX_ERROR_DELAY_SECS)]
    heartbeat_max_error_delay: f64,

    /// Heartbeat RPC timeout, in seconds
    #[arg(long, env = "METAL_AGENT_HEARTBEAT_TIMEOUT", default_value_t = defaults::HEARTBEAT_RPC_TIMEOUT_SECS)]
    heartbeat_timeout: u64,
}

impl Cli {
    fn config(&self) -> AgentConfig {
        AgentConfig {
            agent_id: self.agent_id.clone(),
            listen_host: self.listen_host.clone(),
            listen_port: self.listen_port,
            advertise_address: self.advertise_address.clone(),
            orchestrator_address: self.orchestrator_address.clone(),
            heartbeat: HeartbeatPolicy {
                initial_error_delay: self.heartbeat_error_delay,
                backoff_factor: self.heartbeat_backoff,
                max_error_delay: self.heartbeat_max_error_delay,
                rpc_timeout: Duration::from_secs(self.heartbeat_timeout),
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let config = cli.config();
    config.validate().context("invalid configuration")?;

    let mode = mode_by_name(&cli.mode).ok_or_else(|| anyhow!("Unknown mode: {}", cli.mode))?;

    info!("Metal agent {} starting: {}", metal_agent::VERSION, config.agent_id);
    info!("  Mode: {}", mode.name());
    info!("  Listen: {}", config.listen_address());
    info!("  Orchestrator: {}", config.orchestrator_address);

    let client = TcpOrchestratorClient::new(
        config.orchestrator_address.clone(),
        config.heartbeat_identity(mode.name()),
        config.heartbeat.rpc_timeout,
    );
    let heartbeater = Heartbeater::new(Arc::new(client), config.heartbeat.clone());

    let agent = Arc::new(Agent::new(
        config,
        &*mode,
        heartbeater,
        Arc::new(TcpListenerFactory),
    ));

    agent.run().await.context("agent run failed")?;
    Ok(())
}
