mod registry;

use anyhow::Result;
use clap::Parser;
use metal_shared::codec::{self, FrameDecoder};
use metal_shared::{defaults, now_secs, HeartbeatRequest, HeartbeatResponse};
use registry::AgentRegistry;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Minimal orchestrator endpoint that accepts agent heartbeats
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    #[arg(long, default_value = defaults::ORCHESTRATOR_ADDRESS)]
    bind: String,

    /// Seconds until each agent's next heartbeat is due
    #[arg(long, default_value_t = defaults::HEARTBEAT_INTERVAL_SECS)]
    interval: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let listener = TcpListener::bind(&cli.bind).await?;
    info!("Orchestrator listening on {}", listener.local_addr()?);

    let registry = AgentRegistry::new();
    spawn_reaper(registry.clone(), cli.interval);

    loop {
        let (socket, addr) = listener.accept().await?;
        debug!("Connection from: {}", addr);

        let registry = registry.clone();
        let interval = cli.interval;
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, addr, &registry, interval).await {
                warn!("Connection {} failed: {}", addr, e);
            }
        });
    }
}

/// Forget agents that miss three heartbeats in a row
fn spawn_reaper(registry: AgentRegistry, interval: f64) {
    let timeout = Duration::try_from_secs_f64(interval * 3.0).unwrap_or(Duration::MAX);
    let period = Duration::try_from_secs_f64(interval)
        .unwrap_or(Duration::from_secs(60))
        .max(Duration::from_secs(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            for agent in registry.remove_stale(timeout).await {
                warn!(
                    "Agent {} stopped heartbeating after {} heartbeats over {:?}",
                    agent.agent_id,
                    agent.heartbeats,
                    agent.last_heartbeat.duration_since(agent.first_seen)
                );
            }
            debug!("{} agents live", registry.count().await);
        }
    });
}

async fn handle_connection(
    mut socket: TcpStream,
    addr: SocketAddr,
    registry: &AgentRegistry,
    interval: f64,
) -> Result<()> {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; 4096];

    loop {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            debug!("Client disconnected: {}", addr);
            return Ok(());
        }
        decoder.extend(&buf[..n]);

        // Process all complete frames
        while let Some(request) = decoder.decode_next::<HeartbeatRequest>()? {
            let response = handle_heartbeat(request, addr, registry, interval).await;
            socket.write_all(&codec::encode(&response)?).await?;
        }
    }
}

/// Agents listening on a wildcard address advertise it as-is; the host they
/// are reachable on is the one the heartbeat came from
fn resolve_listen_address(advertised: &str, peer: SocketAddr) -> String {
    match advertised.parse::<SocketAddr>() {
        Ok(addr) if addr.ip().is_unspecified() => SocketAddr::new(peer.ip(), addr.port()).to_string(),
        _ => advertised.to_string(),
    }
}

async fn handle_heartbeat(
    mut request: HeartbeatRequest,
    peer: SocketAddr,
    registry: &AgentRegistry,
    interval: f64,
) -> HeartbeatResponse {
    if request.agent_id.is_empty() {
        return HeartbeatResponse::Error {
            message: "agent_id is required".into(),
        };
    }

    request.listen_address = resolve_listen_address(&request.listen_address, peer);
    let agent = registry.record_heartbeat(request).await;
    if agent.heartbeats == 1 {
        info!(
            "Agent {} registered: mode {}, version {}, listening on {}",
            agent.agent_id, agent.mode, agent.version, agent.listen_address
        );
    } else {
        debug!("Heartbeat {} from {}", agent.heartbeats, agent.agent_id);
    }

    HeartbeatResponse::HeartbeatAck {
        next_heartbeat: now_secs() + interval,
    }
}
