//! Heartbeat RPC to the orchestrator

use crate::error::{AgentError, Result};
use crate::framing::{write_frame, FrameReader};
use async_trait::async_trait;
use metal_shared::{HeartbeatRequest, HeartbeatResponse};
use std::sync::RwLock;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// The orchestrator as seen from the heartbeat loop
#[async_trait]
pub trait OrchestratorClient: Send + Sync {
    /// Report liveness. Returns the absolute deadline (seconds since Unix
    /// epoch) before which the next heartbeat is due.
    async fn heartbeat(&self) -> Result<f64>;

    /// Address of the request listener to report from now on
    fn advertise(&self, _listen_address: &str) {}
}

/// Heartbeats over a fresh TCP connection per attempt
pub struct TcpOrchestratorClient {
    address: String,
    identity: RwLock<HeartbeatRequest>,
    rpc_timeout: Duration,
}

impl TcpOrchestratorClient {
    pub fn new(address: impl Into<String>, identity: HeartbeatRequest, rpc_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            identity: RwLock::new(identity),
            rpc_timeout,
        }
    }

    fn identity(&self) -> HeartbeatRequest {
        self.identity
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn exchange(&self) -> Result<f64> {
        let identity = self.identity();
        let stream = TcpStream::connect(&self.address).await?;
        let (reader, mut writer) = stream.into_split();

        write_frame(&mut writer, &identity).await?;

        let mut frames = FrameReader::new(reader);
        match frames.next::<HeartbeatResponse>().await? {
            Some(HeartbeatResponse::HeartbeatAck { next_heartbeat }) => Ok(next_heartbeat),
            Some(HeartbeatResponse::Error { message }) => Err(AgentError::Heartbeat(message)),
            None => Err(AgentError::Heartbeat(
                "orchestrator closed the connection without replying".into(),
            )),
        }
    }
}

#[async_trait]
impl OrchestratorClient for TcpOrchestratorClient {
    async fn heartbeat(&self) -> Result<f64> {
        debug!("Sending heartbeat to {}", self.address);

        match timeout(self.rpc_timeout, self.exchange()).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Heartbeat(format!(
                "no reply from {} within {:?}",
                self.address, self.rpc_timeout
            ))),
        }
    }

    fn advertise(&self, listen_address: &str) {
        let mut identity = self.identity.write().unwrap_or_else(|e| e.into_inner());
        if identity.listen_address != listen_address {
            debug!("Advertising request listener at {}", listen_address);
            identity.listen_address = listen_address.to_string();
        }
    }
}
