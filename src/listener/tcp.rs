//! TCP request listener

use super::{handle_request, ListenerFactory, RequestListener};
use crate::agent::Agent;
use crate::error::Result;
use crate::framing::{write_frame, FrameReader};
use async_trait::async_trait;
use metal_shared::{AgentRequest, AgentResponse};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Pause after a failed accept
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Binds [`TcpRequestListener`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpListenerFactory;

#[async_trait]
impl ListenerFactory for TcpListenerFactory {
    async fn bind(&self, address: &str) -> Result<Box<dyn RequestListener>> {
        Ok(Box::new(TcpRequestListener::bind(address).await?))
    }
}

/// Length-prefixed JSON request/response over TCP
pub struct TcpRequestListener {
    listener: TcpListener,
    connections: JoinSet<()>,
}

impl TcpRequestListener {
    pub async fn bind(address: &str) -> Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self {
            listener,
            connections: JoinSet::new(),
        })
    }
}

#[async_trait]
impl RequestListener for TcpRequestListener {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    async fn serve(&mut self, agent: Arc<Agent>) -> Result<()> {
        loop {
            let (socket, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    // Transient (e.g. out of file descriptors); keep accepting
                    warn!("Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            debug!("Connection from: {}", addr);
            let agent = agent.clone();
            self.connections.spawn(async move {
                if let Err(e) = handle_connection(socket, &agent).await {
                    warn!("Connection {} closed with error: {}", addr, e);
                }
                debug!("Client disconnected: {}", addr);
            });

            // Reap finished connections so the set does not grow unbounded
            while self.connections.try_join_next().is_some() {}
        }
    }

    async fn stop(&mut self) -> Result<()> {
        let open = self.connections.len();
        self.connections.shutdown().await;
        info!("Request listener stopped ({} open connections dropped)", open);
        Ok(())
    }
}

async fn handle_connection(socket: TcpStream, agent: &Agent) -> Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut frames = FrameReader::new(reader);

    loop {
        let request = match frames.next::<AgentRequest>().await {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(e) => {
                // Framing is lost after a bad frame; answer once and hang up
                let response = AgentResponse::Error(e.to_error_body());
                write_frame(&mut writer, &response).await?;
                return Err(e);
            }
        };

        let response = handle_request(agent, request);
        write_frame(&mut writer, &response).await?;
    }
}
