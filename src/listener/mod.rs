//! Request listener abstraction
//!
//! The agent binds a listener when it starts and serves requests on it until
//! shutdown. Requests are answered through [`handle_request`].

mod tcp;

pub use tcp::{TcpListenerFactory, TcpRequestListener};

use crate::agent::Agent;
use crate::error::Result;
use async_trait::async_trait;
use metal_shared::{AgentRequest, AgentResponse};
use std::net::SocketAddr;
use std::sync::Arc;

/// Creates bound listeners
#[async_trait]
pub trait ListenerFactory: Send + Sync {
    /// Bind a listener to `address` (`host:port`)
    async fn bind(&self, address: &str) -> Result<Box<dyn RequestListener>>;
}

/// A bound request listener
#[async_trait]
pub trait RequestListener: Send {
    /// Address actually bound
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Serve requests for `agent` until an unrecoverable error
    async fn serve(&mut self, agent: Arc<Agent>) -> Result<()>;

    /// Stop accepting and drop open connections
    async fn stop(&mut self) -> Result<()>;
}

/// Answer one request
pub fn handle_request(agent: &Agent, request: AgentRequest) -> AgentResponse {
    let result = match request {
        AgentRequest::GetStatus => Ok(AgentResponse::Status(agent.get_status())),
        AgentRequest::ExecuteCommand { name, params } => agent
            .execute_command(&name, params)
            .map(|task| AgentResponse::Command(task.to_view())),
        AgentRequest::GetCommandResult { id } => agent
            .get_command_result(&id)
            .map(|task| AgentResponse::Command(task.to_view())),
        AgentRequest::ListCommandResults => Ok(AgentResponse::CommandResults {
            results: agent
                .list_command_results()
                .iter()
                .map(|task| task.to_view())
                .collect(),
        }),
    };

    result.unwrap_or_else(|err| AgentResponse::Error(err.to_error_body()))
}
