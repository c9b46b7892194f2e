//! Agent configuration

use crate::error::Result;
use crate::heartbeat::HeartbeatPolicy;
use metal_shared::{defaults, HeartbeatRequest};
use std::net::SocketAddr;

/// Configuration for the agent process
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Identifier reported to the orchestrator
    pub agent_id: String,
    /// Host the request listener binds to
    pub listen_host: String,
    /// Port the request listener binds to
    pub listen_port: u16,
    /// Address the orchestrator should use to reach the listener.
    /// Falls back to the address actually bound.
    pub advertise_address: Option<String>,
    /// Orchestrator heartbeat endpoint
    pub orchestrator_address: String,
    /// Heartbeat backoff settings
    pub heartbeat: HeartbeatPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: "agent-001".into(),
            listen_host: defaults::LISTEN_HOST.into(),
            listen_port: defaults::LISTEN_PORT,
            advertise_address: None,
            orchestrator_address: defaults::ORCHESTRATOR_ADDRESS.into(),
            heartbeat: HeartbeatPolicy::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        self.heartbeat.validate()
    }

    /// `host:port` the request listener binds to
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    /// Address to report once the listener is bound to `bound`
    pub fn advertised_address(&self, bound: SocketAddr) -> String {
        self.advertise_address
            .clone()
            .unwrap_or_else(|| bound.to_string())
    }

    /// Identity sent with every heartbeat. `listen_address` starts out as the
    /// configured address and is replaced with the bound one at startup.
    pub fn heartbeat_identity(&self, mode: &str) -> HeartbeatRequest {
        HeartbeatRequest {
            agent_id: self.agent_id.clone(),
            mode: mode.to_string(),
            version: crate::VERSION.to_string(),
            listen_address: self
                .advertise_address
                .clone()
                .unwrap_or_else(|| self.listen_address()),
        }
    }
}
