//! Registry of agents that have reported in

use metal_shared::HeartbeatRequest;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// What the orchestrator knows about one agent
#[derive(Debug, Clone)]
pub struct AgentInfo {
    pub agent_id: String,
    pub mode: String,
    pub version: String,
    pub listen_address: String,
    pub first_seen: Instant,
    pub last_heartbeat: Instant,
    pub heartbeats: u64,
}

impl AgentInfo {
    fn new(request: HeartbeatRequest, now: Instant) -> Self {
        Self {
            agent_id: request.agent_id,
            mode: request.mode,
            version: request.version,
            listen_address: request.listen_address,
            first_seen: now,
            last_heartbeat: now,
            heartbeats: 1,
        }
    }
}

/// Tracks live agents by id
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: Arc<RwLock<HashMap<String, AgentInfo>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a heartbeat and return what is now known about the agent
    pub async fn record_heartbeat(&self, request: HeartbeatRequest) -> AgentInfo {
        self.record_heartbeat_at(request, Instant::now()).await
    }

    async fn record_heartbeat_at(&self, request: HeartbeatRequest, now: Instant) -> AgentInfo {
        let mut agents = self.agents.write().await;
        match agents.get_mut(&request.agent_id) {
            Some(info) => {
                info.mode = request.mode;
                info.version = request.version;
                info.listen_address = request.listen_address;
                info.last_heartbeat = now;
                info.heartbeats += 1;
                info.clone()
            }
            None => {
                let info = AgentInfo::new(request, now);
                agents.insert(info.agent_id.clone(), info.clone());
                info
            }
        }
    }

    /// Drop agents silent for longer than `timeout` and return them
    pub async fn remove_stale(&self, timeout: Duration) -> Vec<AgentInfo> {
        self.remove_stale_at(timeout, Instant::now()).await
    }

    async fn remove_stale_at(&self, timeout: Duration, now: Instant) -> Vec<AgentInfo> {
        let mut agents = self.agents.write().await;
        let stale: Vec<String> = agents
            .iter()
            .filter(|(_, info)| now.saturating_duration_since(info.last_heartbeat) > timeout)
            .map(|(id, _)| id.clone())
            .collect();

        stale.iter().filter_map(|id| agents.remove(id)).collect()
    }

    pub async fn count(&self) -> usize {
        self.agents.read().await.len()
    }
}
