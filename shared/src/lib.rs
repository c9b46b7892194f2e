//! Metal Agent Shared Protocol Types
//!
//! This crate provides the wire types and codec used between the provisioning
//! agent, clients of its request listener, and the orchestrator.

pub mod codec;
pub mod state_machine;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

pub use state_machine::{LifecycleEvent, LifecycleMachine, LifecycleState, TaskStatus};

/// Parameters of a command, keyed by parameter name
pub type CommandParams = Map<String, Value>;

/// Get current time in seconds since Unix epoch
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Default parameters for the agent and the orchestrator
pub mod defaults {
    /// Address the agent's request listener binds to
    pub const LISTEN_HOST: &str = "0.0.0.0";

    /// Port the agent's request listener binds to
    pub const LISTEN_PORT: u16 = 9999;

    /// Orchestrator heartbeat endpoint
    pub const ORCHESTRATOR_ADDRESS: &str = "127.0.0.1:6385";

    /// Mode the agent starts in
    pub const MODE: &str = "STANDBY";

    /// How far ahead the orchestrator sets the next heartbeat deadline
    pub const HEARTBEAT_INTERVAL_SECS: f64 = 300.0;

    /// Baseline delay used to compute the retry window after a failed heartbeat
    pub const HEARTBEAT_ERROR_DELAY_SECS: f64 = 1.0;

    /// Growth factor applied to the error delay after each consecutive failure
    pub const HEARTBEAT_BACKOFF_FACTOR: f64 = 2.7;

    /// Upper bound for the error delay
    pub const HEARTBEAT_MAX_ERROR_DELAY_SECS: f64 = 300.0;

    /// Heartbeat RPC timeout
    pub const HEARTBEAT_RPC_TIMEOUT_SECS: u64 = 10;
}

/// Snapshot of the agent's status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub mode: String,
    pub started_at: f64,
    pub version: String,
}

/// Serialized form of a command task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskView {
    pub id: String,
    pub command_name: String,
    pub command_params: CommandParams,
    pub command_status: TaskStatus,
    pub command_result: Option<Value>,
    pub command_error: Option<String>,
}

/// Error returned by the request listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub code: u16,
    pub message: String,
}

/// Requests accepted by the agent's request listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentRequest {
    GetStatus,
    ExecuteCommand {
        name: String,
        #[serde(default)]
        params: CommandParams,
    },
    GetCommandResult {
        id: String,
    },
    ListCommandResults,
}

/// Responses sent by the agent's request listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentResponse {
    Status(AgentStatus),
    Command(TaskView),
    CommandResults { results: Vec<TaskView> },
    Error(ErrorBody),
}

/// Heartbeat sent by the agent to the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub agent_id: String,
    pub mode: String,
    pub version: String,
    pub listen_address: String,
}

/// Orchestrator reply to a heartbeat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HeartbeatResponse {
    /// Heartbeat accepted; the next one is due before `next_heartbeat`
    /// (seconds since Unix epoch)
    HeartbeatAck { next_heartbeat: f64 },
    /// Heartbeat rejected
    Error { message: String },
}

impl ErrorBody {
    pub fn new(kind: impl Into<String>, code: u16, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            code,
            message: message.into(),
        }
    }
}
