//! Provisioning agent for bare-metal hosts
//!
//! The agent exposes a small command surface to the orchestrator, runs
//! commands as background tasks, and reports liveness with a jittered
//! heartbeat.

pub mod agent;
pub mod command;
pub mod config;
pub mod error;
pub mod framing;
pub mod heartbeat;
pub mod listener;

pub use agent::Agent;
pub use config::AgentConfig;
pub use error::{AgentError, CommandExecutionError, Result};

/// Agent version reported in status and heartbeats
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
