//! Command execution infrastructure for the agent
//!
//! This module handles:
//! - Running commands as asynchronous tasks with a RUNNING/SUCCEEDED/FAILED lifecycle
//! - Mapping command names to handlers
//! - Selecting the command set through the agent mode

pub mod handlers;
mod mode;
mod registry;
mod task;

pub use mode::{mode_by_name, AgentMode, StandbyMode};
pub use registry::{CommandHandler, CommandRegistry};
pub use task::{AsyncTask, TaskHandle, TaskState};
