//! Error types for the provisioning agent

use metal_shared::{codec::CodecError, ErrorBody};
use thiserror::Error;

/// Failure recorded on a task whose execution did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CommandExecutionError {
    message: String,
}

impl CommandExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<anyhow::Error> for CommandExecutionError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Errors surfaced by the agent
#[derive(Debug, Error)]
pub enum AgentError {
    /// No handler is registered under this command name.
    #[error("Unknown command: {0}")]
    InvalidCommand(String),

    /// A handler rejected its parameters.
    #[error("Invalid command parameters: {0}")]
    InvalidCommandParams(String),

    /// No task with this id was handed out by the agent.
    #[error("No command result with id {0}")]
    CommandNotFound(String),

    /// `run()` was called on an agent that has already been started.
    #[error("Agent has already been started")]
    AlreadyStarted,

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The heartbeat RPC failed.
    #[error("Heartbeat failed: {0}")]
    Heartbeat(String),

    /// Binding or serving the request listener failed.
    #[error("Request listener error: {0}")]
    Listener(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl AgentError {
    /// Short machine-readable name of the error
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::InvalidCommand(_) => "InvalidCommandError",
            AgentError::InvalidCommandParams(_) => "InvalidCommandParamsError",
            AgentError::CommandNotFound(_) => "CommandNotFoundError",
            AgentError::AlreadyStarted => "AlreadyStartedError",
            AgentError::InvalidConfig(_) => "InvalidConfigError",
            AgentError::Heartbeat(_) => "HeartbeatError",
            AgentError::Listener(_) => "ListenerError",
            AgentError::Codec(_) => "InvalidContentError",
        }
    }

    /// Status code reported to request clients
    pub fn code(&self) -> u16 {
        match self {
            AgentError::InvalidCommand(_)
            | AgentError::InvalidCommandParams(_)
            | AgentError::Codec(_) => 400,
            AgentError::CommandNotFound(_) => 404,
            AgentError::AlreadyStarted
            | AgentError::InvalidConfig(_)
            | AgentError::Heartbeat(_)
            | AgentError::Listener(_) => 500,
        }
    }

    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody::new(self.kind(), self.code(), self.to_string())
    }
}

/// Result type for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;
