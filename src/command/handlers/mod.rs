//! Command handlers for the built-in commands

mod echo;
mod fail;
mod sleep;

pub use echo::handle_echo;
pub use fail::handle_fail;
pub use sleep::handle_sleep;

use crate::error::{AgentError, Result};
use metal_shared::CommandParams;

/// Fetch a required numeric parameter
pub(crate) fn require_f64(params: &CommandParams, key: &str) -> Result<f64> {
    params
        .get(key)
        .and_then(|value| value.as_f64())
        .ok_or_else(|| {
            AgentError::InvalidCommandParams(format!("Parameter '{}' must be a number.", key))
        })
}

/// Fetch a required non-empty string parameter
pub(crate) fn require_str<'a>(params: &'a CommandParams, key: &str) -> Result<&'a str> {
    match params.get(key).and_then(|value| value.as_str()) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(AgentError::InvalidCommandParams(format!(
            "Parameter '{}' must be a non-empty string.",
            key
        ))),
    }
}
