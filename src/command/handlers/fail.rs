//! Fail command handler

use super::require_str;
use crate::command::{AsyncTask, TaskHandle};
use crate::error::Result;
use metal_shared::CommandParams;
use serde_json::Value;

/// Handle `fail`: the task fails with the given `message`
pub fn handle_fail(command_name: &str, params: CommandParams) -> Result<TaskHandle> {
    let message = require_str(&params, "message")?.to_string();

    Ok(AsyncTask::new(command_name, params).start(move |_| async move {
        Err::<Value, _>(anyhow::anyhow!(message))
    }))
}
