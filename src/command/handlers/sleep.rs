//! Sleep command handler

use super::require_f64;
use crate::command::{AsyncTask, TaskHandle};
use crate::error::{AgentError, Result};
use metal_shared::CommandParams;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Longest sleep a single command may request
const MAX_SLEEP_SECS: f64 = 3600.0;

/// Handle `sleep`: waits `seconds` before succeeding
pub fn handle_sleep(command_name: &str, params: CommandParams) -> Result<TaskHandle> {
    let seconds = require_f64(&params, "seconds")?;
    if !(0.0..=MAX_SLEEP_SECS).contains(&seconds) {
        return Err(AgentError::InvalidCommandParams(format!(
            "Parameter 'seconds' must be between 0 and {}.",
            MAX_SLEEP_SECS
        )));
    }

    Ok(AsyncTask::new(command_name, params).start(move |_| async move {
        debug!("Sleeping for {}s", seconds);
        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
        Ok(json!({ "slept": seconds }))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use metal_shared::TaskStatus;

    fn params(seconds: serde_json::Value) -> CommandParams {
        let mut params = CommandParams::new();
        params.insert("seconds".into(), seconds);
        params
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes() {
        let task = handle_sleep("sleep", params(json!(30))).unwrap();
        assert_eq!(task.status(), TaskStatus::Running);

        let task = task.join(None).await;
        assert_eq!(task.result(), Some(json!({"slept": 30.0})));
    }

    #[tokio::test]
    async fn test_sleep_rejects_bad_seconds() {
        for bad in [json!("ten"), json!(-1), json!(MAX_SLEEP_SECS + 1.0)] {
            let result = handle_sleep("sleep", params(bad));
            assert!(matches!(result, Err(AgentError::InvalidCommandParams(_))));
        }

        let result = handle_sleep("sleep", CommandParams::new());
        assert!(matches!(result, Err(AgentError::InvalidCommandParams(_))));
    }
}
