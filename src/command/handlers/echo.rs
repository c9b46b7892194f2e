//! Echo command handler

use crate::command::{AsyncTask, TaskHandle};
use crate::error::Result;
use metal_shared::CommandParams;
use serde_json::Value;

/// Handle `echo`: succeeds with its own parameters as the result
pub fn handle_echo(command_name: &str, params: CommandParams) -> Result<TaskHandle> {
    Ok(AsyncTask::new(command_name, params)
        .start(|params| async move { Ok(Value::Object((*params).clone())) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use metal_shared::TaskStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_echo_returns_params() {
        let mut params = CommandParams::new();
        params.insert("foo".into(), json!("bar"));

        let task = handle_echo("echo", params).unwrap().join(None).await;
        assert_eq!(task.status(), TaskStatus::Succeeded);
        assert_eq!(task.result(), Some(json!({"foo": "bar"})));
    }
}
