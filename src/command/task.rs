//! Asynchronous command tasks
//!
//! A task is created synchronously by a command handler, started exactly once
//! on its own tokio task, and moved to a terminal state by the worker when its
//! execution closure returns, fails, or panics.

use crate::error::CommandExecutionError;
use futures::FutureExt;
use metal_shared::state_machine::is_valid_transition;
use metal_shared::{CommandParams, TaskStatus, TaskView};
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// State of a task, carrying the outcome once terminal
#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
    Running,
    Succeeded(Value),
    Failed(CommandExecutionError),
}

impl TaskState {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskState::Running => TaskStatus::Running,
            TaskState::Succeeded(_) => TaskStatus::Succeeded,
            TaskState::Failed(_) => TaskStatus::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn result(&self) -> Option<&Value> {
        match self {
            TaskState::Succeeded(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&CommandExecutionError> {
        match self {
            TaskState::Failed(err) => Some(err),
            _ => None,
        }
    }
}

struct TaskInner {
    id: Uuid,
    command_name: String,
    command_params: Arc<CommandParams>,
    state: watch::Sender<TaskState>,
}

impl TaskInner {
    /// Apply a terminal transition. Only the first one out of RUNNING sticks.
    fn finish(&self, next: TaskState) {
        let status = next.status();
        let applied = self.state.send_if_modified(|current| {
            if !is_valid_transition(current.status(), status) {
                return false;
            }
            *current = next;
            true
        });

        if !applied {
            warn!(task_id = %self.id, "Ignoring transition to {}", status);
            return;
        }

        match &*self.state.borrow() {
            TaskState::Failed(err) => {
                warn!(task_id = %self.id, command = %self.command_name, "Command failed: {}", err)
            }
            _ => info!(task_id = %self.id, command = %self.command_name, "Command succeeded"),
        }
    }

    fn view(&self) -> TaskView {
        let state = self.state.borrow();
        TaskView {
            id: self.id.to_string(),
            command_name: self.command_name.clone(),
            command_params: (*self.command_params).clone(),
            command_status: state.status(),
            command_result: state.result().cloned(),
            command_error: state.error().map(|err| err.message().to_string()),
        }
    }
}

/// A task that has been created but not started
pub struct AsyncTask {
    inner: Arc<TaskInner>,
}

impl AsyncTask {
    /// Create a new task in the RUNNING state
    pub fn new(command_name: impl Into<String>, command_params: CommandParams) -> Self {
        let (state, _) = watch::channel(TaskState::Running);
        Self {
            inner: Arc::new(TaskInner {
                id: Uuid::new_v4(),
                command_name: command_name.into(),
                command_params: Arc::new(command_params),
                state,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn status(&self) -> TaskStatus {
        self.inner.state.borrow().status()
    }

    pub fn to_view(&self) -> TaskView {
        self.inner.view()
    }

    /// Run `execute` on its own tokio task and return a handle immediately.
    ///
    /// `execute` receives the task's parameters. Its outcome decides the
    /// terminal state: `Ok(value)` succeeds with `value` as the result, while
    /// an error or a panic fails the task with the failure's message.
    pub fn start<F, Fut>(self, execute: F) -> TaskHandle
    where
        F: FnOnce(Arc<CommandParams>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let inner = self.inner;
        let worker = inner.clone();

        debug!(task_id = %inner.id, command = %inner.command_name, "Starting command");

        tokio::spawn(async move {
            let params = worker.command_params.clone();
            let outcome = AssertUnwindSafe(async move { execute(params).await })
                .catch_unwind()
                .await;

            let next = match outcome {
                Ok(Ok(value)) => TaskState::Succeeded(value),
                Ok(Err(err)) => TaskState::Failed(err.into()),
                Err(panic) => TaskState::Failed(CommandExecutionError::new(panic_message(&*panic))),
            };
            worker.finish(next);
        });

        TaskHandle { inner }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "command panicked".to_string()
    }
}

/// Shared handle to a started task
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<TaskInner>,
}

impl TaskHandle {
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Snapshot of the current state
    pub fn state(&self) -> TaskState {
        self.inner.state.borrow().clone()
    }

    pub fn status(&self) -> TaskStatus {
        self.inner.state.borrow().status()
    }

    pub fn result(&self) -> Option<Value> {
        self.inner.state.borrow().result().cloned()
    }

    pub fn error(&self) -> Option<CommandExecutionError> {
        self.inner.state.borrow().error().cloned()
    }

    /// Wait until the task is terminal or `timeout` elapses.
    ///
    /// Only the caller waits; an elapsed timeout leaves the task running.
    pub async fn join(&self, timeout: Option<Duration>) -> Self {
        let mut rx = self.inner.state.subscribe();
        let finished = rx.wait_for(TaskState::is_terminal);

        match timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, finished).await.is_err() {
                    debug!(task_id = %self.inner.id, "Join timed out after {:?}", limit);
                }
            }
            None => {
                let _ = finished.await;
            }
        }

        self.clone()
    }

    pub fn to_view(&self) -> TaskView {
        self.inner.view()
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.inner.id)
            .field("command_name", &self.inner.command_name)
            .field("status", &self.status())
            .finish()
    }
}
