//! Task and Agent State Machines
//!
//! Defines the command task status and the one-shot agent lifecycle, with the
//! transitions each of them allows.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a command task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    /// Whether the task has finished
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Running => "RUNNING",
            TaskStatus::Succeeded => "SUCCEEDED",
            TaskStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check if a task may move from one status to another
pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
    matches!(
        (from, to),
        (TaskStatus::Running, TaskStatus::Succeeded) | (TaskStatus::Running, TaskStatus::Failed)
    )
}

/// Lifecycle of an agent process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    NotStarted,
    Running,
    Stopped,
}

/// Events that move the agent through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// `run()` was entered
    Start,
    /// The serve loop returned or a shutdown signal arrived
    Shutdown,
}

/// Result of a lifecycle transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and state changed
    Success(LifecycleState),
    /// Transition was invalid from current state
    Invalid {
        from: LifecycleState,
        event: LifecycleEvent,
    },
}

/// One-shot lifecycle: NOT_STARTED -> RUNNING -> STOPPED
#[derive(Debug)]
pub struct LifecycleMachine {
    current_state: LifecycleState,
}

impl Default for LifecycleMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleMachine {
    pub fn new() -> Self {
        Self {
            current_state: LifecycleState::NotStarted,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.current_state
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: LifecycleEvent) -> TransitionResult {
        use LifecycleEvent::*;
        use LifecycleState::*;

        let next = match (self.current_state, event) {
            (NotStarted, Start) => Some(Running),
            (Running, Shutdown) => Some(Stopped),
            // STOPPED is terminal; there is no way back to RUNNING
            _ => None,
        };

        match next {
            Some(state) => {
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }
}
