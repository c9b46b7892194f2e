//! Command registry - maps command names to handlers

use super::TaskHandle;
use crate::error::Result;
use metal_shared::CommandParams;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// A command handler.
///
/// Receives the command name and its parameters, validates the parameters,
/// and returns an already-started task.
pub type CommandHandler = Arc<dyn Fn(&str, CommandParams) -> Result<TaskHandle> + Send + Sync>;

/// Command name -> handler table, filled once while the mode is set up
#[derive(Clone, Default)]
pub struct CommandRegistry {
    handlers: HashMap<String, CommandHandler>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`, replacing any previous one
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&str, CommandParams) -> Result<TaskHandle> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.handlers.insert(name.clone(), Arc::new(handler)).is_some() {
            warn!("Replacing handler for command {}", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&CommandHandler> {
        self.handlers.get(name)
    }

    /// Registered command names, sorted
    pub fn command_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.command_names())
            .finish()
    }
}
