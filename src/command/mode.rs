//! Agent modes
//!
//! A mode decides which commands the agent accepts. The registry is built
//! from the mode once, when the agent is constructed.

use super::handlers;
use super::CommandRegistry;

/// A named set of commands
pub trait AgentMode: Send + Sync {
    /// Mode tag reported in the agent status
    fn name(&self) -> &'static str;

    /// Add this mode's commands to the registry
    fn register(&self, registry: &mut CommandRegistry);

    /// Build a registry holding only this mode's commands
    fn build_registry(&self) -> CommandRegistry {
        let mut registry = CommandRegistry::new();
        self.register(&mut registry);
        registry
    }
}

/// Default mode while the server waits for provisioning work
#[derive(Debug, Clone, Copy, Default)]
pub struct StandbyMode;

impl AgentMode for StandbyMode {
    fn name(&self) -> &'static str {
        "STANDBY"
    }

    fn register(&self, registry: &mut CommandRegistry) {
        registry.register("echo", handlers::handle_echo);
        registry.register("sleep", handlers::handle_sleep);
        registry.register("fail", handlers::handle_fail);
    }
}

/// Look up a mode by its tag (case-insensitive)
pub fn mode_by_name(name: &str) -> Option<Box<dyn AgentMode>> {
    match name.to_ascii_uppercase().as_str() {
        "STANDBY" => Some(Box::new(StandbyMode)),
        _ => None,
    }
}
