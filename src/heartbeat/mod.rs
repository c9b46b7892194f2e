//! Liveness reporting to the orchestrator
//!
//! This module handles:
//! - The jittered heartbeat schedule with failure backoff
//! - The stop signal that ends the heartbeat loop
//! - The heartbeat RPC itself

mod client;
mod clock;
mod heartbeater;
mod signal;

pub use client::{OrchestratorClient, TcpOrchestratorClient};
pub use clock::{Clock, JitterSource, SystemClock, ThreadRngJitter};
pub use heartbeater::{HeartbeatHandle, HeartbeatPolicy, Heartbeater};
pub use signal::{CancellableWait, StopSignal};
