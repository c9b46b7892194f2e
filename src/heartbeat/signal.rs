//! Cross-thread stop signal for the heartbeat loop

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// A wait that another thread can cut short
#[async_trait]
pub trait CancellableWait: Send + Sync {
    /// Wait up to `timeout`. Returns `true` if cancelled before or during the wait.
    async fn wait(&self, timeout: Duration) -> bool;

    /// Cancel current and future waits. Idempotent and non-blocking.
    fn cancel(&self);
}

/// Stop signal backed by a watch channel
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raise the signal
    pub fn raise(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CancellableWait for StopSignal {
    async fn wait(&self, timeout: Duration) -> bool {
        if self.is_raised() {
            return true;
        }
        if timeout.is_zero() {
            return false;
        }

        let mut rx = self.tx.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|raised| *raised))
            .await
            .map(|raised| raised.is_ok())
            .unwrap_or(false)
    }

    fn cancel(&self) {
        self.raise();
    }
}
