//! Heartbeat scheduling
//!
//! The heartbeater reports liveness on a cadence set by the orchestrator.
//! After each successful heartbeat it sleeps for a random fraction of the
//! time left before the orchestrator's deadline, so agents booted together do
//! not heartbeat in lockstep. After a failure it retries within a window that
//! grows by `backoff_factor` per consecutive failure and resets on success.

use super::client::OrchestratorClient;
use super::clock::{Clock, JitterSource, SystemClock, ThreadRngJitter};
use super::signal::{CancellableWait, StopSignal};
use crate::error::{AgentError, Result};
use metal_shared::defaults;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Backoff and timeout settings for the heartbeat loop
#[derive(Debug, Clone)]
pub struct HeartbeatPolicy {
    /// Baseline error delay in seconds
    pub initial_error_delay: f64,
    /// Multiplier applied to the error delay after each failure
    pub backoff_factor: f64,
    /// Ceiling for the error delay in seconds
    pub max_error_delay: f64,
    /// Timeout for a single heartbeat RPC
    pub rpc_timeout: Duration,
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self {
            initial_error_delay: defaults::HEARTBEAT_ERROR_DELAY_SECS,
            backoff_factor: defaults::HEARTBEAT_BACKOFF_FACTOR,
            max_error_delay: defaults::HEARTBEAT_MAX_ERROR_DELAY_SECS,
            rpc_timeout: Duration::from_secs(defaults::HEARTBEAT_RPC_TIMEOUT_SECS),
        }
    }
}

impl HeartbeatPolicy {
    /// Reject settings under which the error delay could shrink across
    /// consecutive failures
    pub fn validate(&self) -> Result<()> {
        if !self.initial_error_delay.is_finite() || self.initial_error_delay <= 0.0 {
            return Err(AgentError::InvalidConfig(format!(
                "heartbeat error delay must be a positive number of seconds, got {}",
                self.initial_error_delay
            )));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(AgentError::InvalidConfig(format!(
                "heartbeat backoff factor must be at least 1, got {}",
                self.backoff_factor
            )));
        }
        if self.max_error_delay.is_nan() || self.max_error_delay < self.initial_error_delay {
            return Err(AgentError::InvalidConfig(format!(
                "heartbeat max error delay ({}) is below the initial error delay ({})",
                self.max_error_delay, self.initial_error_delay
            )));
        }
        if self.rpc_timeout.is_zero() {
            return Err(AgentError::InvalidConfig(
                "heartbeat RPC timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Background loop reporting liveness to the orchestrator
pub struct Heartbeater {
    client: Arc<dyn OrchestratorClient>,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn JitterSource>,
    stop_signal: Arc<dyn CancellableWait>,
    policy: HeartbeatPolicy,
    error_delay: f64,
}

impl Heartbeater {
    pub fn new(client: Arc<dyn OrchestratorClient>, policy: HeartbeatPolicy) -> Self {
        Self {
            client,
            clock: Arc::new(SystemClock),
            jitter: Arc::new(ThreadRngJitter),
            stop_signal: Arc::new(StopSignal::new()),
            error_delay: policy.initial_error_delay,
            policy,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_stop_signal(mut self, stop_signal: Arc<dyn CancellableWait>) -> Self {
        self.stop_signal = stop_signal;
        self
    }

    /// Current error delay in seconds
    pub fn error_delay(&self) -> f64 {
        self.error_delay
    }

    /// Report `listen_address` in every heartbeat from now on
    pub fn advertise(&self, listen_address: &str) {
        self.client.advertise(listen_address);
    }

    /// Raise the stop signal without waiting for the loop to exit
    pub fn stop(&self) {
        self.stop_signal.cancel();
    }

    /// Run the loop until the stop signal is raised
    pub async fn run(&mut self) {
        info!("Starting heartbeater");
        let mut wait_interval = 0.0;

        loop {
            if self.stop_signal.wait(to_duration(wait_interval)).await {
                break;
            }
            wait_interval = self.do_heartbeat().await;
        }

        info!("Heartbeater stopped");
    }

    /// One heartbeat attempt. Returns the number of seconds to wait before the next one.
    async fn do_heartbeat(&mut self) -> f64 {
        let wait_interval = match self.client.heartbeat().await {
            Ok(next_heartbeat) => {
                let fraction = self.jitter.fraction();
                let now = self.clock.now();
                self.error_delay = self.policy.initial_error_delay;

                let interval = (next_heartbeat - now) * fraction;
                info!(next_heartbeat, "Heartbeat successful, next in {:.2}s", interval);
                interval
            }
            Err(err) => {
                let fallback = self.clock.now() + self.error_delay;
                let fraction = self.jitter.fraction();
                let now = self.clock.now();

                let interval = (fallback - now) * fraction;
                self.error_delay =
                    (self.error_delay * self.policy.backoff_factor).min(self.policy.max_error_delay);
                warn!(
                    error_delay = self.error_delay,
                    "Heartbeat failed: {}, retrying in {:.2}s", err, interval
                );
                interval
            }
        };

        // NaN compares false, so max() maps it to zero as well
        wait_interval.max(0.0)
    }

    /// Spawn the loop on its own tokio task
    pub fn spawn(mut self) -> HeartbeatHandle {
        let stop_signal = self.stop_signal.clone();
        let task = tokio::spawn(async move { self.run().await });
        debug!("Heartbeater spawned");

        HeartbeatHandle { stop_signal, task }
    }
}

fn to_duration(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}

/// Handle to a spawned heartbeater
pub struct HeartbeatHandle {
    stop_signal: Arc<dyn CancellableWait>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Raise the stop signal. Idempotent and does not wait for the loop to exit.
    pub fn stop(&self) {
        self.stop_signal.cancel();
    }

    /// Wait for the loop to exit
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!("Heartbeater task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Pops scripted values in order
    struct Script<T>(Mutex<VecDeque<T>>);

    impl<T> Script<T> {
        fn new(values: impl IntoIterator<Item = T>) -> Self {
            Self(Mutex::new(values.into_iter().collect()))
        }

        fn pop(&self) -> T {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .expect("script exhausted")
        }
    }

    impl Clock for Script<f64> {
        fn now(&self) -> f64 {
            self.pop()
        }
    }

    struct ScriptedJitter(Script<f64>);

    impl JitterSource for ScriptedJitter {
        fn fraction(&self) -> f64 {
            self.0.pop()
        }
    }

    /// Deadline on success, `None` for a failed RPC
    struct ScriptedClient {
        responses: Script<Option<f64>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OrchestratorClient for ScriptedClient {
        async fn heartbeat(&self) -> Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .pop()
                .ok_or_else(|| AgentError::Heartbeat("uh oh!".into()))
        }
    }

    /// Records each wait and answers with scripted stop decisions
    struct ScriptedWait {
        decisions: Script<bool>,
        waits: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl CancellableWait for ScriptedWait {
        async fn wait(&self, timeout: Duration) -> bool {
            self.waits.lock().unwrap().push(timeout);
            self.decisions.pop()
        }

        fn cancel(&self) {}
    }

    #[tokio::test]
    async fn test_heartbeat_schedule() {
        // Deadlines 100 and 180, then a failure
        let client = Arc::new(ScriptedClient {
            responses: Script::new([Some(100.0), Some(180.0), None]),
            calls: AtomicUsize::new(0),
        });
        let clock = Arc::new(Script::new([50.0, 80.0, 125.0, 125.5]));
        let jitter = Arc::new(ScriptedJitter(Script::new([0.5, 0.4, 0.5])));
        let waits = Arc::new(ScriptedWait {
            decisions: Script::new([false, false, false, true]),
            waits: Mutex::new(Vec::new()),
        });

        let mut heartbeater = Heartbeater::new(client.clone(), HeartbeatPolicy::default())
            .with_clock(clock)
            .with_jitter(jitter)
            .with_stop_signal(waits.clone());

        heartbeater.run().await;

        // 0, then (100 - 50) * .5, (180 - 80) * .4, (125 + 1 - 125.5) * .5
        assert_eq!(
            *waits.waits.lock().unwrap(),
            vec![
                Duration::ZERO,
                Duration::from_secs_f64(25.0),
                Duration::from_secs_f64(40.0),
                Duration::from_secs_f64(0.25),
            ]
        );
        assert_eq!(heartbeater.error_delay(), 2.7);
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_error_delay_compounds_and_resets() {
        let client = Arc::new(ScriptedClient {
            responses: Script::new([None, None, Some(20.0)]),
            calls: AtomicUsize::new(0),
        });
        let clock = Arc::new(Script::new([0.0, 0.0, 0.0, 0.0, 10.0]));
        let jitter = Arc::new(ScriptedJitter(Script::new([1.0, 1.0, 0.5])));
        let waits = Arc::new(ScriptedWait {
            decisions: Script::new([false, false, false, true]),
            waits: Mutex::new(Vec::new()),
        });

        let mut heartbeater = Heartbeater::new(client, HeartbeatPolicy::default())
            .with_clock(clock)
            .with_jitter(jitter)
            .with_stop_signal(waits.clone());

        assert_eq!(heartbeater.do_heartbeat().await, 1.0);
        assert_eq!(heartbeater.error_delay(), 2.7);

        assert_eq!(heartbeater.do_heartbeat().await, 2.7);
        assert!((heartbeater.error_delay() - 7.29).abs() < 1e-9);

        assert_eq!(heartbeater.do_heartbeat().await, 5.0);
        assert_eq!(heartbeater.error_delay(), 1.0);
    }

    #[tokio::test]
    async fn test_wait_is_never_negative() {
        // Deadline already in the past
        let client = Arc::new(ScriptedClient {
            responses: Script::new([Some(10.0)]),
            calls: AtomicUsize::new(0),
        });
        let mut heartbeater = Heartbeater::new(client, HeartbeatPolicy::default())
            .with_clock(Arc::new(Script::new([50.0])))
            .with_jitter(Arc::new(ScriptedJitter(Script::new([0.5]))));

        assert_eq!(heartbeater.do_heartbeat().await, 0.0);
    }

    #[tokio::test]
    async fn test_error_delay_is_capped() {
        let client = Arc::new(ScriptedClient {
            responses: Script::new([None, None]),
            calls: AtomicUsize::new(0),
        });
        let policy = HeartbeatPolicy {
            max_error_delay: 5.0,
            ..HeartbeatPolicy::default()
        };
        let mut heartbeater = Heartbeater::new(client, policy)
            .with_clock(Arc::new(Script::new([0.0, 0.0, 0.0, 0.0])))
            .with_jitter(Arc::new(ScriptedJitter(Script::new([0.0, 0.0]))));

        heartbeater.do_heartbeat().await;
        heartbeater.do_heartbeat().await;
        assert_eq!(heartbeater.error_delay(), 5.0);
    }

    /// Always succeeds with a deadline 10s out and counts calls
    struct CountingClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OrchestratorClient for CountingClient {
        async fn heartbeat(&self) -> Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(metal_shared::now_secs() + 10.0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_heartbeats() {
        let client = Arc::new(CountingClient {
            calls: AtomicUsize::new(0),
        });
        let handle = Heartbeater::new(client.clone(), HeartbeatPolicy::default()).spawn();

        // First heartbeat goes out immediately
        while client.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        handle.stop();
        handle.stop();
        handle.join().await;

        let calls = client.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(client.calls.load(Ordering::SeqCst), calls);
    }

    #[test]
    fn test_policy_validation() {
        assert!(HeartbeatPolicy::default().validate().is_ok());

        let shrinking = HeartbeatPolicy {
            backoff_factor: 0.5,
            ..HeartbeatPolicy::default()
        };
        assert!(matches!(shrinking.validate(), Err(AgentError::InvalidConfig(_))));

        let inverted_cap = HeartbeatPolicy {
            initial_error_delay: 10.0,
            max_error_delay: 5.0,
            ..HeartbeatPolicy::default()
        };
        assert!(matches!(inverted_cap.validate(), Err(AgentError::InvalidConfig(_))));

        let no_delay = HeartbeatPolicy {
            initial_error_delay: 0.0,
            ..HeartbeatPolicy::default()
        };
        assert!(no_delay.validate().is_err());

        let no_timeout = HeartbeatPolicy {
            rpc_timeout: Duration::ZERO,
            ..HeartbeatPolicy::default()
        };
        assert!(no_timeout.validate().is_err());
    }
}
