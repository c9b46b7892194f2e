//! The agent: command dispatch, status, and the one-shot process lifecycle

use crate::command::{AgentMode, CommandRegistry, TaskHandle};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::heartbeat::{HeartbeatHandle, Heartbeater};
use crate::listener::ListenerFactory;
use metal_shared::state_machine::TransitionResult;
use metal_shared::{
    now_secs, AgentStatus, CommandParams, LifecycleEvent, LifecycleMachine, LifecycleState,
};
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Provisioning agent
pub struct Agent {
    config: AgentConfig,
    mode: &'static str,
    started_at: f64,
    registry: CommandRegistry,
    /// Every task handed out, in submission order
    command_results: RwLock<Vec<TaskHandle>>,
    lifecycle: Mutex<LifecycleMachine>,
    heartbeater: Mutex<Option<Heartbeater>>,
    listeners: Arc<dyn ListenerFactory>,
}

impl Agent {
    /// Create an agent serving `mode`'s commands
    pub fn new(
        config: AgentConfig,
        mode: &dyn AgentMode,
        heartbeater: Heartbeater,
        listeners: Arc<dyn ListenerFactory>,
    ) -> Self {
        let registry = mode.build_registry();
        info!(
            "Agent {} in {} mode, commands: {:?}",
            config.agent_id,
            mode.name(),
            registry.command_names()
        );

        Self {
            config,
            mode: mode.name(),
            started_at: now_secs(),
            registry,
            command_results: RwLock::new(Vec::new()),
            lifecycle: Mutex::new(LifecycleMachine::new()),
            heartbeater: Mutex::new(Some(heartbeater)),
            listeners,
        }
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .state()
    }

    /// Current status snapshot
    pub fn get_status(&self) -> AgentStatus {
        AgentStatus {
            mode: self.mode.to_string(),
            started_at: self.started_at,
            version: crate::VERSION.to_string(),
        }
    }

    /// Look up `name` and hand `params` to its handler.
    ///
    /// Unknown names and rejected parameters fail here, before any task
    /// exists. Otherwise the handler's already-started task is returned.
    pub fn execute_command(&self, name: &str, params: CommandParams) -> Result<TaskHandle> {
        let handler = self.registry.get(name).ok_or_else(|| {
            warn!("Rejected unknown command {}", name);
            AgentError::InvalidCommand(name.to_string())
        })?;

        let task = handler(name, params).map_err(|e| {
            warn!("Command {} rejected: {}", name, e);
            e
        })?;

        info!("Executing command {} as task {}", name, task.id());
        self.command_results
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(task.clone());

        Ok(task)
    }

    /// Task handed out under `id`
    pub fn get_command_result(&self, id: &str) -> Result<TaskHandle> {
        let not_found = || AgentError::CommandNotFound(id.to_string());
        let id = Uuid::parse_str(id).map_err(|_| not_found())?;

        self.command_results
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|task| task.id() == id)
            .cloned()
            .ok_or_else(not_found)
    }

    /// All tasks handed out, oldest first
    pub fn list_command_results(&self) -> Vec<TaskHandle> {
        self.command_results
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Serve until Ctrl-C or SIGTERM
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Bind the listener, start the heartbeater, and serve until `shutdown`
    /// resolves. May be called once per agent; later calls fail with
    /// [`AgentError::AlreadyStarted`].
    pub async fn run_until<S>(self: &Arc<Self>, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()> + Send,
    {
        self.transition(LifecycleEvent::Start)?;

        let address = self.config.listen_address();
        let mut listener = match self.listeners.bind(&address).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind request listener on {}: {}", address, e);
                self.transition(LifecycleEvent::Shutdown)?;
                return Err(e);
            }
        };
        let advertised = match listener.local_addr() {
            Ok(bound) => {
                info!("Request listener bound to {}", bound);
                if bound.ip().is_unspecified() && self.config.advertise_address.is_none() {
                    warn!("Listening on a wildcard address; the orchestrator resolves the host itself");
                }
                self.config.advertised_address(bound)
            }
            Err(e) => {
                warn!("Could not read bound address of request listener: {}", e);
                self.config
                    .advertise_address
                    .clone()
                    .unwrap_or(address)
            }
        };

        let heartbeat = self.start_heartbeater(&advertised);

        let outcome = tokio::select! {
            result = listener.serve(self.clone()) => result,
            _ = shutdown => {
                info!("Shutdown signal received");
                Ok(())
            }
        };

        if let Err(e) = listener.stop().await {
            warn!("Failed to stop request listener: {}", e);
        }
        if let Some(heartbeat) = heartbeat {
            heartbeat.stop();
        }

        self.transition(LifecycleEvent::Shutdown)?;
        info!("Agent stopped");
        outcome
    }

    fn start_heartbeater(&self, advertised: &str) -> Option<HeartbeatHandle> {
        let heartbeater = self
            .heartbeater
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        match heartbeater {
            Some(heartbeater) => {
                heartbeater.advertise(advertised);
                Some(heartbeater.spawn())
            }
            None => {
                warn!("Heartbeater already consumed");
                None
            }
        }
    }

    fn transition(&self, event: LifecycleEvent) -> Result<()> {
        let result = self
            .lifecycle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .process_event(event);

        match result {
            TransitionResult::Success(state) => {
                debug!("Agent lifecycle -> {:?}", state);
                Ok(())
            }
            TransitionResult::Invalid { from, event } => {
                error!("Invalid lifecycle event {:?} in state {:?}", event, from);
                Err(AgentError::AlreadyStarted)
            }
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{AsyncTask, StandbyMode};
    use crate::heartbeat::{HeartbeatPolicy, OrchestratorClient};
    use crate::listener::RequestListener;
    use async_trait::async_trait;
    use metal_shared::TaskStatus;
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct NotifyingClient {
        calls: AtomicUsize,
        notify: Notify,
        advertised: Mutex<Vec<String>>,
    }

    impl NotifyingClient {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                notify: Notify::new(),
                advertised: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl OrchestratorClient for NotifyingClient {
        async fn heartbeat(&self) -> Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.notify.notify_one();
            Ok(now_secs() + 300.0)
        }

        fn advertise(&self, listen_address: &str) {
            self.advertised
                .lock()
                .unwrap()
                .push(listen_address.to_string());
        }
    }

    #[derive(Default)]
    struct MockCalls {
        bound: Mutex<Vec<String>>,
        served: AtomicUsize,
        stopped: AtomicUsize,
    }

    struct MockListenerFactory {
        calls: Arc<MockCalls>,
    }

    struct MockListener {
        calls: Arc<MockCalls>,
    }

    #[async_trait]
    impl ListenerFactory for MockListenerFactory {
        async fn bind(&self, address: &str) -> Result<Box<dyn RequestListener>> {
            self.calls.bound.lock().unwrap().push(address.to_string());
            Ok(Box::new(MockListener {
                calls: self.calls.clone(),
            }))
        }
    }

    #[async_trait]
    impl RequestListener for MockListener {
        fn local_addr(&self) -> Result<SocketAddr> {
            Ok("127.0.0.1:41234".parse().unwrap())
        }

        async fn serve(&mut self, _agent: Arc<Agent>) -> Result<()> {
            self.calls.served.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }

        async fn stop(&mut self) -> Result<()> {
            self.calls.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn test_agent() -> (Arc<Agent>, Arc<NotifyingClient>, Arc<MockCalls>) {
        let client = Arc::new(NotifyingClient::new());
        let calls = Arc::new(MockCalls::default());
        let agent = Agent::new(
            AgentConfig::default(),
            &StandbyMode,
            Heartbeater::new(client.clone(), HeartbeatPolicy::default()),
            Arc::new(MockListenerFactory {
                calls: calls.clone(),
            }),
        );
        (Arc::new(agent), client, calls)
    }

    /// Mode with a single recording command
    struct RecordingMode {
        seen: Arc<Mutex<Vec<(String, CommandParams)>>>,
    }

    impl AgentMode for RecordingMode {
        fn name(&self) -> &'static str {
            "TEST_MODE"
        }

        fn register(&self, registry: &mut CommandRegistry) {
            let seen = self.seen.clone();
            registry.register("do_something", move |name: &str, params: CommandParams| {
                seen.lock().unwrap().push((name.to_string(), params.clone()));
                Ok(AsyncTask::new(name, params).start(|_| async { Ok(Value::Null) }))
            });
        }
    }

    #[tokio::test]
    async fn test_get_status() {
        let before = now_secs();
        let (agent, _, _) = test_agent();

        let status = agent.get_status();
        assert_eq!(status.mode, "STANDBY");
        assert_eq!(status.version, env!("CARGO_PKG_VERSION"));
        assert!(status.started_at >= before && status.started_at <= now_secs());
        assert_eq!(agent.get_status().started_at, status.started_at);
    }

    #[tokio::test]
    async fn test_execute_command() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let client = Arc::new(NotifyingClient::new());
        let agent = Agent::new(
            AgentConfig::default(),
            &RecordingMode { seen: seen.clone() },
            Heartbeater::new(client, HeartbeatPolicy::default()),
            Arc::new(MockListenerFactory {
                calls: Arc::new(MockCalls::default()),
            }),
        );

        let mut params = CommandParams::new();
        params.insert("foo".into(), json!("bar"));
        let task = agent.execute_command("do_something", params.clone()).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("do_something".to_string(), params)]
        );
        assert_eq!(agent.get_status().mode, "TEST_MODE");
        assert_eq!(agent.get_command_result(&task.id().to_string()).unwrap().id(), task.id());
    }

    #[tokio::test]
    async fn test_execute_invalid_command() {
        let (agent, _, _) = test_agent();

        let result = agent.execute_command("do_something", CommandParams::new());
        assert!(matches!(result, Err(AgentError::InvalidCommand(ref name)) if name == "do_something"));
        assert!(agent.list_command_results().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_params_create_no_task() {
        let (agent, _, _) = test_agent();

        let result = agent.execute_command("sleep", CommandParams::new());
        assert!(matches!(result, Err(AgentError::InvalidCommandParams(_))));
        assert!(agent.list_command_results().is_empty());
    }

    #[tokio::test]
    async fn test_command_results_are_tracked() {
        let (agent, _, _) = test_agent();

        let mut params = CommandParams::new();
        params.insert("message".into(), json!("boom"));
        let failed = agent.execute_command("fail", params).unwrap();
        let echoed = agent.execute_command("echo", CommandParams::new()).unwrap();

        failed.join(None).await;
        echoed.join(None).await;

        let results = agent.list_command_results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id(), failed.id());
        assert_eq!(results[1].id(), echoed.id());

        let stored = agent.get_command_result(&failed.id().to_string()).unwrap();
        assert_eq!(stored.status(), TaskStatus::Failed);

        assert!(matches!(
            agent.get_command_result("not-a-task"),
            Err(AgentError::CommandNotFound(_))
        ));
        assert!(matches!(
            agent.get_command_result(&Uuid::new_v4().to_string()),
            Err(AgentError::CommandNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_run() {
        let (agent, client, calls) = test_agent();
        assert_eq!(agent.lifecycle_state(), LifecycleState::NotStarted);

        // Shut down as soon as the heartbeater has reported in
        let heartbeat_seen = client.clone();
        agent
            .run_until(async move { heartbeat_seen.notify.notified().await })
            .await
            .unwrap();

        assert_eq!(*calls.bound.lock().unwrap(), vec!["0.0.0.0:9999".to_string()]);
        assert_eq!(calls.served.load(Ordering::SeqCst), 1);
        assert_eq!(calls.stopped.load(Ordering::SeqCst), 1);
        assert!(client.calls.load(Ordering::SeqCst) >= 1);
        assert_eq!(
            *client.advertised.lock().unwrap(),
            vec!["127.0.0.1:41234".to_string()]
        );
        assert_eq!(agent.lifecycle_state(), LifecycleState::Stopped);

        let second = agent.run_until(async {}).await;
        assert!(matches!(second, Err(AgentError::AlreadyStarted)));
        assert_eq!(calls.bound.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_commands_work_while_heartbeat_fails() {
        struct DownClient;

        #[async_trait]
        impl OrchestratorClient for DownClient {
            async fn heartbeat(&self) -> Result<f64> {
                Err(AgentError::Heartbeat("connection refused".into()))
            }
        }

        let agent = Arc::new(Agent::new(
            AgentConfig::default(),
            &StandbyMode,
            Heartbeater::new(Arc::new(DownClient), HeartbeatPolicy::default()),
            Arc::new(MockListenerFactory {
                calls: Arc::new(MockCalls::default()),
            }),
        ));

        let runner = agent.clone();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let run = tokio::spawn(async move {
            runner
                .run_until(async move {
                    let _ = stop_rx.await;
                })
                .await
        });

        let task = agent
            .execute_command("echo", CommandParams::new())
            .unwrap()
            .join(None)
            .await;
        assert_eq!(task.status(), TaskStatus::Succeeded);

        stop_tx.send(()).unwrap();
        run.await.unwrap().unwrap();
    }
}
