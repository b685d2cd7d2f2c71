//! Session orchestration: owns both queues, both sources and the dispatcher,
//! and sequences startup and shutdown.

use crate::config::TerminalConfig;
use crate::dispatcher::{CommandDispatcher, PendingCommand, SettleDelays};
use crate::notification::NotificationSource;
use crate::process_stream::{MonitorProcess, ProcessStreamSource, StreamHandle};
use crate::queue::BoundedLineQueue;
use crate::scheduler::RenderScheduler;
use crate::shutdown::Shutdown;
use crate::state::{ChannelState, ConnectionState, SessionState};
use crate::transport::{DeviceTarget, PushConnector};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const READER_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// What a line of operator input asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputAction {
    Quit,
    Dispatch(String),
    /// Blank input.
    Ignore,
}

pub fn classify_input(input: &str) -> InputAction {
    let input = input.trim();
    if input.is_empty() {
        return InputAction::Ignore;
    }
    if ["quit", "exit", "q"]
        .iter()
        .any(|reserved| input.eq_ignore_ascii_case(reserved))
    {
        return InputAction::Quit;
    }
    InputAction::Dispatch(input.to_string())
}

pub struct TerminalSession {
    config: TerminalConfig,
    push_queue: Arc<BoundedLineQueue>,
    pull_queue: Arc<BoundedLineQueue>,
    push_state: Arc<ChannelState>,
    pull_state: Arc<ChannelState>,
    state: watch::Sender<SessionState>,
    shutdown: Arc<Shutdown>,
    connector: Arc<dyn PushConnector>,
    notifications: NotificationSource,
    dispatcher: Arc<CommandDispatcher>,
    monitor: Mutex<Option<(MonitorProcess, StreamHandle)>>,
}

impl std::fmt::Debug for TerminalSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalSession")
            .field("device", &self.config.device.name)
            .field("state", &self.state())
            .field("push", &self.push_state())
            .field("pull", &self.pull_state())
            .finish()
    }
}

impl TerminalSession {
    pub fn new(
        config: TerminalConfig,
        connector: Arc<dyn PushConnector>,
        shutdown: Arc<Shutdown>,
    ) -> Arc<Self> {
        let push_queue = Arc::new(BoundedLineQueue::new(config.render.queue_capacity));
        let pull_queue = Arc::new(BoundedLineQueue::new(config.render.queue_capacity));
        let push_state = Arc::new(ChannelState::new("push"));
        let pull_state = Arc::new(ChannelState::new("pull"));
        let notifications = NotificationSource::new(push_queue.clone(), push_state.clone());
        let dispatcher = Arc::new(CommandDispatcher::new(
            push_state.clone(),
            notifications.clone(),
            SettleDelays::from_config(&config.commands),
        ));
        let (state, _) = watch::channel(SessionState::Idle);

        Arc::new(Self {
            config,
            push_queue,
            pull_queue,
            push_state,
            pull_state,
            state,
            shutdown,
            connector,
            notifications,
            dispatcher,
            monitor: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &TerminalConfig {
        &self.config
    }

    pub fn device_name(&self) -> &str {
        &self.config.device.name
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn push_state(&self) -> ConnectionState {
        self.push_state.get()
    }

    pub fn pull_state(&self) -> ConnectionState {
        self.pull_state.get()
    }

    pub fn pending_command(&self) -> Option<PendingCommand> {
        self.dispatcher.pending()
    }

    pub fn shutdown_handle(&self) -> &Arc<Shutdown> {
        &self.shutdown
    }

    /// A scheduler draining this session's queues at the configured periods.
    pub fn scheduler(&self) -> RenderScheduler {
        RenderScheduler::new(
            self.push_queue.clone(),
            self.pull_queue.clone(),
            self.config.render.push_interval(),
            self.config.render.pull_interval(),
        )
    }

    /// Bring up both channels. A failure on one never prevents the other;
    /// failures are reported in band and the session still reaches Running.
    pub async fn start(self: &Arc<Self>) {
        let started = self.state.send_if_modified(|state| {
            if *state == SessionState::Idle {
                *state = SessionState::Connecting;
                true
            } else {
                false
            }
        });
        if !started {
            debug!(state = ?self.state(), "Session already started");
            return;
        }

        self.start_pull();
        let push_connected = self.connect_push().await;

        let running = self.state.send_if_modified(|state| {
            if *state == SessionState::Connecting {
                *state = SessionState::Running;
                true
            } else {
                false
            }
        });
        if !running {
            return;
        }
        info!(
            push = %self.push_state(),
            pull = %self.pull_state(),
            "Session running"
        );

        if push_connected && let Some(command) = self.config.commands.initial.as_deref() {
            self.spawn_dispatch(command.to_string());
        }
    }

    async fn connect_push(&self) -> bool {
        let target = DeviceTarget {
            name: self.config.device.name.clone(),
            scan_timeout: self.config.device.scan_timeout(),
        };
        self.push_state.advance(ConnectionState::Connecting);
        self.notifications
            .status(format!("Scanning for '{}'...", target.name));

        let result = tokio::select! {
            result = self.connector.connect(&target, self.notifications.clone()) => result,
            _ = self.shutdown.wait_for_shutdown() => {
                debug!("Shutdown while connecting push channel");
                return false;
            }
        };

        match result {
            Ok(link) => {
                self.dispatcher.attach(link);
                if self.shutdown.is_cancelled() {
                    // Shutdown raced the connect; whoever detaches disconnects.
                    if let Some(link) = self.dispatcher.detach() {
                        let _ = link.disconnect().await;
                    }
                    return false;
                }
                self.push_state.advance(ConnectionState::Connected);
                self.notifications.status("Bluetooth connected!");
                info!(device = %target.name, "Push channel connected");
                true
            }
            Err(err) => {
                warn!(device = %target.name, "{err}");
                self.notifications.error(&err);
                self.push_state.advance(ConnectionState::Failed);
                false
            }
        }
    }

    fn start_pull(&self) {
        let monitor = &self.config.monitor;
        if !monitor.enabled {
            info!("Serial monitor disabled");
            return;
        }

        let source = ProcessStreamSource::new(
            self.pull_queue.clone(),
            self.pull_state.clone(),
            monitor.banner_prefix.clone(),
            monitor.batch_interval(),
            monitor.batch_max_lines,
            self.shutdown.cancellation_token(),
        );
        // Failures are already reported on the pull queue.
        if let Ok(started) = source.start(&monitor.program, &monitor.args()) {
            *self.monitor.lock().unwrap_or_else(PoisonError::into_inner) = Some(started);
        }
    }

    /// Act on one line of operator input. Dispatches run on their own task so
    /// the caller never waits out a settle delay.
    pub fn handle_input(self: &Arc<Self>, input: &str) -> InputAction {
        let action = classify_input(input);
        match &action {
            InputAction::Quit => {
                info!("Quit requested");
                self.shutdown.shutdown();
            }
            InputAction::Dispatch(command) => self.spawn_dispatch(command.clone()),
            InputAction::Ignore => {}
        }
        action
    }

    fn spawn_dispatch(self: &Arc<Self>, command: String) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = session.dispatcher.submit(&command) => {}
                _ = session.shutdown.wait_for_shutdown() => {}
            }
        });
    }

    /// Stop both channels. Safe to call more than once; later callers wait
    /// for the first to finish.
    pub async fn shutdown(&self) {
        let first = self.state.send_if_modified(|state| match state {
            SessionState::ShuttingDown | SessionState::Closed => false,
            _ => {
                *state = SessionState::ShuttingDown;
                true
            }
        });
        if !first {
            let mut rx = self.state.subscribe();
            let _ = rx.wait_for(|state| *state == SessionState::Closed).await;
            return;
        }

        info!("Shutting down session");
        self.shutdown.shutdown();

        if let Some(link) = self.dispatcher.detach() {
            match tokio::time::timeout(DISCONNECT_TIMEOUT, link.disconnect()).await {
                Ok(Ok(())) => debug!("Push channel disconnected"),
                Ok(Err(err)) => warn!("Push channel disconnect failed: {err}"),
                Err(_) => warn!("Push channel disconnect timed out"),
            }
        }
        self.push_state.advance(ConnectionState::Closed);

        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((process, stream)) = monitor {
            let status = process.terminate(self.config.monitor.kill_grace()).await;
            info!(pid = process.pid(), ?status, "Monitor stopped");

            let join = tokio::task::spawn_blocking(move || stream.join());
            if tokio::time::timeout(READER_JOIN_TIMEOUT, join).await.is_err() {
                warn!("Monitor reader threads did not stop in time");
            }
        }
        self.pull_state.advance(ConnectionState::Closed);

        self.state.send_replace(SessionState::Closed);
        info!("Session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_words_quit() {
        for input in ["quit", "EXIT", "Q", "  q  "] {
            assert_eq!(classify_input(input), InputAction::Quit, "{input}");
        }
    }

    #[test]
    fn blank_input_is_ignored() {
        assert_eq!(classify_input(""), InputAction::Ignore);
        assert_eq!(classify_input(" \t "), InputAction::Ignore);
    }

    #[test]
    fn other_input_is_dispatched_trimmed() {
        assert_eq!(
            classify_input("  WIFI CONNECT home pw "),
            InputAction::Dispatch("WIFI CONNECT home pw".to_string())
        );
        assert_eq!(
            classify_input("quitting"),
            InputAction::Dispatch("quitting".to_string())
        );
    }
}
