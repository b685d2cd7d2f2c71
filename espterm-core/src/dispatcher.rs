//! Operator commands onto the push channel.
//!
//! The device protocol has no request/response framing: a reply, if any,
//! shows up later as an ordinary notification. After each write the
//! dispatcher therefore waits a per-command settle delay before the next
//! command may go out. This is best-effort pacing so that e.g. a radio power
//! change has taken effect before the next command; it is not an
//! acknowledgement.

use crate::config::CommandConfig;
use crate::error::{TerminalError, TransportError};
use crate::line::LogLine;
use crate::notification::NotificationSource;
use crate::state::{ChannelState, ConnectionState};
use crate::transport::PushLink;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Settle delay per command class.
#[derive(Debug, Clone, PartialEq)]
pub struct SettleDelays {
    pub slow: Duration,
    pub inspect: Duration,
    pub default: Duration,
    slow_prefixes: Vec<String>,
    inspect_prefixes: Vec<String>,
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self::from_config(&CommandConfig::default())
    }
}

impl SettleDelays {
    pub fn from_config(config: &CommandConfig) -> Self {
        let upper = |prefixes: &[String]| -> Vec<String> {
            prefixes.iter().map(|p| p.to_uppercase()).collect()
        };
        Self {
            slow: Duration::from_millis(config.slow_settle_ms),
            inspect: Duration::from_millis(config.inspect_settle_ms),
            default: Duration::from_millis(config.default_settle_ms),
            slow_prefixes: upper(&config.slow[..]),
            inspect_prefixes: upper(&config.inspect[..]),
        }
    }

    pub fn classify(&self, command: &str) -> Duration {
        let command = command.trim().to_uppercase();
        let matches = |prefix: &String| {
            command
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with(' '))
        };
        if self.slow_prefixes.iter().any(matches) {
            self.slow
        } else if self.inspect_prefixes.iter().any(matches) {
            self.inspect
        } else {
            self.default
        }
    }
}

/// A command that has been written and is waiting out its settle delay.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCommand {
    pub text: String,
    pub issued_at: Instant,
    pub expected_settle_delay: Duration,
}

pub struct CommandDispatcher {
    link: RwLock<Option<Arc<dyn PushLink>>>,
    state: Arc<ChannelState>,
    notifications: NotificationSource,
    delays: SettleDelays,
    /// Held from write until the settle delay has elapsed.
    outbound: tokio::sync::Mutex<()>,
    pending: Mutex<Option<PendingCommand>>,
}

impl std::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("state", &self.state.get())
            .field("delays", &self.delays)
            .field("pending", &self.pending())
            .finish()
    }
}

impl CommandDispatcher {
    pub fn new(
        state: Arc<ChannelState>,
        notifications: NotificationSource,
        delays: SettleDelays,
    ) -> Self {
        Self {
            link: RwLock::new(None),
            state,
            notifications,
            delays,
            outbound: tokio::sync::Mutex::new(()),
            pending: Mutex::new(None),
        }
    }

    pub fn attach(&self, link: Arc<dyn PushLink>) {
        *self.link.write().unwrap_or_else(PoisonError::into_inner) = Some(link);
    }

    pub fn detach(&self) -> Option<Arc<dyn PushLink>> {
        self.link
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// The command currently waiting out its settle delay.
    pub fn pending(&self) -> Option<PendingCommand> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Send `command` and wait out its settle delay.
    ///
    /// Returns false without side effects for blank input, and false with an
    /// in-band notice when the channel is not connected or the write fails.
    /// Never returns an error: every failure is reported as a line.
    pub async fn submit(&self, command: &str) -> bool {
        let command = command.trim();
        if command.is_empty() {
            return false;
        }

        // Checked before queueing behind a settling command as well, so a
        // dead channel is reported right away.
        if self.connected_link().is_none() {
            return self.not_connected(command);
        }
        let _outbound = self.outbound.lock().await;
        let Some(link) = self.connected_link() else {
            return self.not_connected(command);
        };

        let delay = self.delays.classify(command);
        self.notifications.push(LogLine::echo(command));
        self.set_pending(Some(PendingCommand {
            text: command.to_string(),
            issued_at: Instant::now(),
            expected_settle_delay: delay,
        }));

        if let Err(err) = link.write(command.as_bytes()).await {
            let closed = matches!(err, TransportError::Closed);
            let err = TerminalError::DispatchFailed(err);
            warn!(command, "{err}");
            self.notifications.error(err);
            self.set_pending(None);
            if closed {
                self.notifications.link_lost("write on closed link");
            }
            return false;
        }

        debug!(command, settle_ms = delay.as_millis() as u64, "Command sent");
        tokio::time::sleep(delay).await;
        self.set_pending(None);
        true
    }

    fn not_connected(&self, command: &str) -> bool {
        debug!(command, "Dropping command, push channel not connected");
        self.notifications.error(TerminalError::NotConnected);
        false
    }

    fn connected_link(&self) -> Option<Arc<dyn PushLink>> {
        if self.state.get() != ConnectionState::Connected {
            return None;
        }
        self.link
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_pending(&self, pending: Option<PendingCommand>) {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = pending;
    }
}
