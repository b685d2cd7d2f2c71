use std::fmt;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Connection state of one channel. There is no retry transition: once a
/// channel has failed or closed it stays that way for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn can_advance_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting | Failed | Closed)
                | (Connecting, Connected | Failed | Closed)
                | (Connected, Failed | Closed)
                | (Failed, Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Closed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Failed => "Failed",
            ConnectionState::Closed => "Closed",
        };
        f.write_str(s)
    }
}

/// Shared, observable connection state for one channel.
///
/// Updates are synchronous so they can be made from the pull source's reader
/// threads as well as from async tasks.
#[derive(Debug)]
pub struct ChannelState {
    name: &'static str,
    tx: watch::Sender<ConnectionState>,
}

impl ChannelState {
    pub fn new(name: &'static str) -> Self {
        let (tx, _) = watch::channel(ConnectionState::Disconnected);
        Self { name, tx }
    }

    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Move to `next` if the transition table allows it. Returns whether the
    /// state changed.
    pub fn advance(&self, next: ConnectionState) -> bool {
        let name = self.name;
        self.tx.send_if_modified(|current| {
            if current.can_advance_to(next) {
                debug!(channel = name, from = %current, to = %next, "Channel state change");
                *current = next;
                true
            } else {
                if *current != next {
                    warn!(channel = name, from = %current, to = %next, "Ignoring backwards channel transition");
                }
                false
            }
        })
    }

    /// Like [`ChannelState::advance`], but only from `expected`. Used where a
    /// late report must not override a state someone else already set.
    pub fn advance_from(&self, expected: ConnectionState, next: ConnectionState) -> bool {
        let name = self.name;
        self.tx.send_if_modified(|current| {
            if *current != expected || !current.can_advance_to(next) {
                return false;
            }
            debug!(channel = name, from = %current, to = %next, "Channel state change");
            *current = next;
            true
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}

/// Lifecycle of a [`crate::TerminalSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Running,
    ShuttingDown,
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn forward_transitions_are_applied() {
        let state = ChannelState::new("push");
        assert!(state.advance(Connecting));
        assert!(state.advance(Connected));
        assert!(state.advance(Closed));
        assert_eq!(state.get(), Closed);
    }

    #[test]
    fn no_retry_after_failure() {
        let state = ChannelState::new("push");
        state.advance(Connecting);
        state.advance(Failed);
        assert!(!state.advance(Connecting));
        assert!(!state.advance(Connected));
        assert_eq!(state.get(), Failed);
        assert!(state.advance(Closed));
    }

    #[test]
    fn closed_is_terminal() {
        let state = ChannelState::new("pull");
        state.advance(Closed);
        for next in [Disconnected, Connecting, Connected, Failed] {
            assert!(!state.advance(next));
        }
        assert!(state.get().is_terminal());
    }

    #[test]
    fn advance_from_requires_expected_state() {
        let state = ChannelState::new("push");
        state.advance(Connecting);
        assert!(!state.advance_from(Connected, Failed));
        assert_eq!(state.get(), Connecting);

        state.advance(Connected);
        assert!(state.advance_from(Connected, Failed));
        assert!(!state.advance_from(Connected, Failed));
        assert_eq!(state.get(), Failed);
    }

    #[test]
    fn subscribers_see_changes() {
        let state = ChannelState::new("pull");
        let rx = state.subscribe();
        state.advance(Connecting);
        assert_eq!(*rx.borrow(), Connecting);
    }
}
