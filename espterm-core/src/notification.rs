use crate::error::TerminalError;
use crate::line::{Channel, LogLine};
use crate::queue::BoundedLineQueue;
use crate::state::{ChannelState, ConnectionState};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Entry point for push-channel payloads.
///
/// [`NotificationSource::deliver`] is called by the transport from whatever
/// thread it uses for notifications. It only decodes and hands the line to the
/// queue, whose `push` never waits, so it is safe to call from a transport's
/// internal thread.
#[derive(Debug, Clone)]
pub struct NotificationSource {
    queue: Arc<BoundedLineQueue>,
    state: Arc<ChannelState>,
}

impl NotificationSource {
    pub fn new(queue: Arc<BoundedLineQueue>, state: Arc<ChannelState>) -> Self {
        Self { queue, state }
    }

    pub fn deliver(&self, payload: &[u8]) {
        if let Some(line) = decode(payload) {
            trace!(len = payload.len(), binary = line.is_binary, "Notification");
            self.queue.push(line);
        }
    }

    /// Local progress notice on the push channel.
    pub fn status(&self, text: impl Into<String>) {
        self.queue.push(LogLine::status(Channel::Push, text));
    }

    pub fn error(&self, err: impl std::fmt::Display) {
        self.queue.push(LogLine::error(Channel::Push, err));
    }

    /// The transport lost an established link. Moves the push channel to
    /// Failed and says so once; later reports and reports for a link that
    /// never reached Connected are ignored.
    pub fn link_lost(&self, reason: impl std::fmt::Display) {
        if self
            .state
            .advance_from(ConnectionState::Connected, ConnectionState::Failed)
        {
            warn!("Push link lost: {reason}");
            self.error(TerminalError::LinkLost);
        }
    }

    pub(crate) fn push(&self, line: LogLine) {
        self.queue.push(line);
    }
}

/// Turn one payload into a line. Empty text payloads yield nothing; payloads
/// that are not UTF-8 fall back to a hex dump.
pub fn decode(payload: &[u8]) -> Option<LogLine> {
    match std::str::from_utf8(payload) {
        Ok(text) => {
            let text = text.trim_end_matches(['\r', '\n']);
            (!text.is_empty()).then(|| LogLine::output(Channel::Push, text))
        }
        Err(_) => {
            debug!("{}", TerminalError::DecodeFailed { len: payload.len() });
            Some(LogLine::binary(Channel::Push, payload))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::LineKind;
    use std::thread;

    fn source() -> (NotificationSource, Arc<BoundedLineQueue>) {
        let queue = Arc::new(BoundedLineQueue::new(16));
        let state = Arc::new(ChannelState::new("push"));
        (NotificationSource::new(queue.clone(), state), queue)
    }

    #[test]
    fn text_payload_is_trimmed() {
        let (source, queue) = source();
        source.deliver(b"WiFi: connected\r\n");

        let lines = queue.drain_all();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "WiFi: connected");
        assert_eq!(lines[0].channel, Channel::Push);
        assert!(!lines[0].is_binary);
    }

    #[test]
    fn invalid_utf8_becomes_hex_line() {
        let (source, queue) = source();
        source.deliver(&[0xff, 0xfe, 0x00, 0x41]);

        let lines = queue.drain_all();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].is_binary);
        assert_eq!(lines[0].text, "fffe0041");
    }

    #[test]
    fn empty_text_payload_is_skipped() {
        let (source, queue) = source();
        source.deliver(b"\r\n");
        source.deliver(b"");
        assert!(queue.is_empty());
    }

    #[test]
    fn status_and_error_lines_are_tagged() {
        let (source, queue) = source();
        source.status("Scanning...");
        source.error(TerminalError::NotConnected);

        let lines = queue.drain_all();
        assert_eq!(lines[0].kind, LineKind::Status);
        assert_eq!(lines[1].kind, LineKind::Error);
        assert_eq!(lines[1].text, "Not connected!");
    }

    #[test]
    fn link_loss_fails_connected_channel_once() {
        let queue = Arc::new(BoundedLineQueue::new(16));
        let state = Arc::new(ChannelState::new("push"));
        let source = NotificationSource::new(queue.clone(), state.clone());

        // Not connected yet: nothing to lose.
        source.link_lost("stream ended");
        assert!(queue.is_empty());

        state.advance(ConnectionState::Connecting);
        state.advance(ConnectionState::Connected);
        source.link_lost("stream ended");
        source.link_lost("write closed");

        let lines = queue.drain_all();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "Bluetooth disconnected");
        assert_eq!(lines[0].kind, LineKind::Error);
        assert_eq!(state.get(), ConnectionState::Failed);
    }

    #[test]
    fn delivery_from_foreign_threads() {
        let (source, queue) = source();
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let source = source.clone();
                thread::spawn(move || source.deliver(format!("from {n}").as_bytes()))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(queue.len(), 4);
    }
}
