use chrono::{DateTime, Local};
use std::fmt;

/// Which stream a line arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Notifications pushed by the peripheral (Bluetooth).
    Push,
    /// Lines pulled from the monitor subprocess (serial).
    Pull,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Push => write!(f, "push"),
            Channel::Pull => write!(f, "pull"),
        }
    }
}

/// How the display should present a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineKind {
    /// Data produced by the device or the monitor.
    #[default]
    Output,
    /// Local echo of a command sent by the operator.
    Echo,
    /// Progress notices from the terminal itself.
    Status,
    /// In-band error report.
    Error,
}

/// A single unit of display output. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp: DateTime<Local>,
    pub channel: Channel,
    pub text: String,
    /// Set when the payload failed text decoding; `text` then holds a hex dump.
    pub is_binary: bool,
    pub kind: LineKind,
}

impl LogLine {
    pub fn new(channel: Channel, kind: LineKind, text: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            channel,
            text: text.into(),
            is_binary: false,
            kind,
        }
    }

    pub fn output(channel: Channel, text: impl Into<String>) -> Self {
        Self::new(channel, LineKind::Output, text)
    }

    pub fn status(channel: Channel, text: impl Into<String>) -> Self {
        Self::new(channel, LineKind::Status, text)
    }

    /// Render any error as an in-band line.
    pub fn error(channel: Channel, err: impl fmt::Display) -> Self {
        Self::new(channel, LineKind::Error, err.to_string())
    }

    pub fn echo(command: &str) -> Self {
        Self::new(Channel::Push, LineKind::Echo, format!("> {command}"))
    }

    /// Fallback for payloads that are not valid UTF-8.
    pub fn binary(channel: Channel, payload: &[u8]) -> Self {
        Self {
            is_binary: true,
            ..Self::new(channel, LineKind::Output, hex::encode(payload))
        }
    }

    /// `HH:MM:SS` prefix used by the display.
    pub fn clock(&self) -> String {
        self.timestamp.format("%H:%M:%S").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_is_prefixed_and_on_push_channel() {
        let line = LogLine::echo("WIFI CONNECT ssid pass");
        assert_eq!(line.text, "> WIFI CONNECT ssid pass");
        assert_eq!(line.channel, Channel::Push);
        assert_eq!(line.kind, LineKind::Echo);
        assert!(!line.is_binary);
    }

    #[test]
    fn binary_line_holds_hex_dump() {
        let line = LogLine::binary(Channel::Push, &[0xde, 0xad, 0xbe, 0xef]);
        assert!(line.is_binary);
        assert_eq!(line.text, "deadbeef");
    }

    #[test]
    fn clock_is_eight_chars() {
        assert_eq!(LogLine::output(Channel::Pull, "OK").clock().len(), 8);
    }
}
