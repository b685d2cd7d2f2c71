use miette::Diagnostic;
use std::time::Duration;
use thiserror::Error;

/// Everything that can go wrong inside the session.
///
/// None of these are fatal: each one is rendered as a [`crate::LogLine`] on
/// the channel it concerns and the other channel keeps running.
#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("Device '{name}' not found! (scanned for {}s)", timeout.as_secs())]
    DiscoveryFailed { name: String, timeout: Duration },
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Payload of {len} bytes is not valid UTF-8")]
    DecodeFailed { len: usize },
    #[error("Not connected!")]
    NotConnected,
    #[error("Bluetooth disconnected")]
    LinkLost,
    #[error("Send failed: {0}")]
    DispatchFailed(#[from] TransportError),
    #[error("Read error: {0}")]
    StreamReadError(#[source] std::io::Error),
    #[error("Serial monitor stopped")]
    StreamEnded,
    #[error("{program} not found. Install it first.")]
    SubprocessNotFound { program: String },
    #[error("Failed to start serial monitor: {0}")]
    SubprocessSpawnFailed(#[source] std::io::Error),
}

/// Failures reported by a push transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("link is closed")]
    Closed,
    #[error("write failed: {0}")]
    Write(String),
    #[error("disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("Failed to read config file {path}")]
    #[diagnostic(code(espterm::config::read))]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}")]
    #[diagnostic(code(espterm::config::parse))]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Invalid configuration: {0}")]
    #[diagnostic(code(espterm::config::invalid))]
    Invalid(String),
}
