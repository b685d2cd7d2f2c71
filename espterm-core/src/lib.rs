//! Core of the ESP32 terminal: two independent line streams (Bluetooth
//! notifications and a serial monitor subprocess) multiplexed onto one
//! display without either blocking the other or the operator's input.

#[cfg(feature = "ble")]
pub mod ble;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod line;
pub mod notification;
pub mod process_stream;
pub mod queue;
pub mod scheduler;
pub mod session;
pub mod shutdown;
pub mod state;
pub mod transport;

pub use config::TerminalConfig;
pub use dispatcher::{CommandDispatcher, PendingCommand, SettleDelays};
pub use error::{ConfigError, TerminalError, TransportError};
pub use line::{Channel, LineKind, LogLine};
pub use notification::NotificationSource;
pub use process_stream::{LineBatcher, MonitorProcess, ProcessStreamSource, StreamHandle};
pub use queue::BoundedLineQueue;
pub use scheduler::{RenderScheduler, RenderTarget};
pub use session::{InputAction, TerminalSession, classify_input};
pub use shutdown::{Shutdown, Signal};
pub use state::{ChannelState, ConnectionState, SessionState};
pub use transport::{DeviceTarget, PushConnector, PushLink, UnavailableConnector, default_connector};
