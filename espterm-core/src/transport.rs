//! Seams to the push channel's transport.
//!
//! Discovery, connection and the wire encoding live behind these traits. The
//! session only needs to write command bytes, receive notification bytes and
//! disconnect.

use crate::error::{TerminalError, TransportError};
use crate::notification::NotificationSource;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Which device to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTarget {
    pub name: String,
    pub scan_timeout: Duration,
}

/// An established push channel.
#[async_trait]
pub trait PushLink: Send + Sync {
    /// Write one command to the device's inbound endpoint.
    async fn write(&self, payload: &[u8]) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Finds and connects to a device.
///
/// Implementations deliver every inbound notification to `notifications`,
/// from whichever thread their transport uses.
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(
        &self,
        target: &DeviceTarget,
        notifications: NotificationSource,
    ) -> Result<Arc<dyn PushLink>, TerminalError>;
}

/// Connector used when no Bluetooth support is compiled in.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableConnector;

#[async_trait]
impl PushConnector for UnavailableConnector {
    async fn connect(
        &self,
        _target: &DeviceTarget,
        _notifications: NotificationSource,
    ) -> Result<Arc<dyn PushLink>, TerminalError> {
        Err(TerminalError::ConnectionFailed(
            "Bluetooth support is not available in this build".to_string(),
        ))
    }
}

/// The connector this build ships with.
pub fn default_connector() -> Arc<dyn PushConnector> {
    #[cfg(feature = "ble")]
    {
        Arc::new(crate::ble::BleConnector)
    }
    #[cfg(not(feature = "ble"))]
    {
        Arc::new(UnavailableConnector)
    }
}
