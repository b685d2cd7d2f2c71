//! Bluetooth LE push transport over the Nordic UART service.

use crate::error::{TerminalError, TransportError};
use crate::notification::NotificationSource;
use crate::transport::{DeviceTarget, PushConnector, PushLink};
use async_trait::async_trait;
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Notifications from the device.
pub const TX_CHARACTERISTIC: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);
/// Commands to the device.
pub const RX_CHARACTERISTIC: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);

const SCAN_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Default, Clone, Copy)]
pub struct BleConnector;

/// Advertised names are compared exactly; unnamed peripherals never match.
fn name_matches(local_name: Option<&str>, wanted: &str) -> bool {
    local_name.is_some_and(|name| name == wanted)
}

fn connection_failed(err: btleplug::Error) -> TerminalError {
    TerminalError::ConnectionFailed(err.to_string())
}

impl BleConnector {
    async fn adapter() -> Result<Adapter, TerminalError> {
        let manager = Manager::new().await.map_err(connection_failed)?;
        manager
            .adapters()
            .await
            .map_err(connection_failed)?
            .into_iter()
            .next()
            .ok_or_else(|| TerminalError::ConnectionFailed("no Bluetooth adapter found".into()))
    }

    async fn find(adapter: &Adapter, target: &DeviceTarget) -> Result<Peripheral, TerminalError> {
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(connection_failed)?;

        let deadline = Instant::now() + target.scan_timeout;
        let found = 'scan: loop {
            for peripheral in adapter.peripherals().await.map_err(connection_failed)? {
                let name = match peripheral.properties().await {
                    Ok(Some(props)) => props.local_name,
                    _ => None,
                };
                if name_matches(name.as_deref(), &target.name) {
                    break 'scan Some(peripheral);
                }
            }
            if Instant::now() >= deadline {
                break None;
            }
            tokio::time::sleep(SCAN_POLL).await;
        };

        if let Err(err) = adapter.stop_scan().await {
            debug!("Failed to stop scan: {err}");
        }
        found.ok_or_else(|| TerminalError::DiscoveryFailed {
            name: target.name.clone(),
            timeout: target.scan_timeout,
        })
    }
}

#[async_trait]
impl PushConnector for BleConnector {
    async fn connect(
        &self,
        target: &DeviceTarget,
        notifications: NotificationSource,
    ) -> Result<Arc<dyn PushLink>, TerminalError> {
        let adapter = Self::adapter().await?;
        let peripheral = Self::find(&adapter, target).await?;
        let address = peripheral.address();
        notifications.status(format!("Found: {} ({address})", target.name));
        info!(device = %target.name, %address, "Device found");

        peripheral.connect().await.map_err(connection_failed)?;
        peripheral
            .discover_services()
            .await
            .map_err(connection_failed)?;

        let characteristic = |uuid: Uuid| -> Result<Characteristic, TerminalError> {
            peripheral
                .characteristics()
                .into_iter()
                .find(|c| c.uuid == uuid)
                .ok_or_else(|| {
                    TerminalError::ConnectionFailed(format!("characteristic {uuid} not found"))
                })
        };
        let tx = characteristic(TX_CHARACTERISTIC)?;
        let rx = characteristic(RX_CHARACTERISTIC)?;

        let mut stream = peripheral.notifications().await.map_err(connection_failed)?;
        peripheral.subscribe(&tx).await.map_err(connection_failed)?;

        // The notification stream is btleplug's; decoding is cheap and the
        // queue never blocks, so delivering inline is fine.
        let forward = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid == TX_CHARACTERISTIC {
                    notifications.deliver(&notification.value);
                }
            }
            // Deliberate disconnects abort this task first, so reaching the
            // end means the device went away.
            notifications.link_lost("notification stream ended");
        });

        Ok(Arc::new(BleLink {
            peripheral,
            rx,
            forward,
        }))
    }
}

struct BleLink {
    peripheral: Peripheral,
    rx: Characteristic,
    forward: JoinHandle<()>,
}

#[async_trait]
impl PushLink for BleLink {
    async fn write(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.peripheral
            .write(&self.rx, payload, WriteType::WithResponse)
            .await
            .map_err(|err| TransportError::Write(err.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.forward.abort();
        match self.peripheral.is_connected().await {
            Ok(false) => Ok(()),
            _ => self.peripheral.disconnect().await.map_err(|err| {
                warn!("Bluetooth disconnect failed: {err}");
                TransportError::Disconnect(err.to_string())
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uart_characteristics() {
        assert_eq!(
            TX_CHARACTERISTIC.to_string(),
            "6e400003-b5a3-f393-e0a9-e50e24dcca9e"
        );
        assert_eq!(
            RX_CHARACTERISTIC.to_string(),
            "6e400002-b5a3-f393-e0a9-e50e24dcca9e"
        );
    }

    #[test]
    fn scan_matches_exact_local_name() {
        assert!(name_matches(Some("ESP32-SD-WiFi"), "ESP32-SD-WiFi"));
        assert!(!name_matches(Some("ESP32-SD-WiFi-2"), "ESP32-SD-WiFi"));
        assert!(!name_matches(Some("esp32-sd-wifi"), "ESP32-SD-WiFi"));
        assert!(!name_matches(None, "ESP32-SD-WiFi"));
    }
}
