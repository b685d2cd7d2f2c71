//! Shared helpers for espterm-core integration tests.

// Each test file compiles separately, so not all helpers are used in each binary
#![allow(dead_code)]

use async_trait::async_trait;
use espterm_core::{
    Channel, DeviceTarget, LogLine, NotificationSource, PushConnector, PushLink, RenderTarget,
    TerminalConfig, TerminalError, TransportError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A device that answers every command with `OK <command>`.
#[derive(Default)]
pub struct FakeLink {
    pub writes: Mutex<Vec<String>>,
    pub disconnected: AtomicBool,
    notifications: Mutex<Option<NotificationSource>>,
}

impl FakeLink {
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// The device goes away on its own, ending its notification stream.
    pub fn drop_connection(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        if let Some(notifications) = self.notifications.lock().unwrap().as_ref() {
            notifications.link_lost("peer went away");
        }
    }
}

#[async_trait]
impl PushLink for FakeLink {
    async fn write(&self, payload: &[u8]) -> Result<(), TransportError> {
        if self.is_disconnected() {
            return Err(TransportError::Closed);
        }
        let command = String::from_utf8_lossy(payload).into_owned();
        if let Some(notifications) = self.notifications.lock().unwrap().as_ref() {
            notifications.deliver(format!("OK {command}\r\n").as_bytes());
        }
        self.writes.lock().unwrap().push(command);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub enum FakeConnector {
    Connects(Arc<FakeLink>),
    NotFound,
}

impl FakeConnector {
    pub fn connecting() -> (Arc<Self>, Arc<FakeLink>) {
        let link = Arc::new(FakeLink::default());
        (Arc::new(FakeConnector::Connects(link.clone())), link)
    }
}

#[async_trait]
impl PushConnector for FakeConnector {
    async fn connect(
        &self,
        target: &DeviceTarget,
        notifications: NotificationSource,
    ) -> Result<Arc<dyn PushLink>, TerminalError> {
        match self {
            FakeConnector::Connects(link) => {
                notifications.deliver(b"ESP32 ready\r\n");
                *link.notifications.lock().unwrap() = Some(notifications);
                Ok(link.clone())
            }
            FakeConnector::NotFound => Err(TerminalError::DiscoveryFailed {
                name: target.name.clone(),
                timeout: target.scan_timeout,
            }),
        }
    }
}

/// Collects every rendered line, per channel.
#[derive(Default, Clone)]
pub struct Screen {
    lines: Arc<Mutex<Vec<LogLine>>>,
}

impl RenderTarget for Screen {
    fn write_batch(&mut self, _channel: Channel, lines: Vec<LogLine>) {
        self.lines.lock().unwrap().extend(lines);
    }
}

impl Screen {
    pub fn texts(&self, channel: Channel) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.channel == channel)
            .map(|l| l.text.clone())
            .collect()
    }

    /// All text on `channel`, with batched lines split back out.
    pub fn rows(&self, channel: Channel) -> Vec<String> {
        self.texts(channel)
            .iter()
            .flat_map(|t| t.lines().map(str::to_string).collect::<Vec<_>>())
            .collect()
    }
}

/// Config whose monitor is `sh -c <script>`, with short timings.
pub fn config_with_monitor(script: &str) -> TerminalConfig {
    let mut config = TerminalConfig::default();
    config.monitor.program = "sh".to_string();
    config.monitor.args = Some(vec!["-c".to_string(), script.to_string()]);
    config.monitor.kill_grace_ms = 500;
    config.render.push_interval_ms = 20;
    config.render.pull_interval_ms = 20;
    config.commands.default_settle_ms = 50;
    config
}

pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
