//! Terminal configuration.
//!
//! Every field has a default, so an absent or partial YAML file is valid.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_DEVICE_NAME: &str = "digicam-001";
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TerminalConfig {
    pub device: DeviceConfig,
    pub monitor: MonitorConfig,
    pub render: RenderConfig,
    pub commands: CommandConfig,
}

/// Push channel target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    pub name: String,
    pub scan_timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_DEVICE_NAME.to_string(),
            scan_timeout_ms: 10_000,
        }
    }
}

impl DeviceConfig {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }
}

/// Pull channel subprocess and its batching policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    /// Set to false to run with the push channel only.
    pub enabled: bool,
    pub program: String,
    /// Full argument list. When unset, `device monitor --baud <baud>` is used.
    pub args: Option<Vec<String>>,
    pub baud: u32,
    /// Lines starting with this prefix are monitor banners and are not shown.
    pub banner_prefix: String,
    pub batch_interval_ms: u64,
    pub batch_max_lines: usize,
    pub kill_grace_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "platformio".to_string(),
            args: None,
            baud: DEFAULT_BAUD_RATE,
            banner_prefix: "---".to_string(),
            batch_interval_ms: 100,
            batch_max_lines: 20,
            kill_grace_ms: 2_000,
        }
    }
}

impl MonitorConfig {
    pub fn args(&self) -> Vec<String> {
        match &self.args {
            Some(args) => args.clone(),
            None => vec![
                "device".to_string(),
                "monitor".to_string(),
                "--baud".to_string(),
                self.baud.to_string(),
            ],
        }
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    pub push_interval_ms: u64,
    pub pull_interval_ms: u64,
    pub queue_capacity: usize,
    pub scrollback_lines: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            push_interval_ms: 100,
            pull_interval_ms: 200,
            queue_capacity: 100,
            scrollback_lines: 1_000,
        }
    }
}

impl RenderConfig {
    pub fn push_interval(&self) -> Duration {
        Duration::from_millis(self.push_interval_ms)
    }

    pub fn pull_interval(&self) -> Duration {
        Duration::from_millis(self.pull_interval_ms)
    }
}

/// Command pacing. Settle delays are a client-side heuristic: the device
/// protocol has no request/response correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandConfig {
    /// Sent once after the push channel connects.
    pub initial: Option<String>,
    pub slow_settle_ms: u64,
    pub inspect_settle_ms: u64,
    pub default_settle_ms: u64,
    /// Command prefixes that change device state and take a while to apply.
    pub slow: Vec<String>,
    /// Command prefixes that only query the device.
    pub inspect: Vec<String>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            initial: Some("HELP".to_string()),
            slow_settle_ms: 2_000,
            inspect_settle_ms: 500,
            default_settle_ms: 300,
            slow: ["WAKE", "WIFI ON", "WIFI AP", "WIFI CONNECT"]
                .map(String::from)
                .to_vec(),
            inspect: ["STATUS", "WIFI SCAN"].map(String::from).to_vec(),
        }
    }
}

impl TerminalConfig {
    /// Load from a YAML file, or return defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            None => Self::default(),
            Some(path) => {
                let display = path.display().to_string();
                let contents =
                    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                        path: display.clone(),
                        source,
                    })?;
                serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: display,
                    source,
                })?
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.render.queue_capacity == 0, "render.queue_capacity"),
            (self.render.scrollback_lines == 0, "render.scrollback_lines"),
            (self.render.push_interval_ms == 0, "render.push_interval_ms"),
            (self.render.pull_interval_ms == 0, "render.pull_interval_ms"),
            (self.monitor.batch_max_lines == 0, "monitor.batch_max_lines"),
            (self.monitor.batch_interval_ms == 0, "monitor.batch_interval_ms"),
        ];
        if let Some((_, field)) = checks.iter().find(|(bad, _)| *bad) {
            return Err(ConfigError::Invalid(format!("{field} must be greater than zero")));
        }
        if self.monitor.enabled && self.monitor.program.trim().is_empty() {
            return Err(ConfigError::Invalid("monitor.program is empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn defaults_match_the_device_tooling() {
        let config = TerminalConfig::default();
        assert_eq!(config.device.name, "digicam-001");
        assert_eq!(config.device.scan_timeout(), Duration::from_secs(10));
        assert_eq!(
            config.monitor.args(),
            vec!["device", "monitor", "--baud", "115200"]
        );
        assert_eq!(config.render.push_interval(), Duration::from_millis(100));
        assert_eq!(config.monitor.kill_grace(), Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "device:\n  name: ESP32-SD-WiFi\nmonitor:\n  baud: 9600\n  batch_max_lines: 50"
        )
        .unwrap();

        let config = TerminalConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.device.name, "ESP32-SD-WiFi");
        assert_eq!(config.device.scan_timeout_ms, 10_000);
        assert_eq!(config.monitor.args().last().map(String::as_str), Some("9600"));
        assert_eq!(config.monitor.batch_max_lines, 50);
        assert_eq!(config.render, RenderConfig::default());
    }

    #[test]
    fn explicit_args_win_over_baud() {
        let monitor = MonitorConfig {
            args: Some(vec!["-c".to_string(), "cat".to_string()]),
            ..MonitorConfig::default()
        };
        assert_eq!(monitor.args(), vec!["-c", "cat"]);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut config = TerminalConfig::default();
        config.render.queue_capacity = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("render.queue_capacity"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "render:\n  fps: 60").unwrap();
        assert!(matches!(
            TerminalConfig::load(Some(file.path())),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = TerminalConfig::load(Some(Path::new("/nonexistent/espterm.yaml")));
        assert!(matches!(err, Err(ConfigError::Read { .. })));
    }
}
