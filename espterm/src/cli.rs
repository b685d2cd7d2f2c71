use crate::log::{Level, LogFormat};
use clap::{Parser, crate_version};
use espterm_core::TerminalConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "espterm",
    color = clap::ColorChoice::Auto,
    about = format!("espterm {}: Bluetooth LE & serial monitor terminal for ESP32 devices", crate_version!())
)]
pub struct Cli {
    /// Bluetooth name of the device to connect to.
    pub device_name: Option<String>,

    #[arg(short, long, env = "ESPTERM_CONFIG", help = "YAML configuration file.")]
    pub config: Option<PathBuf>,

    #[arg(short, long, help = "Serial monitor baud rate.")]
    pub baud: Option<u32>,

    #[arg(long, help = "Serial monitor program.")]
    pub monitor_program: Option<String>,

    #[arg(long, help = "Run with the Bluetooth channel only.")]
    pub no_monitor: bool,

    #[arg(
        long,
        help = "Minimum level of logs to record.",
        default_value_t,
        value_enum
    )]
    pub log_level: Level,

    #[arg(short, long, help = "Enable additional debug logs. Same as --log-level debug.")]
    pub verbose: bool,

    #[arg(
        short,
        long,
        conflicts_with = "verbose",
        help = "Silence all logs. Same as --log-level silent."
    )]
    pub quiet: bool,

    #[arg(long, env = "ESPTERM_LOG_FILE", help = "Write logs to this file.")]
    pub log_file: Option<PathBuf>,

    #[arg(
        long,
        help = "Configure the output format of the logs.",
        default_value_t,
        value_enum
    )]
    pub log_format: LogFormat,
}

impl Cli {
    pub fn level(&self) -> Level {
        if self.verbose {
            Level::Debug
        } else if self.quiet {
            Level::Silent
        } else {
            self.log_level
        }
    }

    /// Apply command-line overrides on top of the loaded file.
    pub fn apply(&self, config: &mut TerminalConfig) {
        if let Some(name) = &self.device_name {
            config.device.name = name.clone();
        }
        if let Some(baud) = self.baud {
            config.monitor.baud = baud;
        }
        if let Some(program) = &self.monitor_program {
            config.monitor.program = program.clone();
        }
        if self.no_monitor {
            config.monitor.enabled = false;
        }
    }
}
