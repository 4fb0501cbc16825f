use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A signal strength checker for GSM modems
#[derive(Parser, Debug)]
#[command(name = "gsm-signal", version)]
pub struct Cli {
    /// Show signal strength as text
    #[arg(short = 't', conflicts_with = "gui")]
    pub text: bool,

    /// Show signal strength as a tray icon (the default)
    #[arg(short = 'g')]
    pub gui: bool,

    /// Interval in seconds between checks [default: 60, or the config file]
    #[arg(short = 'i', value_name = "SECONDS", value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: Option<u64>,

    /// Check signal one time
    #[arg(short = 'o', long, help_heading = "Text mode options")]
    pub once: bool,

    /// Output format is json
    #[arg(short = 'j', long, help_heading = "Text mode options")]
    pub json: bool,

    /// Configuration file [default: config/gsm-signal.toml if present]
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Talk to a simulated modem instead of the device
    #[arg(long)]
    pub simulate: bool,

    /// Modem device, e.g. /dev/ttyUSB2
    pub device: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Text,
    Tray,
}

/// Validated run configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub mode: Mode,
    pub interval: Duration,
    pub once: bool,
    pub json: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("running once or json output only available in text mode (-t)")]
    TextModeOnly,
    #[error("interval must be at least one second")]
    ZeroInterval,
    #[error("tray mode not available in this build; rebuild with `--features tray` or use -t")]
    TrayUnavailable,
}

impl RunOptions {
    pub fn new(mode: Mode, interval_seconds: u64, once: bool, json: bool) -> Result<Self, UsageError> {
        if mode != Mode::Text && (once || json) {
            return Err(UsageError::TextModeOnly);
        }
        if interval_seconds == 0 {
            return Err(UsageError::ZeroInterval);
        }
        if mode == Mode::Tray && !cfg!(feature = "tray") {
            return Err(UsageError::TrayUnavailable);
        }
        Ok(Self {
            mode,
            interval: Duration::from_secs(interval_seconds),
            once,
            json,
        })
    }

    /// `default_interval` applies when `-i` is absent.
    pub fn from_cli(cli: &Cli, default_interval: u64) -> Result<Self, UsageError> {
        let mode = if cli.gui || !cli.text { Mode::Tray } else { Mode::Text };
        Self::new(
            mode,
            cli.interval.unwrap_or(default_interval),
            cli.once,
            cli.json,
        )
    }
}
