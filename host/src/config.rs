//! ==============================================================================
//! config.rs - gsm-signal.toml schema and loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `gsm-signal.toml`.
//!     loads it from an explicit path or the default search locations.
//!     every section and key is optional; command line flags win over it.
//!
//! structure:
//!     - SerialConfig: baud rate, read timeout and reply size limit.
//!     - PollingConfig: default interval between signal checks.
//!     - SignalConfig: which tier policy classifies the csq index.
//!     - LoggingConfig: log level used when RUST_LOG is not set.
//!     - TrayConfig: icon files for each quality tier.
//!
//! ==============================================================================

use crate::domain::QualityTier;
use crate::signal::TierPolicy;

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct GsmConfig {
    pub serial: SerialConfig,
    pub polling: PollingConfig,
    pub signal: SignalConfig,
    pub logging: LoggingConfig,
    pub tray: TrayConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub timeout_ms: u64,
    /// upper bound on bytes read per command
    pub read_limit: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_seconds: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SignalConfig {
    pub tier_policy: TierPolicy,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
#[cfg_attr(not(feature = "tray"), allow(dead_code))]
pub struct TrayConfig {
    /// unknown signal and tier None
    pub icon_none: PathBuf,
    pub icon_weak: PathBuf,
    pub icon_ok: PathBuf,
    pub icon_good: PathBuf,
    pub icon_excellent: PathBuf,
}

impl SerialConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg_attr(not(feature = "tray"), allow(dead_code))]
impl TrayConfig {
    pub fn icon_for(&self, tier: Option<QualityTier>) -> &Path {
        match tier {
            None | Some(QualityTier::None) => &self.icon_none,
            Some(QualityTier::Marginal) => &self.icon_weak,
            Some(QualityTier::Ok) => &self.icon_ok,
            Some(QualityTier::Good) => &self.icon_good,
            Some(QualityTier::Excellent) => &self.icon_excellent,
        }
    }
}

impl GsmConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.as_ref().display(), e))?;

        Self::parse(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {}", path.as_ref().display(), e))
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// The first config file found in the default locations
    pub fn locate() -> Option<PathBuf> {
        let paths = [
            PathBuf::from("config").join("gsm-signal.toml"),
            PathBuf::from("..").join("config").join("gsm-signal.toml"),
        ];
        paths.into_iter().find(|path| path.exists())
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        info!(
            baud_rate = self.serial.baud_rate,
            timeout_ms = self.serial.timeout_ms,
            read_limit = self.serial.read_limit,
            interval_seconds = self.polling.interval_seconds,
            tier_policy = ?self.signal.tier_policy,
            log_level = %self.logging.level,
            "configuration"
        );
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            timeout_ms: 100,
            read_limit: 1024,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_seconds: 60 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

const ADWAITA_STATUS: &str = "/usr/share/icons/Adwaita/64x64/status";

impl Default for TrayConfig {
    fn default() -> Self {
        let icon = |level: &str| {
            Path::new(ADWAITA_STATUS).join(format!(
                "network-cellular-signal-{}-symbolic.symbolic.png",
                level
            ))
        };
        Self {
            icon_none: icon("none"),
            icon_weak: icon("weak"),
            icon_ok: icon("ok"),
            icon_good: icon("good"),
            icon_excellent: icon("excellent"),
        }
    }
}
