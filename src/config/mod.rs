//! # Configuration Management Module
//!
//! Station configuration loaded from a TOML file, with defaults for every value and
//! validation before anything is bound or spawned.
//!
//! ## Configuration Structure
//!
//! - [`StationConfig`] - discovery port, bind address, shared secret, fleet size
//! - [`LinkConfig`] - link worker timings
//! - [`StalenessConfig`] - contact-age tick and stale threshold
//! - [`ConsoleConfig`] - serial control console
//! - [`LoggingConfig`] - log level and log files
//!
//! ## Usage
//!
//! ```rust,no_run
//! use padlink::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Config::create_default("config.toml").await?;
//!     let config = Config::load("config.toml").await?;
//!     println!("Discovery port: {}", config.station.port);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [station]
//! port = 5555
//! bind_address = "0.0.0.0"
//! shared_secret = "RLCU!2025"
//! fleet_size = 6
//!
//! [link]
//! connect_timeout_ms = 2000
//! telemetry_timeout_ms = 10000
//!
//! [staleness]
//! stale_after_secs = 30
//!
//! [console]
//! enabled = false
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! ```
//!
//! Every section except `[station]` may be omitted. [`Config::load`] rejects files
//! that fail [`Config::validate`].

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;

use crate::pads::connection::LinkTiming;
use crate::pads::state::{PadStore, DEFAULT_STALE_AFTER_SECS};
use crate::pads::{PadLink, StationSettings, DEFAULT_PORT, DEFAULT_SECRET};
use crate::validation::{self, ConfigError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StationConfig {
    pub port: u16,
    pub bind_address: String,
    pub shared_secret: String,
    #[serde(default = "default_fleet_size")]
    pub fleet_size: usize,
}

fn default_fleet_size() -> usize {
    6
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: "0.0.0.0".to_string(),
            shared_secret: DEFAULT_SECRET.to_string(),
            fleet_size: default_fleet_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LinkConfig {
    pub connect_timeout_ms: u64,
    pub read_poll_ms: u64,
    pub telemetry_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    pub send_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 2000,
            read_poll_ms: 1000,
            telemetry_timeout_ms: 10_000,
            reconnect_delay_ms: 2000,
            send_timeout_ms: 1000,
            shutdown_grace_ms: 1000,
        }
    }
}

impl LinkConfig {
    pub fn timing(&self) -> LinkTiming {
        LinkTiming {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_poll: Duration::from_millis(self.read_poll_ms),
            telemetry_timeout: Duration::from_millis(self.telemetry_timeout_ms),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StalenessConfig {
    pub tick_ms: u64,
    /// A pad is stale once its contact age exceeds this many ticks.
    pub stale_after_secs: u32,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub port: String,
    pub baud_rate: u32,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    /// Where `security` target records (rejected discovery tokens) are also written.
    #[serde(default)]
    pub security_file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("padlink.log".to_string()),
            security_file: Some("padlink-security.log".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    pub station: StationConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub staleness: StalenessConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load and validate configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config
            .validate()
            .map_err(|e| anyhow!("Invalid config file {}: {}", path, e))?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validation::validate_port(i64::from(self.station.port))?;
        validation::validate_ip(&self.station.bind_address)?;
        validation::validate_secret(&self.station.shared_secret)?;
        validation::validate_fleet_size(self.station.fleet_size)?;
        let l = &self.link;
        for (field, value) in [
            ("link.connect_timeout_ms", l.connect_timeout_ms),
            ("link.read_poll_ms", l.read_poll_ms),
            ("link.telemetry_timeout_ms", l.telemetry_timeout_ms),
            ("link.reconnect_delay_ms", l.reconnect_delay_ms),
            ("link.send_timeout_ms", l.send_timeout_ms),
            ("link.shutdown_grace_ms", l.shutdown_grace_ms),
            ("staleness.tick_ms", self.staleness.tick_ms),
        ] {
            validation::validate_nonzero_ms(field, value)?;
        }
        Ok(())
    }

    /// Runtime settings for [`PadLink`]. Call after [`Config::validate`].
    pub fn to_settings(&self) -> Result<StationSettings, ConfigError> {
        Ok(StationSettings {
            port: self.station.port,
            bind_address: validation::validate_ip(&self.station.bind_address)?,
            shared_secret: self.station.shared_secret.clone(),
            timing: self.link.timing(),
            tick: Duration::from_millis(self.staleness.tick_ms),
        })
    }

    /// Build the pad subsystem described by this configuration (not yet started).
    pub fn build_link(&self) -> Result<PadLink, ConfigError> {
        self.validate()?;
        let store = PadStore::with_stale_after(
            self.station.fleet_size,
            self.staleness.stale_after_secs,
        );
        Ok(PadLink::with_store(Arc::new(store), self.to_settings()?))
    }
}
