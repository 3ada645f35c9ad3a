// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! Sensor configuration.
//!
//! Configuration is a single JSON document merged over built-in defaults.
//! Loading is fail-soft: unknown keys are ignored, invalid values are
//! replaced by their defaults with a warning, and a missing file yields the
//! default configuration.  Only the startup steps downstream of config
//! (monitor mode, capture helper spawn) are allowed to be fatal.

#![deny(clippy::all, clippy::pedantic)]

mod validate;

use net::{Band, Channel};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// An error which may occur while loading the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        /// Offending path.
        path: PathBuf,
        /// Underlying io error.
        source: std::io::Error,
    },
    /// The file is not valid JSON.
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        /// Offending path.
        path: PathBuf,
        /// Underlying decode error.
        source: serde_json::Error,
    },
}

/// The sensor configuration knobs recognized by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Human-readable sensor name included in heartbeats.
    pub sensor_name: String,
    /// WiFi interface to capture on.
    pub interface: String,
    /// Enable monitor mode automatically at startup.
    pub auto_monitor: bool,
    /// 2.4 GHz channels to scan.
    pub channels_24ghz: Vec<u16>,
    /// 5 GHz channels to scan.
    pub channels_5ghz: Vec<u16>,
    /// 6 GHz channels to scan.
    pub channels_6ghz: Vec<u16>,
    /// Legacy flat channel list; migrated into the per-band lists at load.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<u16>>,
    /// Base dwell per channel in milliseconds.
    pub channel_dwell_ms: u64,
    /// Dwell multiplier for channels with recent drone activity.
    pub active_dwell_multiplier: f64,
    /// Seconds after which per-channel activity ages out.
    pub activity_timeout_s: f64,
    /// Seconds between idle-channel sweeps while tracking.
    pub idle_scan_interval_s: f64,
    /// Seconds without captured frames before the watchdog resets the interface.
    pub starvation_timeout_s: f64,
    /// Delay before the capture helper is restarted.
    pub tshark_restart_delay_s: f64,
    /// Watchdog check period.
    pub watchdog_check_interval_s: f64,
    /// Transport buffer depth that triggers a watchdog warning.
    pub buffer_warn_threshold: usize,
    /// Process memory percentage that triggers a cooperative shutdown.
    pub memory_percent_threshold: f64,
    /// Seconds between heartbeat messages.
    pub heartbeat_interval_s: f64,
    /// Path to the capture helper binary.
    pub tshark_path: PathBuf,
    /// Path to the drone signature file; `None` uses the built-in set.
    pub signatures_path: Option<PathBuf>,
    /// Sensor latitude reported in heartbeats.
    pub latitude: f64,
    /// Sensor longitude reported in heartbeats.
    pub longitude: f64,
    /// Default log level (overridable from the command line).
    pub log_level: String,
    /// Maximum number of messages the offline transport buffer holds.
    pub transport_buffer_size: usize,
}

impl Default for SensorConfig {
    fn default() -> Self {
        SensorConfig {
            sensor_name: "skytap".to_string(),
            interface: "wlan1".to_string(),
            auto_monitor: true,
            channels_24ghz: vec![1, 6, 11],
            channels_5ghz: Vec::new(),
            channels_6ghz: Vec::new(),
            channels: None,
            channel_dwell_ms: 350,
            active_dwell_multiplier: 3.0,
            activity_timeout_s: 30.0,
            idle_scan_interval_s: 5.0,
            starvation_timeout_s: 30.0,
            tshark_restart_delay_s: 1.0,
            watchdog_check_interval_s: 2.0,
            buffer_warn_threshold: 500,
            memory_percent_threshold: 90.0,
            heartbeat_interval_s: 10.0,
            tshark_path: PathBuf::from("/usr/bin/tshark"),
            signatures_path: None,
            latitude: 0.0,
            longitude: 0.0,
            log_level: "info".to_string(),
            transport_buffer_size: 1000,
        }
    }
}

impl SensorConfig {
    /// Load the configuration from `path`, merge over defaults and validate.
    ///
    /// A missing file yields the defaults.  A malformed file also yields the
    /// defaults (with a warning): a sensor in the field must come up even if
    /// an operator mangled its config.
    pub fn load(path: &Path) -> SensorConfig {
        let mut config = match Self::read(path) {
            Ok(Some(config)) => {
                info!("config loaded from {}", path.display());
                config
            }
            Ok(None) => {
                info!("no config file at {}, using defaults", path.display());
                SensorConfig::default()
            }
            Err(err) => {
                warn!("{err}; using defaults");
                SensorConfig::default()
            }
        };
        config.validate();
        config
    }

    /// Read and parse the file without validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file exists but cannot be read or
    /// parsed.  A missing file is `Ok(None)`.
    pub fn read(path: &Path) -> Result<Option<SensorConfig>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(config))
    }

    /// The configured channels grouped by band, in scan-priority order.
    #[must_use]
    pub fn channels_by_band(&self) -> Vec<(Band, Vec<Channel>)> {
        Band::ALL
            .into_iter()
            .map(|band| {
                let numbers = match band {
                    Band::Band24 => &self.channels_24ghz,
                    Band::Band5 => &self.channels_5ghz,
                    Band::Band6 => &self.channels_6ghz,
                };
                let channels = numbers
                    .iter()
                    .filter_map(|&n| Channel::new(n, band).ok())
                    .collect();
                (band, channels)
            })
            .collect()
    }

    /// All configured channels, flattened in band order.
    #[must_use]
    pub fn all_channels(&self) -> Vec<Channel> {
        self.channels_by_band()
            .into_iter()
            .flat_map(|(_, channels)| channels)
            .collect()
    }

    /// Base dwell per channel.
    #[must_use]
    pub fn channel_dwell(&self) -> Duration {
        Duration::from_millis(self.channel_dwell_ms)
    }

    /// Activity age-out window.
    #[must_use]
    pub fn activity_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.activity_timeout_s)
    }

    /// Idle-sweep interval while tracking.
    #[must_use]
    pub fn idle_scan_interval(&self) -> Duration {
        Duration::from_secs_f64(self.idle_scan_interval_s)
    }

    /// Heartbeat period.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs_f64(self.heartbeat_interval_s)
    }

    /// Delay between capture helper restarts.
    #[must_use]
    pub fn capture_restart_delay(&self) -> Duration {
        Duration::from_secs_f64(self.tshark_restart_delay_s)
    }

    /// Watchdog check period.
    #[must_use]
    pub fn watchdog_check_interval(&self) -> Duration {
        Duration::from_secs_f64(self.watchdog_check_interval_s)
    }
}
