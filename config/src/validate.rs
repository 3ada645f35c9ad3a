// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! Config validation and legacy-key migration.

use crate::SensorConfig;
use net::{Band, Channel};
use tracing::warn;

impl SensorConfig {
    /// Normalize the loaded values in place.
    ///
    /// Invalid channels are dropped, an empty channel set falls back to the
    /// NAN discovery channel, and non-positive timing values revert to their
    /// defaults.  [`SensorConfig::load`] calls this; callers using
    /// [`SensorConfig::read`] directly (to defer logging) must call it
    /// themselves.
    pub fn validate(&mut self) {
        self.migrate_legacy_channels();

        let mut total = 0;
        for band in Band::ALL {
            let numbers = match band {
                Band::Band24 => &mut self.channels_24ghz,
                Band::Band5 => &mut self.channels_5ghz,
                Band::Band6 => &mut self.channels_6ghz,
            };
            let invalid: Vec<u16> = numbers
                .iter()
                .copied()
                .filter(|&n| Channel::new(n, band).is_err())
                .collect();
            if !invalid.is_empty() {
                warn!("invalid {band} channels removed: {invalid:?}");
                numbers.retain(|&n| Channel::new(n, band).is_ok());
            }
            total += numbers.len();
        }
        if total == 0 {
            warn!("no valid channels configured, defaulting to 2.4 GHz channel 6");
            self.channels_24ghz = vec![Channel::NAN_DISCOVERY.number()];
        }

        let defaults = SensorConfig::default();
        if self.channel_dwell_ms == 0 {
            warn!("invalid channel_dwell_ms=0, using {}", defaults.channel_dwell_ms);
            self.channel_dwell_ms = defaults.channel_dwell_ms;
        }
        for (name, value, default) in [
            (
                "active_dwell_multiplier",
                &mut self.active_dwell_multiplier,
                defaults.active_dwell_multiplier,
            ),
            (
                "activity_timeout_s",
                &mut self.activity_timeout_s,
                defaults.activity_timeout_s,
            ),
            (
                "idle_scan_interval_s",
                &mut self.idle_scan_interval_s,
                defaults.idle_scan_interval_s,
            ),
            (
                "starvation_timeout_s",
                &mut self.starvation_timeout_s,
                defaults.starvation_timeout_s,
            ),
            (
                "tshark_restart_delay_s",
                &mut self.tshark_restart_delay_s,
                defaults.tshark_restart_delay_s,
            ),
            (
                "watchdog_check_interval_s",
                &mut self.watchdog_check_interval_s,
                defaults.watchdog_check_interval_s,
            ),
            (
                "memory_percent_threshold",
                &mut self.memory_percent_threshold,
                defaults.memory_percent_threshold,
            ),
            (
                "heartbeat_interval_s",
                &mut self.heartbeat_interval_s,
                defaults.heartbeat_interval_s,
            ),
        ] {
            if !value.is_finite() || *value <= 0.0 {
                warn!("invalid {name}={value}, using {default}");
                *value = default;
            }
        }

        if !self.tshark_path.exists() {
            warn!(
                "tshark_path {} not found (may be OK if not needed yet)",
                self.tshark_path.display()
            );
        }
    }

    /// Fold the legacy flat `channels` list into the per-band lists.
    ///
    /// Channels 1-14 classify as 2.4 GHz and the 5 GHz allocation as 5 GHz.
    /// 6 GHz numbers overlap 2.4 GHz numbering in the flat form, so anything
    /// else is dropped with a warning.  Explicit band lists win over the
    /// legacy key when both are present.
    fn migrate_legacy_channels(&mut self) {
        let Some(legacy) = self.channels.take() else {
            return;
        };
        // Band keys at their default values are indistinguishable from keys
        // the file never set, so "customized" is the migration gate.
        let defaults = SensorConfig::default();
        let band_keys_customized = self.channels_24ghz != defaults.channels_24ghz
            || !self.channels_5ghz.is_empty()
            || !self.channels_6ghz.is_empty();
        if band_keys_customized {
            warn!("both legacy 'channels' and band keys found; using band keys");
            return;
        }

        warn!("migrating legacy channels={legacy:?} to per-band config");
        let mut by_band: [Vec<u16>; 2] = [Vec::new(), Vec::new()];
        for n in legacy {
            if Channel::new(n, Band::Band24).is_ok() {
                by_band[0].push(n);
            } else if Channel::new(n, Band::Band5).is_ok() {
                by_band[1].push(n);
            } else {
                warn!("legacy channel {n} cannot be classified to a band, dropping");
            }
        }
        let [b24, b5] = by_band;
        self.channels_24ghz = b24;
        self.channels_5ghz = b5;
        self.channels_6ghz = Vec::new();
    }
}

#[cfg(test)]
mod test {
    use crate::SensorConfig;
    use net::{Band, Channel};

    #[test]
    fn defaults_survive_validation() {
        let mut config = SensorConfig::default();
        config.validate();
        assert_eq!(config.channels_24ghz, vec![1, 6, 11]);
        assert_eq!(config.all_channels().len(), 3);
    }

    #[test]
    fn invalid_channels_are_dropped_per_band() {
        let mut config = SensorConfig {
            channels_24ghz: vec![1, 15],
            channels_5ghz: vec![36, 37],
            channels_6ghz: vec![5, 250],
            ..SensorConfig::default()
        };
        config.validate();
        assert_eq!(config.channels_24ghz, vec![1]);
        assert_eq!(config.channels_5ghz, vec![36]);
        assert_eq!(config.channels_6ghz, vec![5]);
    }

    #[test]
    fn empty_channel_set_falls_back_to_nan_channel() {
        let mut config = SensorConfig {
            channels_24ghz: vec![15],
            channels_5ghz: Vec::new(),
            channels_6ghz: Vec::new(),
            ..SensorConfig::default()
        };
        config.validate();
        assert_eq!(config.all_channels(), vec![Channel::NAN_DISCOVERY]);
    }

    #[test]
    fn legacy_channels_migrate_by_allocation() {
        let mut config = SensorConfig {
            channels: Some(vec![1, 6, 149, 33]),
            ..SensorConfig::default()
        };
        config.validate();
        assert_eq!(config.channels_24ghz, vec![1, 6]);
        assert_eq!(config.channels_5ghz, vec![149]);
        assert!(config.channels_6ghz.is_empty());
        assert!(config.channels.is_none());
    }

    #[test]
    fn nonpositive_timings_revert_to_defaults() {
        let mut config = SensorConfig {
            starvation_timeout_s: -3.0,
            heartbeat_interval_s: 0.0,
            channel_dwell_ms: 0,
            ..SensorConfig::default()
        };
        config.validate();
        let defaults = SensorConfig::default();
        assert_eq!(config.starvation_timeout_s, defaults.starvation_timeout_s);
        assert_eq!(config.heartbeat_interval_s, defaults.heartbeat_interval_s);
        assert_eq!(config.channel_dwell_ms, defaults.channel_dwell_ms);
    }

    #[test]
    fn channels_by_band_keeps_scan_priority_order() {
        let config = SensorConfig {
            channels_24ghz: vec![6],
            channels_5ghz: vec![149],
            channels_6ghz: vec![37],
            ..SensorConfig::default()
        };
        let bands: Vec<Band> = config.channels_by_band().into_iter().map(|(b, _)| b).collect();
        assert_eq!(bands, vec![Band::Band24, Band::Band5, Band::Band6]);
        assert_eq!(
            config.all_channels(),
            vec![
                Channel::new(6, Band::Band24).unwrap(),
                Channel::new(149, Band::Band5).unwrap(),
                Channel::new(37, Band::Band6).unwrap(),
            ]
        );
    }
}
