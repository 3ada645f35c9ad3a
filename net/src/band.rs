// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! WiFi frequency bands.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// A WiFi frequency band.
///
/// The sensor scans the three bands drones broadcast on: 2.4 GHz (where the
/// NAN discovery channel lives), 5 GHz, and 6 GHz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum Band {
    /// The 2.4 GHz ISM band (channels 1-14).
    #[serde(rename = "24ghz")]
    Band24,
    /// The 5 GHz UNII bands (channels 36-177).
    #[serde(rename = "5ghz")]
    Band5,
    /// The 6 GHz UNII-5 through UNII-8 bands (channels 1-233).
    #[serde(rename = "6ghz")]
    Band6,
}

impl Band {
    /// All bands, in scan-priority order (2.4 GHz first).
    pub const ALL: [Band; 3] = [Band::Band24, Band::Band5, Band::Band6];

    /// The key used for this band in configuration files (`channels_<key>`).
    #[must_use]
    pub fn config_key(self) -> &'static str {
        match self {
            Band::Band24 => "24ghz",
            Band::Band5 => "5ghz",
            Band::Band6 => "6ghz",
        }
    }
}

impl Display for Band {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Band::Band24 => write!(f, "2.4 GHz"),
            Band::Band5 => write!(f, "5 GHz"),
            Band::Band6 => write!(f, "6 GHz"),
        }
    }
}

/// An error which may occur when parsing a [`Band`] from its config key.
#[derive(Debug, thiserror::Error)]
#[error("unknown band {0:?} (expected 24ghz, 5ghz, or 6ghz)")]
pub struct UnknownBand(String);

impl FromStr for Band {
    type Err = UnknownBand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "24ghz" => Ok(Band::Band24),
            "5ghz" => Ok(Band::Band5),
            "6ghz" => Ok(Band::Band6),
            other => Err(UnknownBand(other.to_string())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn config_keys_round_trip() {
        for band in Band::ALL {
            assert_eq!(band.config_key().parse::<Band>().unwrap(), band);
        }
    }

    #[test]
    fn unknown_key_is_rejected() {
        assert!("2.4ghz".parse::<Band>().is_err());
    }
}
