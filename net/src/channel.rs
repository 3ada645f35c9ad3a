// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! Channel numbers and the static channel-to-frequency table.
//!
//! Channel numbers are only unique within a band: 2.4 GHz and 6 GHz both use
//! low channel numbers, and the 5 GHz allocation overlaps the 6 GHz numbering
//! as well.  A [`Channel`] therefore always carries its [`Band`], and the
//! frequency mapping is bijective per band.

use crate::Band;
use std::fmt::{Display, Formatter};

/// 5 GHz channels with a defined 20 MHz allocation (UNII-1 through UNII-4).
const CHANNELS_5GHZ: [u16; 28] = [
    36, 40, 44, 48, 52, 56, 60, 64, 100, 104, 108, 112, 116, 120, 124, 128, 132, 136, 140, 144,
    149, 153, 157, 161, 165, 169, 173, 177,
];

/// A WiFi channel: a per-band channel number with a known center frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Channel {
    number: u16,
    band: Band,
}

/// An error which may occur when constructing a [`Channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("channel {number} is not a valid {band} channel")]
pub struct InvalidChannel {
    /// The rejected channel number.
    pub number: u16,
    /// The band the number was rejected for.
    pub band: Band,
}

impl Channel {
    /// The WiFi NAN discovery channel (ASTM F3411 RemoteID broadcasters are
    /// required to be discoverable here).
    pub const NAN_DISCOVERY: Channel = Channel {
        number: 6,
        band: Band::Band24,
    };

    /// Create a channel, validating the number against the band's allocation.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidChannel`] if the number has no 20 MHz allocation in
    /// the given band.
    pub fn new(number: u16, band: Band) -> Result<Channel, InvalidChannel> {
        let valid = match band {
            Band::Band24 => (1..=14).contains(&number),
            Band::Band5 => CHANNELS_5GHZ.contains(&number),
            Band::Band6 => (1..=233).contains(&number),
        };
        if valid {
            Ok(Channel { number, band })
        } else {
            Err(InvalidChannel { number, band })
        }
    }

    /// Resolve a bare channel number to a channel, without band information.
    ///
    /// Numbers shared between bands resolve in 2.4 > 5 > 6 GHz priority, so
    /// channel 6 is always the 2.4 GHz NAN channel and channel 36 is always
    /// 5 GHz.  Use [`Channel::new`] when the band is known.
    #[must_use]
    pub fn from_number(number: u16) -> Option<Channel> {
        [Band::Band24, Band::Band5, Band::Band6]
            .into_iter()
            .find_map(|band| Channel::new(number, band).ok())
    }

    /// The channel number within its band.
    #[must_use]
    pub fn number(self) -> u16 {
        self.number
    }

    /// The band this channel belongs to.
    #[must_use]
    pub fn band(self) -> Band {
        self.band
    }

    /// The 20 MHz center frequency of this channel in MHz.
    #[must_use]
    pub fn freq_mhz(self) -> u32 {
        match self.band {
            // Channel 14 sits outside the regular 5 MHz raster.
            Band::Band24 if self.number == 14 => 2484,
            Band::Band24 => 2407 + 5 * u32::from(self.number),
            Band::Band5 => 5000 + 5 * u32::from(self.number),
            Band::Band6 => 5950 + 5 * u32::from(self.number),
        }
    }

    /// Look up the channel broadcast on a radiotap center frequency.
    ///
    /// Returns `None` for frequencies with no 20 MHz channel allocation.
    #[must_use]
    pub fn from_freq_mhz(freq: u32) -> Option<Channel> {
        let (number, band) = match freq {
            2484 => (14, Band::Band24),
            2412..=2472 if freq % 5 == 2 => (u16::try_from((freq - 2407) / 5).ok()?, Band::Band24),
            5180..=5885 if freq % 5 == 0 => (u16::try_from((freq - 5000) / 5).ok()?, Band::Band5),
            5955..=7115 if freq % 5 == 0 => (u16::try_from((freq - 5950) / 5).ok()?, Band::Band6),
            _ => return None,
        };
        Channel::new(number, band).ok()
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.number, self.band)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nan_discovery_channel_is_2437() {
        assert_eq!(Channel::NAN_DISCOVERY.freq_mhz(), 2437);
    }

    #[test]
    fn channel_14_is_special_cased() {
        let ch = Channel::new(14, Band::Band24).unwrap();
        assert_eq!(ch.freq_mhz(), 2484);
        assert_eq!(Channel::from_freq_mhz(2484), Some(ch));
    }

    #[test]
    fn channel_149_is_5745() {
        let ch = Channel::new(149, Band::Band5).unwrap();
        assert_eq!(ch.freq_mhz(), 5745);
        assert_eq!(Channel::from_freq_mhz(5745), Some(ch));
    }

    #[test]
    fn freq_mapping_is_bijective_per_band() {
        let mut channels = Vec::new();
        channels.extend((1..=14).map(|n| Channel::new(n, Band::Band24).unwrap()));
        channels.extend(CHANNELS_5GHZ.map(|n| Channel::new(n, Band::Band5).unwrap()));
        channels.extend((1..=233).map(|n| Channel::new(n, Band::Band6).unwrap()));
        for ch in channels {
            assert_eq!(
                Channel::from_freq_mhz(ch.freq_mhz()),
                Some(ch),
                "channel {ch} does not survive the frequency round trip"
            );
        }
    }

    #[test]
    fn unallocated_frequencies_do_not_map() {
        // 2477 is on the 2.4 GHz raster but past channel 13; 5905 is between
        // the 5 GHz and 6 GHz allocations; 2413 is off-raster.
        for freq in [2413, 2477, 5905, 7120, 0] {
            assert_eq!(Channel::from_freq_mhz(freq), None);
        }
    }

    #[test]
    fn bare_numbers_prefer_lower_bands() {
        assert_eq!(Channel::from_number(6), Some(Channel::NAN_DISCOVERY));
        assert_eq!(
            Channel::from_number(36),
            Some(Channel::new(36, Band::Band5).unwrap())
        );
        assert_eq!(
            Channel::from_number(37),
            Some(Channel::new(37, Band::Band6).unwrap())
        );
        assert_eq!(Channel::from_number(234), None);
    }

    #[test]
    fn wrong_band_numbers_are_rejected() {
        assert!(Channel::new(15, Band::Band24).is_err());
        assert!(Channel::new(37, Band::Band5).is_err());
        assert!(Channel::new(0, Band::Band6).is_err());
    }
}
