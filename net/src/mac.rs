//! MAC address and OUI prefix types.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// A [MAC Address] type.
///
/// `Mac` is a transparent wrapper around `[u8; 6]`.  Capture helpers print
/// addresses with either `:` or `-` separators and in either case; parsing
/// accepts both and the canonical [`Display`] form is uppercase with colons.
///
/// [MAC Address]: https://en.wikipedia.org/wiki/MAC_address
#[must_use]
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mac(pub [u8; 6]);

/// The three-octet vendor prefix of a [`Mac`].
#[must_use]
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oui(pub [u8; 3]);

/// An error which may occur when parsing a [`Mac`] or [`Oui`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0:?} is not a valid MAC address or OUI prefix")]
pub struct InvalidMac(String);

fn parse_octets(s: &str, expected: usize) -> Result<Vec<u8>, InvalidMac> {
    let err = || InvalidMac(s.to_string());
    let octets = s
        .split(|c| c == ':' || c == '-')
        .map(|part| {
            if part.len() == 2 {
                u8::from_str_radix(part, 16).map_err(|_| err())
            } else {
                Err(err())
            }
        })
        .collect::<Result<Vec<u8>, InvalidMac>>()?;
    if octets.len() == expected {
        Ok(octets)
    } else {
        Err(err())
    }
}

impl Mac {
    /// The vendor (OUI) prefix of this address.
    pub fn oui(&self) -> Oui {
        Oui([self.0[0], self.0[1], self.0[2]])
    }

    /// Returns true iff the least significant bit of the first octet is one.
    #[must_use]
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 == 0x01
    }
}

impl FromStr for Mac {
    type Err = InvalidMac;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let octets = parse_octets(s, 6)?;
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&octets);
        Ok(Mac(mac))
    }
}

impl Display for Mac {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for Oui {
    type Err = InvalidMac;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let octets = parse_octets(s, 3)?;
        let mut oui = [0u8; 3];
        oui.copy_from_slice(&octets);
        Ok(Oui(oui))
    }
}

impl Display for Oui {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}")
    }
}

impl serde::Serialize for Mac {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Mac {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
