// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! The classifier's output record.

use net::{Channel, Mac};
use signatures::FingerprintMatch;
use std::fmt::{Display, Formatter};

/// What kind of drone evidence a frame carried.
///
/// Exactly one kind is assigned per accepted frame; the classifier evaluates
/// the predicates in this order and short-circuits on the first hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// A RemoteID broadcast on the NAN discovery channel.
    RemoteidNan,
    /// A RemoteID carried in an 802.11 action frame (subtype 0x000d).
    RemoteidAction,
    /// DJI's proprietary DroneID vendor information element.
    DjiDroneid,
    /// A beacon/probe whose SSID or OUI matches a drone signature.
    WifiFingerprint,
}

impl FrameKind {
    /// The wire name of this kind, as forwarded to the collector.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FrameKind::RemoteidNan => "remoteid_nan",
            FrameKind::RemoteidAction => "remoteid_action",
            FrameKind::DjiDroneid => "dji_droneid",
            FrameKind::WifiFingerprint => "wifi_fingerprint",
        }
    }
}

impl Display for FrameKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified drone-bearing frame.
///
/// The envelope carries only the minimal fields the sensor itself needs;
/// `raw_record` is the helper's decoded `layers` object, forwarded verbatim
/// so the collector can do the full telemetry parse.
#[derive(Debug, Clone)]
pub struct FrameEnvelope {
    /// Transmitter address of the frame.
    pub source_mac: Mac,
    /// Received signal strength, when radiotap metadata carried it.
    pub rssi_dbm: Option<f64>,
    /// Channel the frame was received on, when the center frequency mapped.
    pub channel: Option<Channel>,
    /// The evidence kind.
    pub kind: FrameKind,
    /// Signature attribution, for fingerprint matches.
    pub fingerprint: Option<FingerprintMatch>,
    /// The decoded per-protocol `layers` object.
    pub raw_record: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wire_names_match_the_collector_contract() {
        assert_eq!(FrameKind::RemoteidNan.as_str(), "remoteid_nan");
        assert_eq!(FrameKind::RemoteidAction.as_str(), "remoteid_action");
        assert_eq!(FrameKind::DjiDroneid.as_str(), "dji_droneid");
        assert_eq!(FrameKind::WifiFingerprint.as_str(), "wifi_fingerprint");
    }

    #[test]
    fn kinds_serialize_as_their_wire_names() {
        let json = serde_json::to_string(&FrameKind::DjiDroneid).unwrap();
        assert_eq!(json, "\"dji_droneid\"");
    }
}
