// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! The two-stage classifier.

use crate::ek::{decode_ssid, float_field, int_field, string_field};
use crate::{FrameEnvelope, FrameKind};
use net::{Channel, Mac};
use serde_json::{Map, Value};
use signatures::{CachedVerdict, MatchCache, SignatureDb, TriggerSet};
use std::sync::Arc;

/// 802.11 management action frame subtype.
const SUBTYPE_ACTION: i64 = 0x000d;

/// Layer keys the capture helper uses for RemoteID dissectors.
const REMOTEID_LAYERS: [&str; 4] = ["opendroneid", "open_drone_id", "droneid", "remoteid"];

/// Layer key of the DJI DroneID vendor-IE dissector.
const DJI_LAYER: &str = "dji_drone_id";

/// Candidate spellings of the source/transmitter address fields.
const MAC_KEYS: [&str; 6] = [
    "wlan_wlan_sa",
    "wlan_sa",
    "wlan.sa",
    "wlan_wlan_ta",
    "wlan_ta",
    "wlan.ta",
];

const RSSI_KEYS: [&str; 3] = [
    "radiotap_radiotap_dbm_antsignal",
    "radiotap_dbm_antsignal",
    "radiotap.dbm_antsignal",
];

const CHANNEL_FREQ_KEYS: [&str; 3] = [
    "radiotap_radiotap_channel_freq",
    "radiotap_channel_freq",
    "radiotap.channel.freq",
];

const SUBTYPE_KEYS: [&str; 3] = [
    "wlan_wlan_fc_type_subtype",
    "wlan_fc_type_subtype",
    "wlan.fc.type_subtype",
];

const MGT_SSID_KEYS: [&str; 4] = [
    "wlan_wlan_ssid",
    "wlan_mgt_wlan_mgt_ssid",
    "wlan_mgt_ssid",
    "wlan.mgt.ssid",
];

const WLAN_SSID_KEYS: [&str; 3] = ["wlan_wlan_ssid", "wlan_ssid", "wlan.ssid"];

/// Classifier drop/accept counters.  The classifier runs on the capture
/// thread only, so plain integers suffice; snapshots are taken by copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[derive(serde::Serialize)]
pub struct ClassifierStats {
    /// Lines inspected.
    pub lines_seen: u64,
    /// Lines rejected before structured parsing (triviality + pre-filter).
    pub prefilter_rejects: u64,
    /// Lines that passed the pre-filter but failed to decode.
    pub parse_errors: u64,
    /// Decoded frames dropped for lacking a source MAC.
    pub no_mac_drops: u64,
    /// Decoded frames where no predicate fired.
    pub no_match_drops: u64,
    /// Accepted frames.
    pub frames_classified: u64,
    /// Fingerprint verdicts served from the MAC cache.
    pub cache_hits: u64,
}

/// The hot-path classifier.
///
/// Owns the (immutable, shared) signature database plus the per-sensor
/// trigger set and verdict cache.  `classify` takes `&mut self` for the
/// cache and counters; the classifier lives on the capture thread.
pub struct Classifier {
    db: Arc<SignatureDb>,
    triggers: TriggerSet,
    cache: MatchCache,
    stats: ClassifierStats,
}

impl Classifier {
    /// Build a classifier over a compiled signature database.
    #[must_use]
    pub fn new(db: Arc<SignatureDb>) -> Classifier {
        let triggers = TriggerSet::build(&db);
        Classifier {
            db,
            triggers,
            cache: MatchCache::new(),
            stats: ClassifierStats::default(),
        }
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> ClassifierStats {
        self.stats
    }

    /// Classify one line of helper output.
    ///
    /// Returns `Some(envelope)` iff the frame is drone-bearing.  Never
    /// propagates errors: malformed input is counted and dropped.
    pub fn classify(&mut self, line: &str) -> Option<FrameEnvelope> {
        self.stats.lines_seen += 1;

        // Stage 1: trivial reject.  EK output interleaves {"index":...}
        // preamble lines with the records; the second-byte check drops them
        // without a substring search.
        let bytes = line.as_bytes();
        if bytes.first() != Some(&b'{') || (bytes.get(1) == Some(&b'"') && bytes.get(2) == Some(&b'i'))
        {
            self.stats.prefilter_rejects += 1;
            return None;
        }

        // Stage 2: single-pass substring pre-filter on the raw line.
        if !self.triggers.matches(line) {
            self.stats.prefilter_rejects += 1;
            return None;
        }

        // Stage 3: structured decode, survivors only.
        let Ok(Value::Object(record)) = serde_json::from_str::<Value>(line) else {
            self.stats.parse_errors += 1;
            return None;
        };
        let Some(Value::Object(layers)) = record.get("layers") else {
            self.stats.parse_errors += 1;
            return None;
        };

        // Stage 4: envelope fields.
        let empty = Map::new();
        let wlan = layers
            .get("wlan")
            .and_then(Value::as_object)
            .unwrap_or(&empty);
        let Some(source_mac) = string_field(wlan, &MAC_KEYS).and_then(|s| s.parse::<Mac>().ok())
        else {
            self.stats.no_mac_drops += 1;
            return None;
        };

        let radiotap = layers
            .get("radiotap")
            .and_then(Value::as_object)
            .unwrap_or(&empty);
        let rssi_dbm = float_field(radiotap, &RSSI_KEYS);
        let channel = float_field(radiotap, &CHANNEL_FREQ_KEYS)
            .and_then(|f| u32::try_from(f as i64).ok())
            .and_then(Channel::from_freq_mhz);

        // Stage 5: kind predicates, fixed priority, first match wins.
        let (kind, fingerprint) = match self.classify_kind(layers, wlan, source_mac) {
            Some(result) => result,
            None => {
                self.stats.no_match_drops += 1;
                return None;
            }
        };

        self.stats.frames_classified += 1;
        Some(FrameEnvelope {
            source_mac,
            rssi_dbm,
            channel,
            kind,
            fingerprint,
            raw_record: layers.clone(),
        })
    }

    fn classify_kind(
        &mut self,
        layers: &Map<String, Value>,
        wlan: &Map<String, Value>,
        mac: Mac,
    ) -> Option<(FrameKind, Option<signatures::FingerprintMatch>)> {
        let has_remoteid_layer = REMOTEID_LAYERS.iter().any(|key| layers.contains_key(*key));

        // Check 1: RemoteID over NAN.
        if has_remoteid_layer {
            return Some((FrameKind::RemoteidNan, None));
        }

        // Check 2: RemoteID in an action frame.
        if int_field(wlan, &SUBTYPE_KEYS) == Some(SUBTYPE_ACTION) && has_remoteid_layer {
            return Some((FrameKind::RemoteidAction, None));
        }

        // Check 3: DJI vendor IE.
        if layers.contains_key(DJI_LAYER) {
            return Some((FrameKind::DjiDroneid, None));
        }

        // Checks 4 and 5: SSID and OUI fingerprints.
        let ssid = self.extract_ssid(layers, wlan);

        match self.cache.lookup(mac, ssid.is_some()) {
            Some(CachedVerdict::Hit(matched)) => {
                self.stats.cache_hits += 1;
                return Some((FrameKind::WifiFingerprint, Some(matched)));
            }
            Some(CachedVerdict::Miss) => {
                self.stats.cache_hits += 1;
                return None;
            }
            None => {}
        }

        if let Some(ssid) = ssid.as_deref() {
            if let Some(matched) = self.db.check_ssid(ssid) {
                self.cache.insert_positive(mac, matched.clone());
                return Some((FrameKind::WifiFingerprint, Some(matched)));
            }
        }

        if let Some(matched) = self.db.check_oui(mac) {
            self.cache.insert_positive(mac, matched.clone());
            return Some((FrameKind::WifiFingerprint, Some(matched)));
        }

        // Negative caching needs both MAC and SSID: a frame without an SSID
        // (probe request, hidden network) must not pin the MAC as clean.
        if ssid.is_some() {
            self.cache.insert_negative(mac);
        }
        None
    }

    fn extract_ssid(&self, layers: &Map<String, Value>, wlan: &Map<String, Value>) -> Option<String> {
        let empty = Map::new();
        let wlan_mgt = layers
            .get("wlan_wlan_mgt")
            .or_else(|| layers.get("wlan_mgt"))
            .and_then(Value::as_object)
            .unwrap_or(&empty);
        let raw = string_field(wlan_mgt, &MGT_SSID_KEYS)
            .or_else(|| string_field(wlan, &WLAN_SSID_KEYS))?;
        Some(decode_ssid(&raw))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use net::Band;
    use signatures::SignatureFile;

    fn classifier() -> Classifier {
        let db = SignatureDb::compile(&SignatureFile::builtin());
        Classifier::new(Arc::new(db))
    }

    fn line(layers: serde_json::Value) -> String {
        serde_json::json!({"layers": layers}).to_string()
    }

    #[test]
    fn pure_noise_beacon_is_rejected_by_the_prefilter() {
        let mut c = classifier();
        let input = line(serde_json::json!({
            "wlan": {"wlan_wlan_sa": ["aa:bb:cc:dd:ee:ff"]},
            "wlan_wlan_mgt": {"wlan_wlan_ssid": ["Starbucks-WiFi"]}
        }));
        assert!(c.classify(&input).is_none());
        assert_eq!(c.stats().prefilter_rejects, 1);
        assert_eq!(c.stats().parse_errors, 0);
    }

    #[test]
    fn index_preamble_and_empty_lines_are_trivially_rejected() {
        let mut c = classifier();
        assert!(c.classify("").is_none());
        assert!(c.classify(r#"{"index": {"_index": "packets-2026-08-01"}}"#).is_none());
        assert!(c.classify("garbage").is_none());
        assert_eq!(c.stats().prefilter_rejects, 3);
    }

    #[test]
    fn remoteid_nan_frame_maps_to_channel_6() {
        let mut c = classifier();
        let input = line(serde_json::json!({
            "wlan": {"wlan_wlan_sa": ["60:60:1F:AA:BB:CC"]},
            "radiotap": {"radiotap_radiotap_channel_freq": ["2437"]},
            "opendroneid": {"opendroneid_message_pack": ["..."]}
        }));
        let envelope = c.classify(&input).unwrap();
        assert_eq!(envelope.kind, FrameKind::RemoteidNan);
        assert_eq!(envelope.source_mac.to_string(), "60:60:1F:AA:BB:CC");
        assert_eq!(envelope.channel, Some(Channel::new(6, Band::Band24).unwrap()));
    }

    #[test]
    fn dji_vendor_ie_beacon_maps_to_channel_149() {
        let mut c = classifier();
        let input = line(serde_json::json!({
            "wlan": {"wlan_wlan_sa": ["34:D2:62:11:22:33"]},
            "radiotap": {"radiotap_radiotap_channel_freq": ["5745"]},
            "dji_drone_id": {"dji_drone_id_serial": ["xxx"]}
        }));
        let envelope = c.classify(&input).unwrap();
        assert_eq!(envelope.kind, FrameKind::DjiDroneid);
        assert_eq!(envelope.channel, Some(Channel::new(149, Band::Band5).unwrap()));
    }

    #[test]
    fn parrot_ssid_fingerprint_matches_without_known_oui() {
        let mut c = classifier();
        let input = line(serde_json::json!({
            "wlan": {"wlan_wlan_sa": ["11:22:33:44:55:66"]},
            "wlan_wlan_mgt": {"wlan_wlan_ssid": ["ANAFI-ABCDEF"]}
        }));
        let envelope = c.classify(&input).unwrap();
        assert_eq!(envelope.kind, FrameKind::WifiFingerprint);
        let fp = envelope.fingerprint.unwrap();
        assert_eq!(fp.manufacturer, "Parrot");
    }

    #[test]
    fn drone_oui_with_generic_ssid_matches_via_oui() {
        let mut c = classifier();
        let input = line(serde_json::json!({
            "wlan": {"wlan_wlan_sa": ["60:60:1f:01:02:03"]},
            "wlan_wlan_mgt": {"wlan_wlan_ssid": ["MySSID"]}
        }));
        let envelope = c.classify(&input).unwrap();
        assert_eq!(envelope.kind, FrameKind::WifiFingerprint);
        assert_eq!(envelope.fingerprint.unwrap().manufacturer, "DJI");
    }

    #[test]
    fn remoteid_layer_wins_over_fingerprint_evidence() {
        let mut c = classifier();
        // Drone OUI and a drone SSID, but the RemoteID layer takes priority.
        let input = line(serde_json::json!({
            "wlan": {"wlan_wlan_sa": ["60:60:1f:01:02:03"]},
            "wlan_wlan_mgt": {"wlan_wlan_ssid": ["DJI-MINI4PRO-726"]},
            "remoteid": {}
        }));
        let envelope = c.classify(&input).unwrap();
        assert_eq!(envelope.kind, FrameKind::RemoteidNan);
        assert!(envelope.fingerprint.is_none());
    }

    #[test]
    fn frame_without_mac_is_dropped_even_with_drone_evidence() {
        let mut c = classifier();
        let input = line(serde_json::json!({
            "opendroneid": {},
            "radiotap": {"radiotap_radiotap_channel_freq": ["2437"]}
        }));
        assert!(c.classify(&input).is_none());
        assert_eq!(c.stats().no_mac_drops, 1);
    }

    #[test]
    fn hex_encoded_ssid_is_decoded_before_matching() {
        let mut c = classifier();
        // "ANAFI-X" hex-colon encoded; the raw line still contains the OUI
        // trigger via the source MAC of a Parrot radio.
        let input = line(serde_json::json!({
            "wlan": {"wlan_wlan_sa": ["90:03:b7:44:55:66"]},
            "wlan_wlan_mgt": {"wlan_wlan_ssid": ["41:4e:41:46:49:2d:58"]}
        }));
        let envelope = c.classify(&input).unwrap();
        assert_eq!(envelope.kind, FrameKind::WifiFingerprint);
        // SSID match is checked before OUI and wins.
        let fp = envelope.fingerprint.unwrap();
        assert_eq!(fp.kind, signatures::MatchKind::Ssid);
    }

    #[test]
    fn repeat_frames_hit_the_verdict_cache() {
        let mut c = classifier();
        let input = line(serde_json::json!({
            "wlan": {"wlan_wlan_sa": ["60:60:1f:01:02:03"]},
            "wlan_wlan_mgt": {"wlan_wlan_ssid": ["MySSID"]}
        }));
        assert!(c.classify(&input).is_some());
        assert!(c.classify(&input).is_some());
        assert_eq!(c.stats().cache_hits, 1);
    }

    #[test]
    fn malformed_json_that_passes_the_prefilter_is_counted() {
        let mut c = classifier();
        assert!(c.classify(r#"{"layers": {"opendroneid": "#).is_none());
        assert_eq!(c.stats().parse_errors, 1);
    }

    #[test]
    fn action_subtype_without_remoteid_layer_is_not_remoteid() {
        let mut c = classifier();
        let input = line(serde_json::json!({
            "wlan": {
                "wlan_wlan_sa": ["60:60:1f:01:02:03"],
                "wlan_wlan_fc_type_subtype": ["0x000d"]
            }
        }));
        // OUI fingerprint still applies; the action check alone does not.
        let envelope = c.classify(&input).unwrap();
        assert_eq!(envelope.kind, FrameKind::WifiFingerprint);
    }
}
