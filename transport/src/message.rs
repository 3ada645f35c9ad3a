// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! Wire shapes of the messages this sensor originates.
//!
//! The collector keys on `type` and `protocol_version`; everything else is
//! additive.  Timestamps are RFC 3339 UTC.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

/// Wire protocol version for compatibility checking.
pub const PROTOCOL_VERSION: u32 = 1;

fn utc_now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// A classified drone-bearing frame, as forwarded on the `frame` topic.
#[derive(Debug, Clone, Serialize)]
pub struct WifiFrameMessage {
    #[serde(rename = "type")]
    kind: &'static str,
    protocol_version: u32,
    /// Originating sensor.
    pub sensor_uuid: String,
    /// Capture time at the sensor.
    pub timestamp: String,
    /// Transmitter MAC, canonical uppercase-colon form.
    pub mac: String,
    /// Received signal strength in dBm, when known.
    pub rssi: Option<f64>,
    /// Receive channel number, when the frequency mapped.
    pub channel: Option<u16>,
    /// Classifier verdict (`remoteid_nan`, `remoteid_action`, `dji_droneid`,
    /// `wifi_fingerprint`).
    pub frame_type: String,
    /// Signature attribution for fingerprint frames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub designation: Option<String>,
    /// The capture helper's decoded `layers` object, verbatim; the collector
    /// does the full telemetry parse.
    pub raw_fields: Value,
}

impl WifiFrameMessage {
    /// Start a frame message with the shared envelope fields filled in.
    #[must_use]
    pub fn new(sensor_uuid: &str, mac: &str, frame_type: &str, raw_fields: Value) -> Self {
        WifiFrameMessage {
            kind: "wifi_frame",
            protocol_version: PROTOCOL_VERSION,
            sensor_uuid: sensor_uuid.to_string(),
            timestamp: utc_now_rfc3339(),
            mac: mac.to_string(),
            rssi: None,
            channel: None,
            frame_type: frame_type.to_string(),
            designation: None,
            raw_fields,
        }
    }
}

/// Periodic sensor liveness report on the `heartbeat` topic.
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatMessage {
    #[serde(rename = "type")]
    kind: &'static str,
    protocol_version: u32,
    /// Sensor software version.
    pub version: &'static str,
    /// Originating sensor.
    pub sensor_uuid: String,
    /// Operator-facing sensor name.
    pub sensor_name: String,
    /// Report time.
    pub timestamp: String,
    /// Capture interface.
    pub interface: String,
    /// Channel at report time.
    pub channel: Option<u16>,
    /// Channels the hopper cycles through.
    pub channels: Vec<u16>,
    /// One-minute load average.
    pub cpu_load: f64,
    /// Load normalized by CPU count.
    pub cpu_percent: f64,
    /// Bytes of memory in use.
    pub memory_used: u64,
    /// Used memory percentage.
    pub memory_percent: f64,
    /// SoC temperature in Celsius.
    pub temperature: Option<f64>,
    /// Free bytes on the root filesystem.
    pub disk_free: Option<u64>,
    /// Cumulative bytes written to disk.
    pub disk_writes_total: Option<u64>,
    /// Configured sensor position.
    pub latitude: f64,
    /// Configured sensor position.
    pub longitude: f64,
    /// Helper lines read since start.
    pub frames_total: u64,
    /// Frames that classified as drone-bearing.
    pub frames_parsed: u64,
    /// Whether the capture helper is alive right now.
    pub capture_running: bool,
    /// Helper restarts since start.
    pub capture_errors: u64,
    /// Sensor uptime in seconds.
    pub uptime_s: f64,
}

impl HeartbeatMessage {
    /// Start a heartbeat with identity fields filled in and metrics zeroed.
    #[must_use]
    pub fn new(sensor_uuid: &str, sensor_name: &str, interface: &str) -> Self {
        HeartbeatMessage {
            kind: "sensor_heartbeat",
            protocol_version: PROTOCOL_VERSION,
            version: env!("CARGO_PKG_VERSION"),
            sensor_uuid: sensor_uuid.to_string(),
            sensor_name: sensor_name.to_string(),
            timestamp: utc_now_rfc3339(),
            interface: interface.to_string(),
            channel: None,
            channels: Vec::new(),
            cpu_load: 0.0,
            cpu_percent: 0.0,
            memory_used: 0,
            memory_percent: 0.0,
            temperature: None,
            disk_free: None,
            disk_writes_total: None,
            latitude: 0.0,
            longitude: 0.0,
            frames_total: 0,
            frames_parsed: 0,
            capture_running: false,
            capture_errors: 0,
            uptime_s: 0.0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn wifi_frame_carries_type_and_version() {
        let msg = WifiFrameMessage::new("uuid-1", "60:60:1F:AA:BB:CC", "remoteid_nan", json!({}));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "wifi_frame");
        assert_eq!(value["protocol_version"], 1);
        assert_eq!(value["mac"], "60:60:1F:AA:BB:CC");
        assert_eq!(value["frame_type"], "remoteid_nan");
        // Absent designation is omitted, absent rssi is an explicit null.
        assert!(value.get("designation").is_none());
        assert!(value["rssi"].is_null());
    }

    #[test]
    fn heartbeat_timestamp_is_rfc3339() {
        let msg = HeartbeatMessage::new("uuid-1", "rooftop-west", "wlan1mon");
        let value = serde_json::to_value(&msg).unwrap();
        let ts = value["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
        assert_eq!(value["type"], "sensor_heartbeat");
        assert_eq!(value["sensor_name"], "rooftop-west");
    }
}
