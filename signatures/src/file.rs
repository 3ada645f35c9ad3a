// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! On-disk signature file format.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// The built-in signature set, compiled into the binary.
pub const BUILTIN_SIGNATURES: &str = include_str!("../data/drone_signatures.json");

/// An error which may occur while loading a signature file.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    /// The file could not be read.
    #[error("failed to read signature file: {0}")]
    Read(#[from] std::io::Error),
    /// The file is not valid JSON or has the wrong shape.
    #[error("failed to parse signature file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One SSID pattern entry.
#[derive(Debug, Clone, Deserialize)]
pub struct SsidPatternEntry {
    /// Regex matched against decoded SSIDs (case-insensitive).
    pub pattern: String,
    /// Manufacturer attribution.
    #[serde(default = "unknown")]
    pub manufacturer: String,
    /// Model attribution; `model_hint` is accepted as a legacy alias.
    #[serde(default = "unknown", alias = "model_hint")]
    pub model: String,
    /// Whether the SSID belongs to a controller rather than the aircraft.
    #[serde(default)]
    pub is_controller: bool,
}

fn unknown() -> String {
    "Unknown".to_string()
}

/// The raw signature file: SSID patterns, an OUI vendor map, and DJI model
/// codes.  Only `oui_map` entries whose description ends in `(drone)` join
/// the drone OUI set; the rest are attribution-only.
#[derive(Debug, Clone, Deserialize)]
pub struct SignatureFile {
    /// SSID patterns, in priority order (first match wins).
    #[serde(default)]
    pub ssid_patterns: Vec<SsidPatternEntry>,
    /// OUI prefix (`XX:XX:XX`) to vendor description.
    #[serde(default)]
    pub oui_map: BTreeMap<String, String>,
    /// DJI SSID model code to human-readable model name.
    #[serde(default)]
    pub dji_ssid_models: BTreeMap<String, String>,
}

impl SignatureFile {
    /// Parse a signature file from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::Parse`] on malformed JSON.
    pub fn from_json(raw: &str) -> Result<SignatureFile, SignatureError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Load a signature file from disk.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError`] when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<SignatureFile, SignatureError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// The built-in signature set.
    ///
    /// # Panics
    ///
    /// Panics if the compiled-in JSON is malformed, which is a build defect
    /// caught by the test suite.
    #[must_use]
    pub fn builtin() -> SignatureFile {
        #[allow(clippy::expect_used)]
        Self::from_json(BUILTIN_SIGNATURES).expect("built-in signature set is valid")
    }
}
