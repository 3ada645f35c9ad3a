// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! Compiled signature database and fingerprint matching.

use crate::{SignatureError, SignatureFile};
use net::{Mac, Oui};
use regex::{Regex, RegexBuilder};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use tracing::{info, warn};

/// Matches `DJI-MINI4PRO-726`, `DJI_MAVIC3_1234`, `DJI AVATA2 ABC`, capturing
/// the model code.
static DJI_SSID_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    RegexBuilder::new(r"^DJI[-_ ]([A-Z0-9]+?)(?:[-_ ]\w+)?$")
        .case_insensitive(true)
        .build()
        .expect("DJI SSID regex is valid")
});

/// A compiled SSID pattern with its attribution.
#[derive(Debug)]
pub struct SsidPattern {
    pub(crate) regex: Regex,
    pub(crate) manufacturer: String,
    pub(crate) model: String,
    pub(crate) is_controller: bool,
}

/// How a fingerprint matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// The SSID matched a known drone pattern.
    Ssid,
    /// The MAC's OUI prefix belongs to a drone vendor.
    Oui,
}

/// A positive fingerprint match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintMatch {
    /// Manufacturer attribution.
    pub manufacturer: String,
    /// Model attribution (may be `"Unknown"`).
    pub model: String,
    /// Human-readable designation, e.g. `"DJI Mini 4 Pro"`.
    pub designation: String,
    /// What produced the match.
    pub kind: MatchKind,
    /// Whether the signature belongs to a controller.
    pub is_controller: bool,
}

/// The compiled, immutable signature database.
///
/// Construction compiles every SSID regex and indexes the OUI and DJI model
/// tables.  After that the database is read-only; share it behind an `Arc`.
#[derive(Debug)]
pub struct SignatureDb {
    ssid_patterns: Vec<SsidPattern>,
    oui_drone_set: HashSet<Oui>,
    oui_info: HashMap<Oui, String>,
    dji_models: HashMap<String, String>,
}

impl SignatureDb {
    /// Compile a loaded [`SignatureFile`].
    ///
    /// Invalid regex patterns and malformed OUI keys are skipped with a
    /// warning rather than failing the load; a sensor with a partially
    /// broken signature file still detects what it can.
    #[must_use]
    pub fn compile(file: &SignatureFile) -> SignatureDb {
        let mut ssid_patterns = Vec::with_capacity(file.ssid_patterns.len());
        for entry in &file.ssid_patterns {
            match RegexBuilder::new(&entry.pattern).case_insensitive(true).build() {
                Ok(regex) => ssid_patterns.push(SsidPattern {
                    regex,
                    manufacturer: entry.manufacturer.clone(),
                    model: entry.model.clone(),
                    is_controller: entry.is_controller,
                }),
                Err(err) => warn!("invalid SSID pattern {:?}: {err}", entry.pattern),
            }
        }

        let mut oui_drone_set = HashSet::new();
        let mut oui_info = HashMap::new();
        for (key, desc) in &file.oui_map {
            let Ok(oui) = key.parse::<Oui>() else {
                warn!("invalid OUI prefix {key:?} in signature file");
                continue;
            };
            oui_info.insert(oui, desc.clone());
            if desc.to_lowercase().ends_with("(drone)") {
                oui_drone_set.insert(oui);
            }
        }

        let dji_models = file
            .dji_ssid_models
            .iter()
            .map(|(code, model)| (code.to_uppercase(), model.clone()))
            .collect();

        let db = SignatureDb {
            ssid_patterns,
            oui_drone_set,
            oui_info,
            dji_models,
        };
        info!(
            "signature database compiled: {} SSID patterns, {} drone OUIs, {} DJI models",
            db.ssid_patterns.len(),
            db.oui_drone_set.len(),
            db.dji_models.len()
        );
        db
    }

    /// Load and compile a signature file, falling back to the built-in set
    /// when `path` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError`] when an explicit path cannot be loaded.
    pub fn load(path: Option<&std::path::Path>) -> Result<SignatureDb, SignatureError> {
        let file = match path {
            Some(path) => SignatureFile::load(path)?,
            None => SignatureFile::builtin(),
        };
        Ok(Self::compile(&file))
    }

    /// The compiled SSID patterns, in priority order.
    #[must_use]
    pub fn ssid_patterns(&self) -> &[SsidPattern] {
        &self.ssid_patterns
    }

    /// The drone OUI set.
    #[must_use]
    pub fn drone_ouis(&self) -> &HashSet<Oui> {
        &self.oui_drone_set
    }

    /// Check an SSID against the pattern list; first match wins.
    #[must_use]
    pub fn check_ssid(&self, ssid: &str) -> Option<FingerprintMatch> {
        for pattern in &self.ssid_patterns {
            if !pattern.regex.is_match(ssid) {
                continue;
            }
            let mut model = pattern.model.clone();
            if pattern.manufacturer == "DJI" && !pattern.is_controller {
                if let Some(extracted) = self.extract_dji_model(ssid) {
                    model = extracted;
                }
            }
            let designation = if pattern.is_controller {
                format!("{} Controller", pattern.manufacturer)
            } else if model != "Unknown" && model != "generic" {
                format!("{} {model}", pattern.manufacturer)
            } else {
                pattern.manufacturer.clone()
            };
            return Some(FingerprintMatch {
                manufacturer: pattern.manufacturer.clone(),
                model,
                designation,
                kind: MatchKind::Ssid,
                is_controller: pattern.is_controller,
            });
        }
        None
    }

    /// Check a MAC's OUI prefix against the drone vendor set.
    #[must_use]
    pub fn check_oui(&self, mac: Mac) -> Option<FingerprintMatch> {
        let oui = mac.oui();
        if !self.oui_drone_set.contains(&oui) {
            return None;
        }
        let desc = self.oui_info.get(&oui).map_or("Unknown", String::as_str);
        let manufacturer = desc.split(" (").next().unwrap_or(desc).to_string();
        Some(FingerprintMatch {
            designation: format!("{manufacturer} (WiFi)"),
            model: "Unknown".to_string(),
            kind: MatchKind::Oui,
            is_controller: false,
            manufacturer,
        })
    }

    /// Extract a specific DJI model name from an SSID.
    ///
    /// `DJI-MINI4PRO-726` resolves to `Mini 4 Pro`.  Codes with trailing
    /// characters fall back to progressively shorter prefixes, down to three
    /// characters.
    #[must_use]
    pub fn extract_dji_model(&self, ssid: &str) -> Option<String> {
        let code = DJI_SSID_RE
            .captures(ssid)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_uppercase())?;
        if let Some(model) = self.dji_models.get(&code) {
            return Some(model.clone());
        }
        for len in (3..code.len()).rev() {
            if let Some(model) = self.dji_models.get(&code[..len]) {
                return Some(model.clone());
            }
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn db() -> SignatureDb {
        SignatureDb::compile(&SignatureFile::builtin())
    }

    #[test]
    fn anafi_ssid_matches_parrot() {
        let m = db().check_ssid("ANAFI-ABCDEF").unwrap();
        assert_eq!(m.manufacturer, "Parrot");
        assert_eq!(m.kind, MatchKind::Ssid);
        assert!(!m.is_controller);
    }

    #[test]
    fn controller_ssid_gets_controller_designation() {
        let m = db().check_ssid("DJI_RCN1_9f3a").unwrap();
        assert!(m.is_controller);
        assert_eq!(m.designation, "DJI Controller");
    }

    #[test]
    fn dji_model_extraction_refines_the_designation() {
        let m = db().check_ssid("DJI-MINI4PRO-726").unwrap();
        assert_eq!(m.model, "Mini 4 Pro");
        assert_eq!(m.designation, "DJI Mini 4 Pro");
    }

    #[test]
    fn dji_extraction_falls_back_to_shorter_prefixes() {
        // AVATA2X is not in the table; AVATA2 is.
        assert_eq!(db().extract_dji_model("DJI-AVATA2X-1"), Some("Avata 2".to_string()));
        // No prefix of length >= 3 matches.
        assert_eq!(db().extract_dji_model("DJI-ZZZZZ-1"), None);
    }

    #[test]
    fn drone_oui_matches_and_other_oui_does_not() {
        let db = db();
        let drone: Mac = "60:60:1F:01:02:03".parse().unwrap();
        let m = db.check_oui(drone).unwrap();
        assert_eq!(m.manufacturer, "DJI");
        assert_eq!(m.kind, MatchKind::Oui);

        let other: Mac = "D8:96:85:01:02:03".parse().unwrap();
        assert!(db.check_oui(other).is_none());
    }

    #[test]
    fn ordinary_ssids_do_not_match() {
        assert!(db().check_ssid("Starbucks-WiFi").is_none());
    }

    #[test]
    fn invalid_patterns_are_skipped_not_fatal() {
        let file = SignatureFile::from_json(
            r#"{"ssid_patterns": [
                {"pattern": "([", "manufacturer": "Broken"},
                {"pattern": "^OK", "manufacturer": "Fine"}
            ]}"#,
        )
        .unwrap();
        let db = SignatureDb::compile(&file);
        assert_eq!(db.ssid_patterns().len(), 1);
        assert!(db.check_ssid("OK-123").is_some());
    }
}
