// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! The raw-line trigger set.
//!
//! A capture line must contain at least one trigger substring to possibly be
//! a drone frame: a protocol layer keyword, a drone OUI (MAC addresses are
//! printed lowercase in the helper's output), or a manufacturer SSID
//! fragment.  All triggers are folded into a single alternation regex so the
//! classifier rejects ordinary WiFi traffic in one pass over the line,
//! before any structured parsing.

use crate::SignatureDb;
use regex::Regex;
use tracing::info;

/// Layer-name keywords emitted by the capture helper for drone protocols.
const PROTOCOL_KEYWORDS: [&str; 5] = [
    "opendroneid",
    "open_drone_id",
    "dji_drone_id",
    "remoteid",
    "droneid",
];

/// Shortest SSID fragment worth triggering on; shorter literals would fire
/// on too much ordinary traffic.
const MIN_FRAGMENT_LEN: usize = 3;

/// The compiled single-pass pre-filter.
#[derive(Debug)]
pub struct TriggerSet {
    regex: Regex,
    count: usize,
}

impl TriggerSet {
    /// Build the trigger set for a signature database.
    #[must_use]
    pub fn build(db: &SignatureDb) -> TriggerSet {
        let mut triggers: Vec<String> = PROTOCOL_KEYWORDS.iter().map(ToString::to_string).collect();

        for oui in db.drone_ouis() {
            triggers.push(oui.to_string().to_lowercase());
        }

        for pattern in db.ssid_patterns() {
            if let Some(fragment) = literal_prefix(pattern.regex.as_str()) {
                triggers.push(fragment);
            }
        }

        triggers.sort_unstable();
        triggers.dedup();
        // Longest first so a longer fragment wins over its own prefix.
        triggers.sort_by_key(|t| std::cmp::Reverse(t.len()));

        let alternation = triggers
            .iter()
            .map(|t| regex::escape(t))
            .collect::<Vec<_>>()
            .join("|");
        #[allow(clippy::expect_used)]
        let regex = Regex::new(&alternation).expect("escaped literal alternation is valid");

        info!("trigger set compiled: {} literal substrings", triggers.len());
        TriggerSet {
            regex,
            count: triggers.len(),
        }
    }

    /// Whether the line contains any trigger substring.
    #[must_use]
    pub fn matches(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }

    /// Number of literal triggers in the alternation.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the set is empty (never true in practice: the protocol
    /// keywords are always present).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Extract the leading literal run of a regex pattern.
///
/// `^ANAFI` yields `ANAFI`, `^DJI[-_ ]` yields `DJI`, `^Typhoon[-_ ]?H`
/// yields `Typhoon`.  Fragments shorter than [`MIN_FRAGMENT_LEN`] are
/// discarded.
fn literal_prefix(pattern: &str) -> Option<String> {
    let stripped = pattern.strip_prefix('^').unwrap_or(pattern);
    let literal: String = stripped
        .chars()
        .take_while(|c| !r"\.[]{}()*+?|$".contains(*c))
        .collect();
    (literal.len() >= MIN_FRAGMENT_LEN).then_some(literal)
}
