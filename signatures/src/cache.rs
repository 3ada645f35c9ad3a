// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! Bounded per-MAC verdict cache.
//!
//! Repeat beacons from the same radio dominate real capture traffic, so the
//! fingerprint path caches positive matches by MAC.  Negative verdicts are
//! cached only when both MAC and SSID were present: a probe request seen
//! before its beacon must not pin the MAC as "not a drone".

use crate::FingerprintMatch;
use net::Mac;
use std::collections::{HashMap, HashSet, VecDeque};

const POSITIVE_CAP: usize = 5_000;
const NEGATIVE_CAP: usize = 10_000;

/// A cached verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedVerdict {
    /// The MAC previously produced this match.
    Hit(FingerprintMatch),
    /// The MAC was previously confirmed non-drone (with SSID in hand).
    Miss,
}

/// Bounded positive/negative verdict cache, keyed by MAC.
///
/// Eviction drops the oldest quarter of entries when a side fills up, which
/// amortizes to O(1) per insert without tracking per-entry recency.
#[derive(Debug, Default)]
pub struct MatchCache {
    positive: HashMap<Mac, FingerprintMatch>,
    positive_order: VecDeque<Mac>,
    negative: HashSet<Mac>,
    negative_order: VecDeque<Mac>,
}

impl MatchCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> MatchCache {
        MatchCache::default()
    }

    /// Look up a cached verdict.
    ///
    /// A negative verdict is only returned when the caller has no SSID; with
    /// an SSID in hand the full check must run, since the SSID may match
    /// even though the MAC previously missed.
    #[must_use]
    pub fn lookup(&self, mac: Mac, has_ssid: bool) -> Option<CachedVerdict> {
        if let Some(hit) = self.positive.get(&mac) {
            return Some(CachedVerdict::Hit(hit.clone()));
        }
        if !has_ssid && self.negative.contains(&mac) {
            return Some(CachedVerdict::Miss);
        }
        None
    }

    /// Record a positive match.
    pub fn insert_positive(&mut self, mac: Mac, matched: FingerprintMatch) {
        if self.positive.len() >= POSITIVE_CAP {
            for _ in 0..POSITIVE_CAP / 4 {
                if let Some(old) = self.positive_order.pop_front() {
                    self.positive.remove(&old);
                }
            }
        }
        if self.positive.insert(mac, matched).is_none() {
            self.positive_order.push_back(mac);
        }
        if self.negative.remove(&mac) {
            self.negative_order.retain(|m| *m != mac);
        }
    }

    /// Record a confirmed non-drone MAC.  Callers must only do this when
    /// both MAC and SSID were observed.
    pub fn insert_negative(&mut self, mac: Mac) {
        if self.positive.contains_key(&mac) {
            return;
        }
        if self.negative.len() >= NEGATIVE_CAP {
            for _ in 0..NEGATIVE_CAP / 4 {
                if let Some(old) = self.negative_order.pop_front() {
                    self.negative.remove(&old);
                }
            }
        }
        if self.negative.insert(mac) {
            self.negative_order.push_back(mac);
        }
    }

    /// Number of cached positive matches.
    #[must_use]
    pub fn positive_len(&self) -> usize {
        self.positive.len()
    }

    /// Number of cached negative verdicts.
    #[must_use]
    pub fn negative_len(&self) -> usize {
        self.negative.len()
    }

    /// Drop all negative verdicts, allowing re-detection after a signature
    /// refresh or a long run.
    pub fn clear_negative(&mut self) {
        self.negative.clear();
        self.negative_order.clear();
    }
}
