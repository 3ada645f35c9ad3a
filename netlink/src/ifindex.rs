// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! Interface name to index resolution.

use std::collections::HashMap;
use std::path::PathBuf;

/// Upper bound on cached entries.  Interfaces come and go (airmon-ng
/// renames, USB re-enumeration), but never in volume; on overflow the cache
/// is simply cleared.
const CACHE_CAP: usize = 100;

/// Cached `/sys/class/net/<iface>/ifindex` lookups.
///
/// Callers hold the netlink driver mutex, so the cache itself needs no lock.
#[derive(Debug, Default)]
pub(crate) struct IfindexCache {
    root: Option<PathBuf>,
    map: HashMap<String, u32>,
}

impl IfindexCache {
    pub(crate) fn new() -> IfindexCache {
        IfindexCache::default()
    }

    /// Use a different sysfs root (tests only).
    #[cfg(test)]
    pub(crate) fn with_root(root: PathBuf) -> IfindexCache {
        IfindexCache {
            root: Some(root),
            map: HashMap::new(),
        }
    }

    /// Resolve an interface name, consulting sysfs on a miss.
    pub(crate) fn lookup(&mut self, interface: &str) -> Option<u32> {
        if let Some(&index) = self.map.get(interface) {
            return Some(index);
        }
        let base = self
            .root
            .clone()
            .unwrap_or_else(|| PathBuf::from("/sys/class/net"));
        let raw = std::fs::read_to_string(base.join(interface).join("ifindex")).ok()?;
        let index = raw.trim().parse::<u32>().ok()?;
        if self.map.len() >= CACHE_CAP {
            self.map.clear();
        }
        self.map.insert(interface.to_string(), index);
        Some(index)
    }
}
