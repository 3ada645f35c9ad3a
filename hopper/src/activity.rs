// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! Per-channel drone activity tracking.

use net::Channel;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Wall-clock map of the last classified drone frame per channel.
///
/// The classifier writes on every accepted frame; the hopper reads a few
/// times per second.  Both critical sections are single map operations, so
/// one mutex is plenty.  Entries are filtered by age on read rather than
/// compacted: the key set is bounded by the configured channel set, so the
/// map cannot grow without bound anyway.
#[derive(Debug)]
pub struct ActivityMap {
    timeout: Duration,
    last_seen: Mutex<HashMap<Channel, Instant>>,
}

impl ActivityMap {
    /// Create a map with the given age-out window.
    #[must_use]
    pub fn new(timeout: Duration) -> ActivityMap {
        ActivityMap {
            timeout,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Channel, Instant>> {
        match self.last_seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record drone activity on `channel`, now.
    pub fn report(&self, channel: Channel) {
        self.lock().insert(channel, Instant::now());
    }

    /// Channels with activity within the timeout window.
    #[must_use]
    pub fn active_channels(&self) -> Vec<Channel> {
        let guard = self.lock();
        guard
            .iter()
            .filter(|(_, t)| t.elapsed() <= self.timeout)
            .map(|(ch, _)| *ch)
            .collect()
    }

    /// Number of currently active channels.
    #[must_use]
    pub fn active_count(&self) -> usize {
        let guard = self.lock();
        guard.values().filter(|t| t.elapsed() <= self.timeout).count()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use net::Band;

    fn ch(n: u16) -> Channel {
        Channel::new(n, Band::Band24).unwrap()
    }

    #[test]
    fn reported_channels_are_active() {
        let map = ActivityMap::new(Duration::from_secs(30));
        assert!(map.active_channels().is_empty());
        map.report(ch(6));
        map.report(ch(11));
        let mut active = map.active_channels();
        active.sort_by_key(|c| c.number());
        assert_eq!(active, vec![ch(6), ch(11)]);
        assert_eq!(map.active_count(), 2);
    }

    #[test]
    fn entries_age_out_after_the_timeout() {
        let map = ActivityMap::new(Duration::from_millis(50));
        map.report(ch(1));
        assert_eq!(map.active_count(), 1);
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(map.active_count(), 0);
        // A fresh report revives the channel.
        map.report(ch(1));
        assert_eq!(map.active_count(), 1);
    }

    #[test]
    fn repeat_reports_do_not_grow_the_map() {
        let map = ActivityMap::new(Duration::from_secs(30));
        for _ in 0..1000 {
            map.report(ch(6));
        }
        assert_eq!(map.active_count(), 1);
    }
}
