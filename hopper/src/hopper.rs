// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! The channel hopper thread and its two scheduling strategies.

use crate::ActivityMap;
use concurrency::Shutdown;
use net::{Band, Channel};
use netlink::SetChannel;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Channel counts at or below this use the fast round-robin strategy.
const FAST_RR_MAX: usize = 3;
/// Channel counts above this halve the secondary-band scan cadence.
const BAND_PRIORITY_MAX: usize = 8;
/// Scan 5 GHz every Nth cycle.
const SCAN_CADENCE_5GHZ: u64 = 3;
/// Scan 6 GHz every Nth cycle.
const SCAN_CADENCE_6GHZ: u64 = 10;
/// Extra dwell on the NAN discovery channel while scanning.
const NAN_DWELL_MULTIPLIER: f64 = 2.0;

/// Whether any channel currently shows drone activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopperMode {
    /// No recent activity; sweeping the configured set.
    Scanning,
    /// At least one active channel; dwelling long on it.
    Tracking,
}

impl std::fmt::Display for HopperMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HopperMode::Scanning => f.write_str("scanning"),
            HopperMode::Tracking => f.write_str("tracking"),
        }
    }
}

/// Snapshot of the hopper's counters.
#[derive(Debug, Clone, Copy)]
pub struct HopperStats {
    /// Successful retunes.
    pub hops: u64,
    /// Failed retunes.
    pub errors: u64,
    /// Extended dwells spent on active channels.
    pub active_dwells: u64,
    /// The channel of the last *successful* retune.
    pub current_channel: Option<Channel>,
    /// Channels currently considered active.
    pub active_channels: usize,
    /// Current mode.
    pub mode: HopperMode,
}

#[derive(Debug)]
struct State {
    hops: u64,
    errors: u64,
    active_dwells: u64,
    current_channel: Option<Channel>,
    mode: HopperMode,
}

/// Timing knobs for the hopper.
#[derive(Debug, Clone)]
pub struct HopperConfig {
    /// Base dwell per channel.
    pub dwell: Duration,
    /// Dwell multiplier on active channels.
    pub active_multiplier: f64,
    /// Interval between idle-channel sweeps while tracking.
    pub idle_scan_interval: Duration,
}

/// The band-aware channel hopper.
///
/// One retune is in flight at a time (the scheduling loop is the only
/// caller of the setter) and `current_channel` reflects the attempted
/// channel only once the retune succeeded.
pub struct ChannelHopper {
    interface: String,
    channels_by_band: Vec<(Band, Vec<Channel>)>,
    all_channels: Vec<Channel>,
    config: HopperConfig,
    setter: Arc<dyn SetChannel>,
    activity: Arc<ActivityMap>,
    shutdown: Shutdown,
    running: AtomicBool,
    state: Mutex<State>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelHopper {
    /// Create a hopper over the configured channel set.
    #[must_use]
    pub fn new(
        interface: &str,
        channels_by_band: Vec<(Band, Vec<Channel>)>,
        config: HopperConfig,
        setter: Arc<dyn SetChannel>,
        activity: Arc<ActivityMap>,
        shutdown: Shutdown,
    ) -> ChannelHopper {
        let all_channels = channels_by_band
            .iter()
            .flat_map(|(_, channels)| channels.iter().copied())
            .collect();
        ChannelHopper {
            interface: interface.to_string(),
            channels_by_band,
            all_channels,
            config,
            setter,
            activity,
            shutdown,
            running: AtomicBool::new(false),
            state: Mutex::new(State {
                hops: 0,
                errors: 0,
                active_dwells: 0,
                current_channel: None,
                mode: HopperMode::Scanning,
            }),
            thread: Mutex::new(None),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Start hopping.
    ///
    /// Zero channels: nothing to do.  One channel: pin it once, no thread.
    /// Otherwise a `channel-hopper` thread runs the strategy picked by the
    /// channel count (round-robin up to three channels, band-priority
    /// beyond).
    pub fn start(self: &Arc<Self>) {
        match self.all_channels.len() {
            0 => return,
            1 => {
                let only = self.all_channels[0];
                self.retune(only, false);
                info!("single channel mode: pinned to {only}");
                return;
            }
            _ => {}
        }

        self.running.store(true, Ordering::SeqCst);
        let hopper = Arc::clone(self);
        let strategy = if self.all_channels.len() <= FAST_RR_MAX {
            "fast_rr"
        } else {
            "band_priority"
        };
        let handle = std::thread::Builder::new()
            .name("channel-hopper".to_string())
            .spawn(move || {
                if hopper.all_channels.len() <= FAST_RR_MAX {
                    hopper.run_fast_rr();
                } else {
                    hopper.run_band_priority();
                }
            });
        match handle {
            Ok(handle) => {
                *lock_ignore_poison(&self.thread) = Some(handle);
                let summary: Vec<String> = self
                    .channels_by_band
                    .iter()
                    .filter(|(_, chs)| !chs.is_empty())
                    .map(|(band, chs)| {
                        let numbers: Vec<u16> = chs.iter().map(|c| c.number()).collect();
                        format!("{band}={numbers:?}")
                    })
                    .collect();
                info!(
                    "channel hopper started: {} (dwell={:?}, active_mult={}x, strategy={strategy})",
                    summary.join(" "),
                    self.config.dwell,
                    self.config.active_multiplier,
                );
            }
            Err(err) => error!("failed to spawn channel hopper: {err}"),
        }
    }

    /// Stop hopping and join the thread.  The join is bounded by one dwell:
    /// the loop re-checks its run flag between every retune and sleep.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = lock_ignore_poison(&self.thread).take() {
            let _ = handle.join();
        }
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> HopperStats {
        let state = self.lock_state();
        HopperStats {
            hops: state.hops,
            errors: state.errors,
            active_dwells: state.active_dwells,
            current_channel: state.current_channel,
            active_channels: self.activity.active_count(),
            mode: state.mode,
        }
    }

    /// The channel of the last successful retune.
    #[must_use]
    pub fn current_channel(&self) -> Option<Channel> {
        self.lock_state().current_channel
    }

    /// Current mode.
    #[must_use]
    pub fn mode(&self) -> HopperMode {
        self.lock_state().mode
    }

    fn should_run(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.shutdown.is_triggered()
    }

    fn set_mode(&self, mode: HopperMode) {
        self.lock_state().mode = mode;
    }

    /// Retune and account.  `current_channel` moves only on success, in
    /// every strategy.
    fn retune(&self, channel: Channel, active_dwell: bool) -> bool {
        match self.setter.set_channel(&self.interface, channel) {
            Ok(()) => {
                let mut state = self.lock_state();
                state.hops += 1;
                state.current_channel = Some(channel);
                if active_dwell {
                    state.active_dwells += 1;
                }
                true
            }
            Err(err) => {
                error!("channel hopper retune to {channel} failed: {err}");
                self.lock_state().errors += 1;
                false
            }
        }
    }

    fn dwell(&self, duration: Duration) {
        self.shutdown.sleep(duration);
    }

    fn active_dwell_duration(&self) -> Duration {
        self.config.dwell.mul_f64(self.config.active_multiplier)
    }

    /// Round-robin with aggressive tracking dwell, for small channel sets.
    fn run_fast_rr(&self) {
        let base = self.config.dwell;
        let mut last_idle_scan = Instant::now();

        while self.should_run() {
            let active = self.activity.active_channels();

            if active.is_empty() {
                self.set_mode(HopperMode::Scanning);
                for &ch in &self.all_channels {
                    if !self.should_run() {
                        return;
                    }
                    self.retune(ch, false);
                    self.dwell(base);
                }
            } else {
                self.set_mode(HopperMode::Tracking);
                for &ch in &active {
                    if !self.should_run() {
                        return;
                    }
                    self.retune(ch, true);
                    self.dwell(self.active_dwell_duration());
                }

                if last_idle_scan.elapsed() >= self.config.idle_scan_interval {
                    let active_set: HashSet<Channel> = active.iter().copied().collect();
                    for &ch in &self.all_channels {
                        if !self.should_run() {
                            return;
                        }
                        if !active_set.contains(&ch) {
                            self.retune(ch, false);
                            self.dwell(base);
                        }
                    }
                    last_idle_scan = Instant::now();
                }
            }
        }
    }

    /// Band-aware scanning with priority tiers, for larger channel sets.
    ///
    /// Scanning mode visits 2.4 GHz every cycle (the NAN discovery channel
    /// with doubled dwell), 5 GHz every third cycle and 6 GHz every tenth;
    /// both cadences are halved again past eight total channels.
    fn run_band_priority(&self) {
        let base = self.config.dwell;
        let heavy = self.all_channels.len() > BAND_PRIORITY_MAX;
        let cadence_5 = SCAN_CADENCE_5GHZ * if heavy { 2 } else { 1 };
        let cadence_6 = SCAN_CADENCE_6GHZ * if heavy { 2 } else { 1 };
        let mut cycle: u64 = 0;
        let mut last_idle_scan = Instant::now();

        while self.should_run() {
            let active = self.activity.active_channels();

            if active.is_empty() {
                self.set_mode(HopperMode::Scanning);

                for &ch in self.band_channels(Band::Band24) {
                    if !self.should_run() {
                        return;
                    }
                    self.retune(ch, false);
                    let dwell = if ch == Channel::NAN_DISCOVERY {
                        base.mul_f64(NAN_DWELL_MULTIPLIER)
                    } else {
                        base
                    };
                    self.dwell(dwell);
                }

                if cycle % cadence_5 == 0 {
                    for &ch in self.band_channels(Band::Band5) {
                        if !self.should_run() {
                            return;
                        }
                        self.retune(ch, false);
                        self.dwell(base);
                    }
                }

                if cycle % cadence_6 == 0 {
                    for &ch in self.band_channels(Band::Band6) {
                        if !self.should_run() {
                            return;
                        }
                        self.retune(ch, false);
                        self.dwell(base);
                    }
                }

                cycle += 1;
            } else {
                self.set_mode(HopperMode::Tracking);
                let active_set: HashSet<Channel> = active.iter().copied().collect();
                let active_bands: HashSet<Band> = active.iter().map(|ch| ch.band()).collect();

                for &ch in &active {
                    if !self.should_run() {
                        return;
                    }
                    self.retune(ch, true);
                    self.dwell(self.active_dwell_duration());
                }

                // Idle channels sharing a band with the activity: a drone
                // that channel-switches usually stays in its band.
                for (band, channels) in &self.channels_by_band {
                    if !active_bands.contains(band) {
                        continue;
                    }
                    for &ch in channels {
                        if !self.should_run() {
                            return;
                        }
                        if !active_set.contains(&ch) {
                            self.retune(ch, false);
                            self.dwell(base);
                        }
                    }
                }

                if last_idle_scan.elapsed() >= self.config.idle_scan_interval {
                    for &ch in &self.all_channels {
                        if !self.should_run() {
                            return;
                        }
                        if !active_set.contains(&ch) && !active_bands.contains(&ch.band()) {
                            self.retune(ch, false);
                            self.dwell(base);
                        }
                    }
                    last_idle_scan = Instant::now();
                }
            }
        }
    }

    fn band_channels(&self, band: Band) -> &[Channel] {
        self.channels_by_band
            .iter()
            .find(|(b, _)| *b == band)
            .map_or(&[][..], |(_, channels)| channels.as_slice())
    }
}

fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use netlink::ChannelSetError;

    /// Records every retune; optionally fails them all.
    struct FakeSetter {
        calls: Mutex<Vec<Channel>>,
        fail: bool,
    }

    impl FakeSetter {
        fn new(fail: bool) -> Arc<FakeSetter> {
            Arc::new(FakeSetter {
                calls: Mutex::new(Vec::new()),
                fail,
            })
        }

        fn calls(&self) -> Vec<Channel> {
            self.calls.lock().unwrap().clone()
        }

        fn visits(&self, channel: Channel) -> usize {
            self.calls().iter().filter(|&&c| c == channel).count()
        }
    }

    impl SetChannel for FakeSetter {
        fn set_channel(&self, _interface: &str, channel: Channel) -> Result<(), ChannelSetError> {
            self.calls.lock().unwrap().push(channel);
            if self.fail {
                Err(ChannelSetError::Tool("synthetic failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn ch24(n: u16) -> Channel {
        Channel::new(n, Band::Band24).unwrap()
    }

    fn config(dwell_ms: u64) -> HopperConfig {
        HopperConfig {
            dwell: Duration::from_millis(dwell_ms),
            active_multiplier: 3.0,
            idle_scan_interval: Duration::from_millis(50),
        }
    }

    fn hopper(
        bands: Vec<(Band, Vec<Channel>)>,
        setter: &Arc<FakeSetter>,
        activity: &Arc<ActivityMap>,
        dwell_ms: u64,
    ) -> Arc<ChannelHopper> {
        Arc::new(ChannelHopper::new(
            "wlan1mon",
            bands,
            config(dwell_ms),
            Arc::clone(setter) as Arc<dyn SetChannel>,
            Arc::clone(activity),
            Shutdown::new(),
        ))
    }

    #[test]
    fn single_channel_is_pinned_without_a_thread() {
        let setter = FakeSetter::new(false);
        let activity = Arc::new(ActivityMap::new(Duration::from_secs(30)));
        let h = hopper(vec![(Band::Band24, vec![ch24(6)])], &setter, &activity, 1);
        h.start();
        assert_eq!(setter.calls(), vec![ch24(6)]);
        assert_eq!(h.current_channel(), Some(ch24(6)));
        assert!(h.thread.lock().unwrap().is_none());
    }

    #[test]
    fn fast_rr_scanning_visits_every_channel() {
        let setter = FakeSetter::new(false);
        let activity = Arc::new(ActivityMap::new(Duration::from_secs(30)));
        let channels = vec![ch24(1), ch24(6), ch24(11)];
        let h = hopper(
            vec![(Band::Band24, channels.clone())],
            &setter,
            &activity,
            1,
        );
        h.start();
        std::thread::sleep(Duration::from_millis(100));
        h.stop();
        for ch in channels {
            assert!(setter.visits(ch) >= 2, "channel {ch} was not swept");
        }
        assert_eq!(h.mode(), HopperMode::Scanning);
        assert!(h.stats().hops > 0);
        assert_eq!(h.stats().errors, 0);
    }

    #[test]
    fn activity_switches_to_tracking_and_extends_dwell() {
        let setter = FakeSetter::new(false);
        let activity = Arc::new(ActivityMap::new(Duration::from_secs(30)));
        activity.report(ch24(6));
        let h = hopper(
            vec![(Band::Band24, vec![ch24(1), ch24(6), ch24(11)])],
            &setter,
            &activity,
            1,
        );
        h.start();
        std::thread::sleep(Duration::from_millis(100));
        h.stop();
        assert_eq!(h.mode(), HopperMode::Tracking);
        let stats = h.stats();
        assert!(stats.active_dwells > 0);
        // The active channel dominates the visit count.
        assert!(setter.visits(ch24(6)) > setter.visits(ch24(1)));
    }

    #[test]
    fn failed_retunes_count_errors_and_never_set_current_channel() {
        let setter = FakeSetter::new(true);
        let activity = Arc::new(ActivityMap::new(Duration::from_secs(30)));
        let h = hopper(
            vec![(Band::Band24, vec![ch24(1), ch24(6)])],
            &setter,
            &activity,
            1,
        );
        h.start();
        std::thread::sleep(Duration::from_millis(50));
        h.stop();
        let stats = h.stats();
        assert!(stats.errors > 0);
        assert_eq!(stats.hops, 0);
        assert_eq!(stats.current_channel, None);
    }

    #[test]
    fn band_priority_visits_secondary_bands_less_often() {
        let setter = FakeSetter::new(false);
        let activity = Arc::new(ActivityMap::new(Duration::from_secs(30)));
        let ch5 = Channel::new(36, Band::Band5).unwrap();
        let h = hopper(
            vec![
                (Band::Band24, vec![ch24(1), ch24(6), ch24(11)]),
                (Band::Band5, vec![ch5]),
            ],
            &setter,
            &activity,
            1,
        );
        h.start();
        std::thread::sleep(Duration::from_millis(200));
        h.stop();
        let v24 = setter.visits(ch24(1));
        let v5 = setter.visits(ch5);
        assert!(v24 >= 3, "expected several 2.4 GHz cycles, got {v24}");
        assert!(
            v5 * 2 < v24,
            "5 GHz should be visited roughly a third as often (got {v5} vs {v24})"
        );
    }

    #[test]
    fn shutdown_interrupts_a_long_dwell() {
        let setter = FakeSetter::new(false);
        let activity = Arc::new(ActivityMap::new(Duration::from_secs(30)));
        let shutdown = Shutdown::new();
        let h = Arc::new(ChannelHopper::new(
            "wlan1mon",
            vec![(Band::Band24, vec![ch24(1), ch24(6)])],
            HopperConfig {
                dwell: Duration::from_secs(30),
                active_multiplier: 3.0,
                idle_scan_interval: Duration::from_secs(5),
            },
            Arc::clone(&setter) as Arc<dyn SetChannel>,
            activity,
            shutdown.clone(),
        ));
        h.start();
        std::thread::sleep(Duration::from_millis(50));
        let begin = Instant::now();
        shutdown.trigger();
        h.stop();
        assert!(
            begin.elapsed() < Duration::from_secs(5),
            "hopper did not observe shutdown inside its dwell"
        );
    }
}
