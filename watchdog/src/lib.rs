// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! The self-healing watchdog.
//!
//! A field sensor has nobody to ssh in and poke it.  The watchdog runs
//! beside the capture loop and recovers the failure modes USB WiFi radios
//! actually exhibit: the helper dying, the interface silently wedging (no
//! frames despite a live helper), the uplink backing up, the pipeline
//! stalling, and slow memory leaks.  It holds shared handles to the
//! components it observes; it owns none of them.

#![deny(clippy::all, clippy::pedantic)]

use capture::CaptureProcess;
use concurrency::Shutdown;
use health::SystemHealth;
use net::Channel;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use transport::BufferedSender;

/// Minimum spacing between pipeline throughput samples.
const SAMPLE_INTERVAL: Duration = Duration::from_secs(10);
/// Elapsed time below which a stall is never declared.
const STALL_WINDOW: Duration = Duration::from_secs(30);
/// Helper lines that must have advanced for a stall to be meaningful.
/// Without this gate, ordinary filtering (lots of lines, zero drone frames)
/// would look identical to a stalled pipeline.
const STALL_LINES_DELTA: u64 = 100;

/// Watchdog tuning knobs.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Interface to reset on starvation.
    pub interface: String,
    /// Channel to pin after a reset.
    pub reset_channel: Channel,
    /// Seconds without helper output before the interface is reset.
    pub starvation_timeout: Duration,
    /// Delay between stopping and restarting the helper.
    pub restart_delay: Duration,
    /// Period of the check loop.
    pub check_interval: Duration,
    /// Buffered-message depth that triggers a warning.
    pub buffer_warn_threshold: usize,
    /// Memory percentage that triggers a cooperative shutdown.
    pub memory_percent_threshold: f64,
}

/// Recovery-action counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchdogStats {
    /// Helper restarts performed.
    pub restarts: u64,
    /// Interface resets performed.
    pub interface_resets: u64,
    /// Starvation events detected.
    pub starvation_events: u64,
    /// Buffer-depth warnings raised.
    pub buffer_warnings: u64,
    /// Pipeline stalls detected.
    pub pipeline_stalls: u64,
    /// Memory-pressure shutdowns requested.
    pub memory_kills: u64,
}

#[derive(Debug)]
struct State {
    stats: WatchdogStats,
    last_frames_published: u64,
    last_helper_lines: u64,
    last_sample: Instant,
}

/// The watchdog thread.
pub struct Watchdog {
    config: WatchdogConfig,
    capture: Arc<CaptureProcess>,
    transport: Arc<BufferedSender>,
    shutdown: Shutdown,
    running: AtomicBool,
    state: Mutex<State>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Watchdog {
    /// Create a watchdog over shared component handles.
    #[must_use]
    pub fn new(
        config: WatchdogConfig,
        capture: Arc<CaptureProcess>,
        transport: Arc<BufferedSender>,
        shutdown: Shutdown,
    ) -> Watchdog {
        Watchdog {
            config,
            capture,
            transport,
            shutdown,
            running: AtomicBool::new(false),
            state: Mutex::new(State {
                stats: WatchdogStats::default(),
                last_frames_published: 0,
                last_helper_lines: 0,
                last_sample: Instant::now(),
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

    /// Start the monitor thread.
    pub fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        self.lock_state().last_sample = Instant::now();
        let watchdog = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || watchdog.run());
        match handle {
            Ok(handle) => {
                *lock_ignore_poison(&self.thread) = Some(handle);
                info!("watchdog started");
            }
            Err(err) => error!("failed to spawn watchdog: {err}"),
        }
    }

    /// Stop the monitor thread and join it.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = lock_ignore_poison(&self.thread).take() {
            let _ = handle.join();
        }
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> WatchdogStats {
        self.lock_state().stats
    }

    fn run(&self) {
        while self.running.load(Ordering::SeqCst) && !self.shutdown.is_triggered() {
            self.tick();
            if self.shutdown.sleep(self.config.check_interval) {
                return;
            }
        }
    }

    /// One round of the five checks.  Public mainly so recovery behavior is
    /// testable without timing games.
    pub fn tick(&self) {
        if self.shutdown.is_triggered() {
            return;
        }

        if !self.capture.is_running() {
            warn!("capture helper is not running, restarting");
            self.restart_helper();
        } else {
            let silent_for = self.capture.seconds_since_last_line();
            if silent_for > self.config.starvation_timeout.as_secs_f64() {
                warn!("frame starvation: no frames for {silent_for:.0}s");
                self.lock_state().stats.starvation_events += 1;
                self.reset_interface();
                self.restart_helper();
            }
        }

        self.check_buffer();
        self.check_pipeline();
        self.check_memory(SystemHealth::probe().memory_percent);
    }

    fn restart_helper(&self) {
        info!("restarting capture helper in {:?}", self.config.restart_delay);
        match self
            .capture
            .restart(self.config.restart_delay, &self.shutdown)
        {
            Ok(()) => {
                self.lock_state().stats.restarts += 1;
                info!("capture helper restarted");
            }
            Err(err) => error!("failed to restart capture helper: {err}"),
        }
    }

    fn reset_interface(&self) {
        self.lock_state().stats.interface_resets += 1;
        capture::reset_monitor_interface(&self.config.interface, self.config.reset_channel);
    }

    fn check_buffer(&self) {
        let depth = self.transport.buffered_count();
        if depth > self.config.buffer_warn_threshold {
            self.lock_state().stats.buffer_warnings += 1;
            warn!(
                "transport buffer high: {depth} messages ({} bytes)",
                self.transport.buffered_bytes()
            );
        }
    }

    fn check_pipeline(&self) {
        let mut state = self.lock_state();
        let elapsed = state.last_sample.elapsed();
        if elapsed < SAMPLE_INTERVAL {
            return;
        }

        let helper_lines = self.capture.stats().lines_read;
        let frames_published = self.transport.stats().frames_published;
        let lines_delta = helper_lines.saturating_sub(state.last_helper_lines);

        if stall_detected(
            lines_delta,
            frames_published,
            state.last_frames_published,
            elapsed,
        ) {
            state.stats.pipeline_stalls += 1;
            warn!(
                "pipeline may be stalled: helper advanced {lines_delta} lines but the sink \
                 is stuck at {frames_published} frames after {:.0}s",
                elapsed.as_secs_f64()
            );
        }

        state.last_helper_lines = helper_lines;
        state.last_frames_published = frames_published;
        state.last_sample = Instant::now();
    }

    fn check_memory(&self, memory_percent: f64) {
        if memory_percent > self.config.memory_percent_threshold {
            self.lock_state().stats.memory_kills += 1;
            error!(
                "memory pressure: {memory_percent:.1}% exceeds threshold {:.1}%; requesting \
                 shutdown for supervisor restart",
                self.config.memory_percent_threshold
            );
            self.shutdown.trigger();
        }
    }
}

/// The stall criterion.
///
/// A stall needs all three: the helper actually produced lines, the sink
/// counter did not move, and enough time passed to rule out a quiet spell.
fn stall_detected(lines_delta: u64, frames_now: u64, frames_then: u64, elapsed: Duration) -> bool {
    lines_delta > STALL_LINES_DELTA && frames_now == frames_then && elapsed > STALL_WINDOW
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
    use capture::CaptureConfig;
    use serde_json::json;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use transport::{Publish, PublishError, Topic};

    struct NullSink;

    impl Publish for NullSink {
        fn publish(&self, _: Topic, _: &serde_json::Value) -> Result<(), PublishError> {
            Ok(())
        }
    }

    struct DownSink;

    impl Publish for DownSink {
        fn publish(&self, _: Topic, _: &serde_json::Value) -> Result<(), PublishError> {
            Err(PublishError::Unavailable("down".to_string()))
        }
    }

    fn stub_helper(tag: &str, body: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("skytap-watchdog-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("fake_tshark.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn config() -> WatchdogConfig {
        WatchdogConfig {
            interface: "wlantest0".to_string(),
            reset_channel: Channel::NAN_DISCOVERY,
            starvation_timeout: Duration::from_secs(30),
            restart_delay: Duration::from_millis(10),
            check_interval: Duration::from_millis(50),
            buffer_warn_threshold: 3,
            memory_percent_threshold: 90.0,
        }
    }

    fn watchdog_with(
        tag: &str,
        body: &str,
        sink: Arc<dyn Publish>,
        config: WatchdogConfig,
    ) -> (Arc<Watchdog>, Arc<CaptureProcess>, Arc<BufferedSender>, Shutdown) {
        let capture = Arc::new(CaptureProcess::new(CaptureConfig::new(
            "wlantest0",
            stub_helper(tag, body),
        )));
        let transport = Arc::new(BufferedSender::new(sink, 10));
        let shutdown = Shutdown::new();
        let watchdog = Arc::new(Watchdog::new(
            config,
            Arc::clone(&capture),
            Arc::clone(&transport),
            shutdown.clone(),
        ));
        (watchdog, capture, transport, shutdown)
    }

    #[test]
    fn dead_helper_is_restarted_once_per_tick() {
        let (watchdog, capture, _, _) =
            watchdog_with("restart", "exec sleep 30", Arc::new(NullSink), config());
        // Never started; the first tick notices and brings it up.
        watchdog.tick();
        assert!(capture.is_running());
        assert_eq!(watchdog.stats().restarts, 1);
        // Healthy helper: the next tick does nothing.
        watchdog.tick();
        assert_eq!(watchdog.stats().restarts, 1);
        capture.stop();
    }

    #[test]
    fn starvation_resets_the_interface_and_restarts() {
        let mut cfg = config();
        cfg.starvation_timeout = Duration::from_millis(50);
        let (watchdog, capture, _, _) =
            watchdog_with("starve", "exec sleep 30", Arc::new(NullSink), cfg);
        capture.start().unwrap();
        std::thread::sleep(Duration::from_millis(120));
        // Helper alive but silent past the timeout.
        watchdog.tick();
        let stats = watchdog.stats();
        assert_eq!(stats.starvation_events, 1);
        assert_eq!(stats.interface_resets, 1);
        assert_eq!(stats.restarts, 1);
        assert!(capture.is_running());
        capture.stop();
    }

    #[test]
    fn deep_buffer_raises_a_warning() {
        let (watchdog, _, transport, _) =
            watchdog_with("buffer", "exec sleep 30", Arc::new(DownSink), config());
        for n in 0..5 {
            transport.publish(Topic::Frame, &json!({"seq": n}));
        }
        watchdog.check_buffer();
        assert_eq!(watchdog.stats().buffer_warnings, 1);
    }

    #[test]
    fn memory_pressure_requests_cooperative_shutdown() {
        let (watchdog, _, _, shutdown) =
            watchdog_with("memory", "exec sleep 30", Arc::new(NullSink), config());
        watchdog.check_memory(50.0);
        assert!(!shutdown.is_triggered());
        watchdog.check_memory(95.5);
        assert!(shutdown.is_triggered());
        assert_eq!(watchdog.stats().memory_kills, 1);
    }

    #[test]
    fn stall_needs_all_three_conditions() {
        let long = Duration::from_secs(31);
        let short = Duration::from_secs(5);
        // Lines advanced, sink stuck, window elapsed: stall.
        assert!(stall_detected(500, 7, 7, long));
        // Filtering quietly (few lines): not a stall.
        assert!(!stall_detected(20, 7, 7, long));
        // Sink advancing: not a stall.
        assert!(!stall_detected(500, 8, 7, long));
        // Too early to say: not a stall.
        assert!(!stall_detected(500, 7, 7, short));
    }

    #[test]
    fn shutdown_stops_recovery_actions() {
        let (watchdog, capture, _, shutdown) =
            watchdog_with("halt", "exec sleep 30", Arc::new(NullSink), config());
        shutdown.trigger();
        watchdog.tick();
        // No restart attempted against a triggered shutdown.
        assert_eq!(watchdog.stats().restarts, 0);
        assert!(!capture.is_running());
    }

    #[test]
    fn watchdog_thread_starts_and_stops_cleanly() {
        let (watchdog, capture, _, _) =
            watchdog_with("loop", "exec sleep 30", Arc::new(NullSink), config());
        watchdog.start();
        std::thread::sleep(Duration::from_millis(120));
        watchdog.stop();
        // The loop restarted the dead helper at least once along the way.
        assert!(watchdog.stats().restarts >= 1);
        capture.stop();
    }
}
