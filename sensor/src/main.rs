// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! The skytap sensor binary.
//!
//! Startup order matters: tracing first, then config, identity and
//! signatures, then monitor mode (the first step allowed to be fatal), then
//! the background machinery (hopper, watchdog), and finally the outer
//! capture loop that feeds every helper line through the classifier.

#![deny(clippy::all, clippy::pedantic)]

mod args;

use crate::args::CmdArgs;
use capture::{CaptureConfig, CaptureError, CaptureProcess, enable_monitor_mode};
use classify::Classifier;
use clap::Parser;
use concurrency::Shutdown;
use config::SensorConfig;
use health::SystemHealth;
use hopper::{ActivityMap, ChannelHopper, HopperConfig};
use id::{SensorId, default_id_paths};
use net::Channel;
use netlink::{ChannelManager, SetChannel};
use signatures::{SignatureDb, SignatureFile};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use transport::{BufferedSender, HeartbeatMessage, Publish, StdoutSink, Topic, WifiFrameMessage};
use watchdog::{Watchdog, WatchdogConfig};

const STATS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Errors that abort startup with a non-zero exit.
#[derive(Debug, thiserror::Error)]
enum FatalError {
    #[error("monitor mode setup failed: {0}")]
    Monitor(#[from] capture::MonitorModeError),
    #[error("capture helper unusable: {0}")]
    Capture(#[from] CaptureError),
}

enum LoadStatus {
    Loaded,
    Missing,
    Failed(String),
}

fn main() {
    let args = CmdArgs::parse();

    // Read the config before tracing comes up so the file's log_level can
    // take effect; the loader's own notes are replayed right after init.
    let (mut config, load_status) = match SensorConfig::read(&args.config) {
        Ok(Some(config)) => (config, LoadStatus::Loaded),
        Ok(None) => (SensorConfig::default(), LoadStatus::Missing),
        Err(err) => (SensorConfig::default(), LoadStatus::Failed(err.to_string())),
    };
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.log_level.clone());
    init_tracing(&level);

    match load_status {
        LoadStatus::Loaded => info!("config loaded from {}", args.config.display()),
        LoadStatus::Missing => {
            info!("no config file at {}, using defaults", args.config.display());
        }
        LoadStatus::Failed(err) => warn!("{err}; using defaults"),
    }
    config.validate();
    if let Some(interface) = &args.interface {
        config.interface.clone_from(interface);
    }

    if let Err(err) = run(&args, config) {
        error!("fatal: {err}");
        std::process::exit(1);
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .init();
}

#[allow(clippy::too_many_lines)]
fn run(args: &CmdArgs, config: SensorConfig) -> Result<(), FatalError> {
    let start_time = Instant::now();
    info!("skytap v{} starting", env!("CARGO_PKG_VERSION"));
    if !capture::is_root() {
        warn!("not running as root; interface control and capture will likely fail");
    }

    let sensor_id = SensorId::load_or_generate(&default_id_paths());
    info!("sensor id: {sensor_id}");

    let db = match SignatureDb::load(config.signatures_path.as_deref()) {
        Ok(db) => db,
        Err(err) => {
            warn!("failed to load signature file: {err}; using built-in set");
            SignatureDb::compile(&SignatureFile::builtin())
        }
    };
    let classifier = Classifier::new(Arc::new(db));

    let all_channels = config.all_channels();
    let first_channel = all_channels.first().copied();

    let mut interface = config.interface.clone();
    if config.auto_monitor {
        interface = enable_monitor_mode(&interface, first_channel)?;
        info!("monitor mode active on {interface}");
    } else {
        info!("auto_monitor disabled, assuming {interface} is already in monitor mode");
    }

    let shutdown = Shutdown::new();
    let capture_proc = Arc::new(CaptureProcess::new(CaptureConfig::new(
        &interface,
        config.tshark_path.clone(),
    )));

    // Ctrl-C / SIGTERM: request shutdown, then kill the helper so the
    // blocking read loop unblocks immediately instead of after the next
    // frame.
    {
        let shutdown = shutdown.clone();
        let capture_proc = Arc::clone(&capture_proc);
        if let Err(err) = ctrlc::set_handler(move || {
            shutdown.trigger();
            capture_proc.stop();
        }) {
            warn!("failed to install signal handler: {err}");
        }
    }

    let sink: Arc<dyn Publish> = Arc::new(StdoutSink);
    let transport = Arc::new(BufferedSender::new(sink, config.transport_buffer_size));

    let activity = Arc::new(ActivityMap::new(config.activity_timeout()));
    let setter: Arc<dyn SetChannel> = Arc::new(ChannelManager::new());
    let hopper = Arc::new(ChannelHopper::new(
        &interface,
        config.channels_by_band(),
        HopperConfig {
            dwell: config.channel_dwell(),
            active_multiplier: config.active_dwell_multiplier,
            idle_scan_interval: config.idle_scan_interval(),
        },
        setter,
        Arc::clone(&activity),
        shutdown.clone(),
    ));
    hopper.start();

    let watchdog = Arc::new(Watchdog::new(
        WatchdogConfig {
            interface: interface.clone(),
            reset_channel: first_channel.unwrap_or(Channel::NAN_DISCOVERY),
            starvation_timeout: Duration::from_secs_f64(config.starvation_timeout_s),
            restart_delay: config.capture_restart_delay(),
            check_interval: config.watchdog_check_interval(),
            buffer_warn_threshold: config.buffer_warn_threshold,
            memory_percent_threshold: config.memory_percent_threshold,
        },
        Arc::clone(&capture_proc),
        Arc::clone(&transport),
        shutdown.clone(),
    ));

    let mut sensor = Sensor {
        compact_output: args.stdout,
        config,
        sensor_id,
        interface,
        all_channels,
        capture: capture_proc,
        transport,
        hopper,
        activity,
        watchdog,
        classifier,
        shutdown,
        start_time,
    };
    let result = sensor.run();

    info!("shutting down");
    sensor.capture.stop();
    sensor.hopper.stop();
    sensor.watchdog.stop();
    sensor.transport.replay();
    info!("skytap stopped");
    result
}

/// The wired-up sensor: owns the classifier, shares everything else.
struct Sensor {
    compact_output: bool,
    config: SensorConfig,
    sensor_id: SensorId,
    interface: String,
    all_channels: Vec<Channel>,
    capture: Arc<CaptureProcess>,
    transport: Arc<BufferedSender>,
    hopper: Arc<ChannelHopper>,
    activity: Arc<ActivityMap>,
    watchdog: Arc<Watchdog>,
    classifier: Classifier,
    shutdown: Shutdown,
    start_time: Instant,
}

impl Sensor {
    /// The outer capture loop: keep the helper alive until shutdown.
    fn run(&mut self) -> Result<(), FatalError> {
        let mut watchdog_started = false;
        let restart_delay = self.config.capture_restart_delay();

        info!("starting capture");
        while !self.shutdown.is_triggered() {
            match self.capture.start() {
                Ok(()) => {}
                // Distinct fatal conditions: nothing will fix these without
                // an operator.
                Err(err @ (CaptureError::HelperNotFound(_) | CaptureError::PermissionDenied(_))) => {
                    return Err(err.into());
                }
                Err(CaptureError::AlreadyRunning) => {}
                Err(err) => error!("capture start failed: {err}"),
            }

            if self.capture.is_running() {
                info!("capture helper running");
                if !watchdog_started {
                    self.watchdog.start();
                    watchdog_started = true;
                }
                self.read_loop();
                if let Some(code) = self.capture.exit_code() {
                    if code != 0 {
                        error!("capture helper exited with code {code}");
                    }
                }
            }

            self.capture.stop();
            if !self.shutdown.is_triggered() {
                warn!("capture helper exited, restarting in {restart_delay:?}");
                self.shutdown.sleep(restart_delay);
            }
        }
        Ok(())
    }

    /// Drain the helper's line stream, classifying and publishing.
    fn read_loop(&mut self) {
        let mut last_heartbeat: Option<Instant> = None;
        let mut last_stats: Option<Instant> = None;

        let capture = Arc::clone(&self.capture);
        for line in capture.read_lines() {
            if self.shutdown.is_triggered() {
                break;
            }

            self.handle_line(&line);

            if last_heartbeat.is_none_or(|t| t.elapsed() >= self.config.heartbeat_interval()) {
                self.publish_heartbeat();
                last_heartbeat = Some(Instant::now());
            }
            if last_stats.is_none_or(|t| t.elapsed() >= STATS_LOG_INTERVAL) {
                self.log_stats();
                last_stats = Some(Instant::now());
            }
        }
    }

    /// The per-line hot path: classify, publish, report activity --- in
    /// that order, so sink counters advance before the hopper sees the
    /// channel.
    fn handle_line(&mut self, line: &str) {
        let Some(envelope) = self.classifier.classify(line) else {
            return;
        };

        let payload = if self.compact_output {
            serde_json::json!({
                "frame_type": envelope.kind.as_str(),
                "mac": envelope.source_mac.to_string(),
                "rssi": envelope.rssi_dbm,
                "channel": envelope.channel.map(net::Channel::number),
            })
        } else {
            let mut message = WifiFrameMessage::new(
                &self.sensor_id.to_string(),
                &envelope.source_mac.to_string(),
                envelope.kind.as_str(),
                serde_json::Value::Object(envelope.raw_record.clone()),
            );
            message.rssi = envelope.rssi_dbm;
            message.channel = envelope.channel.map(net::Channel::number);
            message.designation = envelope
                .fingerprint
                .as_ref()
                .map(|fp| fp.designation.clone());
            match serde_json::to_value(&message) {
                Ok(value) => value,
                Err(err) => {
                    warn!("frame message serialization failed: {err}");
                    return;
                }
            }
        };
        self.transport.publish(Topic::Frame, &payload);

        if let Some(channel) = envelope.channel {
            self.activity.report(channel);
        }
    }

    fn publish_heartbeat(&self) {
        let health = SystemHealth::probe();
        let capture_stats = self.capture.stats();
        let classifier_stats = self.classifier.stats();

        let mut hb = HeartbeatMessage::new(
            &self.sensor_id.to_string(),
            &self.config.sensor_name,
            &self.interface,
        );
        hb.channel = self
            .hopper
            .current_channel()
            .or_else(|| self.all_channels.first().copied())
            .map(net::Channel::number);
        hb.channels = self.all_channels.iter().map(|c| c.number()).collect();
        hb.cpu_load = health.cpu_load;
        hb.cpu_percent = health.cpu_percent;
        hb.memory_used = health.memory_used;
        hb.memory_percent = health.memory_percent;
        hb.temperature = health.temperature_c;
        hb.disk_free = health.disk_free;
        hb.disk_writes_total = health.disk_writes_total;
        hb.latitude = self.config.latitude;
        hb.longitude = self.config.longitude;
        hb.frames_total = capture_stats.lines_read;
        hb.frames_parsed = classifier_stats.frames_classified;
        hb.capture_running = capture_stats.running;
        hb.capture_errors = capture_stats.starts.saturating_sub(1);
        hb.uptime_s = self.start_time.elapsed().as_secs_f64();

        match serde_json::to_value(&hb) {
            Ok(value) => self.transport.publish(Topic::Heartbeat, &value),
            Err(err) => warn!("heartbeat serialization failed: {err}"),
        }
    }

    fn log_stats(&self) {
        let capture_stats = self.capture.stats();
        let classifier_stats = self.classifier.stats();
        let hopper_stats = self.hopper.stats();
        let transport_stats = self.transport.stats();
        let watchdog_stats = self.watchdog.stats();
        info!(
            "stats: {} lines, {} drone, {} filtered, hopper {} (hops={} errors={} active_ch={}), \
             transport {} sent/{} buffered/{} errors ({} queued), watchdog restarts={}",
            capture_stats.lines_read,
            classifier_stats.frames_classified,
            capture_stats
                .lines_read
                .saturating_sub(classifier_stats.frames_classified),
            hopper_stats.mode,
            hopper_stats.hops,
            hopper_stats.errors,
            hopper_stats.active_channels,
            transport_stats.sent,
            transport_stats.buffered,
            transport_stats.errors,
            transport_stats.buffered_count,
            watchdog_stats.restarts,
        );
    }
}
