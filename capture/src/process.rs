// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! The capture helper process.

use concurrency::Shutdown;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Grace period after SIGINT before the helper is killed.
const STOP_GRACE: Duration = Duration::from_secs(5);
/// Grace period after SIGKILL before we give up reaping.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// An error which may occur while supervising the capture helper.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The helper binary does not exist.  Fatal at startup.
    #[error("capture helper not found at {0:?}")]
    HelperNotFound(PathBuf),
    /// The helper binary exists but we may not execute it.  Fatal at startup.
    #[error("permission denied running capture helper {0:?} (need root or capabilities)")]
    PermissionDenied(PathBuf),
    /// Any other spawn failure.
    #[error("failed to spawn capture helper: {0}")]
    Spawn(std::io::Error),
    /// `start` was called while the helper is already running.
    #[error("capture helper is already running")]
    AlreadyRunning,
}

/// How the helper is invoked.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Monitor-mode interface to capture on.
    pub interface: String,
    /// Path to the helper binary.
    pub helper_path: PathBuf,
    /// Kernel-level capture filter.  Management frames only: the kernel
    /// discards data/control frames before they ever reach userspace, which
    /// is the single biggest performance lever in the pipeline.
    pub capture_filter: String,
    /// Optional display filter (`-Y`).
    pub display_filter: Option<String>,
    /// Optional protocol list for the structured output (`-j`).
    pub protocols: Option<String>,
}

impl CaptureConfig {
    /// A default configuration for `interface`.
    #[must_use]
    pub fn new(interface: &str, helper_path: PathBuf) -> CaptureConfig {
        CaptureConfig {
            interface: interface.to_string(),
            helper_path,
            capture_filter: "type mgt".to_string(),
            display_filter: None,
            protocols: None,
        }
    }

    /// The helper argv, exposed for logging and tests.
    ///
    /// `-T ek` selects newline-delimited structured output, `-n` disables
    /// name resolution, `-l` line-buffers stdout so records arrive in real
    /// time.
    #[must_use]
    pub fn build_command(&self) -> Vec<String> {
        let mut cmd = vec![
            self.helper_path.display().to_string(),
            "-i".to_string(),
            self.interface.clone(),
            "-T".to_string(),
            "ek".to_string(),
            "-n".to_string(),
            "-l".to_string(),
        ];
        if !self.capture_filter.is_empty() {
            cmd.push("-f".to_string());
            cmd.push(self.capture_filter.clone());
        }
        if let Some(filter) = &self.display_filter {
            cmd.push("-Y".to_string());
            cmd.push(filter.clone());
        }
        if let Some(protocols) = &self.protocols {
            cmd.push("-j".to_string());
            cmd.push(protocols.clone());
        }
        cmd
    }
}

/// Snapshot of the supervisor's counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureStats {
    /// Lines read from the helper's stdout since process start.
    pub lines_read: u64,
    /// Times the helper has been (re)started.
    pub starts: u64,
    /// Seconds since the last stdout line (or since start when no line yet).
    pub last_line_age_s: f64,
    /// Whether the helper process is currently alive.
    pub running: bool,
}

#[derive(Default)]
struct Inner {
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr_thread: Option<JoinHandle<()>>,
    starts: u64,
    start_ms: u64,
    restarting: bool,
}

/// Supervisor for the capture helper process.
///
/// At most one helper runs at a time; `start` refuses while a child is
/// alive and `restart` is idempotent under concurrent callers (the watchdog
/// and the main loop can race on a dead helper).
///
/// The hot-path counters (`lines_read`, last-line timestamp) are plain
/// atomics: they are bumped for every captured frame and read only by the
/// watchdog, so a mutex per line would be wasted.
pub struct CaptureProcess {
    config: CaptureConfig,
    epoch: Instant,
    lines_read: AtomicU64,
    /// Milliseconds since `epoch` of the last stdout line; 0 = none yet.
    last_line_ms: AtomicU64,
    running: AtomicBool,
    inner: Mutex<Inner>,
}

impl CaptureProcess {
    /// Create a supervisor; the helper is not spawned until [`start`].
    ///
    /// [`start`]: CaptureProcess::start
    #[must_use]
    pub fn new(config: CaptureConfig) -> CaptureProcess {
        CaptureProcess {
            config,
            epoch: Instant::now(),
            lines_read: AtomicU64::new(0),
            last_line_ms: AtomicU64::new(0),
            running: AtomicBool::new(false),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// The invocation configuration.
    #[must_use]
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Spawn the helper.
    ///
    /// # Errors
    ///
    /// [`CaptureError::HelperNotFound`] and [`CaptureError::PermissionDenied`]
    /// are fatal startup conditions; [`CaptureError::AlreadyRunning`] means a
    /// concurrent caller won the race.
    pub fn start(&self) -> Result<(), CaptureError> {
        let mut inner = self.lock();
        if let Some(child) = &mut inner.child {
            if matches!(child.try_wait(), Ok(None)) {
                return Err(CaptureError::AlreadyRunning);
            }
            // A dead child we have not reaped yet; collect it first so no
            // zombie outlives the restart.
            let _ = child.wait();
            inner.child = None;
        }

        let argv = self.config.build_command();
        info!("starting capture helper: {}", argv.join(" "));
        let mut child = Command::new(&self.config.helper_path)
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => {
                    CaptureError::HelperNotFound(self.config.helper_path.clone())
                }
                std::io::ErrorKind::PermissionDenied => {
                    CaptureError::PermissionDenied(self.config.helper_path.clone())
                }
                _ => CaptureError::Spawn(err),
            })?;

        let stderr_thread = match child.stderr.take() {
            Some(stderr) => {
                let spawned = std::thread::Builder::new()
                    .name("capture-stderr".to_string())
                    .spawn(move || drain_stderr(stderr));
                match spawned {
                    Ok(handle) => Some(handle),
                    Err(err) => {
                        // Post-spawn setup failed; do not leak the helper.
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(CaptureError::Spawn(err));
                    }
                }
            }
            None => None,
        };
        inner.stdout = child.stdout.take();
        inner.stderr_thread = stderr_thread;

        info!("capture helper started, pid={}", child.id());
        inner.child = Some(child);
        inner.starts += 1;
        inner.start_ms = self.now_ms();
        self.last_line_ms.store(0, Ordering::Relaxed);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Take the helper's stdout as a blocking line iterator.
    ///
    /// The iterator yields trimmed, non-empty lines and ends when the helper
    /// exits or [`stop`] is called.  Calling again before a restart returns
    /// an empty iterator (the stream can only be consumed once per start).
    ///
    /// [`stop`]: CaptureProcess::stop
    #[must_use]
    pub fn read_lines(&self) -> LineReader<'_> {
        let stdout = self.lock().stdout.take();
        LineReader {
            process: self,
            reader: stdout.map(BufReader::new),
        }
    }

    /// Stop the helper: SIGINT first so it flushes its capture buffers,
    /// SIGKILL if it lingers.  Bounded by the two grace periods.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let (child, stderr_thread) = {
            let mut inner = self.lock();
            (inner.child.take(), inner.stderr_thread.take())
        };

        if let Some(mut child) = child {
            info!("stopping capture helper pid={}", child.id());
            let pid = Pid::from_raw(i32::try_from(child.id()).unwrap_or(0));
            let _ = kill(pid, Signal::SIGINT);
            if !wait_with_deadline(&mut child, STOP_GRACE) {
                warn!("capture helper did not stop on SIGINT, killing");
                let _ = child.kill();
                if !wait_with_deadline(&mut child, KILL_GRACE) {
                    error!("capture helper pid={} could not be reaped", child.id());
                }
            }
        }

        // The stderr pipe closed with the child, so the drain thread is
        // already on its way out; the join is effectively bounded.
        if let Some(thread) = stderr_thread {
            let _ = thread.join();
        }
    }

    /// Stop, wait `delay`, start again.  Concurrent restarts collapse into
    /// one: the loser returns `Ok` immediately.
    ///
    /// # Errors
    ///
    /// Propagates [`CaptureError`] from the inner [`start`].
    ///
    /// [`start`]: CaptureProcess::start
    pub fn restart(&self, delay: Duration, shutdown: &Shutdown) -> Result<(), CaptureError> {
        {
            let mut inner = self.lock();
            if inner.restarting {
                debug!("restart already in flight, skipping");
                return Ok(());
            }
            inner.restarting = true;
        }
        let result = (|| {
            self.stop();
            if shutdown.sleep(delay) {
                return Ok(());
            }
            self.start()
        })();
        self.lock().restarting = false;
        result
    }

    /// Whether the helper process is currently alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        let mut inner = self.lock();
        match &mut inner.child {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// The helper's exit code, when it has exited.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        let mut inner = self.lock();
        inner
            .child
            .as_mut()
            .and_then(|child| child.try_wait().ok().flatten())
            .and_then(|status| status.code())
    }

    /// Seconds since the last stdout line; counts from process start while
    /// no line has arrived yet.  Monotonically non-decreasing between lines.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn seconds_since_last_line(&self) -> f64 {
        let last = self.last_line_ms.load(Ordering::Relaxed);
        let reference = if last == 0 { self.lock().start_ms } else { last };
        let elapsed_ms = self.now_ms().saturating_sub(reference);
        elapsed_ms as f64 / 1000.0
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> CaptureStats {
        let starts = self.lock().starts;
        CaptureStats {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            starts,
            last_line_age_s: self.seconds_since_last_line(),
            running: self.is_running(),
        }
    }
}

/// Blocking iterator over the helper's stdout lines.
pub struct LineReader<'a> {
    process: &'a CaptureProcess,
    reader: Option<BufReader<ChildStdout>>,
}

impl Iterator for LineReader<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let reader = self.reader.as_mut()?;
        let mut line = String::new();
        loop {
            if !self.process.running.load(Ordering::SeqCst) {
                return None;
            }
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    self.process.lines_read.fetch_add(1, Ordering::Relaxed);
                    self.process
                        .last_line_ms
                        .store(self.process.now_ms().max(1), Ordering::Relaxed);
                    return Some(trimmed.to_string());
                }
                Err(err) => {
                    if self.process.running.load(Ordering::SeqCst) {
                        error!("error reading capture helper stdout: {err}");
                    }
                    return None;
                }
            }
        }
    }
}

/// Drain and log the helper's stderr.  tshark prints its useful runtime
/// diagnostics ("Capturing on ...", packet counts) there.
fn drain_stderr(stderr: std::process::ChildStderr) {
    let reader = BufReader::new(stderr);
    for line in reader.lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.contains("Capturing on")
            || line.contains("packets captured")
            || line.contains("packets received")
        {
            info!("capture helper: {line}");
        } else {
            debug!("capture helper stderr: {line}");
        }
    }
}

/// Wait for a child to exit, polling `try_wait`, for at most `deadline`.
fn wait_with_deadline(child: &mut Child, deadline: Duration) -> bool {
    let end = Instant::now() + deadline;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => {
                if Instant::now() >= end {
                    return false;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(_) => return true,
        }
    }
}
