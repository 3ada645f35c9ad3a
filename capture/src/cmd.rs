// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! Privileged command plumbing shared by monitor-mode setup and the
//! watchdog's interface reset.

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, error};

/// Outcome of an external tool invocation.
#[derive(Debug)]
pub struct CmdOutput {
    /// Whether the tool exited zero within the timeout.
    pub ok: bool,
    /// Trimmed stdout.
    pub stdout: String,
    /// Trimmed stderr, or a synthetic reason (`timeout`, `<tool> not found`).
    pub stderr: String,
}

/// Whether the process runs with root privileges.
#[must_use]
pub fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Run an external tool, capturing output, with a hard timeout.
///
/// A leading `sudo` is stripped when already running as root: the sensor
/// normally runs as a root service and spamming pam logs helps nobody.
/// When the timeout expires the child is killed and reaped.
#[must_use]
pub fn run_cmd(args: &[&str], timeout: Duration) -> CmdOutput {
    let args = match args {
        ["sudo", rest @ ..] if is_root() => rest,
        other => other,
    };
    let Some((program, rest)) = args.split_first() else {
        return CmdOutput {
            ok: false,
            stdout: String::new(),
            stderr: "empty command".to_string(),
        };
    };

    debug!("running {}", args.join(" "));
    let child = Command::new(program)
        .args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();
    let child = match child {
        Ok(child) => child,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return CmdOutput {
                ok: false,
                stdout: String::new(),
                stderr: format!("{program} not found"),
            };
        }
        Err(err) => {
            return CmdOutput {
                ok: false,
                stdout: String::new(),
                stderr: err.to_string(),
            };
        }
    };

    // Reap on a helper thread so the timeout cannot deadlock against a
    // child that fills its pipe before exiting.
    let pid = Pid::from_raw(i32::try_from(child.id()).unwrap_or(0));
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(child.wait_with_output());
    });

    let output = match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            error!("command timed out: {}", args.join(" "));
            let _ = kill(pid, Signal::SIGKILL);
            // The reaper thread finishes once the child is gone.
            let _ = rx.recv();
            return CmdOutput {
                ok: false,
                stdout: String::new(),
                stderr: "timeout".to_string(),
            };
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            return CmdOutput {
                ok: false,
                stdout: String::new(),
                stderr: "wait failed".to_string(),
            };
        }
    };

    match output {
        Ok(output) => CmdOutput {
            ok: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        },
        Err(err) => CmdOutput {
            ok: false,
            stdout: String::new(),
            stderr: err.to_string(),
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn successful_command_captures_stdout() {
        let out = run_cmd(&["echo", "hello"], Duration::from_secs(5));
        assert!(out.ok);
        assert_eq!(out.stdout, "hello");
    }

    #[test]
    fn nonzero_exit_is_not_ok() {
        let out = run_cmd(&["false"], Duration::from_secs(5));
        assert!(!out.ok);
    }

    #[test]
    fn missing_tool_reports_not_found() {
        let out = run_cmd(&["skytap-no-such-tool-xyz"], Duration::from_secs(5));
        assert!(!out.ok);
        assert!(out.stderr.contains("not found"));
    }

    #[test]
    fn timeout_kills_the_child() {
        let start = std::time::Instant::now();
        let out = run_cmd(&["sleep", "30"], Duration::from_millis(200));
        assert!(!out.ok);
        assert_eq!(out.stderr, "timeout");
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn empty_command_is_rejected() {
        let out = run_cmd(&[], Duration::from_secs(1));
        assert!(!out.ok);
    }
}
