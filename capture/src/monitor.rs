// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! Monitor-mode enablement and interface reset.

use crate::{CmdOutput, run_cmd};
use net::Channel;
use std::time::Duration;
use tracing::{info, warn};

const CMD_TIMEOUT: Duration = Duration::from_secs(10);

/// An error which may occur while enabling monitor mode.
#[derive(Debug, thiserror::Error)]
#[error(
    "cannot enable monitor mode on {interface}: {reason}. \
     Install iw+ip or airmon-ng, and run as root/sudo"
)]
pub struct MonitorModeError {
    /// The interface that could not be switched.
    pub interface: String,
    /// Why the last attempted method failed.
    pub reason: String,
}

fn has_tool(name: &str) -> bool {
    run_cmd(&["which", name], CMD_TIMEOUT).ok
}

fn iface_info(interface: &str) -> CmdOutput {
    run_cmd(&["iw", "dev", interface, "info"], CMD_TIMEOUT)
}

fn set_channel_with_iw(interface: &str, channel: Channel) {
    let ch = channel.number().to_string();
    let out = run_cmd(
        &["sudo", "iw", "dev", interface, "set", "channel", ch.as_str()],
        CMD_TIMEOUT,
    );
    if !out.ok {
        warn!("failed to preset channel {channel} on {interface}: {}", out.stderr);
    }
}

/// Release the interface from the usual interferers before flipping modes.
fn release_interface(interface: &str) {
    // Tell NetworkManager to leave the interface alone (without stopping the
    // whole service; other interfaces may depend on it).
    if has_tool("nmcli") {
        let _ = run_cmd(
            &["sudo", "nmcli", "device", "set", interface, "managed", "no"],
            CMD_TIMEOUT,
        );
    }
    // wpa_supplicant re-associates behind our back while in monitor mode.
    let _ = run_cmd(&["sudo", "systemctl", "stop", "wpa_supplicant"], CMD_TIMEOUT);
}

/// Put a WiFi interface into monitor mode.
///
/// Already-monitor interfaces are accepted as-is.  The iw/ip path is
/// preferred because it keeps the interface name; the airmon-ng fallback may
/// rename it (`wlan1` to `wlan1mon`).  Returns the effective interface name.
/// `channel` is preset after a successful switch when given.
///
/// # Errors
///
/// Returns [`MonitorModeError`] when no method succeeds; the sensor treats
/// this as fatal at startup.
pub fn enable_monitor_mode(
    interface: &str,
    channel: Option<Channel>,
) -> Result<String, MonitorModeError> {
    info!("setting up monitor mode on {interface}");

    let probe = iface_info(interface);
    if probe.ok && probe.stdout.contains("type monitor") {
        info!("{interface} already in monitor mode");
        if let Some(ch) = channel {
            set_channel_with_iw(interface, ch);
        }
        return Ok(interface.to_string());
    }

    let mut reason = String::new();

    if has_tool("iw") && has_tool("ip") {
        info!("using iw/ip to enable monitor mode on {interface}");
        release_interface(interface);

        let down = run_cmd(&["sudo", "ip", "link", "set", interface, "down"], CMD_TIMEOUT);
        let set = run_cmd(
            &["sudo", "iw", "dev", interface, "set", "type", "monitor"],
            CMD_TIMEOUT,
        );
        let up = run_cmd(&["sudo", "ip", "link", "set", interface, "up"], CMD_TIMEOUT);

        if down.ok && set.ok && up.ok {
            info!("{interface} is now in monitor mode");
            if let Some(ch) = channel {
                set_channel_with_iw(interface, ch);
            }
            return Ok(interface.to_string());
        }
        reason = format!("iw/ip method failed: {} {} {}", down.stderr, set.stderr, up.stderr);
        warn!("{reason}");
    }

    if has_tool("airmon-ng") {
        info!("falling back to airmon-ng for {interface}");
        release_interface(interface);
        let out = run_cmd(&["sudo", "airmon-ng", "start", interface], CMD_TIMEOUT);

        if out.ok {
            // airmon-ng may have renamed the interface.
            let renamed = format!("{interface}mon");
            if iface_info(&renamed).ok {
                info!("airmon-ng created {renamed}");
                if let Some(ch) = channel {
                    set_channel_with_iw(&renamed, ch);
                }
                return Ok(renamed);
            }
            let probe = iface_info(interface);
            if probe.ok && probe.stdout.contains("type monitor") {
                info!("airmon-ng: {interface} in monitor mode (no rename)");
                if let Some(ch) = channel {
                    set_channel_with_iw(interface, ch);
                }
                return Ok(interface.to_string());
            }
        }
        reason = format!("airmon-ng failed: {}", out.stderr);
        warn!("{reason}");
    }

    if reason.is_empty() {
        reason = "no monitor mode tool available".to_string();
    }
    Err(MonitorModeError {
        interface: interface.to_string(),
        reason,
    })
}

/// Reset a wedged interface back to monitor mode on a known channel.
///
/// Used by the watchdog when the helper reads frames from an interface the
/// driver has silently wedged (a common failure mode of USB radios).
pub fn reset_monitor_interface(interface: &str, channel: Channel) {
    info!("resetting interface {interface} to channel {channel}");
    let ch = channel.number().to_string();
    let commands: [&[&str]; 4] = [
        &["sudo", "ip", "link", "set", interface, "down"],
        &["sudo", "iw", "dev", interface, "set", "type", "monitor"],
        &["sudo", "ip", "link", "set", interface, "up"],
        &["sudo", "iw", "dev", interface, "set", "channel", ch.as_str()],
    ];
    for cmd in commands {
        let out = run_cmd(cmd, CMD_TIMEOUT);
        if !out.ok {
            warn!("command failed: {} -> {}", cmd.join(" "), out.stderr);
        }
    }
    info!("interface {interface} reset complete");
}
