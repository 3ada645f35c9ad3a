// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! Channel setting with transparent fallback.

use crate::{NetlinkError, Nl80211Channel};
use net::Channel;
use std::process::Command;
use tracing::{debug, warn};

/// An error which may occur while setting a channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelSetError {
    /// The netlink driver rejected the retune and no fallback succeeded.
    #[error(transparent)]
    Netlink(#[from] NetlinkError),
    /// The `iw` fallback tool failed.
    #[error("iw set channel failed: {0}")]
    Tool(String),
}

/// The seam the channel hopper retunes through.
///
/// Production uses [`ChannelManager`]; tests substitute a recording fake.
pub trait SetChannel: Send + Sync {
    /// Tune `interface` to `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelSetError`] when neither the driver nor the fallback
    /// could retune the radio.
    fn set_channel(&self, interface: &str, channel: Channel) -> Result<(), ChannelSetError>;
}

/// Channel setter with the nl80211 fast path and the `iw` tool as fallback.
///
/// When the netlink driver cannot be constructed (no wireless stack, no
/// permission) every retune goes through `iw`; the only observable
/// difference is latency (sub-millisecond vs ~50 ms per switch).
pub struct ChannelManager {
    driver: Option<Nl80211Channel>,
}

impl ChannelManager {
    /// Construct, attempting to bring up the netlink driver.
    #[must_use]
    pub fn new() -> ChannelManager {
        let driver = match Nl80211Channel::new() {
            Ok(driver) => Some(driver),
            Err(err) => {
                warn!("netlink init failed, using iw subprocess fallback: {err}");
                None
            }
        };
        ChannelManager { driver }
    }

    /// Whether the sub-millisecond netlink path is active.
    #[must_use]
    pub fn has_netlink(&self) -> bool {
        self.driver.is_some()
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        ChannelManager::new()
    }
}

impl SetChannel for ChannelManager {
    fn set_channel(&self, interface: &str, channel: Channel) -> Result<(), ChannelSetError> {
        if let Some(driver) = &self.driver {
            match driver.set_channel(interface, channel.freq_mhz()) {
                Ok(()) => {
                    debug!("set {interface} to channel {channel} (netlink)");
                    return Ok(());
                }
                Err(err) => {
                    debug!("netlink set_channel failed for {channel}: {err}, falling back to iw");
                }
            }
        }
        set_channel_with_iw(interface, channel)
    }
}

/// Fallback: fork `iw dev <iface> set channel <n>`.
fn set_channel_with_iw(interface: &str, channel: Channel) -> Result<(), ChannelSetError> {
    let number = channel.number().to_string();
    let mut args: Vec<&str> = vec!["iw", "dev", interface, "set", "channel", &number];
    if !nix::unistd::geteuid().is_root() {
        args.insert(0, "sudo");
    }
    let output = Command::new(args[0])
        .args(&args[1..])
        .output()
        .map_err(|err| ChannelSetError::Tool(err.to_string()))?;
    if output.status.success() {
        debug!("set {interface} to channel {channel} (iw)");
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!("failed to set channel {channel} on {interface}: {stderr}");
        Err(ChannelSetError::Tool(stderr))
    }
}
