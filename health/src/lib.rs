// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! System health probes.
//!
//! Sensors are small boards in weatherproof boxes on rooftops; the heartbeat
//! is often the only way to notice one cooking itself or filling its SD
//! card.  Every probe is best-effort: a field the platform cannot provide is
//! reported as absent, never as an error.

#![deny(clippy::all, clippy::pedantic)]

use procfs::{Current, LoadAverage, Meminfo};
use tracing::debug;

/// Raspberry Pi (and most ARM boards) expose the SoC temperature here.
const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

/// One sample of system health.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct SystemHealth {
    /// One-minute load average.
    pub cpu_load: f64,
    /// Load average normalized by CPU count, capped at 100.
    pub cpu_percent: f64,
    /// Bytes of memory in use.
    pub memory_used: u64,
    /// Total bytes of memory.
    pub memory_total: u64,
    /// Used memory as a percentage of total.
    pub memory_percent: f64,
    /// SoC temperature in Celsius, where the platform exposes it.
    pub temperature_c: Option<f64>,
    /// Free bytes on the root filesystem.
    pub disk_free: Option<u64>,
    /// Cumulative bytes written to whole disks (SD wear tracking).
    pub disk_writes_total: Option<u64>,
}

impl SystemHealth {
    /// Take one best-effort sample.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn probe() -> SystemHealth {
        let mut health = SystemHealth::default();

        match LoadAverage::current() {
            Ok(load) => {
                health.cpu_load = f64::from(load.one);
                let cpus = std::thread::available_parallelism().map_or(1, std::num::NonZero::get);
                health.cpu_percent = (health.cpu_load / cpus as f64 * 100.0).min(100.0);
            }
            Err(err) => debug!("loadavg probe failed: {err}"),
        }

        match Meminfo::current() {
            Ok(meminfo) => {
                health.memory_total = meminfo.mem_total;
                let available = meminfo.mem_available.unwrap_or(meminfo.mem_free);
                health.memory_used = meminfo.mem_total.saturating_sub(available);
                if health.memory_total > 0 {
                    health.memory_percent =
                        health.memory_used as f64 / health.memory_total as f64 * 100.0;
                }
            }
            Err(err) => debug!("meminfo probe failed: {err}"),
        }

        health.temperature_c = std::fs::read_to_string(THERMAL_ZONE)
            .ok()
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .map(|millideg| millideg / 1000.0);

        health.disk_free = nix::sys::statvfs::statvfs("/")
            .ok()
            .map(|vfs| u64::from(vfs.blocks_available()) * u64::from(vfs.fragment_size()));

        health.disk_writes_total = disk_writes_total();

        health
    }
}

/// Cumulative bytes written across whole disks (partitions excluded so the
/// same write is not counted twice).
fn disk_writes_total() -> Option<u64> {
    let stats = procfs::diskstats().ok()?;
    let mut sectors: u64 = 0;
    for disk in stats {
        let name = disk.name.as_str();
        let whole_mmc = name.starts_with("mmcblk") && !name.contains('p');
        let whole_sd =
            name.starts_with("sd") && name.chars().last().is_some_and(|c| c.is_alphabetic());
        if whole_mmc || whole_sd {
            sectors = sectors.saturating_add(disk.sectors_written);
        }
    }
    // A sector is 512 bytes in diskstats regardless of the device's real
    // sector size.
    (sectors > 0).then(|| sectors.saturating_mul(512))
}
