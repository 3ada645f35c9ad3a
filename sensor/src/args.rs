// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! Command-line arguments.

use clap::Parser;
use std::path::PathBuf;

/// WiFi drone-detection sensor.
///
/// Supervises a tshark-shaped capture helper on a monitor-mode interface,
/// classifies management frames against drone signatures, and forwards
/// matches to the collector sink.
#[derive(Debug, Parser)]
#[command(name = "skytap", version, about)]
pub struct CmdArgs {
    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = "skytap_config.json")]
    pub config: PathBuf,

    /// Override the WiFi interface from the config file.
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Publish compact per-frame summaries instead of full frame messages
    /// (testing mode).
    #[arg(short = 's', long)]
    pub stdout: bool,

    /// Log level override (also honors RUST_LOG).
    #[arg(long, value_parser = ["trace", "debug", "info", "warn", "error"])]
    pub log_level: Option<String>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_parse() {
        let args = CmdArgs::parse_from(["skytap"]);
        assert_eq!(args.config, PathBuf::from("skytap_config.json"));
        assert_eq!(args.interface, None);
        assert!(!args.stdout);
    }

    #[test]
    fn overrides_parse() {
        let args = CmdArgs::parse_from([
            "skytap",
            "--config",
            "/etc/skytap/config.json",
            "-i",
            "wlan1mon",
            "--stdout",
            "--log-level",
            "debug",
        ]);
        assert_eq!(args.config, PathBuf::from("/etc/skytap/config.json"));
        assert_eq!(args.interface.as_deref(), Some("wlan1mon"));
        assert!(args.stdout);
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn bad_log_level_is_rejected() {
        assert!(CmdArgs::try_parse_from(["skytap", "--log-level", "loud"]).is_err());
    }
}
