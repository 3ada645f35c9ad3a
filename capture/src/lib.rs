// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! Capture helper supervision.
//!
//! The sensor does not read packets itself; it supervises a tshark-shaped
//! helper that prints one structured record per management frame.  This
//! crate owns the helper's lifecycle (spawn, line stream, stderr drain,
//! bounded stop, idempotent restart) and the one-time monitor-mode
//! enablement of the wireless interface.

#![deny(clippy::all, clippy::pedantic)]

mod cmd;
mod monitor;
mod process;

pub use cmd::*;
pub use monitor::*;
pub use process::*;
