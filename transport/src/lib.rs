// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! The outbound side of the sensor.
//!
//! The core forwards classified frames and heartbeats through a narrow
//! `publish(topic, payload)` seam.  The wire transport behind the seam is
//! deployment-specific and lives outside this repository; what the core
//! guarantees is the topic set, the message shapes, and the offline
//! buffering behavior ([`BufferedSender`]): bounded FIFO, oldest-first
//! eviction, in-order replay once the sink accepts traffic again.

#![deny(clippy::all, clippy::pedantic)]

mod buffer;
mod message;
mod sink;
mod topic;

pub use buffer::*;
pub use message::*;
pub use sink::*;
pub use topic::*;
