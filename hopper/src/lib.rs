// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! Adaptive channel hopping.
//!
//! The hopper runs one background thread that continuously retunes the
//! radio and sleeps for a dwell.  The classifier feeds per-channel drone
//! activity back through the [`ActivityMap`]; channels with recent activity
//! earn extended dwells (tracking mode) while the rest of the configured set
//! is still swept periodically so a second drone on another channel is not
//! missed.

#![deny(clippy::all, clippy::pedantic)]

mod activity;
mod hopper;

pub use activity::*;
pub use hopper::*;
