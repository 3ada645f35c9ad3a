// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! Radio channel control.
//!
//! The channel hopper retunes the radio hundreds of times a minute, so the
//! cost of a retune bounds how aggressively the sensor can scan.  Forking
//! `iw` costs ~50 ms per switch; talking nl80211 directly over a generic
//! netlink socket costs well under a millisecond.  This crate provides the
//! raw driver ([`Nl80211Channel`]) and a [`ChannelManager`] that falls back
//! to the `iw` tool transparently when the netlink path is unavailable.

#![deny(clippy::all, clippy::pedantic)]

mod ifindex;
mod manager;
mod nl80211;

pub use manager::*;
pub use nl80211::*;
