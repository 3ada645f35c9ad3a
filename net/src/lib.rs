// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! WiFi channel, band and MAC address types shared across the sensor.

#![deny(clippy::all, clippy::pedantic)]

mod band;
mod channel;
mod mac;

pub use band::*;
pub use channel::*;
pub use mac::*;
