// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! Hot-path frame classification.
//!
//! Every line the capture helper prints flows through [`Classifier::classify`].
//! The overwhelming majority of lines are ordinary WiFi beacons, so the
//! classifier is built to say "no" as cheaply as possible: a byte-level
//! triviality check, then a single-pass substring pre-filter over the raw
//! line, and only then a structured decode of the survivors (~1% of input).

#![deny(clippy::all, clippy::pedantic)]

mod classifier;
mod ek;
mod envelope;

pub use classifier::*;
pub use envelope::*;
