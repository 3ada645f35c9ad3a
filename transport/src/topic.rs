// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! Outbound message topics.

use std::fmt::{Display, Formatter};

/// Routing topic of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    /// Enriched UAV reports (produced by the collector, not this sensor;
    /// kept for wire compatibility).
    Uav,
    /// Sensor liveness and health.
    Heartbeat,
    /// Classified drone-bearing frames.
    Frame,
    /// Operational alerts.
    Alert,
}

impl Topic {
    /// The wire name of the topic.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::Uav => "uav",
            Topic::Heartbeat => "heartbeat",
            Topic::Frame => "frame",
            Topic::Alert => "alert",
        }
    }
}

impl Display for Topic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
