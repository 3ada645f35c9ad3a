// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! The publish seam.

use crate::Topic;
use serde_json::Value;
use std::io::Write;

/// An error which may occur when handing a message to a sink.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The sink cannot currently accept messages.
    #[error("sink unavailable: {0}")]
    Unavailable(String),
    /// The payload could not be serialized.
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Anything messages can be handed to.
///
/// Implementations may buffer internally and may drop; the core observes
/// only what the trait exposes.  `publish` must not block for longer than a
/// network write.
pub trait Publish: Send + Sync {
    /// Hand one message to the sink.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] when the message could not be accepted; the
    /// caller decides whether to buffer or drop.
    fn publish(&self, topic: Topic, payload: &Value) -> Result<(), PublishError>;
}

/// A sink that prints each message as one JSON line on stdout.
///
/// This is the `--stdout` testing mode and doubles as the reference
/// implementation of the seam.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl Publish for StdoutSink {
    fn publish(&self, topic: Topic, payload: &Value) -> Result<(), PublishError> {
        let line = serde_json::to_string(&serde_json::json!({
            "topic": topic,
            "payload": payload,
        }))?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}").map_err(|err| PublishError::Unavailable(err.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{Publish, PublishError, Topic};
    use serde_json::Value;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Records published messages; can be switched between up and down.
    #[derive(Debug, Default)]
    pub(crate) struct FakeSink {
        pub(crate) up: AtomicBool,
        pub(crate) published: Mutex<Vec<(Topic, Value)>>,
    }

    impl FakeSink {
        pub(crate) fn new(up: bool) -> FakeSink {
            FakeSink {
                up: AtomicBool::new(up),
                published: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn set_up(&self, up: bool) {
            self.up.store(up, Ordering::SeqCst);
        }

        pub(crate) fn messages(&self) -> Vec<(Topic, Value)> {
            self.published.lock().unwrap().clone()
        }
    }

    impl Publish for FakeSink {
        fn publish(&self, topic: Topic, payload: &Value) -> Result<(), PublishError> {
            if self.up.load(Ordering::SeqCst) {
                self.published.lock().unwrap().push((topic, payload.clone()));
                Ok(())
            } else {
                Err(PublishError::Unavailable("disconnected".to_string()))
            }
        }
    }
}
