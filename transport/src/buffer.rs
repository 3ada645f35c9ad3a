// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! Offline buffering decorator.

use crate::{Publish, PublishError, Topic};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Counters exposed by [`BufferedSender`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportStats {
    /// Messages the inner sink accepted directly.
    pub sent: u64,
    /// Messages that went through the offline buffer.
    pub buffered: u64,
    /// Buffered messages later delivered in order.
    pub replayed: u64,
    /// Publish failures observed.
    pub errors: u64,
    /// Payload bytes accepted by the inner sink.
    pub bytes_sent: u64,
    /// Messages currently queued.
    pub buffered_count: usize,
    /// Payload bytes currently queued.
    pub buffered_bytes: usize,
    /// Frame-topic messages processed (the watchdog's stall counter).
    pub frames_published: u64,
}

struct Buffered {
    topic: Topic,
    payload: Value,
    bytes: usize,
}

struct State {
    queue: VecDeque<Buffered>,
    queued_bytes: usize,
    stats: TransportStats,
}

/// Bounded offline buffer around any [`Publish`] sink.
///
/// While the sink accepts traffic, messages pass straight through.  When it
/// fails, messages queue up to `capacity`, evicting oldest-first; once a
/// delivery succeeds again the queue replays in FIFO order ahead of new
/// traffic, preserving overall ordering.
pub struct BufferedSender {
    inner: Arc<dyn Publish>,
    capacity: usize,
    state: Mutex<State>,
}

impl BufferedSender {
    /// Wrap `inner` with a buffer of at most `capacity` messages.
    #[must_use]
    pub fn new(inner: Arc<dyn Publish>, capacity: usize) -> BufferedSender {
        BufferedSender {
            inner,
            capacity: capacity.max(1),
            state: Mutex::new(State {
                queue: VecDeque::new(),
                queued_bytes: 0,
                stats: TransportStats::default(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Publish a message, buffering it when the sink is down.
    ///
    /// Never fails from the caller's perspective; delivery problems show up
    /// in [`TransportStats`] and in the watchdog's buffer-depth check.
    pub fn publish(&self, topic: Topic, payload: &Value) {
        let bytes = serialized_len(payload);
        let mut state = self.lock();
        if topic == Topic::Frame {
            state.stats.frames_published += 1;
        }

        // Replay backlog first so ordering is preserved end to end.
        self.drain_locked(&mut state);

        if state.queue.is_empty() {
            match self.inner.publish(topic, payload) {
                Ok(()) => {
                    state.stats.sent += 1;
                    state.stats.bytes_sent += bytes as u64;
                    return;
                }
                Err(err) => {
                    debug!("publish failed, buffering: {err}");
                    state.stats.errors += 1;
                }
            }
        }

        if state.queue.len() >= self.capacity {
            if let Some(evicted) = state.queue.pop_front() {
                state.queued_bytes -= evicted.bytes;
                warn!(
                    "transport buffer full ({}), evicting oldest message ({} bytes)",
                    self.capacity, evicted.bytes
                );
            }
        }
        state.queue.push_back(Buffered {
            topic,
            payload: payload.clone(),
            bytes,
        });
        state.queued_bytes += bytes;
        state.stats.buffered += 1;
    }

    /// Attempt to flush the backlog in FIFO order, stopping at the first
    /// failure.
    pub fn replay(&self) {
        let mut state = self.lock();
        self.drain_locked(&mut state);
    }

    fn drain_locked(&self, state: &mut State) {
        if state.queue.is_empty() {
            return;
        }
        let backlog = state.queue.len();
        let mut delivered = 0;
        while let Some(message) = state.queue.pop_front() {
            match self.inner.publish(message.topic, &message.payload) {
                Ok(()) => {
                    state.queued_bytes -= message.bytes;
                    state.stats.replayed += 1;
                    state.stats.bytes_sent += message.bytes as u64;
                    delivered += 1;
                }
                Err(err) => {
                    // Put it back; the rest of the backlog stays queued.
                    state.queue.push_front(message);
                    debug!(
                        "replay stopped after {delivered}/{backlog}: {err} ({} still queued)",
                        state.queue.len()
                    );
                    return;
                }
            }
        }
        info!("replayed {delivered}/{backlog} buffered messages");
    }

    /// Messages currently queued.
    #[must_use]
    pub fn buffered_count(&self) -> usize {
        self.lock().queue.len()
    }

    /// Payload bytes currently queued.
    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.lock().queued_bytes
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        let state = self.lock();
        let mut stats = state.stats;
        stats.buffered_count = state.queue.len();
        stats.buffered_bytes = state.queued_bytes;
        stats
    }
}

fn serialized_len(payload: &Value) -> usize {
    serde_json::to_string(payload).map_or(0, |s| s.len())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sink::testing::FakeSink;
    use serde_json::json;

    fn payload(n: u64) -> Value {
        json!({"seq": n})
    }

    #[test]
    fn messages_pass_through_while_the_sink_is_up() {
        let sink = Arc::new(FakeSink::new(true));
        let sender = BufferedSender::new(Arc::clone(&sink) as Arc<dyn Publish>, 10);
        sender.publish(Topic::Frame, &payload(1));
        sender.publish(Topic::Heartbeat, &payload(2));
        assert_eq!(sink.messages().len(), 2);
        let stats = sender.stats();
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.buffered_count, 0);
        assert_eq!(stats.frames_published, 1);
    }

    #[test]
    fn downtime_buffers_and_reconnect_replays_in_order() {
        let sink = Arc::new(FakeSink::new(false));
        let sender = BufferedSender::new(Arc::clone(&sink) as Arc<dyn Publish>, 10);
        for n in 0..5 {
            sender.publish(Topic::Frame, &payload(n));
        }
        assert_eq!(sink.messages().len(), 0);
        assert_eq!(sender.buffered_count(), 5);
        assert!(sender.buffered_bytes() > 0);

        sink.set_up(true);
        sender.publish(Topic::Frame, &payload(5));
        let delivered = sink.messages();
        assert_eq!(delivered.len(), 6);
        let sequence: Vec<u64> = delivered
            .iter()
            .map(|(_, p)| p.get("seq").unwrap().as_u64().unwrap())
            .collect();
        assert_eq!(sequence, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(sender.buffered_count(), 0);
        assert_eq!(sender.buffered_bytes(), 0);
        assert_eq!(sender.stats().replayed, 5);
    }

    #[test]
    fn full_buffer_evicts_oldest_first() {
        let sink = Arc::new(FakeSink::new(false));
        let sender = BufferedSender::new(Arc::clone(&sink) as Arc<dyn Publish>, 3);
        for n in 0..5 {
            sender.publish(Topic::Frame, &payload(n));
        }
        assert_eq!(sender.buffered_count(), 3);

        sink.set_up(true);
        sender.replay();
        let sequence: Vec<u64> = sink
            .messages()
            .iter()
            .map(|(_, p)| p.get("seq").unwrap().as_u64().unwrap())
            .collect();
        // 0 and 1 were evicted to make room.
        assert_eq!(sequence, vec![2, 3, 4]);
    }

    #[test]
    fn frames_published_counts_even_while_buffering() {
        let sink = Arc::new(FakeSink::new(false));
        let sender = BufferedSender::new(Arc::clone(&sink) as Arc<dyn Publish>, 10);
        sender.publish(Topic::Frame, &payload(1));
        sender.publish(Topic::Heartbeat, &payload(2));
        let stats = sender.stats();
        assert_eq!(stats.frames_published, 1);
        assert_eq!(stats.errors, 2);
        assert_eq!(stats.buffered, 2);
    }

    #[test]
    fn byte_accounting_survives_eviction() {
        let sink = Arc::new(FakeSink::new(false));
        let sender = BufferedSender::new(Arc::clone(&sink) as Arc<dyn Publish>, 2);
        for n in 0..4 {
            sender.publish(Topic::Frame, &payload(n));
        }
        let expected: usize = 2 * serde_json::to_string(&payload(0)).unwrap().len();
        assert_eq!(sender.buffered_bytes(), expected);
    }
}
