//! Per-identity outbound queue table
//!
//! One FIFO of pending outbound envelopes per connection identity. The
//! table is the ordering primitive the broker's per-connection delivery
//! guarantee rests on: all operations on one identity go through the same
//! lock, so an enqueue can never interleave with a dequeue in a way that
//! reorders that identity's envelopes.
//!
//! Queues are created lazily on first use and survive a connection close:
//! a peer that reconnects under the same identity drains whatever its
//! previous connection failed to deliver, in the original order.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::protocol::Envelope;

/// Table of per-identity outbound FIFOs
///
/// Shared by every connection the broker owns. All operations are
/// synchronous and complete without yielding.
#[derive(Debug, Default)]
pub struct QueueTable {
    queues: Mutex<HashMap<String, VecDeque<Envelope>>>,
}

impl QueueTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an envelope to the tail of an identity's queue.
    pub fn enqueue(&self, identity: &str, envelope: Envelope) {
        let mut queues = self.queues.lock().expect("queue table poisoned");
        queues
            .entry(identity.to_owned())
            .or_default()
            .push_back(envelope);
    }

    /// Remove and return the head of an identity's queue.
    pub fn dequeue(&self, identity: &str) -> Option<Envelope> {
        let mut queues = self.queues.lock().expect("queue table poisoned");
        queues.get_mut(identity)?.pop_front()
    }

    /// Put an envelope back at the head of an identity's queue.
    ///
    /// Used after a failed send so the retry sees the failed envelope
    /// first, ahead of anything enqueued behind it.
    pub fn requeue_front(&self, identity: &str, envelope: Envelope) {
        let mut queues = self.queues.lock().expect("queue table poisoned");
        queues
            .entry(identity.to_owned())
            .or_default()
            .push_front(envelope);
    }

    /// Number of envelopes pending for an identity.
    pub fn len(&self, identity: &str) -> usize {
        let queues = self.queues.lock().expect("queue table poisoned");
        queues.get(identity).map_or(0, VecDeque::len)
    }

    /// Whether an identity has nothing pending.
    pub fn is_empty(&self, identity: &str) -> bool {
        self.len(identity) == 0
    }

    /// Number of identities with a queue (empty or not).
    pub fn identity_count(&self) -> usize {
        self.queues.lock().expect("queue table poisoned").len()
    }
}
