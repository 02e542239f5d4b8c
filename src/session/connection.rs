//! One peer's link to the broker
//!
//! A [`Connection`] wraps a single transport channel and owns the
//! serialized send path for it: every outbound envelope goes through the
//! shared [`QueueTable`], and a single drain at a time empties that queue
//! into the transport. Inbound frames are decoded here (and the peer
//! identity captured from registration envelopes); routing the decoded
//! envelope is the orchestrator's job.
//!
//! # Ordering
//!
//! Envelopes reach the transport in the exact order `send` was called.
//! The queue mutex makes enqueues FIFO, and the sending slot in
//! [`SessionState`] guarantees at most one drain per connection, so there
//! is no interleaving to reorder them. A failed send restores the failed
//! envelope to the queue head before the connection closes, so whoever
//! drains that identity next (typically a reconnected peer's fresh
//! connection) retries it first.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::protocol::{codec, DecodeError, Decoded, Envelope};
use crate::queue::QueueTable;

use super::state::{SendState, SessionState};
use super::transport::Transport;

/// Lifecycle notification emitted by a connection
///
/// Consumed by the broker's reaper task; `Closed` fires exactly once per
/// connection, no matter how many callers race to close it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The connection transitioned to closed
    Closed {
        /// Local identity of the connection
        identity: String,
        /// Peer identity, if the peer ever registered
        peer_id: Option<String>,
    },
}

/// A single accepted connection
pub struct Connection<T: Transport> {
    /// Locally generated identity, used as the registry key
    identity: String,

    /// Peer-announced identity from registration, used as the queue key
    peer_id: Mutex<Option<String>>,

    /// Link/sender state machine
    state: SessionState,

    /// Byte-level send primitive from the transport provider
    transport: T,

    /// Shared outbound queue table
    queue: Arc<QueueTable>,

    /// Lifecycle events consumed by the broker
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl<T: Transport> Connection<T> {
    /// Create a connection bound to the shared queue table and the
    /// broker's lifecycle channel.
    pub fn new(
        transport: T,
        queue: Arc<QueueTable>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            identity: uuid::Uuid::new_v4().to_string(),
            peer_id: Mutex::new(None),
            state: SessionState::new(),
            transport,
            queue,
            events,
        })
    }

    /// Local identity of this connection
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Peer identity, if the peer has registered
    pub fn peer_id(&self) -> Option<String> {
        self.peer_id.lock().expect("peer id poisoned").clone()
    }

    /// Whether the link is still open
    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// Current sender state (idle or draining)
    pub fn send_state(&self) -> SendState {
        self.state.send()
    }

    /// Key under which this connection's outbound envelopes are queued.
    ///
    /// The peer identity once the peer has registered, the local identity
    /// before that. Keying by peer identity is what lets a reconnecting
    /// peer pick up envelopes its previous connection failed to deliver.
    fn queue_key(&self) -> String {
        self.peer_id()
            .unwrap_or_else(|| self.identity.clone())
    }

    /// Decode one inbound frame.
    ///
    /// Registration envelopes refresh the peer identity (latest
    /// registration wins). The decoded envelope is returned to the caller
    /// for routing; a header that cannot be split at all is a hard error
    /// the caller must surface rather than swallow.
    pub fn receive(&self, raw: &str) -> Result<Decoded, DecodeError> {
        let decoded = codec::decode(raw)?;

        if decoded.envelope.action.is_register() {
            let mut peer_id = self.peer_id.lock().expect("peer id poisoned");
            *peer_id = Some(decoded.envelope.from_id.clone());
        }

        if decoded.body_degraded {
            tracing::warn!(
                conn = %self.identity,
                envelope = %decoded.envelope.id,
                "Envelope body was not valid JSON, body dropped"
            );
        }

        Ok(decoded)
    }

    /// Queue an envelope for delivery to this connection's peer.
    ///
    /// Enqueue and drain start are synchronous, so two concurrent sends on
    /// the same connection can never reorder each other; only one of them
    /// wins the sending slot and drains both. Envelopes sent to a closed
    /// connection are dropped.
    pub fn send(self: &Arc<Self>, envelope: Envelope) {
        if !self.is_open() {
            tracing::trace!(
                conn = %self.identity,
                envelope = %envelope.id,
                "Dropping envelope for closed connection"
            );
            return;
        }

        self.queue.enqueue(&self.queue_key(), envelope);
        self.start_drain();
    }

    /// Start delivering anything already queued for this connection's
    /// identity.
    ///
    /// Called by the broker after a registration so a reconnecting peer
    /// drains the backlog its previous connection left behind without
    /// waiting for the next publish.
    pub fn flush(self: &Arc<Self>) {
        if !self.is_open() || self.queue.is_empty(&self.queue_key()) {
            return;
        }
        self.start_drain();
    }

    fn start_drain(self: &Arc<Self>) {
        if self.state.begin_send() {
            let conn = Arc::clone(self);
            tokio::spawn(async move { conn.run_queue().await });
        }
    }

    /// Drain loop: pop, encode, write, repeat.
    ///
    /// Exactly one drain runs per connection (the sending slot is claimed
    /// in `start_drain`). On a failed write the popped envelope goes back
    /// to the queue head before the slot is released, so nothing behind it
    /// can jump the line; the connection then closes. A close from the
    /// outside stops the drain at the next iteration and leaves the rest
    /// of the queue in place.
    async fn run_queue(self: Arc<Self>) {
        loop {
            if !self.is_open() {
                self.state.finish_send();
                return;
            }

            let key = self.queue_key();
            let Some(envelope) = self.queue.dequeue(&key) else {
                self.state.finish_send();
                // An enqueue may have landed between the empty dequeue and
                // the idle transition, in which case its `send` saw the
                // slot taken and skipped the drain start. Resume only if
                // we can re-claim the slot.
                if !self.queue.is_empty(&self.queue_key()) && self.state.begin_send() {
                    continue;
                }
                return;
            };

            let frame = codec::encode(&envelope);
            match self.transport.send_text(frame).await {
                Ok(()) => {}
                Err(error) => {
                    tracing::debug!(
                        conn = %self.identity,
                        envelope = %envelope.id,
                        error = %error,
                        "Send failed, restoring envelope and closing"
                    );
                    self.queue.requeue_front(&key, envelope);
                    self.close();
                    self.state.finish_send();
                    return;
                }
            }
        }
    }

    /// Close the connection.
    ///
    /// Idempotent: only the first call transitions the link and emits the
    /// lifecycle event; later calls are no-ops. Queued envelopes stay in
    /// the table for a future connection with the same peer identity.
    pub fn close(&self) {
        if !self.state.mark_closed() {
            return;
        }

        let peer_id = self.peer_id();
        tracing::debug!(conn = %self.identity, peer = ?peer_id, "Connection closed");

        // The broker may already be gone during shutdown; nothing left to
        // notify in that case.
        let _ = self.events.send(SessionEvent::Closed {
            identity: self.identity.clone(),
            peer_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::timeout;

    use super::*;
    use crate::protocol::encode;
    use crate::session::transport::testing::RecordingTransport;

    fn connection(
        transport: RecordingTransport,
    ) -> (
        Arc<Connection<RecordingTransport>>,
        Arc<QueueTable>,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let queue = Arc::new(QueueTable::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let conn = Connection::new(transport, Arc::clone(&queue), events_tx);
        (conn, queue, events_rx)
    }

    fn envelope(tag: &str) -> Envelope {
        Envelope::data("publisher", "", vec!["x".into()], json!(tag))
    }

    #[tokio::test]
    async fn test_receive_captures_peer_identity_from_registration() {
        let (conn, _, _rx) = connection(RecordingTransport::new());
        assert!(conn.peer_id().is_none());

        let register = Envelope::register("peer-7", vec!["x".into()]);
        let decoded = conn.receive(&encode(&register)).expect("decode");

        assert!(decoded.envelope.action.is_register());
        assert_eq!(conn.peer_id().as_deref(), Some("peer-7"));

        // Latest registration wins
        let register = Envelope::register("peer-8", vec!["y".into()]);
        conn.receive(&encode(&register)).expect("decode");
        assert_eq!(conn.peer_id().as_deref(), Some("peer-8"));
    }

    #[tokio::test]
    async fn test_receive_reports_unusable_header() {
        let (conn, _, _rx) = connection(RecordingTransport::new());

        let err = conn.receive("total garbage").expect_err("hard failure");
        assert!(matches!(err, DecodeError::MalformedHeader { .. }));
    }

    #[tokio::test]
    async fn test_drain_preserves_send_order() {
        let transport = RecordingTransport::new();
        let (conn, _, _rx) = connection(transport.clone());

        conn.send(envelope("first"));
        conn.send(envelope("second"));
        conn.send(envelope("third"));

        timeout(Duration::from_secs(2), transport.wait_for(3))
            .await
            .expect("drain finished");

        let sent = transport.sent();
        assert_eq!(sent.len(), 3);
        assert!(sent[0].ends_with("\"first\""));
        assert!(sent[1].ends_with("\"second\""));
        assert!(sent[2].ends_with("\"third\""));
    }

    #[tokio::test]
    async fn test_failed_send_requeues_at_head_and_closes() {
        // Second write fails
        let transport = RecordingTransport::failing_on(&[1]);
        let (conn, queue, mut events_rx) = connection(transport.clone());

        // Register so the queue is keyed by the peer identity
        let register = Envelope::register("peer-7", vec!["x".into()]);
        conn.receive(&encode(&register)).expect("decode");

        conn.send(envelope("first"));
        conn.send(envelope("second"));
        conn.send(envelope("third"));

        timeout(Duration::from_secs(2), events_rx.recv())
            .await
            .expect("timely")
            .expect("closed event");

        assert!(!conn.is_open());
        // "first" was delivered, "second" failed and went back to the
        // head, "third" never left the queue
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(queue.len("peer-7"), 2);
        assert_eq!(
            queue.dequeue("peer-7").unwrap().body,
            Some(json!("second"))
        );
        assert_eq!(queue.dequeue("peer-7").unwrap().body, Some(json!("third")));
    }

    #[tokio::test]
    async fn test_reconnected_peer_retries_failed_envelope_first() {
        let failing = RecordingTransport::failing_on(&[1]);
        let queue = Arc::new(QueueTable::new());
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        let first = Connection::new(failing.clone(), Arc::clone(&queue), events_tx.clone());
        let register = encode(&Envelope::register("peer-7", vec!["x".into()]));
        first.receive(&register).expect("decode");

        first.send(envelope("first"));
        first.send(envelope("second"));
        first.send(envelope("third"));

        timeout(Duration::from_secs(2), events_rx.recv())
            .await
            .expect("timely")
            .expect("closed event");

        // The peer reconnects: a fresh connection object, same identity,
        // same shared queue table.
        let healthy = RecordingTransport::new();
        let second = Connection::new(healthy.clone(), Arc::clone(&queue), events_tx);
        second.receive(&register).expect("decode");
        second.flush();

        timeout(Duration::from_secs(2), healthy.wait_for(2))
            .await
            .expect("backlog drained");

        let sent = healthy.sent();
        assert!(sent[0].ends_with("\"second\""), "failed envelope first");
        assert!(sent[1].ends_with("\"third\""));
    }

    #[tokio::test]
    async fn test_send_on_closed_connection_is_dropped() {
        let transport = RecordingTransport::new();
        let (conn, queue, _rx) = connection(transport.clone());

        conn.close();
        conn.send(envelope("late"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.sent().len(), 0);
        assert_eq!(queue.len(conn.identity()), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_event_fires_once() {
        let (conn, _, mut events_rx) = connection(RecordingTransport::new());

        conn.close();
        conn.close();
        conn.close();

        let event = events_rx.recv().await.expect("one event");
        assert_eq!(
            event,
            SessionEvent::Closed {
                identity: conn.identity().to_owned(),
                peer_id: None,
            }
        );
        assert!(events_rx.try_recv().is_err(), "no second event");
    }

    #[tokio::test]
    async fn test_flush_is_a_no_op_without_backlog() {
        let transport = RecordingTransport::new();
        let (conn, _, _rx) = connection(transport.clone());

        conn.flush();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(transport.attempts(), 0);
        assert_eq!(conn.send_state(), SendState::Idle);
    }
}
