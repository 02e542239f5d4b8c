//! Subscription registry implementation
//!
//! The central map from subject name to subscribed connections. Shared by
//! reference between the broker and its connections; all mutation happens
//! under one short mutex, never across an await point.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::protocol::Envelope;
use crate::session::{Connection, Transport};

/// Central registry of subject subscriptions
///
/// Connections are keyed by their local identity, so a peer identity
/// reused by a later connection can never resurrect a closed one.
pub struct SubjectRegistry<T: Transport> {
    /// subject → (connection identity → connection)
    subjects: Mutex<HashMap<String, HashMap<String, Arc<Connection<T>>>>>,
}

impl<T: Transport> SubjectRegistry<T> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            subjects: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe a connection to a list of subjects.
    ///
    /// Idempotent: subscribing the same connection to the same subject
    /// again has no additional effect. An empty subject list is an
    /// accepted no-op.
    pub fn subscribe(&self, subjects: &[String], connection: &Arc<Connection<T>>) {
        if subjects.is_empty() {
            return;
        }

        let mut map = self.subjects.lock().expect("registry poisoned");
        for subject in subjects {
            map.entry(subject.clone())
                .or_default()
                .insert(connection.identity().to_owned(), Arc::clone(connection));
        }

        tracing::debug!(
            conn = %connection.identity(),
            peer = ?connection.peer_id(),
            subjects = subjects.len(),
            "Subscribed"
        );
    }

    /// Fan an envelope out to every subscriber of its subjects.
    ///
    /// The recipient set is the deduplicated union across all matched
    /// subjects, minus the publishing connection itself, so overlapping
    /// subscriptions deliver one copy and a publisher never hears its own
    /// envelope back. Returns the number of connections the envelope was
    /// handed to. An envelope with no matching subscribers matches
    /// nothing and is dropped without error.
    pub fn publish(&self, source: &Connection<T>, envelope: &Envelope) -> usize {
        // Collect under the lock, send after dropping it: send never
        // needs the registry, and the drain it may spawn must not find
        // the map locked.
        let recipients: BTreeMap<String, Arc<Connection<T>>> = {
            let map = self.subjects.lock().expect("registry poisoned");
            envelope
                .subjects
                .iter()
                .filter_map(|subject| map.get(subject))
                .flatten()
                .filter(|(identity, _)| identity.as_str() != source.identity())
                .map(|(identity, conn)| (identity.clone(), Arc::clone(conn)))
                .collect()
        };

        for connection in recipients.values() {
            connection.send(envelope.clone());
        }

        tracing::trace!(
            from = %source.identity(),
            envelope = %envelope.id,
            subjects = envelope.subjects.len(),
            delivered = recipients.len(),
            "Published"
        );

        recipients.len()
    }

    /// Remove a connection from every subject it is subscribed to.
    ///
    /// After this returns no subject set holds the identity; subjects
    /// left without subscribers are dropped from the map.
    pub fn unsubscribe_all(&self, identity: &str) {
        let mut map = self.subjects.lock().expect("registry poisoned");
        for connections in map.values_mut() {
            connections.remove(identity);
        }
        map.retain(|_, connections| !connections.is_empty());

        tracing::debug!(conn = %identity, "Unsubscribed from all subjects");
    }

    /// Number of subjects with at least one subscriber
    pub fn subject_count(&self) -> usize {
        self.subjects.lock().expect("registry poisoned").len()
    }

    /// Number of connections subscribed to a subject
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.subjects
            .lock()
            .expect("registry poisoned")
            .get(subject)
            .map_or(0, HashMap::len)
    }
}

impl<T: Transport> Default for SubjectRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use super::*;
    use crate::queue::QueueTable;
    use crate::session::transport::testing::RecordingTransport;
    use crate::session::SessionEvent;

    struct Peer {
        conn: Arc<Connection<RecordingTransport>>,
        transport: RecordingTransport,
    }

    fn peer(
        queue: &Arc<QueueTable>,
        events: &mpsc::UnboundedSender<SessionEvent>,
    ) -> Peer {
        let transport = RecordingTransport::new();
        let conn = Connection::new(transport.clone(), Arc::clone(queue), events.clone());
        Peer { conn, transport }
    }

    fn harness() -> (
        SubjectRegistry<RecordingTransport>,
        Arc<QueueTable>,
        mpsc::UnboundedSender<SessionEvent>,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            SubjectRegistry::new(),
            Arc::new(QueueTable::new()),
            events_tx,
            events_rx,
        )
    }

    fn subjects(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_fan_out_reaches_matching_subscribers_only() {
        let (registry, queue, events, _rx) = harness();
        let a = peer(&queue, &events);
        let b = peer(&queue, &events);
        let c = peer(&queue, &events);
        let d = peer(&queue, &events);

        registry.subscribe(&subjects(&["x"]), &a.conn);
        registry.subscribe(&subjects(&["x"]), &b.conn);
        registry.subscribe(&subjects(&["y"]), &c.conn);

        let envelope = Envelope::data("peer-d", "", subjects(&["x"]), json!("hello"));
        let delivered = registry.publish(&d.conn, &envelope);
        assert_eq!(delivered, 2);

        timeout(Duration::from_secs(2), a.transport.wait_for(1))
            .await
            .expect("a received");
        timeout(Duration::from_secs(2), b.transport.wait_for(1))
            .await
            .expect("b received");

        assert!(c.transport.sent().is_empty(), "wrong subject");
        assert!(d.transport.sent().is_empty(), "publisher echo");
    }

    #[tokio::test]
    async fn test_publisher_does_not_hear_itself() {
        let (registry, queue, events, _rx) = harness();
        let a = peer(&queue, &events);

        registry.subscribe(&subjects(&["x"]), &a.conn);

        let envelope = Envelope::data("peer-a", "", subjects(&["x"]), json!("echo?"));
        let delivered = registry.publish(&a.conn, &envelope);

        assert_eq!(delivered, 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(a.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_subjects_deliver_one_copy() {
        let (registry, queue, events, _rx) = harness();
        let a = peer(&queue, &events);
        let d = peer(&queue, &events);

        registry.subscribe(&subjects(&["x", "y"]), &a.conn);

        let envelope = Envelope::data("peer-d", "", subjects(&["x", "y"]), json!("once"));
        let delivered = registry.publish(&d.conn, &envelope);
        assert_eq!(delivered, 1);

        timeout(Duration::from_secs(2), a.transport.wait_for(1))
            .await
            .expect("delivered");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(a.transport.sent().len(), 1, "single copy across subjects");
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let (registry, queue, events, _rx) = harness();
        let a = peer(&queue, &events);

        registry.subscribe(&subjects(&["x"]), &a.conn);
        registry.subscribe(&subjects(&["x"]), &a.conn);

        assert_eq!(registry.subscriber_count("x"), 1);
    }

    #[tokio::test]
    async fn test_empty_subject_list_is_a_no_op() {
        let (registry, queue, events, _rx) = harness();
        let a = peer(&queue, &events);

        registry.subscribe(&[], &a.conn);
        assert_eq!(registry.subject_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_with_no_match_drops_silently() {
        let (registry, queue, events, _rx) = harness();
        let d = peer(&queue, &events);

        let envelope = Envelope::data("peer-d", "", subjects(&["nobody-listens"]), json!(1));
        assert_eq!(registry.publish(&d.conn, &envelope), 0);

        let empty = Envelope::data("peer-d", "", vec![], json!(1));
        assert_eq!(registry.publish(&d.conn, &empty), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_all_purges_every_subject() {
        let (registry, queue, events, _rx) = harness();
        let a = peer(&queue, &events);
        let b = peer(&queue, &events);
        let d = peer(&queue, &events);

        registry.subscribe(&subjects(&["x", "y", "z"]), &a.conn);
        registry.subscribe(&subjects(&["x"]), &b.conn);

        registry.unsubscribe_all(a.conn.identity());

        assert_eq!(registry.subscriber_count("x"), 1);
        assert_eq!(registry.subscriber_count("y"), 0);
        assert_eq!(registry.subscriber_count("z"), 0);
        // Subjects without subscribers are gone entirely
        assert_eq!(registry.subject_count(), 1);

        let envelope = Envelope::data("peer-d", "", subjects(&["y"]), json!("gone"));
        assert_eq!(registry.publish(&d.conn, &envelope), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(a.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_reused_peer_identity_does_not_resurrect_a_closed_connection() {
        let (registry, queue, events, _rx) = harness();

        // First connection registers and is then purged on close
        let first = peer(&queue, &events);
        registry.subscribe(&subjects(&["x"]), &first.conn);
        first.conn.close();
        registry.unsubscribe_all(first.conn.identity());

        // A new connection arrives for the same peer; only it may receive
        let second = peer(&queue, &events);
        registry.subscribe(&subjects(&["x"]), &second.conn);

        let d = peer(&queue, &events);
        let envelope = Envelope::data("peer-d", "", subjects(&["x"]), json!("fresh"));
        assert_eq!(registry.publish(&d.conn, &envelope), 1);

        timeout(Duration::from_secs(2), second.transport.wait_for(1))
            .await
            .expect("delivered to the new connection");
        assert!(first.transport.sent().is_empty());
    }
}
