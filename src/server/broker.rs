//! Broker orchestrator
//!
//! The broker owns the two shared structures every connection works
//! against: the outbound [`QueueTable`] and the [`SubjectRegistry`]. It
//! wires each accepted transport into them, decides per inbound envelope
//! whether it is a registration or a publish, and reaps closed
//! connections out of the registry.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::{DecodeError, Decoded};
use crate::queue::QueueTable;
use crate::registry::SubjectRegistry;
use crate::session::{Connection, SessionEvent, Transport};

/// Connection/message-routing orchestrator
///
/// One broker instance per process; connections hold references to its
/// queue table and emit their lifecycle events onto its channel. There is
/// no process-wide state: everything a connection needs is handed to it
/// at construction.
pub struct Broker<T: Transport> {
    registry: Arc<SubjectRegistry<T>>,
    queues: Arc<QueueTable>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
}

impl<T: Transport> Broker<T> {
    /// Create a broker with empty registry and queue table.
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            registry: Arc::new(SubjectRegistry::new()),
            queues: Arc::new(QueueTable::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// The shared subscription registry
    pub fn registry(&self) -> &Arc<SubjectRegistry<T>> {
        &self.registry
    }

    /// The shared outbound queue table
    pub fn queues(&self) -> &Arc<QueueTable> {
        &self.queues
    }

    /// Bind a freshly accepted transport into the broker.
    ///
    /// The returned connection is ready to receive; the caller (the
    /// transport provider) drives its read loop and closes it on
    /// disconnect.
    pub fn attach(&self, transport: T) -> Arc<Connection<T>> {
        let connection = Connection::new(transport, Arc::clone(&self.queues), self.events_tx.clone());
        tracing::debug!(conn = %connection.identity(), "Connection attached");
        connection
    }

    /// Route one inbound frame from a connection.
    ///
    /// Registration envelopes update the registry (a registration with no
    /// subjects is an accepted no-op); everything else is fanned out to
    /// subject subscribers, and an envelope that matches nobody is
    /// dropped without error. A header the codec cannot split at all is
    /// returned to the caller instead of being swallowed.
    pub fn route(&self, connection: &Arc<Connection<T>>, raw: &str) -> Result<(), DecodeError> {
        let Decoded { envelope, .. } = connection.receive(raw)?;

        if envelope.action.is_register() {
            tracing::info!(
                conn = %connection.identity(),
                peer = ?connection.peer_id(),
                subjects = ?envelope.subjects,
                "Peer registered"
            );
            self.registry.subscribe(&envelope.subjects, connection);
            // A reconnecting peer may have a backlog from its previous
            // connection; deliver it now rather than on the next publish.
            connection.flush();
        } else {
            self.registry.publish(connection, &envelope);
        }

        Ok(())
    }

    /// Spawn the task that purges closed connections from the registry.
    ///
    /// Every connection's close emits exactly one event, so the purge runs
    /// exactly once per connection. May only be called once per broker.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events_rx = self
            .events_rx
            .lock()
            .expect("broker events poisoned")
            .take()
            .expect("reaper may only be spawned once");
        let broker = Arc::clone(self);

        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                match event {
                    SessionEvent::Closed { identity, peer_id } => {
                        broker.registry.unsubscribe_all(&identity);
                        tracing::info!(conn = %identity, peer = ?peer_id, "Connection reaped");
                    }
                }
            }
        })
    }
}

impl<T: Transport> Default for Broker<T> {
    fn default() -> Self {
        Self::new()
    }
}
