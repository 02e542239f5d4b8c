//! Broker client connector
//!
//! The peer-side counterpart of the broker: connects over WebSocket,
//! registers its subjects, dispatches every incoming envelope to the
//! handlers registered for its subjects, and reconnects with a short
//! fixed delay whenever the link drops. On reconnect it re-registers, so
//! the broker delivers whatever queued up for this peer while it was
//! away.

use std::collections::HashMap;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::error::Result;
use crate::protocol::{codec, Decoded, Envelope};

use super::config::ClientConfig;

/// Events from the connector
#[derive(Debug)]
pub enum ClientEvent {
    /// Connected and registered with the broker
    Connected,

    /// An envelope arrived (emitted after subject handlers ran)
    Envelope(Envelope),

    /// The link dropped; the connector will retry
    Disconnected,
}

type Handler = Box<dyn Fn(&Envelope) + Send + Sync>;

/// Cheap handle for sending through a running connector
#[derive(Clone)]
pub struct BusSender {
    identity: String,
    outbound_tx: mpsc::UnboundedSender<Envelope>,
}

impl BusSender {
    /// Identity this sender publishes under
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Publish a data envelope.
    ///
    /// `to_id` may be empty for a plain subject broadcast. Delivery is
    /// fire-and-forget: the broker never reports whether anyone received
    /// it.
    pub fn send(&self, subjects: Vec<String>, to_id: impl Into<String>, body: Value) {
        let envelope = Envelope::data(self.identity.clone(), to_id, subjects, body);
        let _ = self.outbound_tx.send(envelope);
    }

    /// Register for additional subjects on the live connection.
    ///
    /// The new subjects are also included in re-registrations after a
    /// reconnect.
    pub fn add_subjects(&self, subjects: Vec<String>) {
        let envelope = Envelope::register(self.identity.clone(), subjects);
        let _ = self.outbound_tx.send(envelope);
    }
}

/// Broker client
///
/// # Example
/// ```no_run
/// use pushbus_rs::client::{BusConnector, ClientConfig};
///
/// # async fn example() {
/// let config = ClientConfig::new("ws://localhost:2222").subject("alerts");
/// let (mut client, mut events) = BusConnector::new(config);
///
/// client.on("alerts", |envelope| {
///     println!("alert: {:?}", envelope.body);
/// });
///
/// let sender = client.sender();
/// tokio::spawn(client.run());
///
/// while let Some(event) = events.recv().await {
///     println!("event: {:?}", event);
/// }
/// # let _ = sender;
/// # }
/// ```
pub struct BusConnector {
    config: ClientConfig,
    identity: String,
    handlers: HashMap<String, Vec<Handler>>,
    event_tx: mpsc::Sender<ClientEvent>,
    outbound_tx: mpsc::UnboundedSender<Envelope>,
    outbound_rx: mpsc::UnboundedReceiver<Envelope>,
}

impl BusConnector {
    /// Create a new connector.
    ///
    /// Returns the connector and a receiver for events.
    pub fn new(config: ClientConfig) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let connector = Self {
            config,
            identity: Uuid::new_v4().to_string(),
            handlers: HashMap::new(),
            event_tx,
            outbound_tx,
            outbound_rx,
        };

        (connector, event_rx)
    }

    /// This client's identity on the wire
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Register a handler for envelopes carrying a subject.
    ///
    /// An envelope naming several registered subjects triggers each
    /// subject's handlers once.
    pub fn on(
        &mut self,
        subject: impl Into<String>,
        handler: impl Fn(&Envelope) + Send + Sync + 'static,
    ) -> &mut Self {
        self.handlers
            .entry(subject.into())
            .or_default()
            .push(Box::new(handler));
        self
    }

    /// Handle for sending while the connector runs
    pub fn sender(&self) -> BusSender {
        BusSender {
            identity: self.identity.clone(),
            outbound_tx: self.outbound_tx.clone(),
        }
    }

    /// Drive the connection.
    ///
    /// Connects, registers, pumps envelopes in both directions, and on
    /// any disconnect waits the configured delay and starts over. Runs
    /// until the task is dropped.
    pub async fn run(mut self) {
        loop {
            let result = Self::connect_once(
                &mut self.config,
                &self.identity,
                &self.handlers,
                &mut self.outbound_rx,
                &self.event_tx,
            )
            .await;

            match result {
                Ok(()) => tracing::debug!(client = %self.identity, "Connection closed"),
                Err(error) => {
                    tracing::debug!(client = %self.identity, error = %error, "Connection lost")
                }
            }

            let _ = self.event_tx.send(ClientEvent::Disconnected).await;
            tokio::time::sleep(self.config.reconnect_delay).await;
        }
    }

    async fn connect_once(
        config: &mut ClientConfig,
        identity: &str,
        handlers: &HashMap<String, Vec<Handler>>,
        outbound_rx: &mut mpsc::UnboundedReceiver<Envelope>,
        event_tx: &mpsc::Sender<ClientEvent>,
    ) -> Result<()> {
        let (websocket, _) = tokio_tungstenite::connect_async(config.url.as_str()).await?;
        let (mut sink, mut stream) = websocket.split();

        // Announce our subjects before anything else can arrive
        let register = Envelope::register(identity.to_owned(), config.subjects.clone());
        sink.send(Message::Text(codec::encode(&register))).await?;

        tracing::info!(client = %identity, url = %config.url, "Connected and registered");
        let _ = event_tx.send(ClientEvent::Connected).await;

        loop {
            tokio::select! {
                outbound = outbound_rx.recv() => {
                    let Some(envelope) = outbound else {
                        // All senders gone; nothing left to do here
                        return Ok(());
                    };
                    if envelope.action.is_register() {
                        // Remember late additions so a reconnect
                        // re-registers the full set
                        for subject in &envelope.subjects {
                            if !config.subjects.contains(subject) {
                                config.subjects.push(subject.clone());
                            }
                        }
                    }
                    sink.send(Message::Text(codec::encode(&envelope))).await?;
                }
                inbound = stream.next() => {
                    match inbound {
                        None | Some(Ok(Message::Close(_))) => return Ok(()),
                        Some(Err(error)) => return Err(error.into()),
                        Some(Ok(Message::Text(text))) => {
                            if let Some(envelope) = dispatch(handlers, &text) {
                                let _ = event_tx.send(ClientEvent::Envelope(envelope)).await;
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            if let Ok(text) = String::from_utf8(data) {
                                if let Some(envelope) = dispatch(handlers, &text) {
                                    let _ = event_tx.send(ClientEvent::Envelope(envelope)).await;
                                }
                            }
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }
}

/// Decode one frame and run the handlers for each of its subjects.
///
/// One envelope can cover several subjects and thus trigger several
/// handlers. Returns the envelope for the event stream, or nothing if the
/// frame was unusable.
fn dispatch(handlers: &HashMap<String, Vec<Handler>>, text: &str) -> Option<Envelope> {
    let Decoded {
        envelope,
        body_degraded,
    } = match codec::decode(text) {
        Ok(decoded) => decoded,
        Err(error) => {
            tracing::warn!(error = %error, "Dropping unroutable frame");
            return None;
        }
    };

    if body_degraded {
        tracing::warn!(envelope = %envelope.id, "Envelope body was not valid JSON");
    }

    for subject in &envelope.subjects {
        if let Some(subject_handlers) = handlers.get(subject) {
            for handler in subject_handlers {
                handler(&envelope);
            }
        }
    }

    Some(envelope)
}
