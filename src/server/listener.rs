//! Broker server listener
//!
//! The concrete transport provider: accepts TCP connections, upgrades
//! them to WebSocket, and wires each socket into the broker. The read
//! half drives `Broker::route`; the write half is wrapped as the
//! [`Transport`] the connection's drain loop writes through.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;

use crate::error::{Error, Result};
use crate::server::broker::Broker;
use crate::server::config::ServerConfig;
use crate::session::{Connection, Transport, TransportError};

/// WebSocket-backed [`Transport`]
///
/// Holds the write half of the socket. Only one drain writes at a time,
/// so the lock is uncontended; it exists to give the drain `&self` access
/// to a half that needs `&mut`.
pub struct WsTransport {
    sink: tokio::sync::Mutex<SplitSink<WebSocketStream<TcpStream>, Message>>,
    send_timeout: std::time::Duration,
}

impl Transport for WsTransport {
    async fn send_text(&self, text: String) -> std::result::Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(self.send_timeout, sink.send(Message::Text(text))).await {
            Err(_) => Err(TransportError::Timeout),
            Ok(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed)) => {
                Err(TransportError::Closed)
            }
            Ok(Err(error)) => Err(TransportError::Failed(error.to_string())),
            Ok(Ok(())) => Ok(()),
        }
    }
}

/// Broker server
///
/// Owns the broker and the accept loop. One spawned task per socket runs
/// the read loop; outbound delivery runs on the per-connection drain
/// tasks the broker's connections spawn themselves.
pub struct BrokerServer {
    config: ServerConfig,
    broker: Arc<Broker<WsTransport>>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl BrokerServer {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            broker: Arc::new(Broker::new()),
            connection_semaphore,
        }
    }

    /// Get a reference to the broker
    pub fn broker(&self) -> &Arc<Broker<WsTransport>> {
        &self.broker
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Broker listening");

        let _reaper_handle = self.broker.spawn_reaper();

        self.accept_loop(&listener).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Broker listening");

        let reaper_handle = self.broker.spawn_reaper();

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        };

        reaper_handle.abort();

        result
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit; the permit rides along with the socket
        // task so the slot frees when the connection ends.
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
            }
        }

        let broker = Arc::clone(&self.broker);
        let config = self.config.clone();

        tokio::spawn(async move {
            let _permit = permit;

            if let Err(error) = serve_socket(broker, config, socket, peer_addr).await {
                tracing::debug!(peer = %peer_addr, error = %error, "Connection error");
            }

            tracing::debug!(peer = %peer_addr, "Connection closed");
        });
    }
}

/// Upgrade one socket and pump its frames into the broker.
async fn serve_socket(
    broker: Arc<Broker<WsTransport>>,
    config: ServerConfig,
    socket: TcpStream,
    peer_addr: SocketAddr,
) -> Result<()> {
    let websocket =
        match tokio::time::timeout(config.handshake_timeout, tokio_tungstenite::accept_async(socket))
            .await
        {
            Err(_) => return Err(Error::HandshakeTimedOut),
            Ok(Err(error)) => return Err(Error::WebSocket(error)),
            Ok(Ok(websocket)) => websocket,
        };

    let (sink, mut stream) = websocket.split();
    let transport = WsTransport {
        sink: tokio::sync::Mutex::new(sink),
        send_timeout: config.send_timeout,
    };

    let connection = broker.attach(transport);
    tracing::info!(conn = %connection.identity(), peer = %peer_addr, "Peer connected");

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => route_frame(&broker, &connection, &text),
            Ok(Message::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => route_frame(&broker, &connection, &text),
                Err(_) => {
                    tracing::warn!(
                        conn = %connection.identity(),
                        "Dropping non-UTF-8 binary frame"
                    );
                }
            },
            Ok(Message::Close(_)) => break,
            // Ping/pong and raw frames are handled by tungstenite
            Ok(_) => {}
            Err(error) => {
                tracing::debug!(
                    conn = %connection.identity(),
                    error = %error,
                    "Read failed"
                );
                break;
            }
        }
    }

    connection.close();
    Ok(())
}

fn route_frame(
    broker: &Broker<WsTransport>,
    connection: &Arc<Connection<WsTransport>>,
    text: &str,
) {
    if let Err(error) = broker.route(connection, text) {
        // Degraded bodies and subject lists route anyway; only a header
        // the codec cannot split at all lands here.
        tracing::warn!(
            conn = %connection.identity(),
            error = %error,
            "Dropping unroutable frame"
        );
    }
}
