//! Subject-routed pub/sub message broker over WebSockets
//!
//! Clients hold one long-lived connection to the broker, register the
//! subjects they care about, and publish envelopes that fan out to every
//! other connection subscribed to a matching subject.
//!
//! # Architecture
//!
//! ```text
//!   peer ──ws──► BrokerServer ──► Connection::receive ──► Broker::route
//!                                                            │
//!                              ┌─────────────────────────────┤
//!                              ▼ REGISTER                    ▼ publish
//!                      SubjectRegistry::subscribe   SubjectRegistry::publish
//!                                                            │
//!                                            Connection::send (per target)
//!                                                            │
//!                                            QueueTable ──► drain ──► ws
//! ```
//!
//! Per-connection ordering is the load-bearing guarantee: envelopes reach
//! a connection's transport in exact `send` order, one drain at a time,
//! and a failed write puts the failed envelope back at the queue head so
//! a reconnecting peer retries it first.
//!
//! # Server example
//!
//! ```no_run
//! use pushbus_rs::{BrokerServer, ServerConfig};
//!
//! # async fn example() -> pushbus_rs::Result<()> {
//! let config = ServerConfig::default().max_connections(1024);
//! let server = BrokerServer::new(config);
//! server.run().await
//! # }
//! ```

pub mod client;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod server;
pub mod session;

pub use error::{Error, Result};
pub use protocol::{Action, Envelope};
pub use queue::QueueTable;
pub use registry::SubjectRegistry;
pub use server::{Broker, BrokerServer, ServerConfig};
pub use session::{Connection, SessionEvent, Transport, TransportError};
