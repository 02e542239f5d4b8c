//! Broker client
//!
//! Peer-side counterpart of the broker server:
//! - Registering for subjects and receiving matching envelopes
//! - Publishing envelopes to other peers
//! - Automatic reconnect with re-registration

pub mod config;
pub mod connector;

pub use config::ClientConfig;
pub use connector::{BusConnector, BusSender, ClientEvent};
