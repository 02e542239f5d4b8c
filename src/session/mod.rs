//! Connection sessions
//!
//! One session per accepted link. The connection decodes inbound frames,
//! queues outbound envelopes in the shared [`crate::queue::QueueTable`],
//! and drains them through the provider-supplied [`Transport`] one at a
//! time. Lifecycle changes surface as [`SessionEvent`]s on the broker's
//! channel rather than through mutable callback slots.

pub mod connection;
pub mod state;
pub mod transport;

pub use connection::{Connection, SessionEvent};
pub use state::{LinkState, SendState, SessionState};
pub use transport::{Transport, TransportError};
