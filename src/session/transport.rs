//! Transport abstraction
//!
//! The broker core never touches a socket directly. Whatever accepts the
//! physical connection (the WebSocket provider in this crate, something
//! else in tests) hands each connection an implementation of [`Transport`]
//! and the drain loop calls it for every outbound frame.

use std::future::Future;

/// Failure of a transport-level send
#[derive(Debug)]
pub enum TransportError {
    /// The link is closed
    Closed,
    /// The write did not complete within the provider's configured window
    Timeout,
    /// Any other transport-level failure
    Failed(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Closed => write!(f, "transport is closed"),
            TransportError::Timeout => write!(f, "transport send timed out"),
            TransportError::Failed(reason) => write!(f, "transport send failed: {}", reason),
        }
    }
}

impl std::error::Error for TransportError {}

/// Byte-level send primitive supplied by the transport provider
///
/// `send_text` resolves once the transport has accepted the frame; an error
/// means the frame was not delivered and the link should be considered
/// unusable. The drain loop is the only caller, and it never issues two
/// sends for the same connection concurrently.
pub trait Transport: Send + Sync + 'static {
    /// Deliver one encoded envelope frame to the peer.
    fn send_text(&self, text: String) -> impl Future<Output = Result<(), TransportError>> + Send;
}
