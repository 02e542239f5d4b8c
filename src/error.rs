//! Crate-level error types

use crate::protocol::DecodeError;
use crate::session::TransportError;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O failure (bind, accept, socket options)
    Io(std::io::Error),
    /// An inbound frame whose header could not be parsed at all
    Decode(DecodeError),
    /// A transport-level send failure
    Transport(TransportError),
    /// WebSocket protocol failure
    WebSocket(tokio_tungstenite::tungstenite::Error),
    /// The WebSocket handshake did not complete in time
    HandshakeTimedOut,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Decode(e) => write!(f, "decode error: {}", e),
            Error::Transport(e) => write!(f, "transport error: {}", e),
            Error::WebSocket(e) => write!(f, "websocket error: {}", e),
            Error::HandshakeTimedOut => write!(f, "websocket handshake timed out"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Decode(e) => Some(e),
            Error::Transport(e) => Some(e),
            Error::WebSocket(e) => Some(e),
            Error::HandshakeTimedOut => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Decode(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::Transport(e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(e)
    }
}
