//! Envelope types for subject routing
//!
//! This module defines the envelope that travels between peers and the
//! broker, and the action field that distinguishes registration envelopes
//! from ordinary data.

use serde_json::Value;
use uuid::Uuid;

/// Literal that separates the envelope header from the JSON body on the wire.
pub const BODY_SEPARATOR: &str = "[-O-]";

/// Wire string for registration envelopes.
pub const ACTION_REGISTER: &str = "ACTION_REGISTER";

/// Wire string for acknowledgement envelopes.
pub const ACTION_ACKNOWLEDGED: &str = "ACTION_ACKNOWLEDGED";

/// What the broker should do with an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    /// Subscribe the sending connection to the envelope's subjects
    Register,
    /// Application-level acknowledgement (routed like plain data)
    Acknowledged,
    /// Plain data envelope (empty action field on the wire)
    #[default]
    Data,
}

impl Action {
    /// Wire representation of this action
    pub fn as_wire(&self) -> &'static str {
        match self {
            Action::Register => ACTION_REGISTER,
            Action::Acknowledged => ACTION_ACKNOWLEDGED,
            Action::Data => "",
        }
    }

    /// Parse the action field of an incoming header.
    ///
    /// Anything that is not a recognized action string is treated as plain
    /// data; routing only ever branches on registration.
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            ACTION_REGISTER => Action::Register,
            ACTION_ACKNOWLEDGED => Action::Acknowledged,
            _ => Action::Data,
        }
    }

    /// Whether this is a registration envelope
    pub fn is_register(&self) -> bool {
        matches!(self, Action::Register)
    }
}

/// One routed unit of communication
///
/// The `id` is assigned once at creation and stays put for the envelope's
/// lifetime; the only way to change it is [`Envelope::reply_to`], which
/// associates this envelope with the one it answers.
///
/// `to_id` is carried opaquely for the peers' benefit; the broker routes on
/// subjects only, and an empty `to_id` means "everyone subscribed".
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Envelope identifier (v4 UUID string)
    pub id: String,

    /// Identity of the sending peer
    pub from_id: String,

    /// Addressed peer, or empty for subject broadcast
    pub to_id: String,

    /// Subjects this envelope belongs to (possibly empty)
    pub subjects: Vec<String>,

    /// Structured payload; absent when missing or undecodable
    pub body: Option<Value>,

    /// Routing action
    pub action: Action,
}

impl Envelope {
    /// Create a plain data envelope with a fresh id.
    pub fn data(
        from_id: impl Into<String>,
        to_id: impl Into<String>,
        subjects: Vec<String>,
        body: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from_id: from_id.into(),
            to_id: to_id.into(),
            subjects,
            body: Some(body),
            action: Action::Data,
        }
    }

    /// Create a registration envelope announcing the subjects a peer wants.
    ///
    /// Registration envelopes carry no body and are never fanned out; the
    /// broker consumes them to update its subscription registry.
    pub fn register(from_id: impl Into<String>, subjects: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from_id: from_id.into(),
            to_id: String::new(),
            subjects,
            body: None,
            action: Action::Register,
        }
    }

    /// Associate this envelope with the envelope it replies to.
    ///
    /// Overwrites the id with the id being answered so the original sender
    /// can correlate the response.
    pub fn reply_to(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    /// Whether this envelope is addressed to everyone on its subjects
    pub fn is_broadcast(&self) -> bool {
        self.to_id.is_empty()
    }
}
