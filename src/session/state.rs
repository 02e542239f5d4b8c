//! Connection state machine
//!
//! Two independent dimensions per connection: the lifecycle of the link
//! itself (open until closed, never reopened) and the state of the
//! serialized sender (idle, or one drain in flight). Both are atomics
//! because their transitions gate concurrent work: the close transition
//! decides which caller fires the lifecycle event, and the send transition
//! decides which caller starts the drain.

use std::sync::atomic::{AtomicU8, Ordering};

const LINK_OPEN: u8 = 0;
const LINK_CLOSED: u8 = 1;

const SEND_IDLE: u8 = 0;
const SEND_SENDING: u8 = 1;

/// Lifecycle state of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Link is usable
    Open,
    /// Link is closed; a fresh connection is required to resume
    Closed,
}

/// State of the serialized sender
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    /// No drain in flight
    Idle,
    /// A drain is emptying the outbound queue
    Sending,
}

/// Atomic state pair for one connection
#[derive(Debug)]
pub struct SessionState {
    link: AtomicU8,
    send: AtomicU8,
}

impl SessionState {
    /// Fresh state: open link, idle sender.
    pub fn new() -> Self {
        Self {
            link: AtomicU8::new(LINK_OPEN),
            send: AtomicU8::new(SEND_IDLE),
        }
    }

    /// Current link state
    pub fn link(&self) -> LinkState {
        match self.link.load(Ordering::Acquire) {
            LINK_OPEN => LinkState::Open,
            _ => LinkState::Closed,
        }
    }

    /// Current sender state
    pub fn send(&self) -> SendState {
        match self.send.load(Ordering::Acquire) {
            SEND_IDLE => SendState::Idle,
            _ => SendState::Sending,
        }
    }

    /// Whether the link is still open
    pub fn is_open(&self) -> bool {
        self.link() == LinkState::Open
    }

    /// Transition the link to closed.
    ///
    /// Returns `true` for exactly one caller: the one whose transition
    /// actually closed the link. Everyone else sees a no-op.
    pub fn mark_closed(&self) -> bool {
        self.link
            .compare_exchange(LINK_OPEN, LINK_CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Try to claim the sending slot.
    ///
    /// Returns `true` if this caller transitioned the sender from idle to
    /// sending and therefore owns the drain; `false` if a drain is already
    /// in flight.
    pub fn begin_send(&self) -> bool {
        self.send
            .compare_exchange(SEND_IDLE, SEND_SENDING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the sending slot.
    pub fn finish_send(&self) {
        self.send.store(SEND_IDLE, Ordering::Release);
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
