//! Wire protocol: envelope types and their text codec
//!
//! Every unit of communication between peers and the broker is an
//! [`Envelope`]: five header fields plus an optional JSON body, flattened
//! to a single text frame. The codec is deliberately permissive on the body
//! and subject list (a damaged payload degrades the envelope instead of
//! rejecting it) and strict only about the header structure itself.

pub mod codec;
pub mod envelope;

pub use codec::{decode, encode, DecodeError, Decoded};
pub use envelope::{Action, Envelope};
