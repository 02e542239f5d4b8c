//! Subject subscription registry
//!
//! The registry maps subject names to the connections that want them and
//! fans published envelopes out to every match.
//!
//! # Architecture
//!
//! ```text
//!                    Arc<SubjectRegistry>
//!               ┌────────────────────────────┐
//!               │ subjects: HashMap<subject, │
//!               │   HashMap<identity,        │
//!               │     Arc<Connection>>>      │
//!               └─────────────┬──────────────┘
//!                             │
//!          ┌──────────────────┼──────────────────┐
//!          ▼                  ▼                  ▼
//!     [Publisher]        [Subscriber]       [Subscriber]
//!     receive() ──► publish() ──► send() ──► drain ──► transport
//! ```
//!
//! Fan-out deduplicates recipients across subjects: a connection
//! subscribed to two subjects an envelope names still receives exactly
//! one copy.

pub mod store;

pub use store::SubjectRegistry;
