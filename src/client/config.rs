//! Client configuration

use std::time::Duration;

/// Connector configuration options
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker URL, e.g. `ws://localhost:2222`
    pub url: String,

    /// Subjects to register for on every (re)connect
    pub subjects: Vec<String>,

    /// Fixed delay before a reconnect attempt
    pub reconnect_delay: Duration,
}

impl ClientConfig {
    /// Create a config for the given broker URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            subjects: Vec::new(),
            reconnect_delay: Duration::from_millis(100),
        }
    }

    /// Set the subjects to register for
    pub fn subjects(mut self, subjects: Vec<String>) -> Self {
        self.subjects = subjects;
        self
    }

    /// Add one subject to register for
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subjects.push(subject.into());
        self
    }

    /// Set the reconnect delay
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}
