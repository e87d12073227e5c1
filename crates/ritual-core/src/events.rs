//! Progress and lifecycle events.
//!
//! Components report what they are doing through an [`EventSink`]. The set of
//! event kinds is closed; sinks match on [`Event`] to render them.

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// A single progress or lifecycle notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// An operation started
    Start { operation: String, message: String },

    /// Periodic progress of a running operation
    Update {
        operation: String,
        bytes: u64,
        /// Completion percentage, present only when the total size is known
        percent: Option<u8>,
    },

    /// An operation completed
    Finish { operation: String, message: String },

    /// An operation failed
    Error { operation: String, message: String },

    /// Something the operator should look at, e.g. a pending deletion
    Prompt { operation: String, message: String },
}

impl Event {
    pub fn start(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Start {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn update(operation: impl Into<String>, bytes: u64, percent: Option<u8>) -> Self {
        Self::Update {
            operation: operation.into(),
            bytes,
            percent,
        }
    }

    pub fn finish(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Finish {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn error(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn prompt(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Prompt {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Name of the operation the event belongs to.
    pub fn operation(&self) -> &str {
        match self {
            Self::Start { operation, .. }
            | Self::Update { operation, .. }
            | Self::Finish { operation, .. }
            | Self::Error { operation, .. }
            | Self::Prompt { operation, .. } => operation,
        }
    }
}

/// Receiver of [`Event`]s.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: Event) {}
}

/// Sink that writes events to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: Event) {
        match event {
            Event::Start { operation, message } => info!("[{}] {}", operation, message),
            Event::Update {
                operation,
                bytes,
                percent: Some(percent),
            } => debug!("[{}] {} bytes ({}%)", operation, bytes, percent),
            Event::Update {
                operation, bytes, ..
            } => debug!("[{}] {} bytes", operation, bytes),
            Event::Finish { operation, message } => info!("[{}] {}", operation, message),
            Event::Error { operation, message } => error!("[{}] {}", operation, message),
            Event::Prompt { operation, message } => warn!("[{}] {}", operation, message),
        }
    }
}

/// Sink that forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: Event) {
        // receiver gone means nobody is listening anymore
        let _ = self.tx.send(event);
    }
}
