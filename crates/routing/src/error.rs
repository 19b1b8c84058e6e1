//! Routing error types

use thiserror::Error;

/// Result type for routing operations
pub type Result<T> = std::result::Result<T, RoutingError>;

/// Errors that can occur while building a selector
#[derive(Debug, Error)]
pub enum RoutingError {
    /// Queue name not registered with the builder
    #[error("unknown queue '{name}' in selector configuration")]
    UnknownQueue {
        /// Name of the missing queue
        name: String,
    },

    /// Selector would route to nothing
    #[error("selector has no queues")]
    NoQueues,

    /// Multiplexing selector without a header name
    #[error("multiplexing selector requires a header name")]
    MissingHeader,

    /// More queues than `QueueId` can address
    #[error("too many queues ({count}, max {max})")]
    TooManyQueues { count: usize, max: usize },
}

impl RoutingError {
    /// Create an UnknownQueue error
    #[inline]
    pub fn unknown_queue(name: impl Into<String>) -> Self {
        Self::UnknownQueue { name: name.into() }
    }
}
