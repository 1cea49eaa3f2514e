//! Broker error types.

use thiserror::Error;

/// Error raised by a broker backend.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker could not be reached
    #[error("failed to connect to broker at {url}: {message}")]
    Connection { url: String, message: String },

    /// Attaching to a queue failed
    #[error("failed to subscribe to queue {queue}: {message}")]
    Subscribe { queue: String, message: String },

    /// Publishing failed
    #[error("failed to publish to queue {queue}: {message}")]
    Publish { queue: String, message: String },

    /// The connection was closed before the operation
    #[error("broker connection is closed")]
    Closed,
}

impl BrokerError {
    pub fn connection(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Connection {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn subscribe(queue: impl Into<String>, message: impl ToString) -> Self {
        Self::Subscribe {
            queue: queue.into(),
            message: message.to_string(),
        }
    }

    pub fn publish(queue: impl Into<String>, message: impl ToString) -> Self {
        Self::Publish {
            queue: queue.into(),
            message: message.to_string(),
        }
    }
}
