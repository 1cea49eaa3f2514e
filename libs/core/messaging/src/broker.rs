//! Capability traits every broker backend implements.

use crate::error::BrokerError;
use async_trait::async_trait;

/// A message delivered from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Queue (subject) the message was delivered on
    pub subject: String,
    /// Raw payload bytes
    pub payload: Vec<u8>,
}

impl ReceivedMessage {
    pub fn new(subject: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
        }
    }

    /// Payload as text, replacing invalid UTF-8 sequences.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Opens broker connections.
///
/// One connector is shared by the whole process; every consumer asks it for
/// its own connection so that closing one consumer never affects another.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Broker: MessageBroker;

    /// Open a new connection.
    async fn connect(&self) -> Result<Self::Broker, BrokerError>;
}

/// An open broker connection.
#[async_trait]
pub trait MessageBroker: Send + Sync + 'static {
    /// Make sure `queue` exists so messages published to it are kept until a
    /// subscriber takes them. Idempotent.
    async fn declare(&self, queue: &str) -> Result<(), BrokerError>;

    /// Attach to a queue, declaring it first. Competing subscribers on the same queue share its
    /// messages; each message goes to exactly one of them.
    async fn subscribe(&self, queue: &str) -> Result<Box<dyn MessageStream>, BrokerError>;

    /// Publish raw bytes to a queue.
    async fn publish_raw(&self, queue: &str, payload: &[u8]) -> Result<(), BrokerError>;

    /// Close the connection. Streams obtained from it end. Closing twice is a no-op.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Stream of incoming messages
#[async_trait]
pub trait MessageStream: Send {
    /// Receive the next message; `None` once the subscription has ended.
    ///
    /// The message is acknowledged before it is returned. Dropping the future
    /// loses no message: anything not yet acknowledged is redelivered.
    async fn next(&mut self) -> Option<ReceivedMessage>;
}
