//! Broker abstractions for queue consumers.
//!
//! Consumers open one connection per subscriber through a [`Connector`], attach
//! to a named queue with [`MessageBroker::subscribe`] and pull deliveries from
//! the returned [`MessageStream`]. A queue declared with
//! [`MessageBroker::declare`] keeps its messages until someone subscribes.
//! Deliveries are acknowledged as they are handed to the stream.
//!
//! # Backends
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────────────────────────┐
//! │  Your consumer   │     │              Backends                │
//! │                  │     │                                      │
//! │  Connector ──────│─────│─▶ InMemoryBroker   NatsConnector     │
//! │  MessageBroker   │     │   (tests, local)   (feature "nats")  │
//! │  MessageStream   │     │                                      │
//! └──────────────────┘     └──────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use messaging::{Connector, MessageBroker, InMemoryBroker};
//!
//! let broker = InMemoryBroker::new();
//! let connection = broker.connect().await?;
//! let mut stream = connection.subscribe("orders").await?;
//!
//! broker.publish("orders", b"{\"id\":1}");
//! let delivery = stream.next().await;
//! ```

mod broker;
mod error;
mod memory;

#[cfg(feature = "nats")]
pub mod nats;

pub use broker::{Connector, MessageBroker, MessageStream, ReceivedMessage};
pub use error::BrokerError;
pub use memory::{InMemoryBroker, InMemoryConnection};
