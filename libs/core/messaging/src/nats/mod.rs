//! NATS backend.
//!
//! Each queue is a JetStream work-queue stream capturing the subject of the
//! same name, so messages published while nobody is subscribed are kept until
//! a consumer attaches. Subscribers share one durable pull consumer named
//! after the queue and compete for its messages. Every delivery is
//! acknowledged as it is handed out; a message left unacknowledged is
//! redelivered.
//!
//! # Example
//!
//! ```rust,ignore
//! use messaging::nats::NatsConnector;
//! use messaging::{Connector, MessageBroker};
//!
//! let connector = NatsConnector::new("nats://localhost:4222", "queue-bridge");
//! let broker = connector.connect().await?;
//! let mut stream = broker.subscribe("test_queue").await?;
//! ```

mod broker;

pub use broker::{stream_name, NatsBroker, NatsConnector};
