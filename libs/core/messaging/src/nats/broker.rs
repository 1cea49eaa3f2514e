//! JetStream implementation of the broker traits

use crate::broker::{Connector, MessageBroker, MessageStream, ReceivedMessage};
use crate::error::BrokerError;
use async_nats::jetstream::consumer::pull::{Config as ConsumerConfig, Stream as PullStream};
use async_nats::jetstream::consumer::AckPolicy;
use async_nats::jetstream::stream::{Config as StreamConfig, RetentionPolicy, Stream};
use async_nats::jetstream::{self, Context};
use async_nats::Client;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Upper bound on messages a queue keeps while nobody consumes it.
const MAX_QUEUED_MESSAGES: i64 = 100_000;

/// How long an unconsumed message is kept.
const MAX_MESSAGE_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Stream and durable consumer name for `queue`.
///
/// JetStream names may not contain `.`, `*`, `>` or whitespace, so every
/// character outside `[A-Za-z0-9_-]` becomes `_`.
pub fn stream_name(queue: &str) -> String {
    queue
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Opens one NATS client per `connect` call.
pub struct NatsConnector {
    url: String,
    name: String,
    opened: AtomicU64,
}

impl NatsConnector {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            opened: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Connector for NatsConnector {
    type Broker = NatsBroker;

    async fn connect(&self) -> Result<NatsBroker, BrokerError> {
        let seq = self.opened.fetch_add(1, Ordering::Relaxed);
        NatsBroker::connect(&self.url, &format!("{}-{}", self.name, seq)).await
    }
}

/// JetStream-backed broker connection.
///
/// Each queue is a work-queue stream capturing the subject of the same name,
/// consumed through a durable pull consumer shared by every subscriber.
pub struct NatsBroker {
    client: Client,
    jetstream: Context,
    url: String,
    closed: AtomicBool,
}

impl NatsBroker {
    async fn connect(url: &str, name: &str) -> Result<Self, BrokerError> {
        let client = async_nats::ConnectOptions::new()
            .name(name)
            .connect(url)
            .await
            .map_err(|e| BrokerError::connection(url, e))?;

        debug!(url = %url, name = %name, "Connected to NATS");
        Ok(Self {
            jetstream: jetstream::new(client.clone()),
            client,
            url: url.to_string(),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }

    /// Get or create the work-queue stream backing `queue`.
    async fn ensure_stream(&self, queue: &str) -> Result<Stream, BrokerError> {
        let name = stream_name(queue);
        match self.jetstream.get_stream(&name).await {
            Ok(stream) => {
                debug!(stream = %name, "Stream already exists");
                Ok(stream)
            }
            Err(_) => {
                info!(stream = %name, subject = %queue, "Creating stream");
                self.jetstream
                    .create_stream(StreamConfig {
                        name,
                        subjects: vec![queue.to_string()],
                        retention: RetentionPolicy::WorkQueue,
                        max_messages: MAX_QUEUED_MESSAGES,
                        max_age: MAX_MESSAGE_AGE,
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| BrokerError::subscribe(queue, e))
            }
        }
    }

    /// Get or create the durable pull consumer for `queue`.
    async fn ensure_consumer(
        &self,
        stream: &Stream,
        queue: &str,
    ) -> Result<jetstream::consumer::Consumer<ConsumerConfig>, BrokerError> {
        let durable = stream_name(queue);
        match stream.get_consumer::<ConsumerConfig>(&durable).await {
            Ok(consumer) => {
                debug!(consumer = %durable, "Consumer already exists");
                Ok(consumer)
            }
            Err(_) => {
                info!(consumer = %durable, "Creating durable consumer");
                stream
                    .create_consumer(ConsumerConfig {
                        durable_name: Some(durable.clone()),
                        name: Some(durable),
                        ack_policy: AckPolicy::Explicit,
                        filter_subject: queue.to_string(),
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| BrokerError::subscribe(queue, e))
            }
        }
    }
}

#[async_trait]
impl MessageBroker for NatsBroker {
    async fn declare(&self, queue: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.ensure_stream(queue).await.map(|_| ())
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn subscribe(&self, queue: &str) -> Result<Box<dyn MessageStream>, BrokerError> {
        self.ensure_open()?;
        let stream = self.ensure_stream(queue).await?;
        let consumer = self.ensure_consumer(&stream, queue).await?;
        let messages = consumer
            .messages()
            .await
            .map_err(|e| BrokerError::subscribe(queue, e))?;

        Ok(Box::new(NatsMessageStream { messages }))
    }

    async fn publish_raw(&self, queue: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.ensure_stream(queue).await?;
        self.jetstream
            .publish(queue.to_string(), payload.to_vec().into())
            .await
            .map_err(|e| BrokerError::publish(queue, e))?
            .await
            .map_err(|e| BrokerError::publish(queue, e))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Pending acks go out before the client is dropped with this broker.
        self.client
            .flush()
            .await
            .map_err(|e| BrokerError::connection(&self.url, e))?;
        debug!(url = %self.url, "NATS connection closed");
        Ok(())
    }
}

/// Pull-consumer deliveries, acknowledged as they are handed out.
struct NatsMessageStream {
    messages: PullStream,
}

#[async_trait]
impl MessageStream for NatsMessageStream {
    async fn next(&mut self) -> Option<ReceivedMessage> {
        loop {
            match self.messages.next().await? {
                Ok(message) => {
                    if let Err(e) = message.ack().await {
                        warn!(error = %e, "Failed to acknowledge message");
                    }
                    return Some(ReceivedMessage::new(
                        message.message.subject.to_string(),
                        message.message.payload.to_vec(),
                    ));
                }
                Err(e) => warn!(error = %e, "Error receiving message"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_name_keeps_plain_queue_names() {
        assert_eq!(stream_name("test_queue"), "test_queue");
        assert_eq!(stream_name("response-queue"), "response-queue");
    }

    #[test]
    fn test_stream_name_replaces_reserved_characters() {
        assert_eq!(stream_name("orders.eu.*"), "orders_eu__");
        assert_eq!(stream_name("a b>c"), "a_b_c");
    }
}
