//! NATS test infrastructure
//!
//! Provides a `TestNats` helper that starts a JetStream-enabled NATS server in
//! a container.

use async_nats::Client;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::nats::Nats;

/// Test NATS wrapper that ensures proper cleanup
///
/// The container is stopped and removed when this struct is dropped.
pub struct TestNats {
    #[allow(dead_code)]
    container: ContainerAsync<Nats>,
    client: Client,
    pub connection_string: String,
}

impl TestNats {
    /// Start a NATS server and connect a client to it
    pub async fn new() -> Self {
        let container = Nats::default()
            .with_tag("latest")
            .with_cmd(["-js"])
            .start()
            .await
            .expect("Failed to start NATS container");

        let host_port = container
            .get_host_port_ipv4(4222)
            .await
            .expect("Failed to get NATS port");

        let connection_string = format!("nats://127.0.0.1:{}", host_port);

        let client = async_nats::connect(&connection_string)
            .await
            .expect("Failed to connect to NATS");

        tracing::info!(port = host_port, "Test NATS ready with JetStream");

        Self {
            container,
            client,
            connection_string,
        }
    }

    /// Get a JetStream context
    pub fn jetstream(&self) -> async_nats::jetstream::Context {
        async_nats::jetstream::new(self.client.clone())
    }

    /// Get the connection string for manual client creation
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Publish `payload` to `subject` and wait until the server has it
    pub async fn publish(&self, subject: &str, payload: &str) {
        self.client
            .publish(subject.to_string(), payload.to_string().into())
            .await
            .expect("Failed to publish");
        self.client.flush().await.expect("Failed to flush");
    }
}

impl Drop for TestNats {
    fn drop(&mut self) {
        tracing::debug!("Cleaning up test NATS container");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_nats::jetstream::consumer::pull::Config as ConsumerConfig;
    use async_nats::jetstream::stream::{Config as StreamConfig, RetentionPolicy};
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_work_queue_keeps_messages_published_before_consumer() {
        let nats = TestNats::new().await;
        let js = nats.jetstream();

        let stream = js
            .create_stream(StreamConfig {
                name: "bridge_test".to_string(),
                subjects: vec!["bridge.test".to_string()],
                retention: RetentionPolicy::WorkQueue,
                ..Default::default()
            })
            .await
            .unwrap();

        // Nobody is consuming yet.
        nats.publish("bridge.test", "hello").await;

        let consumer = stream
            .create_consumer(ConsumerConfig {
                durable_name: Some("bridge_test".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let mut messages = consumer.messages().await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), messages.next())
            .await
            .expect("Timeout waiting for message")
            .unwrap()
            .unwrap();
        assert_eq!(received.message.payload.as_ref(), b"hello");
        received.ack().await.unwrap();
    }
}
