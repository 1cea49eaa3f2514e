//! Background Response Drain: logs everything arriving on the response queue.

use crate::health::HealthState;
use crate::metrics::BridgeMetrics;
use crate::shutdown::{cancelled, Shutdown};
use messaging::{Connector, MessageBroker};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

pub const RESPONSE_QUEUE: &str = "response_queue";

pub struct ResponseDrain<C: Connector> {
    connector: Arc<C>,
    queue_name: String,
    health: Option<HealthState>,
}

impl<C: Connector> ResponseDrain<C> {
    pub fn new(connector: Arc<C>, queue_name: impl Into<String>) -> Self {
        Self {
            connector,
            queue_name: queue_name.into(),
            health: None,
        }
    }

    /// Report broker connectivity to the readiness probe.
    pub fn with_health(mut self, health: HealthState) -> Self {
        self.health = Some(health);
        self
    }

    /// Observe the response queue until shutdown.
    ///
    /// Connection and subscription failures are logged and end the drain.
    #[instrument(name = "response_drain", skip_all, fields(queue = %self.queue_name))]
    pub async fn run(&self, mut shutdown: Shutdown) {
        let broker = match self.connector.connect().await {
            Ok(broker) => broker,
            Err(e) => {
                error!(error = %e, "Response drain could not connect to the broker");
                self.report(false, Some(e.to_string())).await;
                return;
            }
        };

        let mut stream = match broker.subscribe(&self.queue_name).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "Response drain could not subscribe");
                self.report(false, Some(e.to_string())).await;
                close(&broker).await;
                return;
            }
        };

        self.report(true, None).await;
        info!("Response drain started");

        let metrics = BridgeMetrics::new(&self.queue_name);
        let mut observed: u64 = 0;
        loop {
            tokio::select! {
                _ = cancelled(&mut shutdown) => break,
                delivery = stream.next() => match delivery {
                    Some(message) => {
                        observed += 1;
                        metrics.response_observed();
                        info!(
                            subject = %message.subject,
                            bytes = message.payload.len(),
                            payload = %message.payload_text(),
                            "Response received"
                        );
                    }
                    None => {
                        warn!("Response subscription ended by the broker");
                        self.report(false, Some("response subscription ended".to_string())).await;
                        break;
                    }
                },
            }
        }

        close(&broker).await;
        info!(observed, "Response drain stopped");
    }

    async fn report(&self, connected: bool, error: Option<String>) {
        if let Some(health) = &self.health {
            health.set_broker_connected(connected).await;
            health.set_error(error).await;
        }
    }
}

async fn close<B: MessageBroker>(broker: &B) {
    match broker.close().await {
        Ok(()) => debug!("Response drain connection closed"),
        Err(e) => warn!(error = %e, "Error while closing response drain connection"),
    }
}
