//! Prometheus metrics for the bridge.

use eyre::{Result, WrapErr};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Metrics labelled with the queue they concern.
#[derive(Clone, Debug)]
pub struct BridgeMetrics {
    queue: String,
}

impl BridgeMetrics {
    pub fn new(queue: &str) -> Self {
        Self {
            queue: queue.to_string(),
        }
    }

    /// A delivery was appended to a listener buffer.
    pub fn message_received(&self) {
        counter!(
            "queue_bridge_messages_received_total",
            "queue" => self.queue.clone()
        )
        .increment(1);
    }

    /// A delivery was lost to buffer overflow.
    pub fn message_dropped(&self) {
        counter!(
            "queue_bridge_messages_dropped_total",
            "queue" => self.queue.clone()
        )
        .increment(1);
    }

    /// A formatted message was written to a client.
    pub fn message_forwarded(&self) {
        counter!(
            "queue_bridge_messages_forwarded_total",
            "queue" => self.queue.clone()
        )
        .increment(1);
    }

    /// A delivery was seen by the response drain.
    pub fn response_observed(&self) {
        counter!(
            "queue_bridge_responses_observed_total",
            "queue" => self.queue.clone()
        )
        .increment(1);
    }

    pub fn session_started(&self) {
        counter!("queue_bridge_sessions_total", "queue" => self.queue.clone()).increment(1);
        gauge!("queue_bridge_active_sessions", "queue" => self.queue.clone()).increment(1.0);
    }

    pub fn session_ended(&self) {
        gauge!("queue_bridge_active_sessions", "queue" => self.queue.clone()).decrement(1.0);
    }
}

/// Install the Prometheus recorder and return the handle used by `/metrics`.
pub fn init_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("Failed to install Prometheus recorder")
}
