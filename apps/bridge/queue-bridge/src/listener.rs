//! Queue Bridge Listener: one broker subscription feeding one message buffer.
//!
//! A listener is single use. `start` runs the subscription until cancellation,
//! an explicit `stop`, or the broker ending the subscription; the streaming
//! side pulls whatever has arrived with `drain`.

use crate::buffer::MessageBuffer;
use crate::metrics::BridgeMetrics;
use crate::models::CollectedMessage;
use crate::shutdown::{cancelled, Shutdown};
use messaging::{BrokerError, Connector, MessageBroker, ReceivedMessage};
use std::sync::{Arc, OnceLock};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

pub struct QueueBridgeListener<C: Connector> {
    connector: Arc<C>,
    connection: Mutex<Option<C::Broker>>,
    buffer: MessageBuffer,
    queue_name: OnceLock<String>,
    halt: watch::Sender<bool>,
}

impl<C: Connector> QueueBridgeListener<C> {
    pub fn new(connector: Arc<C>, buffer: MessageBuffer) -> Self {
        let (halt, _) = watch::channel(false);
        Self {
            connector,
            connection: Mutex::new(None),
            buffer,
            queue_name: OnceLock::new(),
            halt,
        }
    }

    /// Queue this listener was started on, if any.
    pub fn queue_name(&self) -> Option<&str> {
        self.queue_name.get().map(String::as_str)
    }

    /// Run `start` on its own task.
    pub fn spawn(self: &Arc<Self>, queue_name: impl Into<String>, shutdown: Shutdown) -> JoinHandle<()> {
        let listener = Arc::clone(self);
        let queue_name = queue_name.into();
        tokio::spawn(async move { listener.start(&queue_name, shutdown).await })
    }

    /// Subscribe to `queue_name` and buffer deliveries until cancelled or stopped.
    ///
    /// Errors are logged, not returned. The connection is always released
    /// before this returns. A second call on the same instance does nothing.
    #[instrument(name = "queue_listener", skip(self, shutdown))]
    pub async fn start(&self, queue_name: &str, mut shutdown: Shutdown) {
        if self.queue_name.set(queue_name.to_string()).is_err() {
            warn!("Listener already started, ignoring repeated start");
            return;
        }

        let metrics = BridgeMetrics::new(queue_name);
        if let Err(e) = self.listen(queue_name, &mut shutdown, &metrics).await {
            error!(error = %e, "Error while listening to queue");
        }

        self.stop().await;
    }

    async fn listen(
        &self,
        queue_name: &str,
        shutdown: &mut Shutdown,
        metrics: &BridgeMetrics,
    ) -> Result<(), BrokerError> {
        let mut halt = self.halt.subscribe();
        if *halt.borrow() {
            return Ok(());
        }

        let broker = self.connector.connect().await?;
        if *halt.borrow() {
            close(&broker).await;
            debug!("Queue listener halted while connecting");
            return Ok(());
        }
        let mut stream = match broker.subscribe(queue_name).await {
            Ok(stream) => stream,
            Err(e) => {
                close(&broker).await;
                return Err(e);
            }
        };

        {
            let mut connection = self.connection.lock().await;
            // `stop` raises the flag before taking the lock.
            if *halt.borrow() {
                drop(connection);
                close(&broker).await;
                debug!("Queue listener halted while subscribing");
                return Ok(());
            }
            *connection = Some(broker);
        }
        info!("Queue listener started");

        let mut received: u64 = 0;
        loop {
            tokio::select! {
                _ = cancelled(shutdown) => {
                    info!(received, "Cancellation requested, stopping queue listener");
                    break;
                }
                _ = cancelled(&mut halt) => {
                    debug!(received, "Queue listener halted");
                    break;
                }
                delivery = stream.next() => match delivery {
                    Some(message) => {
                        received += 1;
                        self.on_delivery(message, metrics);
                    }
                    None => {
                        warn!(received, "Subscription ended by the broker");
                        break;
                    }
                },
            }
        }

        Ok(())
    }

    fn on_delivery(&self, message: ReceivedMessage, metrics: &BridgeMetrics) {
        let payload = message.payload_text();
        debug!(bytes = payload.len(), "Received message from queue");
        metrics.message_received();

        if let Some(dropped) = self.buffer.push(CollectedMessage::received(payload)) {
            metrics.message_dropped();
            warn!(
                capacity = self.buffer.capacity(),
                dropped_bytes = dropped.payload.len(),
                "Buffer full, dropped a message"
            );
        }
    }

    /// Take every buffered message, oldest first. Never waits on the broker.
    pub fn drain(&self) -> Vec<CollectedMessage> {
        self.buffer.drain()
    }

    /// Messages waiting to be drained.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Close the broker connection if it is open. Idempotent.
    pub async fn stop(&self) {
        self.halt.send_replace(true);

        let connection = self.connection.lock().await.take();
        if let Some(broker) = connection {
            close(&broker).await;
            info!(queue = ?self.queue_name(), "Queue listener stopped");
        }
    }

    /// Whether a broker connection is currently held.
    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }
}

async fn close<B: MessageBroker>(broker: &B) {
    if let Err(e) = broker.close().await {
        warn!(error = %e, "Error while closing broker connection");
    }
}
