//! In-process broker.
//!
//! Queues hold messages until a subscriber attaches; with several subscribers
//! on one queue, messages are handed out round-robin. Used by tests and for
//! running the bridge without an external broker.

use crate::broker::{Connector, MessageBroker, MessageStream, ReceivedMessage};
use crate::error::BrokerError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

const MEMORY_URL: &str = "memory://";

/// Handle to an in-process broker. Clones share the same queues.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    unavailable: AtomicBool,
    next_id: AtomicU64,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, Queue>,
    open_connections: usize,
}

#[derive(Default)]
struct Queue {
    pending: VecDeque<Vec<u8>>,
    subscribers: Vec<Subscriber>,
    next: usize,
}

struct Subscriber {
    connection: u64,
    sender: mpsc::UnboundedSender<ReceivedMessage>,
}

impl Queue {
    fn deliver(&mut self, name: &str, payload: Vec<u8>) {
        let mut message = ReceivedMessage::new(name, payload);
        while !self.subscribers.is_empty() {
            let idx = self.next % self.subscribers.len();
            match self.subscribers[idx].sender.send(message) {
                Ok(()) => {
                    self.next = idx + 1;
                    return;
                }
                Err(mpsc::error::SendError(returned)) => {
                    // Receiver is gone; forget the subscriber and try the next one.
                    self.subscribers.remove(idx);
                    message = returned;
                }
            }
        }
        self.pending.push_back(message.payload);
    }

    fn live_subscribers(&self) -> usize {
        self.subscribers
            .iter()
            .filter(|s| !s.sender.is_closed())
            .count()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a message to `queue`, queueing it if nobody is subscribed.
    pub fn publish(&self, queue: &str, payload: impl Into<Vec<u8>>) {
        let mut state = self.state();
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .deliver(queue, payload.into());
    }

    /// Make subsequent `connect` calls fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Connections opened and not yet closed.
    pub fn open_connections(&self) -> usize {
        self.state().open_connections
    }

    /// Subscribers currently attached to `queue`.
    pub fn subscriber_count(&self, queue: &str) -> usize {
        self.state()
            .queues
            .get(queue)
            .map(Queue::live_subscribers)
            .unwrap_or(0)
    }

    /// Messages waiting in `queue` for a subscriber.
    pub fn pending_count(&self, queue: &str) -> usize {
        self.state()
            .queues
            .get(queue)
            .map(|q| q.pending.len())
            .unwrap_or(0)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn attach(&self, connection: u64, queue: &str) -> mpsc::UnboundedReceiver<ReceivedMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.state();
        let entry = state.queues.entry(queue.to_string()).or_default();

        // Backlog goes to the first subscriber that shows up.
        for payload in entry.pending.drain(..) {
            let _ = sender.send(ReceivedMessage::new(queue, payload));
        }
        entry.subscribers.push(Subscriber { connection, sender });
        receiver
    }

    fn release(&self, connection: u64) {
        let mut state = self.state();
        for queue in state.queues.values_mut() {
            queue.subscribers.retain(|s| s.connection != connection);
        }
        state.open_connections = state.open_connections.saturating_sub(1);
        debug!(connection, "In-memory connection closed");
    }
}

#[async_trait]
impl Connector for InMemoryBroker {
    type Broker = InMemoryConnection;

    async fn connect(&self) -> Result<InMemoryConnection, BrokerError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(BrokerError::connection(MEMORY_URL, "broker unavailable"));
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.state().open_connections += 1;
        debug!(connection = id, "In-memory connection opened");

        Ok(InMemoryConnection {
            broker: self.clone(),
            id,
            closed: AtomicBool::new(false),
        })
    }
}

/// A connection to an [`InMemoryBroker`]. Dropping it closes it.
pub struct InMemoryConnection {
    broker: InMemoryBroker,
    id: u64,
    closed: AtomicBool,
}

impl InMemoryConnection {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.is_closed() {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MessageBroker for InMemoryConnection {
    async fn declare(&self, queue: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.broker.state().queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn subscribe(&self, queue: &str) -> Result<Box<dyn MessageStream>, BrokerError> {
        self.ensure_open()?;
        let receiver = self.broker.attach(self.id, queue);
        Ok(Box::new(InMemoryStream { receiver }))
    }

    async fn publish_raw(&self, queue: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.broker.publish(queue, payload);
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.broker.release(self.id);
        }
        Ok(())
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.broker.release(self.id);
        }
    }
}

struct InMemoryStream {
    receiver: mpsc::UnboundedReceiver<ReceivedMessage>,
}

#[async_trait]
impl MessageStream for InMemoryStream {
    async fn next(&mut self) -> Option<ReceivedMessage> {
        self.receiver.recv().await
    }
}
