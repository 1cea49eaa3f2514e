//! One streaming session per accepted TCP client.
//!
//! The session owns a Queue Bridge Listener for its whole lifetime, drains it,
//! and writes every message as one formatted, newline-terminated document.

use crate::buffer::{MessageBuffer, OverflowPolicy, DEFAULT_BUFFER_CAPACITY};
use crate::formatter::MessageFormatter;
use crate::listener::QueueBridgeListener;
use crate::metrics::BridgeMetrics;
use crate::shutdown::{cancelled, is_cancelled, Shutdown};
use messaging::Connector;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub const DEFAULT_STREAM_QUEUE: &str = "test_queue";
pub const DEFAULT_IDLE_POLL: Duration = Duration::from_secs(1);
pub const DEFAULT_PACING: Duration = Duration::from_secs(2);

/// Per-session streaming parameters.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Queue every session subscribes to
    pub queue_name: String,
    /// Wait after a drain that returned nothing
    pub idle_poll: Duration,
    /// Wait after each message written to the client
    pub pacing: Duration,
    pub buffer_capacity: usize,
    pub overflow_policy: OverflowPolicy,
}

impl StreamSettings {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            ..Self::default()
        }
    }

    pub fn with_intervals(mut self, idle_poll: Duration, pacing: Duration) -> Self {
        self.idle_poll = idle_poll;
        self.pacing = pacing;
        self
    }

    pub fn with_buffer(mut self, capacity: usize, policy: OverflowPolicy) -> Self {
        self.buffer_capacity = capacity;
        self.overflow_policy = policy;
        self
    }

    fn new_buffer(&self) -> MessageBuffer {
        MessageBuffer::new(self.buffer_capacity, self.overflow_policy)
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_STREAM_QUEUE.to_string(),
            idle_poll: DEFAULT_IDLE_POLL,
            pacing: DEFAULT_PACING,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to write to client: {0}")]
    Write(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    Disconnected,
}

/// Stream queue messages to `stream` until the client leaves or shutdown.
///
/// Never returns an error: failures end this session only and are logged.
#[instrument(
    name = "stream_session",
    skip_all,
    fields(session_id = %Uuid::new_v4(), peer = %peer, queue = %settings.queue_name)
)]
pub async fn run_session<C, F>(
    stream: TcpStream,
    peer: SocketAddr,
    connector: Arc<C>,
    formatter: Arc<F>,
    settings: Arc<StreamSettings>,
    mut shutdown: Shutdown,
) where
    C: Connector,
    F: MessageFormatter,
{
    let metrics = BridgeMetrics::new(&settings.queue_name);
    metrics.session_started();
    info!("Streaming session started");

    let listener = Arc::new(QueueBridgeListener::new(connector, settings.new_buffer()));
    let listener_task = listener.spawn(settings.queue_name.clone(), shutdown.clone());

    let (reader, mut writer) = stream.into_split();
    let mut client = ClientReader::new(reader);
    let outcome = stream_messages(
        &listener,
        &mut client,
        &mut writer,
        formatter.as_ref(),
        &settings,
        &mut shutdown,
        &metrics,
    )
    .await;

    match outcome {
        Ok(SessionEnd::Cancelled) => info!("Streaming session cancelled"),
        Ok(SessionEnd::Disconnected) => info!("Client disconnected"),
        Err(e) => warn!(error = %e, "Streaming session ended with error"),
    }

    if let Err(e) = writer.shutdown().await {
        debug!(error = %e, "Socket already closed");
    }
    listener.stop().await;
    if let Err(e) = listener_task.await {
        warn!(error = %e, "Queue listener task failed");
    }

    metrics.session_ended();
    info!("Streaming session closed");
}

async fn stream_messages<C, F>(
    listener: &QueueBridgeListener<C>,
    client: &mut ClientReader,
    writer: &mut OwnedWriteHalf,
    formatter: &F,
    settings: &StreamSettings,
    shutdown: &mut Shutdown,
    metrics: &BridgeMetrics,
) -> Result<SessionEnd, SessionError>
where
    C: Connector,
    F: MessageFormatter,
{
    loop {
        if is_cancelled(shutdown) {
            return Ok(SessionEnd::Cancelled);
        }

        let batch = listener.drain();
        if batch.is_empty() {
            if let Some(end) = pause(settings.idle_poll, client, shutdown).await {
                return Ok(end);
            }
            continue;
        }

        debug!(count = batch.len(), "Forwarding drained messages");
        for message in batch {
            let mut line = formatter.format(&message.payload);
            line.push('\n');
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
            metrics.message_forwarded();

            if let Some(end) = pause(settings.pacing, client, shutdown).await {
                return Ok(end);
            }
        }
    }
}

/// Sleep for `duration` unless shutdown or a client disconnect comes first.
async fn pause(
    duration: Duration,
    client: &mut ClientReader,
    shutdown: &mut Shutdown,
) -> Option<SessionEnd> {
    tokio::select! {
        _ = cancelled(shutdown) => Some(SessionEnd::Cancelled),
        _ = client.disconnected() => Some(SessionEnd::Disconnected),
        _ = tokio::time::sleep(duration) => None,
    }
}

/// Read side of the client socket, watched for connection loss.
///
/// EOF only means the client is done sending: a half-closed client keeps
/// receiving, and a client that is really gone surfaces as a write error.
struct ClientReader {
    reader: OwnedReadHalf,
    eof: bool,
}

impl ClientReader {
    fn new(reader: OwnedReadHalf) -> Self {
        Self { reader, eof: false }
    }

    /// Resolves on a read error. Anything the client sends is discarded.
    async fn disconnected(&mut self) {
        let mut scratch = [0u8; 256];
        while !self.eof {
            match self.reader.read(&mut scratch).await {
                Ok(0) => {
                    debug!("Client closed its sending side");
                    self.eof = true;
                }
                Ok(_) => continue,
                Err(e) => {
                    debug!(error = %e, "Client connection lost");
                    return;
                }
            }
        }
        std::future::pending::<()>().await
    }
}
