//! Queue Bridge Service
//!
//! Streams messages from a broker queue to TCP clients as indented,
//! human-readable JSON, one document per line, at a throttled pace.
//!
//! ## Architecture
//!
//! ```text
//! JetStream (STREAM_QUEUE, work queue)      JetStream (RESPONSE_QUEUE)
//!   ↓ (one subscription per client)           ↓
//! QueueBridgeListener → MessageBuffer       ResponseDrain (logs only)
//!   ↓ (drain every 1 s)
//! PrettyJsonFormatter
//!   ↓ (one line every 2 s)
//! TcpStreamServer session → TCP client
//! ```
//!
//! ## Features
//!
//! - Bounded accept retries, single or persistent accept mode
//! - Bounded per-session buffer with a drop policy
//! - `Timestamp` fields rewritten to local time
//! - Graceful shutdown on SIGINT/SIGTERM
//! - Health check endpoints and Prometheus metrics

pub mod buffer;
pub mod config;
pub mod drain;
pub mod formatter;
pub mod health;
pub mod listener;
pub mod metrics;
pub mod models;
pub mod server;
pub mod session;
pub mod shutdown;

pub use buffer::{MessageBuffer, OverflowPolicy};
pub use config::BridgeConfig;
pub use drain::ResponseDrain;
pub use formatter::{format_json, MessageFormatter, PrettyJsonFormatter};
pub use listener::QueueBridgeListener;
pub use models::{CollectedMessage, OperationResult};
pub use server::TcpStreamServer;
pub use session::StreamSettings;

use core_config::FromEnv;
use eyre::{Result, WrapErr};
use health::HealthServer;
use messaging::nats::NatsConnector;
use messaging::{Connector, MessageBroker};
use shutdown::{cancelled, shutdown_signal};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Run the bridge until SIGINT or SIGTERM.
///
/// Startup failures of the stream server are logged, not returned: the
/// response drain keeps running until shutdown either way.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the metrics recorder
/// cannot be installed.
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();

    let config = BridgeConfig::from_env().wrap_err("Failed to load configuration")?;
    core_config::tracing::init_tracing(&config.environment);

    let metrics_handle = metrics::init_metrics()?;

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        "Starting queue bridge"
    );
    info!("Environment: {:?}", config.environment);

    let health_server = HealthServer::new(config.health_port).with_metrics(metrics_handle);
    let health = health_server.state();
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            error!(error = %e, "Health server failed");
        }
    });

    let (shutdown_tx, mut shutdown_rx) = shutdown::channel();
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Error waiting for shutdown signal: {:#}", e);
        }
        let _ = shutdown_tx.send(true);
    });

    info!(url = %config.broker.url, "Using NATS broker");
    let connector = Arc::new(NatsConnector::new(
        &config.broker.url,
        &config.broker.connection_name,
    ));

    declare_queues(
        connector.as_ref(),
        &[config.stream_queue.as_str(), config.response_queue.as_str()],
    )
    .await;

    let drain = ResponseDrain::new(Arc::clone(&connector), &config.response_queue)
        .with_health(health.clone());
    let drain_task = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { drain.run(shutdown).await })
    };

    let server = TcpStreamServer::new(connector, config.stream_settings()).with_health(health);
    let result = server.up_server(&config.server, shutdown_rx.clone()).await;
    if result.success {
        info!(message = %result.message, queue = %config.stream_queue, "TCP stream server started");
    } else {
        error!(message = %result.message, "TCP stream server did not start");
    }

    cancelled(&mut shutdown_rx).await;
    info!("Shutting down queue bridge");

    if let Err(e) = drain_task.await {
        error!(error = %e, "Response drain task failed");
    }

    info!("Queue bridge stopped");
    Ok(())
}

/// Declare `queues` so messages published before the first client connects
/// are kept. Failures are logged; every subscriber declares its queue again.
async fn declare_queues<C: Connector>(connector: &C, queues: &[&str]) -> bool {
    let broker = match connector.connect().await {
        Ok(broker) => broker,
        Err(e) => {
            warn!(error = %e, "Broker unreachable, queues not declared");
            return false;
        }
    };

    let mut declared = true;
    for queue in queues {
        match broker.declare(queue).await {
            Ok(()) => info!(queue = %queue, "Queue declared"),
            Err(e) => {
                warn!(queue = %queue, error = %e, "Failed to declare queue");
                declared = false;
            }
        }
    }
    if let Err(e) = broker.close().await {
        warn!(error = %e, "Error while closing broker connection");
    }
    declared
}
