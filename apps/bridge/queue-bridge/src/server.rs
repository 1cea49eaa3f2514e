//! TCP Stream Server: accepts a client with bounded retries and hands the
//! connection to an independent streaming session.

use crate::formatter::{MessageFormatter, PrettyJsonFormatter};
use crate::health::HealthState;
use crate::models::OperationResult;
use crate::session::{run_session, StreamSettings};
use crate::shutdown::{cancelled, is_cancelled, Shutdown};
use core_config::server::{AcceptMode, ServerConfig};
use messaging::Connector;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

pub const SERVER_STARTED: &str = "server started and client connected";
pub const CRITICAL_SERVER_ERROR: &str = "critical server error";
pub const CONNECT_ATTEMPTS_EXHAUSTED: &str = "failed to connect after several attempts";
pub const SERVER_START_CANCELLED: &str = "server start cancelled";

enum AcceptOutcome {
    Connected(TcpStream, SocketAddr),
    Failed(String),
    Cancelled,
}

pub struct TcpStreamServer<C: Connector, F: MessageFormatter = PrettyJsonFormatter> {
    connector: Arc<C>,
    formatter: Arc<F>,
    settings: Arc<StreamSettings>,
    health: Option<HealthState>,
}

impl<C: Connector, F: MessageFormatter> Clone for TcpStreamServer<C, F> {
    fn clone(&self) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
            formatter: Arc::clone(&self.formatter),
            settings: Arc::clone(&self.settings),
            health: self.health.clone(),
        }
    }
}

impl<C: Connector> TcpStreamServer<C> {
    pub fn new(connector: Arc<C>, settings: StreamSettings) -> Self {
        Self::with_formatter(connector, PrettyJsonFormatter, settings)
    }
}

impl<C: Connector, F: MessageFormatter> TcpStreamServer<C, F> {
    pub fn with_formatter(connector: Arc<C>, formatter: F, settings: StreamSettings) -> Self {
        Self {
            connector,
            formatter: Arc::new(formatter),
            settings: Arc::new(settings),
            health: None,
        }
    }

    /// Report whether the listening socket is open to `health`.
    pub fn with_health(mut self, health: HealthState) -> Self {
        self.health = Some(health);
        self
    }

    /// Bind, wait for a client, and start streaming to it.
    ///
    /// Returns as soon as a client is accepted; the session runs on its own
    /// task. Every failure is reported through the returned result.
    ///
    /// The server counts as listening from the bind until the socket is
    /// released: after the first client in single mode, when attempts run out
    /// or on cancellation, and when the persistent accept loop ends.
    #[instrument(
        name = "up_server",
        skip(self, config, shutdown),
        fields(host = %config.host, port = config.port, mode = %config.accept_mode)
    )]
    pub async fn up_server(&self, config: &ServerConfig, mut shutdown: Shutdown) -> OperationResult {
        let addr = match config.socket_addr() {
            Ok(addr) => addr,
            Err(e) => {
                warn!(error = %e, "Rejected server configuration");
                return OperationResult::failure(e.to_string());
            }
        };

        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(%addr, error = %e, "Failed to bind listening socket");
                return OperationResult::failure(CRITICAL_SERVER_ERROR);
            }
        };
        info!(%addr, "Server listening, waiting for a client");
        self.report_listening(true).await;

        let result = self.accept_first(listener, config, &mut shutdown).await;
        if !result.success || config.accept_mode == AcceptMode::Single {
            self.report_listening(false).await;
        }
        result
    }

    async fn accept_first(
        &self,
        listener: TcpListener,
        config: &ServerConfig,
        shutdown: &mut Shutdown,
    ) -> OperationResult {
        let max_attempts = config.max_connect_attempts;
        for attempt in 1..=max_attempts {
            if is_cancelled(shutdown) {
                return cancelled_start();
            }

            match accept_once(&listener, config.accept_timeout(), shutdown).await {
                AcceptOutcome::Connected(stream, peer) => {
                    info!(attempt, %peer, "Client connected");
                    self.spawn_session(stream, peer, shutdown.clone());
                    if config.accept_mode == AcceptMode::Persistent {
                        self.spawn_accept_loop(listener, config.reconnect_delay(), shutdown.clone());
                    }
                    return OperationResult::success(SERVER_STARTED);
                }
                AcceptOutcome::Failed(reason) => {
                    warn!(attempt, max_attempts, reason = %reason, "Accept attempt failed");
                }
                AcceptOutcome::Cancelled => return cancelled_start(),
            }

            tokio::select! {
                _ = cancelled(shutdown) => return cancelled_start(),
                _ = tokio::time::sleep(config.reconnect_delay()) => {}
            }
        }

        error!(max_attempts, "No client connected, giving up");
        OperationResult::failure(CONNECT_ATTEMPTS_EXHAUSTED)
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr, shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(run_session(
            stream,
            peer,
            Arc::clone(&self.connector),
            Arc::clone(&self.formatter),
            Arc::clone(&self.settings),
            shutdown,
        ))
    }

    /// Keep accepting on `listener` until shutdown, one session per client.
    fn spawn_accept_loop(
        &self,
        listener: TcpListener,
        retry_delay: Duration,
        mut shutdown: Shutdown,
    ) -> JoinHandle<()> {
        let server = self.clone();
        tokio::spawn(async move {
            info!("Accepting further clients");
            loop {
                tokio::select! {
                    _ = cancelled(&mut shutdown) => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            info!(%peer, "Client connected");
                            server.spawn_session(stream, peer, shutdown.clone());
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to accept client");
                            tokio::select! {
                                _ = cancelled(&mut shutdown) => break,
                                _ = tokio::time::sleep(retry_delay) => {}
                            }
                        }
                    },
                }
            }
            drop(listener);
            server.report_listening(false).await;
            info!("Accept loop stopped");
        })
    }

    async fn report_listening(&self, listening: bool) {
        if let Some(health) = &self.health {
            health.set_server_listening(listening).await;
        }
    }
}

/// One accept attempt, bounded by `timeout`. A zero timeout only takes a
/// connection that is already pending.
async fn accept_once(listener: &TcpListener, timeout: Duration, shutdown: &mut Shutdown) -> AcceptOutcome {
    tokio::select! {
        _ = cancelled(shutdown) => AcceptOutcome::Cancelled,
        accepted = tokio::time::timeout(timeout, listener.accept()) => match accepted {
            Ok(Ok((stream, peer))) => AcceptOutcome::Connected(stream, peer),
            Ok(Err(e)) => AcceptOutcome::Failed(e.to_string()),
            Err(_) => AcceptOutcome::Failed(format!("no client within {:?}", timeout)),
        },
    }
}

fn cancelled_start() -> OperationResult {
    info!("Server start cancelled");
    OperationResult::failure(SERVER_START_CANCELLED)
}
