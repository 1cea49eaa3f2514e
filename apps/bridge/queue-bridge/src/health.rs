//! Health endpoints for K8s probes, plus the Prometheus scrape endpoint.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub broker_connected: bool,
    pub server_listening: bool,
}

/// Shared health state, updated by the response drain and the stream server.
#[derive(Clone, Default)]
pub struct HealthState {
    inner: Arc<RwLock<HealthStateInner>>,
}

#[derive(Default)]
struct HealthStateInner {
    broker_connected: bool,
    server_listening: bool,
    last_error: Option<String>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_broker_connected(&self, connected: bool) {
        self.inner.write().await.broker_connected = connected;
    }

    /// Whether the stream server socket is bound and accepting.
    pub async fn set_server_listening(&self, listening: bool) {
        self.inner.write().await.server_listening = listening;
    }

    pub async fn set_error(&self, error: Option<String>) {
        self.inner.write().await.last_error = error;
    }

    /// Ready once the broker is reachable and the stream server is listening.
    pub async fn is_ready(&self) -> bool {
        let inner = self.inner.read().await;
        inner.broker_connected && inner.server_listening
    }

    pub async fn status(&self) -> HealthStatus {
        let inner = self.inner.read().await;
        let status = if inner.broker_connected && inner.server_listening {
            "healthy".to_string()
        } else {
            let reason = inner.last_error.as_deref().unwrap_or("starting");
            format!("degraded: {}", reason)
        };
        HealthStatus {
            status,
            broker_connected: inner.broker_connected,
            server_listening: inner.server_listening,
        }
    }
}

pub struct HealthServer {
    port: u16,
    state: HealthState,
    metrics_handle: Option<PrometheusHandle>,
}

impl HealthServer {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            state: HealthState::new(),
            metrics_handle: None,
        }
    }

    /// Serve `handle` on `/metrics`.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    pub fn state(&self) -> HealthState {
        self.state.clone()
    }

    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/readyz", get(ready_handler))
            .with_state(self.state.clone());

        if let Some(handle) = self.metrics_handle.clone() {
            router = router.route(
                "/metrics",
                get(move || {
                    let handle = handle.clone();
                    async move { handle.render() }
                }),
            );
        }

        router
    }

    pub async fn run(self) -> Result<(), std::io::Error> {
        let router = self.router();
        let addr = format!("0.0.0.0:{}", self.port);

        info!(addr = %addr, "Starting health server");

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}

/// Liveness: the process answers, whatever the broker state.
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.status().await))
}

async fn ready_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let code = if state.is_ready().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(state.status().await))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_status(router: Router, uri: &str) -> StatusCode {
        router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_liveness_always_ok() {
        let server = HealthServer::new(0);
        assert_eq!(get_status(server.router(), "/health").await, StatusCode::OK);
        assert_eq!(get_status(server.router(), "/healthz").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readiness_follows_state() {
        let server = HealthServer::new(0);
        let state = server.state();
        assert_eq!(
            get_status(server.router(), "/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.set_broker_connected(true).await;
        assert_eq!(
            get_status(server.router(), "/readyz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.set_server_listening(true).await;
        assert_eq!(get_status(server.router(), "/ready").await, StatusCode::OK);

        state.set_server_listening(false).await;
        assert_eq!(
            get_status(server.router(), "/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_status_reports_last_error() {
        let state = HealthState::new();
        state.set_error(Some("broker unreachable".into())).await;
        let status = state.status().await;
        assert_eq!(status.status, "degraded: broker unreachable");
        assert!(!status.broker_connected);
    }

    #[tokio::test]
    async fn test_metrics_route_absent_without_handle() {
        let server = HealthServer::new(0);
        assert_eq!(
            get_status(server.router(), "/metrics").await,
            StatusCode::NOT_FOUND
        );
    }
}
