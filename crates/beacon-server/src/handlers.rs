//! HTTP handlers and server lifecycle for Beacon.
//!
//! The stream endpoint lives in [`crate::stream`]; this module holds the
//! shared state, the collaborator send API and the serve loop.

use crate::config::Config;
use crate::metrics;
use crate::stream::{preflight_handler, stream_handler};
use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use beacon_core::{DispatchError, Dispatcher, Message, Registry};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Registered connections.
    pub registry: Arc<Registry>,
    /// Sends messages through the registry.
    pub dispatcher: Dispatcher,
    /// Server configuration.
    pub config: Config,
    /// Fired once on shutdown; every request token is a child of it.
    pub shutdown: CancellationToken,
    /// Running stream sessions.
    pub sessions: TaskTracker,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(Registry::with_config(config.registry_config()));
        let dispatcher = Dispatcher::new(Arc::clone(&registry), config.dispatcher_config());

        Self {
            registry,
            dispatcher,
            config,
            shutdown: CancellationToken::new(),
            sessions: TaskTracker::new(),
        }
    }

    /// Stop accepting work and close every open stream.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let closed = self.registry.close_all();
        info!(connections = closed, "Shutting down");
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    let stream_path = state.config.stream.path.clone();

    Router::new()
        .route(
            &stream_path,
            get(stream_handler).options(preflight_handler),
        )
        .route("/api/sse/send", post(send_handler))
        .route("/api/sse/clients", get(clients_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Beacon server listening on {}", addr);
    info!("Stream endpoint: http://{}{}", addr, config.stream.path);

    let state = Arc::new(AppState::new(config));

    let signal_state = Arc::clone(&state);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        signal_state.shutdown();
    });

    serve(listener, state).await
}

/// Serve on `listener` until `state.shutdown()` is called, then wait for the
/// stream sessions to finish.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let sessions = state.sessions.clone();

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    sessions.close();
    sessions.wait().await;
    info!("Server stopped");
    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.registry.count(),
    }))
}

/// Connected client listing.
async fn clients_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ids: Vec<String> = state
        .registry
        .list()
        .into_iter()
        .map(|id| id.as_str().to_owned())
        .collect();
    Json(json!({
        "count": ids.len(),
        "client_ids": ids,
    }))
}

/// Body of `POST /api/sse/send`.
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    /// Event type to emit.
    pub event_type: String,
    /// JSON payload.
    #[serde(default)]
    pub data: Value,
    /// Target identifiers. Empty broadcasts.
    #[serde(default)]
    pub client_ids: Vec<String>,
}

/// Send an event to some or all connected clients.
async fn send_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SendRequest>,
) -> Response {
    let start = Instant::now();
    let message = Message::new(request.event_type, request.data);

    let result = state.dispatcher.send(&message, &request.client_ids).await;
    metrics::record_latency(start.elapsed().as_secs_f64());

    match result {
        Ok(report) => {
            debug!(
                event = %message.event_type(),
                recipients = report.recipients,
                "Sent"
            );
            metrics::record_message(message.event_type(), report.recipients);
            Json(json!({"status": "ok", "recipients": report.recipients})).into_response()
        }
        Err(e) => {
            warn!(event = %message.event_type(), error = %e, "Send failed");
            dispatch_error_response(&e)
        }
    }
}

fn dispatch_error_response(e: &DispatchError) -> Response {
    let (status, body) = match e {
        DispatchError::InvalidMessage(_) | DispatchError::Serialization(_) => {
            metrics::record_error("invalid_message");
            (StatusCode::BAD_REQUEST, json!({"error": e.to_string()}))
        }
        DispatchError::NoMatchingClients => {
            (StatusCode::NOT_FOUND, json!({"error": e.to_string()}))
        }
        DispatchError::PartialDeliveryFailure { failed, total, .. } => {
            metrics::record_delivery_failures(*failed);
            let status = if e.is_timeout() {
                StatusCode::GATEWAY_TIMEOUT
            } else {
                StatusCode::BAD_GATEWAY
            };
            (
                status,
                json!({"error": e.to_string(), "failed": failed, "total": total}),
            )
        }
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_transport::TransportError;

    #[test]
    fn test_dispatch_error_status() {
        let cases = [
            (
                DispatchError::InvalidMessage("event type is empty"),
                StatusCode::BAD_REQUEST,
            ),
            (DispatchError::NoMatchingClients, StatusCode::NOT_FOUND),
            (
                DispatchError::PartialDeliveryFailure {
                    failed: 1,
                    total: 3,
                    source: TransportError::ConnectionClosed,
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                DispatchError::PartialDeliveryFailure {
                    failed: 2,
                    total: 2,
                    source: TransportError::Timeout,
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(dispatch_error_response(&error).status(), status);
        }
    }

    #[test]
    fn test_shutdown_closes_streams() {
        let state = AppState::new(Config::default());
        let (sink, _stream) = beacon_transport::ChannelSink::pair(4);
        let conn = Arc::new(beacon_core::Connection::new("a", sink));
        state.registry.register(Arc::clone(&conn)).unwrap();

        state.shutdown();
        assert!(state.shutdown.is_cancelled());
        assert!(conn.is_closed());
        assert_eq!(state.registry.count(), 0);
    }
}
