//! The event stream endpoint.
//!
//! Each GET registers a connection, answers with a streaming body and hands
//! the connection to a session task. The session owns the handshake, the
//! keepalive pinger and the single cleanup path.

use crate::cors::cors_headers;
use crate::handlers::AppState;
use crate::metrics::{self, ConnectionMetricsGuard};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{
        header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE, ORIGIN},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
};
use beacon_core::{run_pinger, Connection, ConnectionId, Message, RegistryError};
use beacon_transport::ChannelSink;
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Query parameters of the stream endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    /// Identifier requested by the client.
    pub client_id: Option<String>,
}

/// Open an event stream.
pub async fn stream_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
) -> Response {
    let cors = request_cors(&state, &headers);

    let id = match params.client_id.filter(|id| !id.is_empty()) {
        Some(id) => ConnectionId::new(id),
        None => ConnectionId::generate(),
    };

    let (sink, body) = ChannelSink::pair(state.config.stream.channel_capacity);
    let request = state.shutdown.child_token();
    let body = body.cancel_on_drop(request.clone());
    let connection = Arc::new(Connection::new(id.clone(), sink));

    if let Err(e) = state.registry.register(Arc::clone(&connection)) {
        let (status, reason) = match e {
            RegistryError::CapacityExceeded { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "capacity")
            }
            RegistryError::StreamingUnsupported => {
                (StatusCode::INTERNAL_SERVER_ERROR, "streaming_unsupported")
            }
        };
        warn!(connection = %id, error = %e, "Rejected stream");
        metrics::record_rejection(reason);
        return (status, cors, e.to_string()).into_response();
    }

    state
        .sessions
        .spawn(run_session(Arc::clone(&state), connection, request));

    let mut response = Response::new(Body::from_stream(body.map(Ok::<Bytes, Infallible>)));
    let response_headers = response.headers_mut();
    response_headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    response_headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response_headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    response_headers.extend(cors);
    response
}

/// Answer a CORS preflight without registering anything.
pub async fn preflight_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    (StatusCode::OK, request_cors(&state, &headers))
}

fn request_cors(state: &AppState, headers: &HeaderMap) -> HeaderMap {
    let origin = headers.get(ORIGIN).and_then(|v| v.to_str().ok());
    cors_headers(&state.config.cors.allowed_origins, origin)
}

/// Drive one registered connection until the peer leaves, the server shuts
/// down or the connection is evicted.
async fn run_session(state: Arc<AppState>, connection: Arc<Connection>, request: CancellationToken) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let id = connection.id().clone();
    debug!(connection = %id, "Stream opened");

    let handshake = Message::connected(id.as_str());
    if let Err(e) = state
        .dispatcher
        .send_to_connection(&handshake, &connection, state.config.handshake_timeout())
        .await
    {
        warn!(connection = %id, error = %e, "Handshake failed");
        metrics::record_error("handshake");
        state.registry.release(&connection);
        return;
    }

    let pinger = tokio::spawn(run_pinger(
        Arc::clone(&connection),
        Arc::clone(&state.registry),
        state.config.keepalive_interval(),
        request.clone(),
    ));

    tokio::select! {
        () = request.cancelled() => debug!(connection = %id, "Request ended"),
        () = connection.done() => debug!(connection = %id, "Connection closed"),
    }

    request.cancel();
    match pinger.await {
        Ok(result) => debug!(connection = %id, ?result, "Pinger stopped"),
        Err(e) => warn!(connection = %id, error = %e, "Pinger task failed"),
    }

    state.registry.release(&connection);
    info!(
        connection = %id,
        duration_ms = connection.age().as_millis() as u64,
        "Stream closed"
    );
}
