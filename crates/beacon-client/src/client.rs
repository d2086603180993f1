//! Reconnecting event stream client.
//!
//! A [`SseClient`] opens the stream with exponential backoff, reads it on a
//! background task and hands decoded events to a handler worker. [`SseClient::run`]
//! keeps that going across disconnects until the client is closed.

use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::handlers::HandlerRegistry;
use crate::queue::{event_queue, run_worker, EventSender};
use beacon_protocol::{ConnectedPayload, Event, EventDecoder, ProtocolError};
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Every connection attempt failed.
    #[error("Failed to connect after {attempts} attempts: {source}")]
    ConnectionExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Error from the last attempt.
        #[source]
        source: Box<ClientError>,
    },

    /// The client was closed.
    #[error("Client closed")]
    Closed,

    /// The request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("Server returned status {0}")]
    Status(reqwest::StatusCode),

    /// The stream violated the wire format.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected.
    Idle,
    /// An attempt is in progress.
    Connecting,
    /// The stream is open.
    Connected,
    /// The last stream ended.
    Disconnected,
    /// [`SseClient::close`] was called.
    Closed,
}

/// Reconnecting event stream client. Cheap to clone.
#[derive(Clone)]
pub struct SseClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    http: reqwest::Client,
    handlers: HandlerRegistry,
    state: watch::Sender<ConnectionState>,
    client_id: RwLock<Option<String>>,
    backoff: Mutex<Backoff>,
    session: Mutex<Option<CancellationToken>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    connecting: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl SseClient {
    /// Create a client. Nothing is connected until [`SseClient::connect`] or
    /// [`SseClient::run`].
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        let backoff = Backoff::new(config.initial_backoff, config.max_backoff);
        let client_id = config.client_id.clone();

        Self {
            inner: Arc::new(Inner {
                http: reqwest::Client::new(),
                handlers: HandlerRegistry::new(),
                state,
                client_id: RwLock::new(client_id),
                backoff: Mutex::new(backoff),
                session: Mutex::new(None),
                worker: Mutex::new(None),
                connecting: tokio::sync::Mutex::new(()),
                cancel: CancellationToken::new(),
                tasks: TaskTracker::new(),
                config,
            }),
        }
    }

    /// Register a callback for `event_type`. Callbacks run in registration
    /// order; there is no removal.
    pub fn add_event_handler<F>(&self, event_type: impl Into<String>, handler: F)
    where
        F: Fn(&[u8]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.handlers.add(event_type, handler);
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Whether the stream is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The pinned identifier, or the one the server assigned last.
    #[must_use]
    pub fn client_id(&self) -> Option<String> {
        self.inner.client_id.read().clone()
    }

    /// Open the stream, retrying with backoff.
    ///
    /// Does nothing if already connected.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] if the client is closed before or while
    /// connecting, or [`ClientError::ConnectionExhausted`] once every attempt
    /// failed.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let _connecting = self.inner.connecting.lock().await;

        if self.inner.cancel.is_cancelled() {
            return Err(ClientError::Closed);
        }
        if self.is_connected() {
            return Ok(());
        }

        let attempts = self.inner.config.max_retries.max(1);
        let mut last_error = ClientError::Closed;

        for attempt in 1..=attempts {
            self.inner.set_state(ConnectionState::Connecting);

            let result = tokio::select! {
                () = self.inner.cancel.cancelled() => return Err(ClientError::Closed),
                result = self.establish() => result,
            };

            match result {
                Ok(response) => {
                    if self.inner.config.reset_backoff_on_connect {
                        self.inner.backoff.lock().reset();
                    }
                    self.start_session(response);
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "Connection attempt failed");
                    last_error = e;
                }
            }

            if attempt == attempts {
                break;
            }

            let delay = self.inner.backoff.lock().next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "Retrying");
            tokio::select! {
                () = self.inner.cancel.cancelled() => return Err(ClientError::Closed),
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.inner.set_state(ConnectionState::Disconnected);
        Err(ClientError::ConnectionExhausted {
            attempts,
            source: Box::new(last_error),
        })
    }

    /// Connect and reconnect after every disconnect until closed.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionExhausted`] if a reconnect runs out of
    /// attempts. Returns `Ok` after [`SseClient::close`].
    pub async fn run(&self) -> Result<(), ClientError> {
        loop {
            match self.connect().await {
                Ok(()) => {}
                Err(ClientError::Closed) => return Ok(()),
                Err(e) => return Err(e),
            }

            self.wait_for_disconnect().await;
            if self.inner.cancel.is_cancelled() {
                return Ok(());
            }
            info!("Stream ended, reconnecting");
        }
    }

    /// Wait until the current stream ends or the client is closed.
    ///
    /// Returns immediately if no stream was ever opened.
    pub async fn wait_for_disconnect(&self) {
        let session = self.inner.session.lock().clone();
        if let Some(session) = session {
            tokio::select! {
                () = session.cancelled() => {}
                () = self.inner.cancel.cancelled() => {}
            }
        }
    }

    /// Stop every client task and move to [`ConnectionState::Closed`].
    pub fn close(&self) {
        self.inner.cancel.cancel();
        self.inner.tasks.close();
        self.inner.state.send_replace(ConnectionState::Closed);
        debug!("Client closed");
    }

    /// Close and wait for every client task to finish.
    pub async fn shutdown(&self) {
        self.close();
        self.inner.tasks.wait().await;
    }

    /// The stream request, asking for `client_id` if one is known.
    fn stream_request(&self, client_id: Option<&str>) -> reqwest::RequestBuilder {
        let mut request = self
            .inner
            .http
            .get(self.inner.config.stream_url())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = client_id {
            request = request.query(&[("client_id", id)]);
        }
        request
    }

    async fn establish(&self) -> Result<reqwest::Response, ClientError> {
        let client_id = self.client_id();
        debug!(url = %self.inner.config.stream_url(), client_id = ?client_id, "Connecting");

        let response = self.stream_request(client_id.as_deref()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status(status));
        }
        Ok(response)
    }

    fn start_session(&self, response: reqwest::Response) {
        let disconnected = CancellationToken::new();
        *self.inner.session.lock() = Some(disconnected.clone());
        self.inner.set_state(ConnectionState::Connected);
        info!(url = %response.url(), "Connected");

        let (sender, receiver) = event_queue(
            self.inner.config.queue_capacity,
            self.inner.config.backpressure,
        );

        // Handlers run one at a time across sessions: the new worker starts
        // only after the previous one has drained its queue.
        let previous = self.inner.worker.lock().take();
        let handlers = self.inner.handlers.clone();
        let cancel = self.inner.cancel.child_token();
        let worker = self.inner.tasks.spawn(async move {
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    warn!(error = %e, "Previous handler worker failed");
                }
            }
            run_worker(receiver, handlers, cancel).await;
        });
        *self.inner.worker.lock() = Some(worker);

        self.inner.tasks.spawn(read_session(
            Arc::clone(&self.inner),
            response,
            sender,
            disconnected,
        ));
    }
}

impl std::fmt::Debug for SseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseClient")
            .field("server_url", &self.inner.config.server_url)
            .field("state", &self.state())
            .field("client_id", &self.client_id())
            .finish()
    }
}

impl Inner {
    /// Move to `state` unless the client is closed.
    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == ConnectionState::Closed || *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    fn on_connected(&self, event: &Event) {
        match event.json::<ConnectedPayload>() {
            Ok(payload) => {
                info!(client_id = %payload.client_id, "Assigned client id");
                *self.client_id.write() = Some(payload.client_id);
            }
            Err(e) => warn!(error = %e, "Malformed connected event"),
        }
    }
}

/// Read one stream to its end, then signal the disconnect exactly once.
async fn read_session(
    inner: Arc<Inner>,
    response: reqwest::Response,
    sender: EventSender,
    disconnected: CancellationToken,
) {
    match pump(&inner, response, &sender).await {
        Ok(()) => info!("Stream closed"),
        Err(e) => warn!(error = %e, "Stream failed"),
    }

    inner.set_state(ConnectionState::Disconnected);
    disconnected.cancel();
}

async fn pump(
    inner: &Inner,
    response: reqwest::Response,
    sender: &EventSender,
) -> Result<(), ClientError> {
    let mut body = response.bytes_stream();
    let mut decoder = EventDecoder::new();

    loop {
        let chunk = tokio::select! {
            biased;

            () = inner.cancel.cancelled() => return Ok(()),
            chunk = body.next() => chunk,
        };

        let Some(chunk) = chunk else {
            return Ok(());
        };
        decoder.extend(&chunk?);

        while let Some(event) = decoder.decode_next()? {
            if event.is_connected() {
                inner.on_connected(&event);
            }
            if !sender.push(event).await {
                debug!("Event dropped");
            }
        }
    }
}
