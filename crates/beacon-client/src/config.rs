//! Client configuration.

use std::time::Duration;

/// Default stream endpoint path.
pub const DEFAULT_STREAM_PATH: &str = "/api/sse/connect";

/// What the reader does when the handler queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backpressure {
    /// Keep reading; the oldest queued events are discarded.
    DropOldest,
    /// Wait for space up to `timeout`, then drop the new event.
    Block {
        /// How long the reader may wait.
        timeout: Duration,
    },
}

impl Default for Backpressure {
    fn default() -> Self {
        Self::DropOldest
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the server, e.g. `http://localhost:8080`.
    pub server_url: String,
    /// Stream endpoint path appended to `server_url`.
    pub stream_path: String,
    /// Identifier to request. `None` lets the server assign one.
    pub client_id: Option<String>,
    /// Connection attempts before giving up.
    pub max_retries: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound for the retry delay.
    pub max_backoff: Duration,
    /// Start over from `initial_backoff` after a successful connection.
    /// Off by default: the delay otherwise carries across sessions for the
    /// lifetime of the client.
    pub reset_backoff_on_connect: bool,
    /// Events buffered between the reader and the handlers.
    pub queue_capacity: usize,
    /// Policy for a full handler queue.
    pub backpressure: Backpressure,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".to_string(),
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            client_id: None,
            max_retries: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            reset_backoff_on_connect: false,
            queue_capacity: 256,
            backpressure: Backpressure::default(),
        }
    }
}

impl ClientConfig {
    /// Configuration for `server_url` with default settings.
    #[must_use]
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    /// Configuration from `SERVER_URL` and `CLIENT_ID`.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("SERVER_URL") {
            config.server_url = url;
        }
        config.client_id = std::env::var("CLIENT_ID").ok().filter(|id| !id.is_empty());
        config
    }

    /// Set the stream path.
    #[must_use]
    pub fn with_stream_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = path.into();
        self
    }

    /// Request a fixed identifier.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the attempt limit.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the initial and maximum retry delay.
    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Keep or reset the retry delay after a successful connection.
    #[must_use]
    pub fn with_reset_backoff_on_connect(mut self, reset: bool) -> Self {
        self.reset_backoff_on_connect = reset;
        self
    }

    /// Set the handler queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the backpressure policy.
    #[must_use]
    pub fn with_backpressure(mut self, backpressure: Backpressure) -> Self {
        self.backpressure = backpressure;
        self
    }

    /// Full URL of the stream endpoint, without query parameters.
    #[must_use]
    pub fn stream_url(&self) -> String {
        format!("{}{}", self.server_url.trim_end_matches('/'), self.stream_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.max_retries, 10);
        assert_eq!(config.initial_backoff, Duration::from_secs(1));
        assert_eq!(config.max_backoff, Duration::from_secs(60));
        assert!(!config.reset_backoff_on_connect);
        assert_eq!(config.queue_capacity, 256);
        assert_eq!(config.backpressure, Backpressure::DropOldest);
    }

    #[test]
    fn test_stream_url() {
        let config = ClientConfig::new("http://localhost:8080/");
        assert_eq!(config.stream_url(), "http://localhost:8080/api/sse/connect");

        let config = config.with_stream_path("/events");
        assert_eq!(config.stream_url(), "http://localhost:8080/events");
    }
}
