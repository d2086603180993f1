//! # beacon-client
//!
//! Reconnecting client for the Beacon event stream.
//!
//! ```rust,ignore
//! use beacon_client::{ClientConfig, SseClient};
//!
//! let client = SseClient::new(ClientConfig::new("http://localhost:8080"));
//! client.add_event_handler("request", |data: &[u8]| {
//!     println!("request: {}", String::from_utf8_lossy(data));
//!     Ok(())
//! });
//! client.run().await?;
//! ```

pub mod backoff;
pub mod client;
pub mod config;
pub mod handlers;
pub mod queue;

pub use backoff::Backoff;
pub use client::{ClientError, ConnectionState, SseClient};
pub use config::{Backpressure, ClientConfig};
pub use handlers::{EventHandler, HandlerRegistry};
