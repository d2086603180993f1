//! # beacon-transport
//!
//! Output sink abstraction for Beacon event streams.
//!
//! The server never writes to a socket directly. Each stream owns an
//! [`EventSink`] that accepts framed bytes and flushes them to the peer:
//!
//! - **ChannelSink** - bounded channel feeding an HTTP streaming response body
//!
//! ```rust,ignore
//! use beacon_transport::{ChannelSink, EventSink};
//!
//! let (mut sink, body) = ChannelSink::pair(64);
//! sink.write(frame).await?;
//! sink.flush().await?;
//! // `body` is handed to the HTTP framework as the response stream.
//! ```

pub mod channel;
pub mod traits;

pub use channel::{ChannelSink, ChannelStream};
pub use traits::{ConnectionId, EventSink, TransportError};
