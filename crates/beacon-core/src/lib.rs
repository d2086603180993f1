//! # beacon-core
//!
//! Server-side building blocks for the Beacon event stream:
//!
//! - **Connection** - a registered stream with its own write lock and done signal
//! - **Registry** - bounded set of active connections
//! - **Dispatcher** - validate once, encode once, fan out within a deadline
//! - **Pinger** - per-connection keepalive comments
//! - **Message** - event type plus JSON payload
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ Dispatcher  │────▶│  Registry   │────▶│ Connection  │──▶ sink
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                                                ▲
//!                                         ┌─────────────┐
//!                                         │   Pinger    │
//!                                         └─────────────┘
//! ```

pub mod connection;
pub mod dispatcher;
pub mod message;
pub mod pinger;
pub mod registry;

pub use beacon_transport::ConnectionId;
pub use connection::Connection;
pub use dispatcher::{DeliveryReport, DispatchError, Dispatcher, DispatcherConfig};
pub use message::Message;
pub use pinger::{run_pinger, PingerResult};
pub use registry::{Registry, RegistryConfig, RegistryError};
