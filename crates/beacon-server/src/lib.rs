//! # Beacon Server
//!
//! Pushes named JSON events to agents holding open event streams.
//!
//! ## Endpoints
//!
//! - `GET /api/sse/connect` - the event stream (`OPTIONS` answers CORS preflight)
//! - `POST /api/sse/send` - send an event to some or all connected agents
//! - `GET /api/sse/clients` - list connected agents
//! - `GET /health` - liveness and connection count

pub mod config;
pub mod handlers;
pub mod metrics;

mod cors;
mod stream;

pub use config::Config;
pub use cors::{allowed_origin, cors_headers};
pub use handlers::{router, run_server, serve, AppState, SendRequest};
