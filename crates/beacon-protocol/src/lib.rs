//! # beacon-protocol
//!
//! Wire protocol definitions for the Beacon event stream.
//!
//! Beacon speaks a line-oriented text protocol over a long-lived HTTP response.
//! Each event is a block of two field lines followed by a blank line; lines
//! starting with `:` are comments used as keepalives.
//!
//! ```text
//! event: tick
//! data: {"n":1}
//!
//! : keepalive
//!
//! ```
//!
//! ## Example
//!
//! ```rust
//! use beacon_protocol::{encode_event, EventDecoder};
//!
//! let frame = encode_event("tick", br#"{"n":1}"#);
//!
//! let mut decoder = EventDecoder::new();
//! let events = decoder.decode(&frame).unwrap();
//! assert_eq!(events.len(), 1);
//! assert_eq!(events[0].event_type, "tick");
//! ```

pub mod codec;
pub mod frames;

pub use codec::{EventDecoder, ProtocolError, MAX_LINE_LENGTH};
pub use frames::{
    encode_event, keepalive, validate_event_type, ConnectedPayload, Event, CONNECTED_EVENT,
    KEEPALIVE,
};
