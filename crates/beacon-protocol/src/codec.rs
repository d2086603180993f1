//! Incremental decoder for the Beacon event stream.
//!
//! The decoder accepts arbitrary chunks of the response body, splits them into
//! lines, and assembles complete events. Chunks may end in the middle of a line.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::frames::Event;

/// Maximum length of a single protocol line (1 MiB).
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Protocol errors that can occur while decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A line exceeded the maximum length without a terminator.
    #[error("Line size {0} exceeds maximum {MAX_LINE_LENGTH}")]
    LineTooLong(usize),
}

/// Streaming event decoder.
///
/// Field handling:
/// - lines starting with `:` are comments and are skipped
/// - `event:` sets the pending event type
/// - `data:` sets the pending payload (single line, a later line replaces it)
/// - a blank line completes an event once both fields are non-empty
/// - anything else is ignored
#[derive(Debug, Default)]
pub struct EventDecoder {
    buffer: BytesMut,
    event_type: Option<String>,
    data: Option<Bytes>,
}

impl EventDecoder {
    /// Create a new decoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            event_type: None,
            data: None,
        }
    }

    /// Append a chunk of the stream to the internal buffer.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Number of buffered bytes not yet consumed as lines.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Try to decode the next complete event from the buffer.
    ///
    /// Returns `Ok(Some(event))` when an event was completed, `Ok(None)` if more
    /// data is needed.
    ///
    /// # Errors
    ///
    /// Returns an error if a line grows beyond [`MAX_LINE_LENGTH`].
    pub fn decode_next(&mut self) -> Result<Option<Event>, ProtocolError> {
        loop {
            let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') else {
                if self.buffer.len() > MAX_LINE_LENGTH {
                    return Err(ProtocolError::LineTooLong(self.buffer.len()));
                }
                return Ok(None);
            };

            if newline > MAX_LINE_LENGTH {
                return Err(ProtocolError::LineTooLong(newline));
            }

            let mut line = self.buffer.split_to(newline + 1);
            line.truncate(newline);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }

            if let Some(event) = self.process_line(line.freeze()) {
                return Ok(Some(event));
            }
        }
    }

    /// Feed a chunk and collect every event it completes.
    ///
    /// # Errors
    ///
    /// Returns an error if a line grows beyond [`MAX_LINE_LENGTH`].
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Vec<Event>, ProtocolError> {
        self.extend(chunk);
        let mut events = Vec::new();
        while let Some(event) = self.decode_next()? {
            events.push(event);
        }
        Ok(events)
    }

    fn process_line(&mut self, line: Bytes) -> Option<Event> {
        if line.is_empty() {
            return self.complete();
        }

        if line.starts_with(b":") {
            return None;
        }

        if let Some(offset) = field_value(&line, b"event") {
            // Event types that are not UTF-8 cannot match any handler.
            if let Ok(event_type) = std::str::from_utf8(&line[offset..]) {
                self.event_type = Some(event_type.to_string());
            }
        } else if let Some(offset) = field_value(&line, b"data") {
            self.data = Some(line.slice(offset..));
        }

        None
    }

    fn complete(&mut self) -> Option<Event> {
        let ready = matches!(&self.event_type, Some(t) if !t.is_empty())
            && matches!(&self.data, Some(d) if !d.is_empty());
        if !ready {
            return None;
        }

        let event_type = self.event_type.take()?;
        let data = self.data.take()?;
        Some(Event { event_type, data })
    }
}

/// Offset of the value in `name:value` or `name: value`.
fn field_value(line: &[u8], name: &[u8]) -> Option<usize> {
    let rest = line.strip_prefix(name)?.strip_prefix(b":")?;
    let offset = line.len() - rest.len();
    if rest.first() == Some(&b' ') {
        Some(offset + 1)
    } else {
        Some(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut decoder = EventDecoder::new();
        let events = decoder.decode(b"event: ping\ndata: {\"x\":1}\n\n").unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "ping");
        assert_eq!(&events[0].data[..], br#"{"x":1}"#);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_comment_is_dropped() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.decode(b": keepalive\n\n").unwrap().is_empty());

        let events = decoder
            .decode(b": keepalive\n\nevent: ping\ndata: {\"x\":1}\n\n")
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "ping");
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.decode(b"eve").unwrap().is_empty());
        assert!(decoder.decode(b"nt: tick\nda").unwrap().is_empty());
        assert!(decoder.decode(b"ta: {\"n\":1}\n").unwrap().is_empty());

        let events = decoder.decode(b"\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "tick");
        assert_eq!(&events[0].data[..], br#"{"n":1}"#);
    }

    #[test]
    fn test_crlf_and_compact_fields() {
        let mut decoder = EventDecoder::new();
        let events = decoder.decode(b"event:tick\r\ndata:{}\r\n\r\n").unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "tick");
        assert_eq!(&events[0].data[..], b"{}");
    }

    #[test]
    fn test_multiple_events_in_one_chunk() {
        let mut decoder = EventDecoder::new();
        let events = decoder
            .decode(b"event: a\ndata: 1\n\nevent: b\ndata: 2\n\n")
            .unwrap();

        let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, ["a", "b"]);
    }

    #[test]
    fn test_unknown_lines_are_ignored() {
        let mut decoder = EventDecoder::new();
        let events = decoder
            .decode(b"id: 7\nretry: 1000\nevent: a\nfoo\ndata: 1\n\n")
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "a");
    }

    #[test]
    fn test_incomplete_event_waits_for_missing_field() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.decode(b"event: a\n\n").unwrap().is_empty());

        let events = decoder.decode(b"data: 1\n\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "a");
    }

    #[test]
    fn test_later_data_line_replaces_earlier() {
        let mut decoder = EventDecoder::new();
        let events = decoder.decode(b"event: a\ndata: 1\ndata: 2\n\n").unwrap();
        assert_eq!(&events[0].data[..], b"2");
    }

    #[test]
    fn test_line_too_long() {
        let mut decoder = EventDecoder::new();
        decoder.extend(&vec![b'x'; MAX_LINE_LENGTH + 1]);

        match decoder.decode_next() {
            Err(ProtocolError::LineTooLong(_)) => {}
            other => panic!("Expected LineTooLong error, got {:?}", other),
        }
    }

    #[test]
    fn test_encoded_event_decodes() {
        let event = Event::new("scan", r#"{"hosts":["10.0.0.1"]}"#);
        let mut decoder = EventDecoder::new();
        let events = decoder.decode(&event.encode()).unwrap();
        assert_eq!(events, vec![event]);
    }
}
