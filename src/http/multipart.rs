//! Hand-rolled multipart/mixed encoding for composite (accumulated)
//! deliveries (spec §6). No crate in the corpus builds multipart response
//! bodies, so this mirrors the byte framing [`crate::codec`] already does by
//! hand rather than reaching for an unrelated dependency.

use crate::message::Message;

pub const BOUNDARY: &str = "pluq-boundary-7f3a";

/// One part per message, in order, each carrying its own `Content-Type`;
/// terminated with the closing delimiter per RFC 2046.
pub fn encode(messages: &[Message]) -> Vec<u8> {
    let mut buf = Vec::new();
    for message in messages {
        buf.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        buf.extend_from_slice(format!("Content-Type: {}\r\n\r\n", message.content_type).as_bytes());
        buf.extend_from_slice(&message.body);
        buf.extend_from_slice(b"\r\n");
    }
    buf.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    buf
}

pub fn content_type() -> String {
    format!("multipart/mixed; boundary={BOUNDARY}")
}
