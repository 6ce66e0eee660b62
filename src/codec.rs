//! MessageCodec collaborator (spec §1: "message-body serialization codec
//! choice" is out of scope for the core and named only through the
//! interface it consumes). [`LengthPrefixedCodec`] is the concrete codec
//! the storage drivers are wired to by default.
//!
//! Record layout (all integers big-endian):
//! `u32 content_type_len | content_type bytes | u32 metadata_count |
//!  (u32 key_len | key bytes | u32 val_len | val bytes) * metadata_count |
//!  u64 body_len | body bytes`
//!
//! Accumulation appends a second record after the first; `decode_all` keeps
//! reading records until the slice is exhausted (spec §9 "the decoder must
//! iterate records until end-of-bytes").

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::{PluqError, Result};
use crate::message::Message;

pub trait MessageCodec: Send + Sync {
    fn encode(&self, msg: &Message) -> Vec<u8>;
    fn decode_all(&self, bytes: &[u8]) -> Result<Vec<Message>>;

    /// Append a serialized record for `msg` to an existing encoded value,
    /// for the accumulation append-on-same-message-id path.
    fn append(&self, existing: &[u8], msg: &Message) -> Vec<u8> {
        let mut buf = Vec::with_capacity(existing.len() + 64);
        buf.extend_from_slice(existing);
        buf.extend(self.encode(msg));
        buf
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LengthPrefixedCodec;

fn read_u32(bytes: &[u8], pos: &mut usize) -> Result<u32> {
    let end = *pos + 4;
    let chunk: [u8; 4] = bytes
        .get(*pos..end)
        .ok_or(PluqError::MessageMissing(0))?
        .try_into()
        .map_err(|_| PluqError::MessageMissing(0))?;
    *pos = end;
    Ok(u32::from_be_bytes(chunk))
}

fn read_u64(bytes: &[u8], pos: &mut usize) -> Result<u64> {
    let end = *pos + 8;
    let chunk: [u8; 8] = bytes
        .get(*pos..end)
        .ok_or(PluqError::MessageMissing(0))?
        .try_into()
        .map_err(|_| PluqError::MessageMissing(0))?;
    *pos = end;
    Ok(u64::from_be_bytes(chunk))
}

fn read_bytes<'a>(bytes: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = *pos + len;
    let slice = bytes.get(*pos..end).ok_or(PluqError::MessageMissing(0))?;
    *pos = end;
    Ok(slice)
}

impl MessageCodec for LengthPrefixedCodec {
    fn encode(&self, msg: &Message) -> Vec<u8> {
        let ct = msg.content_type.as_bytes();
        let mut buf = Vec::with_capacity(4 + ct.len() + 4 + msg.body.len() + 8);

        buf.extend((ct.len() as u32).to_be_bytes());
        buf.extend_from_slice(ct);

        let metadata = msg.metadata.as_ref();
        let count = metadata.map(|m| m.len()).unwrap_or(0) as u32;
        buf.extend(count.to_be_bytes());
        if let Some(metadata) = metadata {
            for (k, v) in metadata {
                let kb = k.as_bytes();
                buf.extend((kb.len() as u32).to_be_bytes());
                buf.extend_from_slice(kb);
                buf.extend((v.len() as u32).to_be_bytes());
                buf.extend_from_slice(v);
            }
        }

        buf.extend((msg.body.len() as u64).to_be_bytes());
        buf.extend_from_slice(&msg.body);
        buf
    }

    fn decode_all(&self, bytes: &[u8]) -> Result<Vec<Message>> {
        let mut out = Vec::new();
        let mut pos = 0usize;
        while pos < bytes.len() {
            let ct_len = read_u32(bytes, &mut pos)? as usize;
            let content_type = String::from_utf8(read_bytes(bytes, &mut pos, ct_len)?.to_vec())
                .map_err(|_| PluqError::MessageMissing(0))?;

            let meta_count = read_u32(bytes, &mut pos)?;
            let metadata = if meta_count == 0 {
                None
            } else {
                let mut map = HashMap::with_capacity(meta_count as usize);
                for _ in 0..meta_count {
                    let klen = read_u32(bytes, &mut pos)? as usize;
                    let key = String::from_utf8(read_bytes(bytes, &mut pos, klen)?.to_vec())
                        .map_err(|_| PluqError::MessageMissing(0))?;
                    let vlen = read_u32(bytes, &mut pos)? as usize;
                    let val = Bytes::copy_from_slice(read_bytes(bytes, &mut pos, vlen)?);
                    map.insert(key, val);
                }
                Some(map)
            };

            let body_len = read_u64(bytes, &mut pos)? as usize;
            let body = Bytes::copy_from_slice(read_bytes(bytes, &mut pos, body_len)?);

            out.push(Message {
                body,
                content_type,
                metadata,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(body: &str) -> Message {
        Message {
            body: Bytes::from(body.to_string()),
            content_type: "text/plain".to_string(),
            metadata: None,
        }
    }

    #[test]
    fn single_record_round_trips() {
        let codec = LengthPrefixedCodec;
        let encoded = codec.encode(&msg("hello"));
        let decoded = codec.decode_all(&encoded).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].body, Bytes::from("hello"));
        assert_eq!(decoded[0].content_type, "text/plain");
    }

    #[test]
    fn appended_records_decode_in_order() {
        let codec = LengthPrefixedCodec;
        let first = codec.encode(&msg("one"));
        let combined = codec.append(&first, &msg("two"));
        let decoded = codec.decode_all(&combined).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].body, Bytes::from("one"));
        assert_eq!(decoded[1].body, Bytes::from("two"));
    }

    #[test]
    fn metadata_round_trips() {
        let mut metadata = HashMap::new();
        metadata.insert("k".to_string(), Bytes::from("v"));
        let m = Message {
            body: Bytes::from("b"),
            content_type: "application/octet-stream".to_string(),
            metadata: Some(metadata),
        };
        let codec = LengthPrefixedCodec;
        let decoded = codec.decode_all(&codec.encode(&m)).unwrap();
        let got = decoded[0].metadata.as_ref().unwrap();
        assert_eq!(got.get("k"), Some(&Bytes::from("v")));
    }
}
