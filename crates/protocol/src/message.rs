//! RPC messages exchanged between a sink and a source
//!
//! # Wire Format
//!
//! Every message is a length-prefixed frame:
//! ```text
//! ┌──────────────┬──────────┬─────────────────────────────┐
//! │ 4 bytes      │ 1 byte   │ N bytes                     │
//! │ length (BE)  │ type     │ payload                     │
//! └──────────────┴──────────┴─────────────────────────────┘
//! ```
//! The length counts the type byte and the payload.
//!
//! # Message Types
//!
//! - `Handshake` (0x01): sink → source, protocol version and compression
//! - `HandshakeReply` (0x02): source → sink, accept or reject with a reason
//! - `Append` (0x03): sink → source, one event
//! - `AppendBatch` (0x04): sink → source, a list of events
//! - `Reply` (0x05): source → sink, status for a call id
//!
//! # Call Bodies
//!
//! An event is encoded as a header count, the header key/value strings and
//! a length-prefixed body. A batch is an event count followed by events. The
//! encoded body of `Append` and `AppendBatch` is then packed by the link's
//! [`Codec`].

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::Result;
use crate::codec::{Codec, CompressionType};
use crate::error::ProtocolError;
use crate::event::Event;
use crate::status::RemoteStatus;

/// Protocol version carried in the handshake
pub const PROTOCOL_VERSION: u8 = 1;

const MSG_HANDSHAKE: u8 = 0x01;
const MSG_HANDSHAKE_REPLY: u8 = 0x02;
const MSG_APPEND: u8 = 0x03;
const MSG_APPEND_BATCH: u8 = 0x04;
const MSG_REPLY: u8 = 0x05;

/// Bytes an `Append`/`AppendBatch` frame adds around its body (type + call id)
pub const CALL_HEADER_SIZE: usize = 1 + 8;

/// Smallest possible encoded event: header count plus body length
const MIN_EVENT_SIZE: usize = 8;

/// Opening message of every connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub version: u8,
    pub compression: CompressionType,
}

impl Handshake {
    /// Handshake for the current protocol version
    pub fn new(compression: CompressionType) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            compression,
        }
    }
}

/// Answer to a [`Handshake`]
///
/// Carries the receiver's own version and compression mode so a rejected
/// client can report both sides of the mismatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeReply {
    pub accepted: bool,
    pub version: u8,
    pub compression: CompressionType,
    /// Rejection reason, empty when accepted
    pub message: String,
}

impl HandshakeReply {
    pub fn accept(compression: CompressionType) -> Self {
        Self {
            accepted: true,
            version: PROTOCOL_VERSION,
            compression,
            message: String::new(),
        }
    }

    pub fn reject(compression: CompressionType, message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            version: PROTOCOL_VERSION,
            compression,
            message: message.into(),
        }
    }
}

/// Messages exchanged over an RPC link
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMessage {
    Handshake(Handshake),
    HandshakeReply(HandshakeReply),
    /// Single event; `body` is a packed event body
    Append { call_id: u64, body: Bytes },
    /// Event list; `body` is a packed batch body
    AppendBatch { call_id: u64, body: Bytes },
    /// Outcome of the call with the same id
    Reply { call_id: u64, status: RemoteStatus },
}

impl RpcMessage {
    /// Encode message to bytes with length prefix
    pub fn encode(&self) -> Bytes {
        let body_len = match self {
            Self::Append { body, .. } | Self::AppendBatch { body, .. } => body.len(),
            _ => 0,
        };
        let mut buf = BytesMut::with_capacity(32 + body_len);

        // Length prefix is filled in at the end
        buf.put_u32(0);

        match self {
            Self::Handshake(handshake) => {
                buf.put_u8(MSG_HANDSHAKE);
                buf.put_u8(handshake.version);
                buf.put_u8(handshake.compression.as_u8());
            }
            Self::HandshakeReply(reply) => {
                buf.put_u8(MSG_HANDSHAKE_REPLY);
                buf.put_u8(u8::from(reply.accepted));
                buf.put_u8(reply.version);
                buf.put_u8(reply.compression.as_u8());
                encode_string(&reply.message, &mut buf);
            }
            Self::Append { call_id, body } => {
                buf.put_u8(MSG_APPEND);
                buf.put_u64(*call_id);
                buf.put_slice(body);
            }
            Self::AppendBatch { call_id, body } => {
                buf.put_u8(MSG_APPEND_BATCH);
                buf.put_u64(*call_id);
                buf.put_slice(body);
            }
            Self::Reply { call_id, status } => {
                buf.put_u8(MSG_REPLY);
                buf.put_u64(*call_id);
                buf.put_u8(status.as_u8());
            }
        }

        let len = (buf.len() - 4) as u32;
        buf[0..4].copy_from_slice(&len.to_be_bytes());

        buf.freeze()
    }

    /// Decode message from a frame (without length prefix)
    pub fn decode(mut buf: Bytes) -> Result<Self> {
        if buf.is_empty() {
            return Err(ProtocolError::EmptyFrame);
        }

        let msg_type = buf.get_u8();

        let message = match msg_type {
            MSG_HANDSHAKE => {
                if buf.remaining() < 2 {
                    return Err(ProtocolError::Truncated("handshake"));
                }
                let version = buf.get_u8();
                let compression = CompressionType::from_u8(buf.get_u8())?;
                Self::Handshake(Handshake {
                    version,
                    compression,
                })
            }
            MSG_HANDSHAKE_REPLY => {
                if buf.remaining() < 3 {
                    return Err(ProtocolError::Truncated("handshake reply"));
                }
                let accepted = buf.get_u8() != 0;
                let version = buf.get_u8();
                let compression = CompressionType::from_u8(buf.get_u8())?;
                let message = decode_string(&mut buf, "handshake reply message")?;
                Self::HandshakeReply(HandshakeReply {
                    accepted,
                    version,
                    compression,
                    message,
                })
            }
            MSG_APPEND | MSG_APPEND_BATCH => {
                if buf.remaining() < 8 {
                    return Err(ProtocolError::Truncated("call id"));
                }
                let call_id = buf.get_u64();
                // Body runs to the end of the frame
                let body = std::mem::take(&mut buf);
                if msg_type == MSG_APPEND {
                    Self::Append { call_id, body }
                } else {
                    Self::AppendBatch { call_id, body }
                }
            }
            MSG_REPLY => {
                if buf.remaining() < 9 {
                    return Err(ProtocolError::Truncated("reply"));
                }
                let call_id = buf.get_u64();
                let status = RemoteStatus::from_u8(buf.get_u8())?;
                Self::Reply { call_id, status }
            }
            other => return Err(ProtocolError::UnknownMessageType(other)),
        };

        if buf.has_remaining() {
            return Err(ProtocolError::TrailingBytes(buf.remaining()));
        }
        Ok(message)
    }

    /// Call id for append and reply messages
    pub fn call_id(&self) -> Option<u64> {
        match self {
            Self::Append { call_id, .. }
            | Self::AppendBatch { call_id, .. }
            | Self::Reply { call_id, .. } => Some(*call_id),
            Self::Handshake(_) | Self::HandshakeReply(_) => None,
        }
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Handshake(_) => "handshake",
            Self::HandshakeReply(_) => "handshake_reply",
            Self::Append { .. } => "append",
            Self::AppendBatch { .. } => "append_batch",
            Self::Reply { .. } => "reply",
        }
    }
}

// ============================================================================
// Call bodies
// ============================================================================

/// Encode and pack a single event
pub fn encode_event_body(event: &Event, codec: &Codec) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(encoded_len(event));
    encode_event(event, &mut buf);
    codec.pack(&buf)
}

/// Encode and pack a list of events
pub fn encode_batch_body(events: &[Event], codec: &Codec) -> Result<Bytes> {
    let size = 4 + events.iter().map(encoded_len).sum::<usize>();
    let mut buf = BytesMut::with_capacity(size);
    buf.put_u32(events.len() as u32);
    for event in events {
        encode_event(event, &mut buf);
    }
    codec.pack(&buf)
}

/// Unpack and decode a single event
pub fn decode_event_body(body: Bytes, codec: &Codec) -> Result<Event> {
    let mut buf = codec.unpack(body)?;
    let event = decode_event(&mut buf)?;
    if buf.has_remaining() {
        return Err(ProtocolError::TrailingBytes(buf.remaining()));
    }
    Ok(event)
}

/// Unpack and decode a list of events
pub fn decode_batch_body(body: Bytes, codec: &Codec) -> Result<Vec<Event>> {
    let mut buf = codec.unpack(body)?;
    if buf.remaining() < 4 {
        return Err(ProtocolError::Truncated("event count"));
    }
    let count = buf.get_u32() as usize;
    if buf.remaining() < count.saturating_mul(MIN_EVENT_SIZE) {
        return Err(ProtocolError::Truncated("event list"));
    }

    let mut events = Vec::with_capacity(count);
    for _ in 0..count {
        events.push(decode_event(&mut buf)?);
    }
    if buf.has_remaining() {
        return Err(ProtocolError::TrailingBytes(buf.remaining()));
    }
    Ok(events)
}

fn encoded_len(event: &Event) -> usize {
    let headers: usize = event
        .headers()
        .iter()
        .map(|(k, v)| 8 + k.len() + v.len())
        .sum();
    MIN_EVENT_SIZE + headers + event.body().len()
}

fn encode_event(event: &Event, buf: &mut BytesMut) {
    buf.put_u32(event.headers().len() as u32);
    for (key, value) in event.headers() {
        encode_string(key, buf);
        encode_string(value, buf);
    }
    buf.put_u32(event.body().len() as u32);
    buf.put_slice(event.body());
}

fn decode_event(buf: &mut Bytes) -> Result<Event> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::Truncated("header count"));
    }
    let count = buf.get_u32() as usize;
    // Each header needs at least two length prefixes
    if buf.remaining() < count.saturating_mul(8) {
        return Err(ProtocolError::Truncated("headers"));
    }

    let mut headers = BTreeMap::new();
    for _ in 0..count {
        let key = decode_string(buf, "header key")?;
        let value = decode_string(buf, "header value")?;
        headers.insert(key, value);
    }

    if buf.remaining() < 4 {
        return Err(ProtocolError::Truncated("event body length"));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::Truncated("event body"));
    }
    Ok(Event::new(headers, buf.split_to(len)))
}

// ============================================================================
// Encoding helpers
// ============================================================================

fn encode_string(s: &str, buf: &mut BytesMut) {
    let bytes = s.as_bytes();
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

fn decode_string(buf: &mut Bytes, field: &'static str) -> Result<String> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::Truncated(field));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::Truncated(field));
    }
    let bytes = buf.split_to(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8 { field })
}

#[cfg(test)]
#[path = "message_test.rs"]
mod message_test;
