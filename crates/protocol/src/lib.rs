//! Conduit Protocol - events and the RPC batch protocol
//!
//! This crate provides the types shared by sinks and sources:
//! - `Event` - Immutable headers plus body, the unit moved through queues
//! - `RpcMessage` - Handshake, append and reply messages
//! - `Codec` - Optional deflate compression of call bodies
//! - `read_message` / `write_message` - Length-prefixed framing over tokio streams
//!
//! # Design Principles
//!
//! - **Zero-copy**: Event bodies are `bytes::Bytes`, shared on fan-out
//! - **Explicit negotiation**: Compression is agreed in the handshake, never guessed
//! - **Bounded**: Frames and inflated bodies are capped at `MAX_FRAME_SIZE`

mod codec;
mod error;
mod event;
mod frame;
mod message;
mod status;

pub use codec::{Codec, CompressionType, DEFAULT_COMPRESSION_LEVEL, MAX_COMPRESSION_LEVEL};
pub use error::ProtocolError;
pub use event::Event;
pub use frame::{LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE, peek_frame_len, read_message, write_message};
pub use message::{
    CALL_HEADER_SIZE, Handshake, HandshakeReply, PROTOCOL_VERSION, RpcMessage, decode_batch_body,
    decode_event_body, encode_batch_body, encode_event_body,
};
pub use status::RemoteStatus;

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
