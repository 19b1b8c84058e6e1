//! Protocol error types
//!
//! Errors that can occur when framing, encoding or decoding RPC messages.

use std::io;

use thiserror::Error;

/// Errors that can occur during protocol operations
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message ended before a field could be read
    #[error("truncated {0}")]
    Truncated(&'static str),

    /// Frame was empty (no message type byte)
    #[error("empty frame")]
    EmptyFrame,

    /// Unknown message type discriminant
    #[error("unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    /// Frame length exceeds the configured maximum
    #[error("frame size {size} exceeds limit {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// String field is not valid UTF-8
    #[error("invalid UTF-8 in {field}")]
    InvalidUtf8 { field: &'static str },

    /// Unknown remote status code
    #[error("invalid status code: {0}")]
    InvalidStatus(u8),

    /// Unknown compression mode on the wire
    #[error("unknown compression mode: {0}")]
    UnknownCompression(u8),

    /// Unknown compression name in configuration
    #[error("unsupported compression type '{0}' (expected 'none' or 'deflate')")]
    UnsupportedCompression(String),

    /// Compression level outside 0-9
    #[error("invalid compression level {0} (expected 0-9)")]
    InvalidCompressionLevel(u32),

    /// Peer speaks a different protocol version
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// Deflate stream could not be produced or inflated
    #[error("compression failed: {0}")]
    Compression(#[source] io::Error),

    /// Well-formed message arrived where another kind was required
    #[error("unexpected {actual} message, expected {expected}")]
    UnexpectedMessage {
        expected: &'static str,
        actual: &'static str,
    },

    /// Reply answers a different call than the one outstanding
    #[error("reply for call {actual}, expected call {expected}")]
    CallIdMismatch { expected: u64, actual: u64 },

    /// Peer refused the handshake
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// Trailing bytes after a fully decoded message
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    /// Connection closed in the middle of a frame
    #[error("connection closed mid-frame ({buffered} bytes buffered)")]
    UnexpectedEof { buffered: usize },

    /// Socket I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Create a frame too large error
    #[inline]
    pub fn frame_too_large(size: usize, max: usize) -> Self {
        Self::FrameTooLarge { size, max }
    }

    /// Whether the error leaves the stream unusable
    ///
    /// Decode errors confined to one frame leave the framing intact, so a
    /// server can answer the call and keep reading. Framing and I/O errors
    /// cannot be recovered from.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::FrameTooLarge { .. } | Self::UnexpectedEof { .. } | Self::Io(_)
        )
    }
}
