//! Call body compression
//!
//! Both ends of a link agree on a `CompressionType` during the handshake.
//! With `Deflate`, every call body is passed through a raw deflate stream at
//! the sender's level. Level 0 still produces a deflate stream (stored
//! blocks), so the receiver never has to guess whether a body was packed.

use std::fmt;
use std::io::{Read, Write};

use bytes::Bytes;
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use crate::error::ProtocolError;
use crate::frame::MAX_FRAME_SIZE;
use crate::Result;

/// Highest accepted deflate level
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

/// Default deflate level when none is configured
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Compression mode negotiated for a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionType {
    /// Bodies travel as-is
    #[default]
    None,
    /// Bodies are raw deflate streams
    Deflate,
}

impl CompressionType {
    /// Parse from a configuration string
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "deflate" => Ok(Self::Deflate),
            other => Err(ProtocolError::UnsupportedCompression(other.to_string())),
        }
    }

    /// Name used in configuration and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Deflate => "deflate",
        }
    }

    /// Wire discriminant
    #[inline]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Deflate => 1,
        }
    }

    /// Parse a wire discriminant
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Deflate),
            other => Err(ProtocolError::UnknownCompression(other)),
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body codec: a compression mode plus the level used when packing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    compression: CompressionType,
    level: u32,
}

impl Default for Codec {
    fn default() -> Self {
        Self::none()
    }
}

impl Codec {
    /// Pass-through codec
    pub const fn none() -> Self {
        Self {
            compression: CompressionType::None,
            level: 0,
        }
    }

    /// Deflate codec at the given level (0-9)
    pub fn deflate(level: u32) -> Result<Self> {
        if level > MAX_COMPRESSION_LEVEL {
            return Err(ProtocolError::InvalidCompressionLevel(level));
        }
        Ok(Self {
            compression: CompressionType::Deflate,
            level,
        })
    }

    /// Build a codec from a mode and a level
    ///
    /// The level is ignored for `CompressionType::None`.
    pub fn new(compression: CompressionType, level: u32) -> Result<Self> {
        match compression {
            CompressionType::None => Ok(Self::none()),
            CompressionType::Deflate => Self::deflate(level),
        }
    }

    /// Compression mode
    #[inline]
    pub fn compression(&self) -> CompressionType {
        self.compression
    }

    /// Deflate level (0 for pass-through)
    #[inline]
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Pack an encoded call body
    pub fn pack(&self, raw: &[u8]) -> Result<Bytes> {
        match self.compression {
            CompressionType::None => Ok(Bytes::copy_from_slice(raw)),
            CompressionType::Deflate => {
                let mut encoder = DeflateEncoder::new(
                    Vec::with_capacity(raw.len() / 2),
                    Compression::new(self.level),
                );
                encoder.write_all(raw).map_err(ProtocolError::Compression)?;
                let packed = encoder.finish().map_err(ProtocolError::Compression)?;
                Ok(Bytes::from(packed))
            }
        }
    }

    /// Unpack a received call body
    ///
    /// Inflated output is capped at `MAX_FRAME_SIZE` so a small frame cannot
    /// expand without bound.
    pub fn unpack(&self, packed: Bytes) -> Result<Bytes> {
        match self.compression {
            CompressionType::None => Ok(packed),
            CompressionType::Deflate => {
                let limit = MAX_FRAME_SIZE as u64;
                let mut decoder = DeflateDecoder::new(packed.as_ref()).take(limit + 1);
                let mut raw = Vec::with_capacity(packed.len() * 2);
                decoder
                    .read_to_end(&mut raw)
                    .map_err(ProtocolError::Compression)?;
                if raw.len() as u64 > limit {
                    return Err(ProtocolError::frame_too_large(raw.len(), limit as usize));
                }
                Ok(Bytes::from(raw))
            }
        }
    }
}

#[cfg(test)]
#[path = "codec_test.rs"]
mod codec_test;
