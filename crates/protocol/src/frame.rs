//! Reading and writing length-prefixed frames on an async stream

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::Result;
use crate::error::ProtocolError;
use crate::message::RpcMessage;

/// Maximum frame size (16 MiB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Size of the big-endian length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Minimum spare capacity before a socket read
const READ_CHUNK: usize = 8 * 1024;

/// Peek at the frame length without consuming the buffer
///
/// Returns `None` until the full prefix has arrived. A zero length is
/// returned as-is and rejected when the frame is decoded.
pub fn peek_frame_len(buf: &[u8]) -> Result<Option<usize>> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::frame_too_large(len, MAX_FRAME_SIZE));
    }
    Ok(Some(len))
}

/// Read the next message from `reader`
///
/// `buf` carries bytes read past the end of the previous frame and must be
/// reused across calls on the same stream. Returns `Ok(None)` on a clean
/// end of stream. A frame that fails to decode is consumed, so the caller
/// may keep reading after a non-fatal error.
pub async fn read_message<R>(reader: &mut R, buf: &mut BytesMut) -> Result<Option<RpcMessage>>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(len) = peek_frame_len(buf)?
            && buf.len() >= LENGTH_PREFIX_SIZE + len
        {
            buf.advance(LENGTH_PREFIX_SIZE);
            let frame = buf.split_to(len).freeze();
            return RpcMessage::decode(frame).map(Some);
        }

        if buf.capacity() - buf.len() < READ_CHUNK {
            buf.reserve(READ_CHUNK);
        }

        let n = reader.read_buf(buf).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(ProtocolError::UnexpectedEof {
                buffered: buf.len(),
            });
        }
    }
}

/// Write one message and flush
pub async fn write_message<W>(writer: &mut W, message: &RpcMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&message.encode()).await?;
    writer.flush().await?;
    Ok(())
}
