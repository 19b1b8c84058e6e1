//! Client side of one RPC connection
//!
//! A connection is only handed out after the handshake succeeded, so every
//! `RpcConnection` speaks the sink's compression mode.

use std::io;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use conduit_protocol::{
    CompressionType, Handshake, PROTOCOL_VERSION, ProtocolError, RemoteStatus, RpcMessage,
    read_message, write_message,
};
use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;

use crate::common::DeliveryError;

/// Connection slot owned by one sink
#[derive(Debug, Default)]
pub enum Link {
    #[default]
    Absent,
    Established(RpcConnection),
}

impl Link {
    /// Move the connection out, leaving the slot absent
    pub fn take(&mut self) -> Option<RpcConnection> {
        match std::mem::take(self) {
            Self::Absent => None,
            Self::Established(conn) => Some(conn),
        }
    }

    #[inline]
    pub fn is_established(&self) -> bool {
        matches!(self, Self::Established(_))
    }
}

/// Handshaken TCP connection to a source
#[derive(Debug)]
pub struct RpcConnection {
    target: String,
    stream: TcpStream,
    buf: BytesMut,
    next_call_id: u64,
    established_at: Instant,
}

impl RpcConnection {
    /// Connect to `target` and negotiate `compression`
    ///
    /// Not bounded by any timeout; the caller wraps the whole exchange.
    pub async fn open(
        target: &str,
        compression: CompressionType,
        keepalive: Option<Duration>,
    ) -> Result<Self, DeliveryError> {
        let stream = TcpStream::connect(target)
            .await
            .map_err(|e| DeliveryError::connection(target, e))?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(endpoint = %target, error = %e, "failed to set TCP_NODELAY");
        }

        if let Some(interval) = keepalive {
            let keepalive = TcpKeepalive::new().with_time(interval);

            #[cfg(target_os = "linux")]
            let keepalive = keepalive.with_interval(interval);

            if let Err(e) = SockRef::from(&stream).set_tcp_keepalive(&keepalive) {
                tracing::debug!(endpoint = %target, error = %e, "failed to set TCP keep-alive");
            }
        }

        let mut conn = Self {
            target: target.to_string(),
            stream,
            buf: BytesMut::new(),
            next_call_id: 0,
            established_at: Instant::now(),
        };
        conn.handshake(compression).await?;
        conn.established_at = Instant::now();
        Ok(conn)
    }

    async fn handshake(&mut self, compression: CompressionType) -> Result<(), DeliveryError> {
        let hello = RpcMessage::Handshake(Handshake::new(compression));
        self.send(&hello).await?;

        let reply = match self.recv().await? {
            RpcMessage::HandshakeReply(reply) => reply,
            other => {
                return Err(ProtocolError::UnexpectedMessage {
                    expected: "handshake_reply",
                    actual: other.kind(),
                }
                .into());
            }
        };

        if reply.compression != compression {
            return Err(DeliveryError::CompressionMismatch {
                local: compression,
                remote: reply.compression,
            });
        }
        if reply.version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(reply.version).into());
        }
        if !reply.accepted {
            return Err(ProtocolError::HandshakeRejected(reply.message).into());
        }
        Ok(())
    }

    /// Issue one call and wait for its reply
    ///
    /// A single event goes out as `append`, anything else as `append_batch`.
    pub async fn call(
        &mut self,
        events: usize,
        body: Bytes,
    ) -> Result<RemoteStatus, DeliveryError> {
        self.next_call_id = self.next_call_id.wrapping_add(1);
        let call_id = self.next_call_id;

        let request = if events == 1 {
            RpcMessage::Append { call_id, body }
        } else {
            RpcMessage::AppendBatch { call_id, body }
        };
        self.send(&request).await?;

        match self.recv().await? {
            RpcMessage::Reply {
                call_id: answered,
                status,
            } => {
                if answered != call_id {
                    return Err(ProtocolError::CallIdMismatch {
                        expected: call_id,
                        actual: answered,
                    }
                    .into());
                }
                Ok(status)
            }
            other => Err(ProtocolError::UnexpectedMessage {
                expected: "reply",
                actual: other.kind(),
            }
            .into()),
        }
    }

    /// Time since the handshake completed
    #[inline]
    pub fn age(&self) -> Duration {
        self.established_at.elapsed()
    }

    #[inline]
    pub fn target(&self) -> &str {
        &self.target
    }

    async fn send(&mut self, message: &RpcMessage) -> Result<(), DeliveryError> {
        write_message(&mut self.stream, message)
            .await
            .map_err(|e| self.transport_error(e))
    }

    async fn recv(&mut self) -> Result<RpcMessage, DeliveryError> {
        match read_message(&mut self.stream, &mut self.buf).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(DeliveryError::connection(
                &self.target,
                io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by peer"),
            )),
            Err(e) => Err(self.transport_error(e)),
        }
    }

    fn transport_error(&self, e: ProtocolError) -> DeliveryError {
        match e {
            ProtocolError::Io(source) => DeliveryError::connection(&self.target, source),
            other => DeliveryError::Protocol(other),
        }
    }
}
