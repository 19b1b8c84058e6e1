//! Server side of one RPC connection
//!
//! Decodes calls, queues them for the worker pool and writes each reply
//! before reading the next call. Cancellation stops the reading; a call
//! already handed to the workers still gets its reply written.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use conduit_protocol::{
    Codec, ProtocolError, RemoteStatus, RpcMessage, decode_batch_body, decode_event_body,
    read_message, write_message,
};
use crossfire::MAsyncTx;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::worker::{Call, PendingCall};
use crate::common::SourceCounters;
use crate::responder::Responder;

/// Shared by every connection of one source
pub(crate) struct ConnectionContext {
    pub source: String,
    pub codec: Codec,
    pub responder: Arc<dyn Responder>,
    pub calls: MAsyncTx<PendingCall>,
    pub counters: Arc<SourceCounters>,
}

/// Why a connection ended
#[derive(Debug, thiserror::Error)]
pub(crate) enum ConnectionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("expected handshake, got {0}")]
    MissingHandshake(&'static str),

    #[error("handshake rejected: {0}")]
    Rejected(String),

    #[error("unexpected {0} message")]
    Unexpected(&'static str),

    #[error("worker pool closed")]
    PoolClosed,
}

pub(crate) async fn serve(
    ctx: Arc<ConnectionContext>,
    mut stream: TcpStream,
    peer: SocketAddr,
    cancel: CancellationToken,
) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
    }

    ctx.counters.connection_opened();
    let result = handle(&ctx, &mut stream, peer, &cancel).await;
    ctx.counters.connection_closed();

    match result {
        Ok(()) => tracing::debug!(source = %ctx.source, peer = %peer, "connection closed"),
        Err(e) => tracing::debug!(
            source = %ctx.source,
            peer = %peer,
            error = %e,
            "connection ended"
        ),
    }
}

async fn handle(
    ctx: &ConnectionContext,
    stream: &mut TcpStream,
    peer: SocketAddr,
    cancel: &CancellationToken,
) -> Result<(), ConnectionError> {
    let mut buf = BytesMut::new();

    let first = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(()),
        result = read_message(stream, &mut buf) => result?,
    };
    let hello = match first {
        None => return Ok(()),
        Some(RpcMessage::Handshake(hello)) => hello,
        Some(other) => return Err(ConnectionError::MissingHandshake(other.kind())),
    };

    let reply = ctx.responder.handshake(&hello, ctx.codec.compression()).await;
    let accepted = reply.accepted;
    let message = reply.message.clone();
    write_message(stream, &RpcMessage::HandshakeReply(reply)).await?;
    if !accepted {
        ctx.counters.handshake_rejected();
        tracing::warn!(source = %ctx.source, peer = %peer, reason = %message, "handshake rejected");
        return Err(ConnectionError::Rejected(message));
    }
    tracing::debug!(
        source = %ctx.source,
        peer = %peer,
        compression = %hello.compression,
        "connection established"
    );

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            result = read_message(stream, &mut buf) => result,
        };
        let message = match next {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(()),
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                // No call id to answer; the frame is skipped
                ctx.counters.decode_error();
                tracing::debug!(source = %ctx.source, peer = %peer, error = %e, "undecodable frame");
                continue;
            }
        };

        let (call_id, decoded) = match message {
            RpcMessage::Append { call_id, body } => {
                (call_id, decode_event_body(body, &ctx.codec).map(Call::Append))
            }
            RpcMessage::AppendBatch { call_id, body } => {
                (call_id, decode_batch_body(body, &ctx.codec).map(Call::AppendBatch))
            }
            other => return Err(ConnectionError::Unexpected(other.kind())),
        };

        let status = match decoded {
            Ok(call) => {
                ctx.counters.call_received(call.is_batch(), call.len());
                let Some(reply) = dispatch(ctx, call, cancel).await? else {
                    // Never reached the workers; nothing was committed
                    return Ok(());
                };
                // Once queued the call runs to completion, shutdown included
                reply.await.unwrap_or(RemoteStatus::Error)
            }
            Err(e) => {
                ctx.counters.decode_error();
                tracing::debug!(
                    source = %ctx.source,
                    peer = %peer,
                    call_id,
                    error = %e,
                    "undecodable call body"
                );
                RemoteStatus::Error
            }
        };

        write_message(stream, &RpcMessage::Reply { call_id, status }).await?;
    }
}

/// Queue a call for the workers
///
/// Returns the receiver for its status, or `None` when cancelled while the
/// worker queue was full. A worker aborted mid-call drops the sender, which
/// the caller reads as `Error`.
async fn dispatch(
    ctx: &ConnectionContext,
    call: Call,
    cancel: &CancellationToken,
) -> Result<Option<oneshot::Receiver<RemoteStatus>>, ConnectionError> {
    let (reply, status) = oneshot::channel();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(None),
        sent = ctx.calls.send(PendingCall { call, reply }) => {
            sent.map_err(|_| ConnectionError::PoolClosed)?;
            Ok(Some(status))
        }
    }
}
