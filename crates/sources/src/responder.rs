//! Call handlers behind a source
//!
//! A [`Responder`] answers the calls a source decodes. Workers invoke it one
//! call at a time; a responder shared by several workers sees calls
//! concurrently.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_pipeline::ChannelProcessor;
use conduit_protocol::{
    CompressionType, Event, Handshake, HandshakeReply, PROTOCOL_VERSION, RemoteStatus,
};

/// Answer a handshake for a source using `local` compression
///
/// Rejects a different protocol version or compression mode; the reply
/// names both modes.
pub fn negotiate(hello: &Handshake, local: CompressionType) -> HandshakeReply {
    if hello.version != PROTOCOL_VERSION {
        return HandshakeReply::reject(
            local,
            format!(
                "unsupported protocol version {} (expected {PROTOCOL_VERSION})",
                hello.version
            ),
        );
    }
    if hello.compression != local {
        return HandshakeReply::reject(
            local,
            format!(
                "compression mismatch: client uses '{}', source expects '{local}'",
                hello.compression
            ),
        );
    }
    HandshakeReply::accept(local)
}

/// Handler for decoded RPC calls
#[async_trait]
pub trait Responder: Send + Sync + 'static {
    /// Answer a connection's opening handshake
    async fn handshake(&self, hello: &Handshake, local: CompressionType) -> HandshakeReply {
        negotiate(hello, local)
    }

    /// Handle a single event
    async fn append(&self, event: Event) -> RemoteStatus;

    /// Handle a batch of events
    async fn append_batch(&self, events: Vec<Event>) -> RemoteStatus;
}

/// Responder that hands calls to a [`ChannelProcessor`]
///
/// Replies OK once every required queue committed, ERROR otherwise.
#[derive(Debug, Clone)]
pub struct ProcessorResponder {
    processor: Arc<ChannelProcessor>,
}

impl ProcessorResponder {
    pub fn new(processor: Arc<ChannelProcessor>) -> Self {
        Self { processor }
    }

    pub fn processor(&self) -> &ChannelProcessor {
        &self.processor
    }
}

#[async_trait]
impl Responder for ProcessorResponder {
    async fn append(&self, event: Event) -> RemoteStatus {
        match self.processor.process_event(event) {
            Ok(()) => RemoteStatus::Ok,
            Err(e) => {
                tracing::warn!(error = %e, events = 1, "append rejected");
                RemoteStatus::Error
            }
        }
    }

    async fn append_batch(&self, events: Vec<Event>) -> RemoteStatus {
        let count = events.len();
        match self.processor.process_batch(events) {
            Ok(()) => RemoteStatus::Ok,
            Err(e) => {
                tracing::warn!(error = %e, events = count, "append batch rejected");
                RemoteStatus::Error
            }
        }
    }
}
