//! Worker pool consuming pending calls

use std::sync::Arc;

use conduit_protocol::{Event, RemoteStatus};
use crossfire::MAsyncRx;
use tokio::sync::oneshot;

use crate::common::SourceCounters;
use crate::responder::Responder;

/// Decoded call body
#[derive(Debug)]
pub(crate) enum Call {
    Append(Event),
    AppendBatch(Vec<Event>),
}

impl Call {
    pub(crate) fn is_batch(&self) -> bool {
        matches!(self, Self::AppendBatch(_))
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Append(_) => 1,
            Self::AppendBatch(events) => events.len(),
        }
    }
}

/// Call waiting for a worker, with the slot its reply goes to
#[derive(Debug)]
pub(crate) struct PendingCall {
    pub call: Call,
    pub reply: oneshot::Sender<RemoteStatus>,
}

/// Answer pending calls until every sender is gone
pub(crate) async fn run_worker(
    id: usize,
    calls: MAsyncRx<PendingCall>,
    responder: Arc<dyn Responder>,
    counters: Arc<SourceCounters>,
) {
    tracing::trace!(worker = id, "worker started");

    while let Ok(PendingCall { call, reply }) = calls.recv().await {
        let batch = call.is_batch();
        let events = call.len();

        let status = match call {
            Call::Append(event) => responder.append(event).await,
            Call::AppendBatch(events) => responder.append_batch(events).await,
        };
        if status.is_ok() {
            counters.call_accepted(batch, events);
        }

        // Connection may be gone already
        let _ = reply.send(status);
    }

    tracing::trace!(worker = id, "worker stopped");
}
