//! Channel processor - transactional fan-out into queues
//!
//! The processor routes every event of a batch through the selector, then
//! writes each queue's share inside one transaction per queue. Required
//! queues are all-or-nothing for the batch; optional queues are best-effort.

use std::collections::BTreeMap;
use std::sync::Arc;

use conduit_protocol::Event;
use conduit_routing::{ChannelSelector, QueueId};

use crate::error::{ProcessorError, Result};
use crate::metrics::ProcessorMetrics;
use crate::queue::{MemoryQueue, Transaction};

/// Fans batches out to queues chosen by a [`ChannelSelector`]
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use conduit_pipeline::{ChannelProcessor, MemoryQueue};
/// use conduit_protocol::Event;
/// use conduit_routing::SelectorBuilder;
///
/// let mut builder = SelectorBuilder::new();
/// builder.register_queue("primary").unwrap();
/// let selector = builder.replicating(&["primary"], &[] as &[&str]).unwrap();
///
/// let queue = Arc::new(MemoryQueue::with_defaults("primary"));
/// let processor = ChannelProcessor::new(selector, vec![Arc::clone(&queue)]).unwrap();
///
/// processor.process_event(Event::with_body("hello")).unwrap();
/// assert_eq!(queue.len(), 1);
/// ```
#[derive(Debug)]
pub struct ChannelProcessor {
    selector: ChannelSelector,

    /// Queues indexed by `QueueId`
    queues: Vec<Arc<MemoryQueue>>,

    metrics: Arc<ProcessorMetrics>,
}

impl ChannelProcessor {
    /// Create a processor
    ///
    /// `queues[i]` must be the queue registered as `QueueId::new(i)`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownQueue` if the selector can route past the end of
    /// `queues`.
    pub fn new(selector: ChannelSelector, queues: Vec<Arc<MemoryQueue>>) -> Result<Self> {
        if let Some(id) = selector
            .queues()
            .into_iter()
            .find(|id| id.as_usize() >= queues.len())
        {
            return Err(ProcessorError::UnknownQueue(id, queues.len()));
        }

        Ok(Self {
            selector,
            queues,
            metrics: Arc::new(ProcessorMetrics::new()),
        })
    }

    #[inline]
    pub fn selector(&self) -> &ChannelSelector {
        &self.selector
    }

    #[inline]
    pub fn queues(&self) -> &[Arc<MemoryQueue>] {
        &self.queues
    }

    /// Shared handle to the processor counters
    pub fn metrics_handle(&self) -> Arc<ProcessorMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Deliver a single event
    pub fn process_event(&self, event: Event) -> Result<()> {
        self.process_batch(vec![event])
    }

    /// Deliver a batch
    ///
    /// Every required queue receives its events or none does. On error no
    /// required queue has been modified. Optional queues are written after
    /// the required commit and their failures are only logged.
    pub fn process_batch(&self, events: Vec<Event>) -> Result<()> {
        self.metrics.record_received(events.len() as u64);

        let mut required: BTreeMap<QueueId, Vec<Event>> = BTreeMap::new();
        let mut optional: BTreeMap<QueueId, Vec<Event>> = BTreeMap::new();

        for event in events {
            let routes = self.selector.route(&event);
            for id in routes.optional {
                optional.entry(*id).or_default().push(event.clone());
            }
            for id in routes.required {
                required.entry(*id).or_default().push(event.clone());
            }
        }

        let mut prepared: Vec<Transaction<'_>> = Vec::with_capacity(required.len());
        for (id, batch) in required {
            let queue = &self.queues[id.as_usize()];
            let mut tx = queue.transaction();

            let staged = batch.into_iter().try_for_each(|event| tx.put(event));
            if let Err(e) = staged {
                tracing::warn!(
                    queue = %queue.name(),
                    error = %e,
                    "required queue rejected batch, rolling back"
                );
                rollback(&mut tx);
                for tx in &mut prepared {
                    rollback(tx);
                }
                self.metrics.record_rejected();
                return Err(ProcessorError::queue(queue.name(), e));
            }
            prepared.push(tx);
        }

        // Space was reserved at put, commit only publishes
        for tx in &mut prepared {
            tx.commit()
                .map_err(|e| ProcessorError::queue(tx.queue_name(), e))?;
        }
        drop(prepared);
        self.metrics.record_committed();

        for (id, batch) in optional {
            let queue = &self.queues[id.as_usize()];
            let mut tx = queue.transaction();
            let result = batch
                .into_iter()
                .try_for_each(|event| tx.put(event))
                .and_then(|()| tx.commit());
            if let Err(e) = result {
                tracing::debug!(
                    queue = %queue.name(),
                    error = %e,
                    "optional queue rejected events"
                );
                rollback(&mut tx);
                self.metrics.record_optional_failure();
            }
        }

        Ok(())
    }
}

fn rollback(tx: &mut Transaction<'_>) {
    if let Err(e) = tx.rollback() {
        tracing::debug!(error = %e, "rollback skipped");
    }
}

#[cfg(test)]
#[path = "processor_test.rs"]
mod processor_test;
