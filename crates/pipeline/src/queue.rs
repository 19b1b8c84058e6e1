//! Bounded in-memory transactional queue
//!
//! Every access goes through a [`Transaction`]. Puts reserve capacity
//! immediately but stay invisible until commit; takes remove events from
//! the head and keep counting against capacity until commit, so a rollback
//! can always put them back.

use std::collections::VecDeque;

use conduit_protocol::Event;
use parking_lot::Mutex;

use crate::error::{QueueError, QueueResult};

/// Default queue capacity in events
pub const DEFAULT_CAPACITY: usize = 100;

/// Default per-transaction put/take limit
pub const DEFAULT_TRANSACTION_CAPACITY: usize = 100;

#[derive(Debug, Default)]
struct QueueState {
    /// Committed, visible events
    events: VecDeque<Event>,
    /// Slots held by uncommitted puts
    reserved: usize,
    /// Events taken by open transactions
    in_flight: usize,
}

impl QueueState {
    #[inline]
    fn occupied(&self) -> usize {
        self.events.len() + self.reserved + self.in_flight
    }
}

/// Bounded, thread-safe transactional event queue
#[derive(Debug)]
pub struct MemoryQueue {
    name: String,
    capacity: usize,
    transaction_capacity: usize,
    state: Mutex<QueueState>,
}

impl MemoryQueue {
    /// Create a queue
    ///
    /// # Errors
    ///
    /// Returns `InvalidCapacity` if either capacity is zero or the
    /// transaction capacity exceeds the queue capacity.
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        transaction_capacity: usize,
    ) -> QueueResult<Self> {
        let name = name.into();
        if capacity == 0 || transaction_capacity == 0 {
            return Err(QueueError::InvalidCapacity {
                queue: name,
                message: "capacity and transaction-capacity must be > 0".into(),
            });
        }
        if transaction_capacity > capacity {
            return Err(QueueError::InvalidCapacity {
                queue: name,
                message: format!(
                    "transaction-capacity {transaction_capacity} exceeds capacity {capacity}"
                ),
            });
        }

        Ok(Self {
            name,
            capacity,
            transaction_capacity,
            state: Mutex::new(QueueState {
                events: VecDeque::with_capacity(capacity.min(4096)),
                ..QueueState::default()
            }),
        })
    }

    /// Create a queue with default capacities
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capacity: DEFAULT_CAPACITY,
            transaction_capacity: DEFAULT_TRANSACTION_CAPACITY,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Open a transaction
    pub fn transaction(&self) -> Transaction<'_> {
        Transaction {
            queue: self,
            puts: Vec::new(),
            takes: Vec::new(),
            outcome: Outcome::Open,
            closed: false,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn transaction_capacity(&self) -> usize {
        self.transaction_capacity
    }

    /// Number of committed events available to take
    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().events.is_empty()
    }

    /// Free slots, net of reservations and in-flight takes
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.state.lock().occupied())
    }

    fn queue_full(&self) -> QueueError {
        QueueError::QueueFull {
            queue: self.name.clone(),
            capacity: self.capacity,
        }
    }

    fn transaction_full(&self) -> QueueError {
        QueueError::TransactionFull {
            queue: self.name.clone(),
            capacity: self.transaction_capacity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Open,
    Committed,
    RolledBack,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        }
    }
}

/// Unit of work on one [`MemoryQueue`]
///
/// Lifecycle: `put`/`take` any number of times, then `commit` or
/// `rollback`, then `close`. Dropping an open transaction rolls it back.
#[derive(Debug)]
pub struct Transaction<'q> {
    queue: &'q MemoryQueue,
    puts: Vec<Event>,
    takes: Vec<Event>,
    outcome: Outcome,
    closed: bool,
}

impl Transaction<'_> {
    /// Stage an event for insertion
    ///
    /// Capacity is reserved now so the later commit cannot fail for lack
    /// of space.
    pub fn put(&mut self, event: Event) -> QueueResult<()> {
        self.ensure_open("put")?;
        if self.puts.len() >= self.queue.transaction_capacity {
            return Err(self.queue.transaction_full());
        }

        let mut state = self.queue.state.lock();
        if state.occupied() >= self.queue.capacity {
            return Err(self.queue.queue_full());
        }
        state.reserved += 1;
        drop(state);

        self.puts.push(event);
        Ok(())
    }

    /// Take the event at the head of the queue
    ///
    /// Returns `Ok(None)` when no committed event is available.
    pub fn take(&mut self) -> QueueResult<Option<Event>> {
        self.ensure_open("take")?;
        if self.takes.len() >= self.queue.transaction_capacity {
            return Err(self.queue.transaction_full());
        }

        let mut state = self.queue.state.lock();
        let Some(event) = state.events.pop_front() else {
            return Ok(None);
        };
        state.in_flight += 1;
        drop(state);

        self.takes.push(event.clone());
        Ok(Some(event))
    }

    /// Publish puts and finalise takes
    pub fn commit(&mut self) -> QueueResult<()> {
        self.ensure_open("commit")?;

        let mut state = self.queue.state.lock();
        state.reserved -= self.puts.len();
        state.in_flight -= self.takes.len();
        state.events.extend(self.puts.drain(..));
        drop(state);

        self.takes.clear();
        self.outcome = Outcome::Committed;
        Ok(())
    }

    /// Discard puts and return takes to the head of the queue
    ///
    /// Taken events go back in their original order. Rolling back twice is
    /// a no-op; rolling back a committed transaction is an error.
    pub fn rollback(&mut self) -> QueueResult<()> {
        match self.outcome {
            Outcome::RolledBack => Ok(()),
            Outcome::Committed => Err(QueueError::invalid_state("rollback", "committed")),
            Outcome::Open => {
                self.undo();
                Ok(())
            }
        }
    }

    /// Finish the transaction, rolling back if still open
    ///
    /// Idempotent.
    pub fn close(&mut self) {
        if self.outcome == Outcome::Open {
            self.undo();
        }
        self.closed = true;
    }

    /// Name of the queue this transaction is bound to
    #[inline]
    pub fn queue_name(&self) -> &str {
        self.queue.name()
    }

    /// Events staged by `put`
    #[inline]
    pub fn put_count(&self) -> usize {
        self.puts.len()
    }

    /// Events removed by `take`
    #[inline]
    pub fn take_count(&self) -> usize {
        self.takes.len()
    }

    /// Whether neither commit nor rollback has happened yet
    #[inline]
    pub fn is_open(&self) -> bool {
        self.outcome == Outcome::Open && !self.closed
    }

    fn ensure_open(&self, op: &'static str) -> QueueResult<()> {
        if self.closed {
            return Err(QueueError::invalid_state(op, "closed"));
        }
        if self.outcome != Outcome::Open {
            return Err(QueueError::invalid_state(op, self.outcome.as_str()));
        }
        Ok(())
    }

    fn undo(&mut self) {
        let mut state = self.queue.state.lock();
        state.reserved -= self.puts.len();
        state.in_flight -= self.takes.len();
        for event in self.takes.drain(..).rev() {
            state.events.push_front(event);
        }
        drop(state);

        self.puts.clear();
        self.outcome = Outcome::RolledBack;
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.outcome == Outcome::Open {
            self.undo();
        }
    }
}

#[cfg(test)]
#[path = "queue_test.rs"]
mod queue_test;
