//! Queue identifier type
//!
//! `QueueId` is a lightweight, Copy index into the queue list a selector
//! was built against.

use std::fmt;

/// Queue identifier for routing
///
/// Assigned sequentially by [`SelectorBuilder`](crate::SelectorBuilder) in
/// queue registration order, so it can index straight into a `Vec` of
/// queues.
///
/// # Example
///
/// ```
/// use conduit_routing::QueueId;
///
/// let queues = ["primary", "audit"];
/// let id = QueueId::new(1);
/// assert_eq!(queues[id.as_usize()], "audit");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueId(u16);

impl QueueId {
    /// Maximum number of queues supported
    pub const MAX: u16 = u16::MAX;

    #[inline]
    #[must_use]
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> u16 {
        self.0
    }

    /// Get the index as usize (for array indexing)
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue:{}", self.0)
    }
}

impl From<u16> for QueueId {
    #[inline]
    fn from(index: u16) -> Self {
        Self::new(index)
    }
}

impl From<QueueId> for usize {
    #[inline]
    fn from(id: QueueId) -> Self {
        id.0 as usize
    }
}
