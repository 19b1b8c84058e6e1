//! Conduit - Routing
//!
//! Channel selectors deciding which downstream queues receive an event.
//!
//! # Design
//!
//! Routing decisions are compiled at config load time. A selector stores
//! resolved `QueueId` lists, so `route()` performs a header lookup at most
//! and returns slices into pre-allocated storage.
//!
//! Each route has two parts: *required* queues, which must all accept an
//! event for the call to succeed, and *optional* queues, whose failures are
//! tolerated.
//!
//! # Example
//!
//! ```
//! use conduit_protocol::Event;
//! use conduit_routing::{QueueId, SelectorBuilder};
//!
//! let mut builder = SelectorBuilder::new();
//! builder.register_queue("primary").unwrap();
//! builder.register_queue("audit").unwrap();
//!
//! let selector = builder.replicating(&["primary", "audit"], &["audit"]).unwrap();
//! let routes = selector.route(&Event::with_body("hello"));
//! assert_eq!(routes.required, &[QueueId::new(0)]);
//! assert_eq!(routes.optional, &[QueueId::new(1)]);
//! ```

mod error;
mod queue_id;
mod selector;


pub use error::{Result, RoutingError};
pub use queue_id::QueueId;
pub use selector::{
    ChannelSelector, MultiplexingSelector, ReplicatingSelector, Routes, SelectorBuilder,
};
