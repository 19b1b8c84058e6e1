//! Event record
//!
//! An `Event` is the unit carried through queues and over the wire: a set of
//! string headers plus an opaque body. Events are immutable once built; the
//! body is a `Bytes` so fan-out to several queues shares one allocation.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;

/// Immutable event: headers plus body
///
/// Equality is structural. Headers are kept in a `BTreeMap` so the wire
/// encoding of an event is deterministic.
///
/// # Example
///
/// ```
/// use conduit_protocol::Event;
///
/// let event = Event::with_body("Hello avro").with_header("host", "web-1");
/// assert_eq!(event.body().as_ref(), b"Hello avro");
/// assert_eq!(event.header("host"), Some("web-1"));
/// ```
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Event {
    headers: BTreeMap<String, String>,
    body: Bytes,
}

impl Event {
    /// Create an event from headers and a body
    pub fn new(headers: BTreeMap<String, String>, body: impl Into<Bytes>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    /// Create an event with a body and no headers
    pub fn with_body(body: impl Into<Bytes>) -> Self {
        Self {
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Return a copy of this event with one more header
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// All headers
    #[inline]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Look up a single header value
    #[inline]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Event body
    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Decompose into headers and body
    pub fn into_parts(self) -> (BTreeMap<String, String>, Bytes) {
        (self.headers, self.body)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_body() {
        let event = Event::with_body("test event 1");
        assert!(event.headers().is_empty());
        assert_eq!(event.body().as_ref(), b"test event 1");
    }

    #[test]
    fn test_with_header_overwrites() {
        let event = Event::with_body("x")
            .with_header("type", "a")
            .with_header("type", "b");
        assert_eq!(event.header("type"), Some("b"));
        assert_eq!(event.headers().len(), 1);
    }

    #[test]
    fn test_structural_equality() {
        let a = Event::with_body("same").with_header("k", "v");
        let b = Event::new(
            BTreeMap::from([("k".to_string(), "v".to_string())]),
            Bytes::from_static(b"same"),
        );
        assert_eq!(a, b);
        assert_ne!(a, Event::with_body("same"));
    }

    #[test]
    fn test_clone_shares_body() {
        let event = Event::with_body(vec![7u8; 1024]);
        let copy = event.clone();
        assert_eq!(event.body().as_ptr(), copy.body().as_ptr());
    }

    #[test]
    fn test_debug_hides_body() {
        let event = Event::with_body("secret-payload");
        let debug = format!("{event:?}");
        assert!(debug.contains("body_len"));
        assert!(!debug.contains("secret-payload"));
    }
}
