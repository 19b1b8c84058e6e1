//! Tests for common sink types

use std::io;
use std::time::Duration;

use conduit_pipeline::LifecycleState;
use conduit_protocol::{CompressionType, ProtocolError};

use crate::{DeliveryError, SinkCounters, TransportStatus};

#[test]
fn test_counters_new() {
    let snapshot = SinkCounters::new().snapshot();
    assert_eq!(snapshot, Default::default());
}

#[test]
fn test_counters_batch_taken() {
    let counters = SinkCounters::new();

    counters.batch_taken(2, 2);
    counters.batch_taken(1, 2);
    counters.batch_taken(2, 2);

    let snapshot = counters.snapshot();
    assert_eq!(snapshot.batch_complete, 2);
    assert_eq!(snapshot.batch_underflow, 1);
    assert_eq!(snapshot.event_drain_attempt, 5);
}

#[test]
fn test_counters_connection_tracking() {
    let counters = SinkCounters::new();

    counters.connection_created();
    counters.connection_failed();
    counters.connection_failed();
    counters.connection_closed();
    counters.batch_empty();
    counters.event_drain_success(10);

    let snapshot = counters.snapshot();
    assert_eq!(snapshot.connection_created, 1);
    assert_eq!(snapshot.connection_failed, 2);
    assert_eq!(snapshot.connection_closed, 1);
    assert_eq!(snapshot.batch_empty, 1);
    assert_eq!(snapshot.event_drain_success, 10);
}

#[test]
fn test_transport_status_display() {
    assert_eq!(TransportStatus::Ready.to_string(), "READY");
    assert_eq!(TransportStatus::Backoff.to_string(), "BACKOFF");
}

#[test]
fn test_error_display() {
    let err = DeliveryError::ConnectTimeout {
        target: "localhost:4141".into(),
        timeout: Duration::from_millis(2000),
    };
    assert_eq!(err.to_string(), "connect to localhost:4141 timed out after 2000ms");

    let err = DeliveryError::CompressionMismatch {
        local: CompressionType::Deflate,
        remote: CompressionType::None,
    };
    assert!(err.to_string().contains("'deflate'"));
    assert!(err.to_string().contains("'none'"));

    let err = DeliveryError::Inactive(LifecycleState::Idle);
    assert!(err.to_string().contains("IDLE"));
}

#[test]
fn test_is_retryable() {
    let retryable = [
        DeliveryError::RequestTimeout {
            target: "h:1".into(),
            timeout: Duration::from_secs(1),
        },
        DeliveryError::RemoteRejected {
            target: "h:1".into(),
            events: 3,
        },
        DeliveryError::connection("h:1", io::Error::from(io::ErrorKind::ConnectionRefused)),
        DeliveryError::Protocol(ProtocolError::EmptyFrame),
    ];
    for err in &retryable {
        assert!(err.is_retryable(), "{err}");
    }

    let fatal = [
        DeliveryError::Cancelled,
        DeliveryError::Inactive(LifecycleState::Stop),
        DeliveryError::config("batch-size must be > 0"),
        DeliveryError::CompressionMismatch {
            local: CompressionType::None,
            remote: CompressionType::Deflate,
        },
    ];
    for err in &fatal {
        assert!(!err.is_retryable(), "{err}");
    }
}
