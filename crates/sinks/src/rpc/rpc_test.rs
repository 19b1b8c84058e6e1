//! Tests for the RPC sink against an in-process mock source

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use conduit_pipeline::{LifecycleState, MemoryQueue};
use conduit_protocol::{
    Codec, CompressionType, Event, HandshakeReply, PROTOCOL_VERSION, RemoteStatus, RpcMessage,
    decode_batch_body, decode_event_body, read_message, write_message,
};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::*;

// =============================================================================
// Mock source
// =============================================================================

#[derive(Clone)]
struct MockBehavior {
    codec: Codec,
    handshake_delay: Duration,
    reply_delay: Duration,
    status: RemoteStatus,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            codec: Codec::none(),
            handshake_delay: Duration::ZERO,
            reply_delay: Duration::ZERO,
            status: RemoteStatus::Ok,
        }
    }
}

struct MockSource {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Event>>>,
    connections: Arc<Mutex<usize>>,
    task: JoinHandle<()>,
}

impl MockSource {
    async fn spawn(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(listener, behavior)
    }

    fn serve(listener: TcpListener, behavior: MockBehavior) -> Self {
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(0));

        let task = {
            let received = Arc::clone(&received);
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    *connections.lock() += 1;
                    tokio::spawn(handle(stream, behavior.clone(), Arc::clone(&received)));
                }
            })
        };

        Self {
            addr,
            received,
            connections,
            task,
        }
    }

    fn received(&self) -> Vec<Event> {
        self.received.lock().clone()
    }

    fn connections(&self) -> usize {
        *self.connections.lock()
    }
}

impl Drop for MockSource {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle(mut stream: TcpStream, behavior: MockBehavior, received: Arc<Mutex<Vec<Event>>>) {
    let mut buf = BytesMut::new();

    let Ok(Some(RpcMessage::Handshake(hello))) = read_message(&mut stream, &mut buf).await else {
        return;
    };
    tokio::time::sleep(behavior.handshake_delay).await;

    let local = behavior.codec.compression();
    let reply = if hello.compression == local && hello.version == PROTOCOL_VERSION {
        HandshakeReply::accept(local)
    } else {
        HandshakeReply::reject(local, "compression mismatch")
    };
    let accepted = reply.accepted;
    if write_message(&mut stream, &RpcMessage::HandshakeReply(reply))
        .await
        .is_err()
        || !accepted
    {
        return;
    }

    while let Ok(Some(message)) = read_message(&mut stream, &mut buf).await {
        let (call_id, events) = match message {
            RpcMessage::Append { call_id, body } => {
                (call_id, vec![decode_event_body(body, &behavior.codec).unwrap()])
            }
            RpcMessage::AppendBatch { call_id, body } => {
                (call_id, decode_batch_body(body, &behavior.codec).unwrap())
            }
            _ => return,
        };

        tokio::time::sleep(behavior.reply_delay).await;
        if behavior.status.is_ok() {
            received.lock().extend(events);
        }

        let reply = RpcMessage::Reply {
            call_id,
            status: behavior.status,
        };
        if write_message(&mut stream, &reply).await.is_err() {
            return;
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn queue_with(events: usize) -> Arc<MemoryQueue> {
    let queue = Arc::new(MemoryQueue::with_defaults("q"));
    {
        let mut tx = queue.transaction();
        for i in 0..events {
            tx.put(Event::with_body(format!("event {i}"))).unwrap();
        }
        tx.commit().unwrap();
    }
    queue
}

fn started(config: RpcSinkConfig, queue: Arc<MemoryQueue>) -> RpcSink {
    let mut sink = RpcSink::new("test-sink", config, queue).unwrap();
    sink.start().unwrap();
    sink
}

fn config_for(addr: SocketAddr) -> RpcSinkConfig {
    RpcSinkConfig::new("127.0.0.1", addr.port())
        .with_connect_timeout(Duration::from_secs(2))
        .with_request_timeout(Duration::from_secs(2))
}

/// Address with nothing listening on it
async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

// =============================================================================
// Config
// =============================================================================

#[test]
fn test_config_defaults() {
    let config = RpcSinkConfig::new("localhost", 4141);
    assert_eq!(config.batch_size, 100);
    assert_eq!(config.connect_timeout, Duration::from_secs(20));
    assert_eq!(config.request_timeout, Duration::from_secs(20));
    assert_eq!(config.compression, CompressionType::None);
    assert_eq!(config.compression_level, 6);
    assert!(config.reset_connection_interval.is_none());
    assert_eq!(config.target(), "localhost:4141");
}

#[test]
fn test_config_ipv6_target() {
    assert_eq!(RpcSinkConfig::new("::1", 4141).target(), "[::1]:4141");
}

#[test]
fn test_new_rejects_zero_batch_size() {
    let config = RpcSinkConfig::new("localhost", 1).with_batch_size(0);
    let err = RpcSink::new("s", config, queue_with(0)).unwrap_err();
    assert!(matches!(err, DeliveryError::InvalidConfig(_)));
}

#[test]
fn test_new_rejects_batch_larger_than_transaction() {
    let queue = Arc::new(MemoryQueue::new("small", 100, 10).unwrap());
    let config = RpcSinkConfig::new("localhost", 1).with_batch_size(11);
    let err = RpcSink::new("s", config, queue).unwrap_err();
    assert!(err.to_string().contains("transaction capacity"));
}

#[test]
fn test_new_rejects_bad_compression_level() {
    let config = RpcSinkConfig::new("localhost", 1)
        .with_compression(CompressionType::Deflate)
        .with_compression_level(10);
    assert!(matches!(
        RpcSink::new("s", config, queue_with(0)),
        Err(DeliveryError::InvalidConfig(_))
    ));
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_process_requires_start() {
    let mut sink = RpcSink::new("s", RpcSinkConfig::new("localhost", 1), queue_with(1)).unwrap();
    assert_eq!(sink.lifecycle_state(), LifecycleState::Idle);

    let err = sink.process().await.unwrap_err();
    assert!(matches!(err, DeliveryError::Inactive(LifecycleState::Idle)));
}

#[tokio::test]
async fn test_stop_is_terminal() {
    let queue = queue_with(1);
    let mut sink = started(RpcSinkConfig::new("localhost", 1), Arc::clone(&queue));
    let token = sink.shutdown_token();

    sink.stop().unwrap();
    assert!(token.is_cancelled());
    assert_eq!(sink.lifecycle_state(), LifecycleState::Stop);
    assert!(sink.start().is_err());

    let err = sink.process().await.unwrap_err();
    assert!(matches!(err, DeliveryError::Inactive(LifecycleState::Stop)));
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn test_rejected_stop_leaves_sink_usable() {
    let mock = MockSource::spawn(MockBehavior::default()).await;
    let mut sink = RpcSink::new("s", config_for(mock.addr), queue_with(0)).unwrap();
    let token = sink.shutdown_token();

    // Idle -> Stop is not a valid move
    assert!(sink.stop().is_err());
    assert_eq!(sink.lifecycle_state(), LifecycleState::Idle);
    assert!(!token.is_cancelled());

    sink.start().unwrap();
    assert_eq!(sink.process().await.unwrap(), TransportStatus::Backoff);
}

// =============================================================================
// Delivery
// =============================================================================

#[tokio::test]
async fn test_empty_queue_backs_off() {
    let mock = MockSource::spawn(MockBehavior::default()).await;
    let mut sink = started(config_for(mock.addr), queue_with(0));

    assert_eq!(sink.process().await.unwrap(), TransportStatus::Backoff);
    assert_eq!(sink.counters().snapshot().batch_empty, 1);
    // No batch, no connection
    assert_eq!(mock.connections(), 0);
}

#[tokio::test]
async fn test_batches_drain_queue() {
    let mock = MockSource::spawn(MockBehavior::default()).await;
    let queue = queue_with(5);
    let mut sink = started(config_for(mock.addr).with_batch_size(2), Arc::clone(&queue));

    for _ in 0..3 {
        assert_eq!(sink.process().await.unwrap(), TransportStatus::Ready);
    }
    assert_eq!(sink.process().await.unwrap(), TransportStatus::Backoff);

    assert!(queue.is_empty());
    let bodies: Vec<_> = mock.received().iter().map(|e| e.body().clone()).collect();
    let expected: Vec<_> = (0..5).map(|i| format!("event {i}")).collect();
    assert_eq!(bodies, expected);

    let snapshot = sink.counters().snapshot();
    assert_eq!(snapshot.batch_complete, 2);
    assert_eq!(snapshot.batch_underflow, 1);
    assert_eq!(snapshot.event_drain_success, 5);
    assert_eq!(snapshot.connection_created, 1);
    assert_eq!(mock.connections(), 1);
}

#[tokio::test]
async fn test_deflate_delivery() {
    let mock = MockSource::spawn(MockBehavior {
        codec: Codec::deflate(9).unwrap(),
        ..Default::default()
    })
    .await;
    let config = config_for(mock.addr)
        .with_compression(CompressionType::Deflate)
        .with_compression_level(9);
    let mut sink = started(config, queue_with(3));

    assert_eq!(sink.process().await.unwrap(), TransportStatus::Ready);
    assert_eq!(mock.received().len(), 3);
}

#[tokio::test]
async fn test_remote_error_keeps_events() {
    let mock = MockSource::spawn(MockBehavior {
        status: RemoteStatus::Error,
        ..Default::default()
    })
    .await;
    let queue = queue_with(3);
    let mut sink = started(config_for(mock.addr), Arc::clone(&queue));

    let err = sink.process().await.unwrap_err();
    assert!(matches!(err, DeliveryError::RemoteRejected { events: 3, .. }));
    assert!(err.is_retryable());
    assert_eq!(queue.len(), 3);
    assert!(!sink.is_connected());
}

#[tokio::test]
async fn test_compression_mismatch() {
    let mock = MockSource::spawn(MockBehavior {
        codec: Codec::deflate(6).unwrap(),
        ..Default::default()
    })
    .await;
    let queue = queue_with(1);
    let mut sink = started(config_for(mock.addr), Arc::clone(&queue));

    let err = sink.process().await.unwrap_err();
    assert!(matches!(
        err,
        DeliveryError::CompressionMismatch {
            local: CompressionType::None,
            remote: CompressionType::Deflate,
        }
    ));
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn test_oversized_batch_fails_before_connecting() {
    let mock = MockSource::spawn(MockBehavior::default()).await;
    let queue = Arc::new(MemoryQueue::with_defaults("q"));
    {
        let mut tx = queue.transaction();
        tx.put(Event::with_body(vec![b'x'; MAX_FRAME_SIZE])).unwrap();
        tx.commit().unwrap();
    }
    let mut sink = started(config_for(mock.addr), Arc::clone(&queue));

    let err = sink.process().await.unwrap_err();
    assert!(
        matches!(
            err,
            DeliveryError::Protocol(ProtocolError::FrameTooLarge { max: MAX_FRAME_SIZE, .. })
        ),
        "{err}"
    );
    assert_eq!(queue.len(), 1);
    assert_eq!(sink.counters().snapshot().connection_created, 0);
    assert_eq!(mock.connections(), 0);
}

// =============================================================================
// Failures and recovery
// =============================================================================

#[tokio::test]
async fn test_connection_refused_keeps_events() {
    let addr = closed_addr().await;
    let queue = queue_with(4);
    let mut sink = started(config_for(addr), Arc::clone(&queue));

    for _ in 0..3 {
        let err = sink.process().await.unwrap_err();
        assert!(matches!(err, DeliveryError::Connection { .. }), "{err}");
    }
    assert_eq!(queue.len(), 4);
    assert_eq!(sink.counters().snapshot().connection_failed, 3);

    // Endpoint comes back
    let listener = TcpListener::bind(addr).await.unwrap();
    let mock = MockSource::serve(listener, MockBehavior::default());

    assert_eq!(sink.process().await.unwrap(), TransportStatus::Ready);
    assert_eq!(sink.process().await.unwrap(), TransportStatus::Backoff);
    assert_eq!(mock.received().len(), 4);
}

#[tokio::test]
async fn test_connect_timeout() {
    let mock = MockSource::spawn(MockBehavior {
        handshake_delay: Duration::from_millis(300),
        ..Default::default()
    })
    .await;
    let queue = queue_with(2);
    let config = config_for(mock.addr).with_connect_timeout(Duration::from_millis(100));
    let mut sink = started(config, Arc::clone(&queue));

    let err = sink.process().await.unwrap_err();
    assert!(matches!(err, DeliveryError::ConnectTimeout { .. }), "{err}");
    assert_eq!(queue.len(), 2);
    assert!(!sink.is_connected());
}

#[tokio::test]
async fn test_request_timeout_reconnects() {
    let slow = MockSource::spawn(MockBehavior {
        reply_delay: Duration::from_millis(400),
        ..Default::default()
    })
    .await;
    let queue = queue_with(2);
    let config = config_for(slow.addr).with_request_timeout(Duration::from_millis(100));
    let mut sink = started(config, Arc::clone(&queue));

    let err = sink.process().await.unwrap_err();
    assert!(matches!(err, DeliveryError::RequestTimeout { .. }), "{err}");
    assert_eq!(queue.len(), 2);
    assert!(!sink.is_connected());

    // Next call opens a new connection
    let _ = sink.process().await;
    assert_eq!(slow.connections(), 2);
}

#[tokio::test]
async fn test_reset_connection_interval() {
    let mock = MockSource::spawn(MockBehavior::default()).await;
    let queue = queue_with(0);
    let config = config_for(mock.addr)
        .with_batch_size(1)
        .with_reset_connection_interval(Some(Duration::from_millis(50)));
    let mut sink = started(config, Arc::clone(&queue));

    for round in 0..2 {
        let mut tx = queue.transaction();
        tx.put(Event::with_body(format!("round {round}"))).unwrap();
        tx.commit().unwrap();
        drop(tx);

        assert_eq!(sink.process().await.unwrap(), TransportStatus::Ready);
        tokio::time::sleep(Duration::from_millis(80)).await;
    }

    assert_eq!(mock.connections(), 2);
    assert_eq!(sink.counters().snapshot().connection_closed, 1);
}

#[tokio::test]
async fn test_stop_interrupts_reply_wait() {
    let mock = MockSource::spawn(MockBehavior {
        reply_delay: Duration::from_secs(5),
        ..Default::default()
    })
    .await;
    let queue = queue_with(1);
    let mut sink = started(config_for(mock.addr), Arc::clone(&queue));
    let token = sink.shutdown_token();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let err = sink.process().await.unwrap_err();
    assert!(matches!(err, DeliveryError::Cancelled));
    assert_eq!(queue.len(), 1);
}
