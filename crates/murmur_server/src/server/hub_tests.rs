#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use murmur_domain::{GroupId, MessageId, UserId};
use murmur_protocol::{DEFAULT_MAX_FRAME_SIZE, FramingError, ProtocolError, ServerEvent};
use tokio::sync::{RwLock, mpsc};
use tokio::time::timeout;

use crate::server::hub::{DeliveryReport, Hub, HubConfig};
use crate::server::registry::{Audience, ConnectionHandle, ConnectionRegistry};

fn setup() -> (Hub, Arc<RwLock<ConnectionRegistry>>) {
	let registry = Arc::new(RwLock::new(ConnectionRegistry::default()));
	(Hub::new(registry.clone(), HubConfig::default()), registry)
}

async fn connect(
	registry: &RwLock<ConnectionRegistry>,
	conn: u64,
	user: Option<i64>,
	capacity: usize,
) -> (mpsc::Receiver<Bytes>, ConnectionHandle) {
	let (tx, rx) = mpsc::channel(capacity);
	let handle = ConnectionHandle::new(tx);
	let mut reg = registry.write().await;
	reg.attach(conn, handle.clone());
	if let Some(u) = user {
		reg.bind(conn, UserId(u));
	}
	(rx, handle)
}

async fn recv_event(rx: &mut mpsc::Receiver<Bytes>) -> ServerEvent {
	let frame = timeout(Duration::from_millis(250), rx.recv())
		.await
		.expect("expected a frame within timeout")
		.expect("channel open");
	ServerEvent::decode(&frame, DEFAULT_MAX_FRAME_SIZE).expect("decodes")
}

#[tokio::test]
async fn users_audience_reaches_only_their_connections() {
	let (hub, registry) = setup();
	let (mut rx_a1, _) = connect(&registry, 1, Some(1), 8).await;
	let (mut rx_a2, _) = connect(&registry, 2, Some(1), 8).await;
	let (mut rx_b, _) = connect(&registry, 3, Some(2), 8).await;
	let (mut rx_anon, _) = connect(&registry, 4, None, 8).await;

	let audience = Audience::Users([UserId(1)].into_iter().collect());
	let report = hub.deliver(&audience, &ServerEvent::GroupDeleted(GroupId(5))).await.expect("encodes");
	assert_eq!(
		report,
		DeliveryReport {
			delivered: 2,
			dropped: 0
		}
	);

	assert_eq!(recv_event(&mut rx_a1).await, ServerEvent::GroupDeleted(GroupId(5)));
	assert_eq!(recv_event(&mut rx_a2).await, ServerEvent::GroupDeleted(GroupId(5)));
	assert!(timeout(Duration::from_millis(50), rx_b.recv()).await.is_err());
	assert!(timeout(Duration::from_millis(50), rx_anon.recv()).await.is_err());
}

#[tokio::test]
async fn everyone_includes_anonymous_connections() {
	let (hub, registry) = setup();
	let (mut rx_bound, _) = connect(&registry, 1, Some(1), 8).await;
	let (mut rx_anon, _) = connect(&registry, 2, None, 8).await;

	hub.deliver(&Audience::Everyone, &ServerEvent::UserOnline(UserId(1)))
		.await
		.expect("encodes");

	assert_eq!(recv_event(&mut rx_bound).await, ServerEvent::UserOnline(UserId(1)));
	assert_eq!(recv_event(&mut rx_anon).await, ServerEvent::UserOnline(UserId(1)));
}

#[tokio::test]
async fn full_queue_drops_and_signals_overflow() {
	let (hub, registry) = setup();
	let (mut slow_rx, slow) = connect(&registry, 1, Some(1), 1).await;
	let (mut fast_rx, _) = connect(&registry, 2, Some(2), 8).await;

	let audience = Audience::Users(BTreeSet::from([UserId(1), UserId(2)]));
	let first = hub.deliver(&audience, &ServerEvent::UserOffline(UserId(9))).await.expect("encodes");
	assert_eq!(first.dropped, 0);

	let second = hub.deliver(&audience, &ServerEvent::UserOnline(UserId(9))).await.expect("encodes");
	assert_eq!(
		second,
		DeliveryReport {
			delivered: 1,
			dropped: 1
		}
	);

	timeout(Duration::from_millis(250), slow.overflow.notified())
		.await
		.expect("slow connection is told to close");

	assert_eq!(recv_event(&mut slow_rx).await, ServerEvent::UserOffline(UserId(9)));
	assert!(timeout(Duration::from_millis(50), slow_rx.recv()).await.is_err());

	assert_eq!(recv_event(&mut fast_rx).await, ServerEvent::UserOffline(UserId(9)));
	assert_eq!(recv_event(&mut fast_rx).await, ServerEvent::UserOnline(UserId(9)));
}

#[tokio::test]
async fn closed_receivers_are_skipped() {
	let (hub, registry) = setup();
	let (rx, _) = connect(&registry, 1, Some(1), 8).await;
	drop(rx);

	let report = hub
		.deliver(&Audience::Connection(1), &ServerEvent::UserOnline(UserId(1)))
		.await
		.expect("encodes");
	assert_eq!(report, DeliveryReport::default());
}

#[tokio::test]
async fn oversized_event_is_refused_and_nothing_is_queued() {
	let registry = Arc::new(RwLock::new(ConnectionRegistry::default()));
	let hub = Hub::new(registry.clone(), HubConfig { max_frame_bytes: 64 });
	let (mut rx, _) = connect(&registry, 1, Some(1), 8).await;

	let big = ServerEvent::MessageEdited {
		id: MessageId(1),
		body: "x".repeat(256),
	};
	let err = hub.deliver(&Audience::Everyone, &big).await.expect_err("too large");
	assert!(matches!(err, ProtocolError::Framing(FramingError::FrameTooLarge { .. })), "{err}");
	assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
}
