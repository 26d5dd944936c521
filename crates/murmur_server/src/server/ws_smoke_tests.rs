#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use murmur_client_core::{ClientConfig, ClientRequest, EventKind, ResilientSocket, ServerEvent, Subscription};
use murmur_domain::{Recipient, UserId};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};

use crate::server::connection::{ConnectionSettings, serve};
use crate::server::context::ServerContext;
use crate::server::hub::HubConfig;
use crate::server::store::open_store;

static LOG_INIT: OnceLock<()> = OnceLock::new();

fn init_test_logging() {
	LOG_INIT.get_or_init(|| {
		if std::env::var_os("MURMUR_TEST_LOG").is_none() {
			return;
		}

		let _ = tracing_subscriber::fmt()
			.with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "debug".to_string()))
			.with_target(false)
			.try_init();
	});
}

async fn start_server(settings: ConnectionSettings) -> SocketAddr {
	init_test_logging();
	let store = open_store(None).await.expect("memory store");
	let ctx = ServerContext::new(store, HubConfig::default());
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
	let addr = listener.local_addr().expect("local addr");
	tokio::spawn(serve(listener, ctx, settings));
	addr
}

fn client(addr: SocketAddr) -> ResilientSocket {
	let config = ClientConfig::from_ws_endpoint(&format!("ws://{addr}")).expect("endpoint");
	ResilientSocket::websocket(config)
}

async fn next(sub: &mut Subscription) -> ServerEvent {
	timeout(Duration::from_secs(5), sub.recv())
		.await
		.expect("event within timeout")
		.expect("socket alive")
}

#[tokio::test]
async fn two_clients_chat_over_websocket() {
	let addr = start_server(ConnectionSettings::default()).await;

	let alice = client(addr);
	let mut alice_welcome = alice.subscribe(EventKind::Welcome);
	let mut alice_online = alice.subscribe(EventKind::UserOnline);
	let mut alice_offline = alice.subscribe(EventKind::UserOffline);
	alice.claim_identity("alice").await.expect("claim alice");
	let alice_id = match next(&mut alice_welcome).await {
		ServerEvent::Welcome { user_id, users, groups } => {
			assert_eq!(users.len(), 1);
			assert!(groups.is_empty());
			user_id
		}
		other => panic!("expected Welcome, got: {other:?}"),
	};
	assert_eq!(next(&mut alice_online).await, ServerEvent::UserOnline(alice_id));

	let bob = client(addr);
	let mut bob_welcome = bob.subscribe(EventKind::Welcome);
	let mut bob_messages = bob.subscribe(EventKind::MessageSent);
	bob.claim_identity("bob").await.expect("claim bob");
	let bob_id = match next(&mut bob_welcome).await {
		ServerEvent::Welcome { user_id, users, .. } => {
			let online: Vec<(UserId, bool)> = users.iter().map(|p| (p.user.id, p.online)).collect();
			assert!(online.contains(&(alice_id, true)));
			user_id
		}
		other => panic!("expected Welcome, got: {other:?}"),
	};
	assert_eq!(next(&mut alice_online).await, ServerEvent::UserOnline(bob_id));

	alice
		.send(ClientRequest::SendMessage {
			body: "hi bob".to_string(),
			recipient: Recipient::User(bob_id),
		})
		.await
		.expect("send");
	match next(&mut bob_messages).await {
		ServerEvent::MessageSent(m) => {
			assert_eq!(m.sender, alice_id);
			assert_eq!(m.body, "hi bob");
			assert_eq!(m.conversation_for(bob_id), Recipient::User(alice_id));
		}
		other => panic!("expected MessageSent, got: {other:?}"),
	}

	bob.shutdown().await;
	assert_eq!(next(&mut alice_offline).await, ServerEvent::UserOffline(bob_id));
	alice.shutdown().await;
}

#[tokio::test]
async fn duplicate_name_is_a_conflict() {
	let addr = start_server(ConnectionSettings::default()).await;

	let first = client(addr);
	let mut welcome = first.subscribe(EventKind::Welcome);
	first.claim_identity("carol").await.expect("claim");
	next(&mut welcome).await;

	let second = client(addr);
	let mut errors = second.subscribe(EventKind::Error);
	second.claim_identity("carol").await.expect("claim sent");
	match next(&mut errors).await {
		ServerEvent::Error { kind, .. } => assert_eq!(kind, murmur_protocol::ErrorKind::Conflict),
		other => panic!("expected Error, got: {other:?}"),
	}
	assert_eq!(second.identity(), None);

	first.shutdown().await;
	second.shutdown().await;
}

#[tokio::test]
async fn foreign_origin_is_refused() {
	let addr = start_server(ConnectionSettings {
		allowed_origins: vec!["https://chat.example".to_string()],
		..ConnectionSettings::default()
	})
	.await;

	let mut request = format!("ws://{addr}/").into_client_request().expect("request");
	request
		.headers_mut()
		.insert("Origin", HeaderValue::from_static("https://evil.example"));
	match tokio_tungstenite::connect_async(request).await {
		Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), StatusCode::FORBIDDEN),
		Err(other) => panic!("expected HTTP 403, got: {other}"),
		Ok(_) => panic!("handshake with a foreign origin succeeded"),
	}

	let mut request = format!("ws://{addr}/").into_client_request().expect("request");
	request
		.headers_mut()
		.insert("Origin", HeaderValue::from_static("https://chat.example"));
	assert!(tokio_tungstenite::connect_async(request).await.is_ok());
}
