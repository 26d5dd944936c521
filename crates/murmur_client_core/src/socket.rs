#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::{FutureExt as _, SinkExt as _, StreamExt as _};
use murmur_domain::UserId;
use murmur_protocol::{ClientRequest, ErrorKind, EventKind, ServerEvent};
use tokio::sync::{Mutex as AsyncMutex, watch};
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::subscriptions::{Subscribers, Subscription};
use crate::transport::{Connection, Connector, FrameSink, FrameStream, WsConnector};
use crate::{ClientConfig, ClientCoreError};

type SharedSink = Arc<AsyncMutex<FrameSink>>;
type Reconnect = Shared<BoxFuture<'static, Result<SharedSink, ClientCoreError>>>;

/// Observable link state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
	/// Never connected.
	Idle,
	Connecting,
	Open,
	/// The link dropped; a reconnect is scheduled.
	Disconnected,
	/// Waiting `delay` before reconnect attempt number `attempt`.
	Reconnecting { attempt: u32, delay: Duration },
	GaveUp { attempts: u32 },
	Shutdown,
}

enum Link {
	Idle,
	Disconnected,
	/// The single in-flight (re)connect. Every caller awaits a clone.
	Connecting(Reconnect),
	Open { sink: SharedSink, generation: u64 },
	Shutdown,
}

#[derive(Default)]
struct IdentityCache {
	/// Name of the claim awaiting an answer.
	requested: Option<String>,
	confirmed: Option<(String, UserId)>,
}

impl IdentityCache {
	fn login_name(&self) -> Option<String> {
		self.requested
			.clone()
			.or_else(|| self.confirmed.as_ref().map(|(name, _)| name.clone()))
	}
}

struct Inner {
	connector: Arc<dyn Connector>,
	config: ClientConfig,
	link: Mutex<Link>,
	backoff: Mutex<Backoff>,
	generation: AtomicU64,
	identity: Mutex<IdentityCache>,
	claim_outstanding: AtomicBool,
	subscribers: Arc<Subscribers>,
	status: watch::Sender<ConnectionStatus>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
	m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One logical connection to the server that survives transport drops.
///
/// Reconnects with exponential backoff after every close and re-claims the
/// cached identity before the new link is used. Events arrive through
/// [`Subscription`]s. Call [`ResilientSocket::shutdown`] to stop reconnecting.
#[derive(Clone)]
pub struct ResilientSocket {
	inner: Arc<Inner>,
}

impl ResilientSocket {
	pub fn new(config: ClientConfig, connector: impl Connector) -> Self {
		let backoff = Backoff::new(config.reconnect_base_delay, config.reconnect_max_delay);
		let (status, _) = watch::channel(ConnectionStatus::Idle);
		Self {
			inner: Arc::new(Inner {
				connector: Arc::new(connector),
				config,
				link: Mutex::new(Link::Idle),
				backoff: Mutex::new(backoff),
				generation: AtomicU64::new(0),
				identity: Mutex::new(IdentityCache::default()),
				claim_outstanding: AtomicBool::new(false),
				subscribers: Arc::new(Subscribers::default()),
				status,
			}),
		}
	}

	/// Socket over WebSocket to `config.url`.
	pub fn websocket(config: ClientConfig) -> Self {
		let connector = WsConnector::new(config.url.clone(), config.max_frame_bytes);
		Self::new(config, connector)
	}

	/// Wait until the link is open.
	pub async fn connect(&self) -> Result<(), ClientCoreError> {
		self.inner.ensure_open().await.map(|_| ())
	}

	/// Await the link, then transmit once. A failed transmission is returned, not retried.
	pub async fn send(&self, request: ClientRequest) -> Result<(), ClientCoreError> {
		let frame = request.encode(self.inner.config.max_frame_bytes)?;
		let sink = self.inner.ensure_open().await?;
		let mut sink = sink.lock().await;
		sink.send(frame).await
	}

	/// Claim `name` and cache it for re-login after reconnects.
	///
	/// Fails with `ClaimPending` while an earlier claim is unanswered.
	pub async fn claim_identity(&self, name: impl Into<String>) -> Result<(), ClientCoreError> {
		let name = name.into();
		if self.inner.claim_outstanding.swap(true, Ordering::SeqCst) {
			return Err(ClientCoreError::ClaimPending);
		}
		lock(&self.inner.identity).requested = Some(name.clone());

		let result = self.send(ClientRequest::ClaimIdentity { name }).await;
		if result.is_err() {
			lock(&self.inner.identity).requested = None;
			self.inner.claim_outstanding.store(false, Ordering::SeqCst);
		}
		result
	}

	/// Name confirmed by the server's last welcome.
	pub fn identity(&self) -> Option<String> {
		lock(&self.inner.identity).confirmed.as_ref().map(|(name, _)| name.clone())
	}

	pub fn user_id(&self) -> Option<UserId> {
		lock(&self.inner.identity).confirmed.as_ref().map(|(_, id)| *id)
	}

	pub fn subscribe(&self, kind: EventKind) -> Subscription {
		self.inner.subscribers.subscribe(Some(kind))
	}

	pub fn subscribe_all(&self) -> Subscription {
		self.inner.subscribers.subscribe(None)
	}

	pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
		self.inner.status.subscribe()
	}

	/// Stop reconnecting and close the transport. Pending and later sends fail with `Closed`.
	pub async fn shutdown(&self) {
		let previous = std::mem::replace(&mut *lock(&self.inner.link), Link::Shutdown);
		self.inner.status.send_replace(ConnectionStatus::Shutdown);
		if let Link::Open { sink, .. } = previous {
			let mut sink = sink.lock().await;
			if let Err(e) = sink.close().await {
				debug!(error = %e, "close on shutdown failed");
			}
		}
		info!("socket shut down");
	}
}

impl Inner {
	fn is_shut_down(&self) -> bool {
		matches!(*lock(&self.link), Link::Shutdown)
	}

	async fn ensure_open(self: &Arc<Self>) -> Result<SharedSink, ClientCoreError> {
		let pending = {
			let mut link = lock(&self.link);
			let pending = match &*link {
				Link::Open { sink, .. } => return Ok(sink.clone()),
				Link::Shutdown => return Err(ClientCoreError::Closed),
				Link::Connecting(pending) => pending.clone(),
				Link::Idle => self.clone().establish(false).boxed().shared(),
				Link::Disconnected => self.clone().establish(true).boxed().shared(),
			};
			*link = Link::Connecting(pending.clone());
			pending
		};
		pending.await
	}

	/// Connect, waiting out the backoff before each attempt after a close.
	async fn establish(self: Arc<Self>, wait_first: bool) -> Result<SharedSink, ClientCoreError> {
		let mut attempts = 0u32;
		let mut wait = wait_first;
		loop {
			if wait {
				if self.config.max_reconnect_attempts.is_some_and(|max| attempts >= max) {
					return Err(self.give_up(attempts));
				}
				attempts += 1;
				let delay = lock(&self.backoff).next_delay();
				self.status.send_replace(ConnectionStatus::Reconnecting { attempt: attempts, delay });
				debug!(attempt = attempts, delay_ms = delay.as_millis() as u64, "waiting before reconnect");
				tokio::time::sleep(delay).await;
			}
			if self.is_shut_down() {
				return Err(ClientCoreError::Closed);
			}

			self.status.send_replace(ConnectionStatus::Connecting);
			match self.connector.connect().await {
				Ok(conn) => match self.open(conn).await {
					Ok(sink) => return Ok(sink),
					Err(ClientCoreError::Closed) => return Err(ClientCoreError::Closed),
					Err(e) => warn!(error = %e, "connection lost during login"),
				},
				Err(e) => warn!(error = %e, attempt = attempts, "connect failed"),
			}
			wait = true;
		}
	}

	fn give_up(&self, attempts: u32) -> ClientCoreError {
		{
			let mut link = lock(&self.link);
			if matches!(*link, Link::Connecting(_)) {
				*link = Link::Disconnected;
			}
		}
		self.status.send_replace(ConnectionStatus::GaveUp { attempts });
		warn!(attempts, "giving up on reconnecting");
		ClientCoreError::GaveUp { attempts }
	}

	/// Re-claim the cached identity, then publish the link and start reading.
	async fn open(self: &Arc<Self>, conn: Connection) -> Result<SharedSink, ClientCoreError> {
		let Connection { mut sink, stream } = conn;

		let login = lock(&self.identity).login_name();
		if let Some(name) = login
			&& !self.claim_outstanding.swap(true, Ordering::SeqCst)
		{
			debug!(name = %name, "re-claiming identity");
			let sent = match (ClientRequest::ClaimIdentity { name }).encode(self.config.max_frame_bytes) {
				Ok(frame) => sink.send(frame).await,
				Err(e) => Err(e.into()),
			};
			if let Err(e) = sent {
				self.claim_outstanding.store(false, Ordering::SeqCst);
				return Err(e);
			}
		}

		let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
		let sink = Arc::new(AsyncMutex::new(sink));
		{
			let mut link = lock(&self.link);
			if matches!(*link, Link::Shutdown) {
				return Err(ClientCoreError::Closed);
			}
			*link = Link::Open {
				sink: sink.clone(),
				generation,
			};
		}
		lock(&self.backoff).reset();
		self.status.send_replace(ConnectionStatus::Open);
		info!(generation, "connected");

		tokio::spawn(read_loop(Arc::downgrade(self), generation, stream));
		Ok(sink)
	}

	/// Reader for link `generation` ended.
	fn on_closed(self: &Arc<Self>, generation: u64) {
		{
			let mut link = lock(&self.link);
			match &*link {
				Link::Open { generation: current, .. } if *current == generation => {}
				_ => return,
			}
			*link = Link::Disconnected;
		}
		self.claim_outstanding.store(false, Ordering::SeqCst);
		self.status.send_replace(ConnectionStatus::Disconnected);
		info!(generation, "connection lost; scheduling reconnect");

		let inner = self.clone();
		tokio::spawn(async move {
			if let Err(e) = inner.ensure_open().await {
				warn!(error = %e, "reconnect abandoned");
			}
		});
	}

	fn dispatch(&self, event: ServerEvent) {
		match &event {
			ServerEvent::Welcome { user_id, .. } => {
				self.claim_outstanding.store(false, Ordering::SeqCst);
				let mut identity = lock(&self.identity);
				if let Some(name) = identity.requested.take() {
					identity.confirmed = Some((name, *user_id));
				} else if let Some((_, id)) = identity.confirmed.as_mut() {
					*id = *user_id;
				}
			}
			ServerEvent::Error {
				kind,
				message,
				request: Some(request),
			} if request == ClientRequest::CLAIM_IDENTITY => {
				self.claim_outstanding.store(false, Ordering::SeqCst);
				if matches!(kind, ErrorKind::Validation | ErrorKind::Conflict) {
					warn!(error = %message, "identity claim rejected");
					let mut identity = lock(&self.identity);
					if identity.requested.take().is_none() {
						identity.confirmed = None;
					}
				} else {
					warn!(code = %kind, error = %message, "identity claim failed; will retry on reconnect");
				}
			}
			_ => {}
		}
		self.subscribers.dispatch(&event);
	}
}

async fn read_loop(inner: Weak<Inner>, generation: u64, mut stream: FrameStream) {
	while let Some(item) = stream.next().await {
		let Some(socket) = inner.upgrade() else {
			return;
		};
		match item {
			Ok(frame) => match ServerEvent::decode(&frame, socket.config.max_frame_bytes) {
				Ok(event) => socket.dispatch(event),
				Err(e) => warn!(error = %e, "dropping undecodable frame"),
			},
			Err(ClientCoreError::Protocol(msg)) => warn!(error = %msg, "ignoring unexpected frame"),
			Err(e) => {
				debug!(error = %e, generation, "transport error");
				break;
			}
		}
	}
	if let Some(socket) = inner.upgrade() {
		socket.on_closed(generation);
	}
}
