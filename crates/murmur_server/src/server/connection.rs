#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context as _;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use murmur_protocol::{ClientRequest, FRAME_HEADER_LEN};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, info, warn};

use crate::server::context::ServerContext;
use crate::server::handler::Session;
use crate::server::registry::{ConnId, ConnectionHandle};

/// Per-connection transport settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
	/// Accepted `Origin` values. Empty allows any.
	pub allowed_origins: Vec<String>,

	pub outbound_queue_capacity: usize,

	pub max_frame_bytes: usize,
}

impl Default for ConnectionSettings {
	fn default() -> Self {
		Self {
			allowed_origins: Vec::new(),
			outbound_queue_capacity: 1024,
			max_frame_bytes: murmur_protocol::DEFAULT_MAX_FRAME_SIZE,
		}
	}
}

/// How long a closing connection may spend flushing queued frames.
const WRITER_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Whether a handshake with this `Origin` header may proceed.
///
/// Clients that send no `Origin` (non-browser) are accepted.
pub fn origin_allowed(allowed: &[String], origin: Option<&str>) -> bool {
	match origin {
		None => true,
		Some(_) if allowed.is_empty() => true,
		Some(o) => allowed.iter().any(|a| a.eq_ignore_ascii_case(o.trim())),
	}
}

/// Accept connections until the listener fails.
pub async fn serve(listener: TcpListener, ctx: ServerContext, settings: ConnectionSettings) -> anyhow::Result<()> {
	let next_conn_id = AtomicU64::new(1);
	let settings = Arc::new(settings);

	loop {
		let (stream, remote) = listener.accept().await.context("accept tcp connection")?;

		let conn_id = next_conn_id.fetch_add(1, Ordering::Relaxed);
		metrics::counter!("murmur_server_connections_total").increment(1);

		let ctx = ctx.clone();
		let settings = Arc::clone(&settings);
		tokio::spawn(async move {
			if let Err(e) = handle_connection(conn_id, stream, remote, ctx, &settings).await {
				warn!(conn_id, %remote, error = %e, "connection handler exited with error");
			}
		});
	}
}

pub async fn handle_connection(
	conn_id: ConnId,
	stream: TcpStream,
	remote: SocketAddr,
	ctx: ServerContext,
	settings: &ConnectionSettings,
) -> anyhow::Result<()> {
	struct ConnectionGaugeGuard;
	impl Drop for ConnectionGaugeGuard {
		fn drop(&mut self) {
			metrics::gauge!("murmur_server_active_connections").decrement(1.0);
		}
	}

	let allowed = settings.allowed_origins.clone();
	let check_origin = move |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
		let origin = req.headers().get("origin").and_then(|v| v.to_str().ok());
		if origin_allowed(&allowed, origin) {
			return Ok(response);
		}
		warn!(conn_id, origin = origin.unwrap_or_default(), "rejected websocket origin");
		metrics::counter!("murmur_server_origin_rejected_total").increment(1);
		let mut rejection = ErrorResponse::new(Some("origin not allowed".to_string()));
		*rejection.status_mut() = StatusCode::FORBIDDEN;
		Err(rejection)
	};

	let ws_limit = settings.max_frame_bytes.saturating_add(FRAME_HEADER_LEN);
	let ws_config = WebSocketConfig::default()
		.max_message_size(Some(ws_limit))
		.max_frame_size(Some(ws_limit));

	let ws = tokio_tungstenite::accept_hdr_async_with_config(stream, check_origin, Some(ws_config))
		.await
		.context("websocket handshake")?;

	metrics::gauge!("murmur_server_active_connections").increment(1.0);
	let _conn_guard = ConnectionGaugeGuard;
	info!(conn_id, %remote, "accepted connection");

	let (mut ws_tx, mut ws_rx) = ws.split();
	let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(settings.outbound_queue_capacity.max(1));
	let handle = ConnectionHandle::new(out_tx);
	let overflow = Arc::clone(&handle.overflow);

	let writer = tokio::spawn(async move {
		while let Some(frame) = out_rx.recv().await {
			metrics::counter!("murmur_server_bytes_out_total").increment(frame.len() as u64);
			if let Err(e) = ws_tx.send(Message::Binary(frame)).await {
				debug!(conn_id, error = %e, "websocket write failed");
				return;
			}
		}
		let _ = ws_tx.close().await;
	});

	let mut session = Session::open(ctx, conn_id, handle).await;
	let mut overflowed = false;

	loop {
		tokio::select! {
			msg = ws_rx.next() => {
				let Some(msg) = msg else {
					break;
				};
				match msg {
					Ok(Message::Binary(data)) => {
						metrics::counter!("murmur_server_bytes_in_total").increment(data.len() as u64);
						match ClientRequest::decode(&data, settings.max_frame_bytes) {
							Ok(req) => session.handle(req).await,
							Err(e) => {
								debug!(conn_id, error = %e, "malformed frame");
								session.reject_frame(&e.to_string()).await;
							}
						}
					}
					Ok(Message::Text(_)) => session.reject_frame("text frames are not supported").await,
					Ok(Message::Close(_)) => break,
					Ok(_) => {}
					Err(e) => {
						debug!(conn_id, error = %e, "websocket read failed");
						break;
					}
				}
			}
			_ = overflow.notified() => {
				warn!(conn_id, user_id = ?session.user_id(), "closing connection after outbound overflow");
				overflowed = true;
				break;
			}
		}
	}

	session.close().await;
	drop(session);
	stop_writer(writer, overflowed, WRITER_DRAIN_GRACE).await;

	info!(conn_id, "connection closed");
	Ok(())
}

/// Let the writer flush what is queued, unless the peer stopped reading or the grace period runs out.
async fn stop_writer(mut writer: JoinHandle<()>, overflowed: bool, grace: Duration) {
	if !overflowed && tokio::time::timeout(grace, &mut writer).await.is_ok() {
		return;
	}
	writer.abort();
	let _ = writer.await;
}
