#![forbid(unsafe_code)]

use std::time::Duration;

use murmur_protocol::{DEFAULT_MAX_FRAME_SIZE, ProtocolError};
use murmur_util::endpoint::WsEndpoint;

mod backoff;
mod socket;
pub mod state;
mod subscriptions;
pub mod transport;

pub use backoff::Backoff;
pub use murmur_protocol::{ClientRequest, ErrorKind, EventKind, ServerEvent};
pub use socket::{ConnectionStatus, ResilientSocket};
pub use state::ChatState;
pub use subscriptions::Subscription;
pub use transport::{Connection, Connector, WsConnector};

/// Default endpoint for local development.
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:18300";

/// Client socket configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
	/// WebSocket URL of the server.
	pub url: String,

	/// Delay before the first reconnect after a close.
	pub reconnect_base_delay: Duration,

	/// Upper bound for the doubled reconnect delay.
	pub reconnect_max_delay: Duration,

	/// Reconnect attempts per outage before pending callers get `GaveUp`. `None` retries forever.
	pub max_reconnect_attempts: Option<u32>,

	/// Maximum inbound/outbound frame size.
	pub max_frame_bytes: usize,
}

impl ClientConfig {
	/// Convenience: create a config from `ws://host:port`.
	pub fn from_ws_endpoint(endpoint: &str) -> Result<Self, ClientCoreError> {
		let e = WsEndpoint::parse(endpoint)
			.map_err(|msg| ClientCoreError::Protocol(format!("invalid endpoint (expected ws://host:port): {msg}")))?;
		Ok(Self {
			url: e.url(),
			..Self::default()
		})
	}
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			url: format!("{DEFAULT_ENDPOINT}/"),
			reconnect_base_delay: Duration::from_secs(2),
			reconnect_max_delay: Duration::from_secs(300),
			max_reconnect_attempts: None,
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
		}
	}
}

/// Errors produced by the client library.
///
/// Cloneable so a single reconnect outcome can be handed to every waiting caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientCoreError {
	/// Connection establishment failed.
	#[error("failed to connect: {0}")]
	Connect(String),

	/// IO error on an open connection.
	#[error("io error: {0}")]
	Io(String),

	/// Encoding or decoding failed.
	#[error("protocol error: {0}")]
	Protocol(String),

	/// The socket was shut down.
	#[error("socket is shut down")]
	Closed,

	/// Another identity claim has not been answered yet.
	#[error("an identity claim is already in flight")]
	ClaimPending,

	/// Reconnecting was abandoned.
	#[error("gave up reconnecting after {attempts} attempts")]
	GaveUp { attempts: u32 },
}

impl From<ProtocolError> for ClientCoreError {
	fn from(e: ProtocolError) -> Self {
		ClientCoreError::Protocol(e.to_string())
	}
}

impl From<anyhow::Error> for ClientCoreError {
	fn from(e: anyhow::Error) -> Self {
		ClientCoreError::Io(format!("{e:#}"))
	}
}
