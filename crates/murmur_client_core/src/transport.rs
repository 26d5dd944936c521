#![forbid(unsafe_code)]

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Sink, SinkExt as _, StreamExt as _, future};
use murmur_protocol::FRAME_HEADER_LEN;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::debug;

use crate::ClientCoreError;

/// Outbound half of a connection; each item is one encoded frame.
pub type FrameSink = Pin<Box<dyn Sink<Vec<u8>, Error = ClientCoreError> + Send>>;

/// Inbound half of a connection; ends when the transport closes.
pub type FrameStream = BoxStream<'static, Result<Vec<u8>, ClientCoreError>>;

/// One established transport connection.
pub struct Connection {
	pub sink: FrameSink,
	pub stream: FrameStream,
}

/// Opens transport connections for `ResilientSocket`.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
	async fn connect(&self) -> Result<Connection, ClientCoreError>;
}

/// WebSocket connector; frames travel as binary messages.
#[derive(Debug, Clone)]
pub struct WsConnector {
	url: String,
	max_frame_bytes: usize,
}

impl WsConnector {
	pub fn new(url: impl Into<String>, max_frame_bytes: usize) -> Self {
		Self {
			url: url.into(),
			max_frame_bytes,
		}
	}
}

#[async_trait]
impl Connector for WsConnector {
	async fn connect(&self) -> Result<Connection, ClientCoreError> {
		let ws_limit = self.max_frame_bytes.saturating_add(FRAME_HEADER_LEN);
		let ws_config = WebSocketConfig::default()
			.max_message_size(Some(ws_limit))
			.max_frame_size(Some(ws_limit));

		let (ws, _response) = tokio_tungstenite::connect_async_with_config(self.url.as_str(), Some(ws_config), false)
			.await
			.map_err(|e| ClientCoreError::Connect(format!("{}: {e}", self.url)))?;
		debug!(url = %self.url, "websocket connected");

		let (ws_tx, ws_rx) = ws.split();

		let sink = ws_tx
			.sink_map_err(|e| ClientCoreError::Io(e.to_string()))
			.with(|frame: Vec<u8>| future::ready(Ok::<_, ClientCoreError>(Message::Binary(frame.into()))));

		let stream = ws_rx.filter_map(|msg| {
			future::ready(match msg {
				Ok(Message::Binary(b)) => Some(Ok(b.to_vec())),
				Ok(Message::Text(_)) => Some(Err(ClientCoreError::Protocol("unexpected text frame".to_string()))),
				Ok(_) => None,
				Err(e) => Some(Err(ClientCoreError::Io(e.to_string()))),
			})
		});

		Ok(Connection {
			sink: Box::pin(sink),
			stream: stream.boxed(),
		})
	}
}
