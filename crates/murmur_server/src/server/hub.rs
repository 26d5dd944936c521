#![forbid(unsafe_code)]

use std::sync::Arc;

use bytes::Bytes;
use murmur_protocol::{ProtocolError, ServerEvent};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

use crate::server::registry::{Audience, ConnectionRegistry};

/// Fans encoded events out to live connections.
#[derive(Debug, Clone)]
pub struct Hub {
	registry: Arc<RwLock<ConnectionRegistry>>,
	cfg: HubConfig,
}

#[derive(Debug, Clone)]
pub struct HubConfig {
	pub max_frame_bytes: usize,
}

impl Default for HubConfig {
	fn default() -> Self {
		Self {
			max_frame_bytes: murmur_protocol::DEFAULT_MAX_FRAME_SIZE,
		}
	}
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
	pub delivered: usize,
	/// Frames dropped because a receiver's queue was full.
	pub dropped: usize,
}

impl Hub {
	pub fn new(registry: Arc<RwLock<ConnectionRegistry>>, cfg: HubConfig) -> Self {
		Self { registry, cfg }
	}

	/// Encode `event` once and enqueue it for every connection in `audience`.
	///
	/// Never waits on a receiver. A receiver whose queue is full loses this frame and is told to close.
	/// Fails without sending anything when the event does not fit in one frame.
	pub async fn deliver(&self, audience: &Audience, event: &ServerEvent) -> Result<DeliveryReport, ProtocolError> {
		let frame = match event.encode(self.cfg.max_frame_bytes) {
			Ok(f) => Bytes::from(f),
			Err(e) => {
				metrics::counter!("murmur_server_events_unencodable_total", "event" => event.kind().as_str()).increment(1);
				return Err(e);
			}
		};

		let targets = self.registry.read().await.resolve(audience);

		let mut report = DeliveryReport::default();
		for (conn_id, handle) in targets {
			match handle.outbound.try_send(frame.clone()) {
				Ok(()) => report.delivered += 1,
				Err(mpsc::error::TrySendError::Full(_)) => {
					report.dropped += 1;
					handle.overflow.notify_one();
					warn!(conn_id, event = event.kind().as_str(), "hub: outbound queue full; closing connection");
				}
				Err(mpsc::error::TrySendError::Closed(_)) => {}
			}
		}

		let kind = event.kind().as_str();
		metrics::counter!("murmur_server_events_delivered_total", "event" => kind).increment(report.delivered as u64);
		if report.dropped > 0 {
			metrics::counter!("murmur_server_events_dropped_total", "event" => kind).increment(report.dropped as u64);
		}

		debug!(event = kind, delivered = report.delivered, dropped = report.dropped, "hub: delivered");

		Ok(report)
	}
}
