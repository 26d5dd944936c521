#![forbid(unsafe_code)]

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::server::hub::{Hub, HubConfig};
use crate::server::locks::KeyedLocks;
use crate::server::registry::ConnectionRegistry;
use crate::server::store::SharedStore;

/// State shared by every connection task.
#[derive(Clone)]
pub struct ServerContext {
	pub store: SharedStore,
	pub registry: Arc<RwLock<ConnectionRegistry>>,
	pub hub: Hub,
	pub locks: Arc<KeyedLocks>,
}

impl ServerContext {
	pub fn new(store: SharedStore, hub_cfg: HubConfig) -> Self {
		let registry = Arc::new(RwLock::new(ConnectionRegistry::default()));
		Self {
			store,
			hub: Hub::new(registry.clone(), hub_cfg),
			registry,
			locks: Arc::new(KeyedLocks::default()),
		}
	}
}
