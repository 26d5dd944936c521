#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use murmur_protocol::{EventKind, ServerEvent};
use tokio::sync::mpsc;

type SubscriptionId = u64;

struct Entry {
	filter: Option<EventKind>,
	tx: mpsc::UnboundedSender<ServerEvent>,
}

#[derive(Default)]
struct Table {
	next_id: SubscriptionId,
	entries: HashMap<SubscriptionId, Entry>,
}

/// Subscribers of one socket. Events are fanned out in arrival order.
#[derive(Default)]
pub(crate) struct Subscribers {
	table: Mutex<Table>,
}

impl Subscribers {
	fn table(&self) -> MutexGuard<'_, Table> {
		self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	pub(crate) fn subscribe(self: &Arc<Self>, filter: Option<EventKind>) -> Subscription {
		let (tx, rx) = mpsc::unbounded_channel();
		let mut table = self.table();
		table.next_id += 1;
		let id = table.next_id;
		table.entries.insert(id, Entry { filter, tx });
		Subscription {
			id,
			rx,
			owner: Arc::downgrade(self),
		}
	}

	pub(crate) fn dispatch(&self, event: &ServerEvent) {
		let kind = event.kind();
		let mut table = self.table();
		table.entries.retain(|_, entry| {
			if entry.filter.is_some_and(|f| f != kind) {
				return true;
			}
			entry.tx.send(event.clone()).is_ok()
		});
	}

	#[cfg(test)]
	pub(crate) fn len(&self) -> usize {
		self.table().entries.len()
	}

	fn remove(&self, id: SubscriptionId) {
		self.table().entries.remove(&id);
	}
}

/// Handle to a stream of server events. Dropping it unregisters.
pub struct Subscription {
	id: SubscriptionId,
	rx: mpsc::UnboundedReceiver<ServerEvent>,
	owner: Weak<Subscribers>,
}

impl Subscription {
	/// Next event; `None` once the socket is gone.
	pub async fn recv(&mut self) -> Option<ServerEvent> {
		self.rx.recv().await
	}

	pub fn try_recv(&mut self) -> Option<ServerEvent> {
		self.rx.try_recv().ok()
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(owner) = self.owner.upgrade() {
			owner.remove(self.id);
		}
	}
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription").field("id", &self.id).finish_non_exhaustive()
	}
}
