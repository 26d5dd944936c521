#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use murmur_domain::{GroupId, MessageId};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Keys that serialize conflicting mutations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
	UserName(String),
	Group(GroupId),
	Message(MessageId),
}

/// A lazily populated table of async mutexes, one per key.
#[derive(Debug)]
pub struct KeyedLocks<K = LockKey> {
	table: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
	fn default() -> Self {
		Self {
			table: Mutex::new(HashMap::new()),
		}
	}
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
	/// Wait for exclusive access to `key`. The lock is released when the guard drops.
	pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
		let slot = {
			let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
			// Entries nobody holds or waits on can go.
			table.retain(|k, m| *k == key || Arc::strong_count(m) > 1);
			table.entry(key).or_default().clone()
		};
		slot.lock_owned().await
	}

	#[cfg(test)]
	pub fn len(&self) -> usize {
		self.table.lock().unwrap_or_else(|e| e.into_inner()).len()
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use tokio::time::timeout;

	use super::*;

	#[tokio::test]
	async fn same_key_is_exclusive() {
		let locks = Arc::new(KeyedLocks::default());
		let held = locks.lock(LockKey::Group(GroupId(1))).await;

		let l2 = locks.clone();
		let waiter = tokio::spawn(async move {
			let _g = l2.lock(LockKey::Group(GroupId(1))).await;
		});

		assert!(
			timeout(Duration::from_millis(50), locks.lock(LockKey::Group(GroupId(1))))
				.await
				.is_err()
		);
		drop(held);
		timeout(Duration::from_millis(250), waiter)
			.await
			.expect("waiter acquires after release")
			.expect("join");
	}

	#[tokio::test]
	async fn distinct_keys_do_not_block() {
		let locks = KeyedLocks::default();
		let _a = locks.lock(LockKey::Message(MessageId(1))).await;
		let _b = timeout(Duration::from_millis(50), locks.lock(LockKey::Message(MessageId(2))))
			.await
			.expect("different key is free");
		let _c = timeout(Duration::from_millis(50), locks.lock(LockKey::UserName("a".into())))
			.await
			.expect("different kind is free");
	}

	#[tokio::test]
	async fn idle_entries_are_pruned() {
		let locks = KeyedLocks::default();
		for i in 0..10 {
			let _g = locks.lock(LockKey::Message(MessageId(i))).await;
		}
		let _g = locks.lock(LockKey::Group(GroupId(1))).await;
		assert_eq!(locks.len(), 1);
	}
}
