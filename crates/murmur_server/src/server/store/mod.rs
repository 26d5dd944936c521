#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use murmur_domain::{Group, GroupId, Message, MessageId, Recipient, User, UserId};
use thiserror::Error;
use tracing::info;

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("migration error: {0}")]
	Migrate(#[from] sqlx::migrate::MigrateError),

	#[error("corrupt row: {0}")]
	Corrupt(String),

	#[error("recipient does not exist: {0}")]
	MissingRecipient(Recipient),

	#[error("unsupported database_url (use sqlite:): {0}")]
	UnsupportedUrl(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A message about to be persisted; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewMessage {
	pub sender: UserId,
	pub recipient: Recipient,
	pub body: String,
	pub created_at: i64,
	pub tags: BTreeSet<String>,
}

/// Durable collections of users, groups, and messages.
///
/// Lists of messages are ordered by `created_at`, then id.
#[async_trait::async_trait]
pub trait StoreBackend: Send + Sync {
	/// Atomically fetch the user named `name`, creating it if absent.
	///
	/// The flag is true when this call created the user.
	async fn get_or_create_user(&self, name: &str) -> StoreResult<(User, bool)>;

	async fn users(&self) -> StoreResult<Vec<User>>;

	async fn user(&self, id: UserId) -> StoreResult<Option<User>>;

	/// The subset of `ids` that resolve to existing users.
	async fn existing_users(&self, ids: &BTreeSet<UserId>) -> StoreResult<BTreeSet<UserId>>;

	async fn groups(&self) -> StoreResult<Vec<Group>>;

	async fn group(&self, id: GroupId) -> StoreResult<Option<Group>>;

	async fn insert_group(&self, name: &str, members: &BTreeSet<UserId>) -> StoreResult<Group>;

	/// Replace name and member set. `None` if the group does not exist.
	async fn update_group(&self, id: GroupId, name: &str, members: &BTreeSet<UserId>) -> StoreResult<Option<Group>>;

	/// Delete a group and every message addressed to it.
	async fn delete_group(&self, id: GroupId) -> StoreResult<bool>;

	/// Fails with `MissingRecipient` unless the addressed user or group exists.
	async fn insert_message(&self, new: NewMessage) -> StoreResult<Message>;

	async fn message(&self, id: MessageId) -> StoreResult<Option<Message>>;

	async fn update_message_body(&self, id: MessageId, body: &str) -> StoreResult<Option<Message>>;

	async fn update_message_tags(&self, id: MessageId, tags: &BTreeSet<String>) -> StoreResult<Option<Message>>;

	async fn delete_message(&self, id: MessageId) -> StoreResult<bool>;

	/// Direct messages exchanged between `a` and `b`, in either direction.
	async fn direct_messages(&self, a: UserId, b: UserId) -> StoreResult<Vec<Message>>;

	async fn group_messages(&self, group: GroupId) -> StoreResult<Vec<Message>>;
}

pub type SharedStore = Arc<dyn StoreBackend>;

/// Open the configured store: SQLite when a URL is given, in-memory otherwise.
pub async fn open_store(database_url: Option<&str>) -> StoreResult<SharedStore> {
	match database_url {
		Some(url) => {
			let store = SqliteStore::connect(url).await?;
			info!("store: sqlite backend ready");
			Ok(Arc::new(store))
		}
		None => {
			info!("store: no database_url configured; using in-memory backend");
			Ok(Arc::new(InMemoryStore::default()))
		}
	}
}

#[cfg(test)]
mod tests;
