#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};

use murmur_domain::{Group, GroupId, Message, MessageId, Recipient, User, UserId};
use tokio::sync::Mutex;

use super::{NewMessage, StoreBackend, StoreError, StoreResult};

#[derive(Debug, Default)]
struct Tables {
	last_user_id: i64,
	last_group_id: i64,
	last_message_id: i64,

	users: BTreeMap<UserId, User>,
	user_ids_by_name: HashMap<String, UserId>,
	groups: BTreeMap<GroupId, Group>,
	messages: BTreeMap<MessageId, Message>,
}

impl Tables {
	fn sorted(&self, mut keep: impl FnMut(&Message) -> bool) -> Vec<Message> {
		let mut out: Vec<Message> = self.messages.values().filter(|m| keep(m)).cloned().collect();
		out.sort_by_key(|m| (m.created_at, m.id));
		out
	}
}

/// Store backed by process memory; contents are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryStore {
	inner: Mutex<Tables>,
}

#[async_trait::async_trait]
impl StoreBackend for InMemoryStore {
	async fn get_or_create_user(&self, name: &str) -> StoreResult<(User, bool)> {
		let mut t = self.inner.lock().await;
		if let Some(id) = t.user_ids_by_name.get(name).copied()
			&& let Some(user) = t.users.get(&id)
		{
			return Ok((user.clone(), false));
		}

		t.last_user_id += 1;
		let user = User {
			id: UserId(t.last_user_id),
			name: name.to_string(),
		};
		t.user_ids_by_name.insert(user.name.clone(), user.id);
		t.users.insert(user.id, user.clone());
		Ok((user, true))
	}

	async fn users(&self) -> StoreResult<Vec<User>> {
		Ok(self.inner.lock().await.users.values().cloned().collect())
	}

	async fn user(&self, id: UserId) -> StoreResult<Option<User>> {
		Ok(self.inner.lock().await.users.get(&id).cloned())
	}

	async fn existing_users(&self, ids: &BTreeSet<UserId>) -> StoreResult<BTreeSet<UserId>> {
		let t = self.inner.lock().await;
		Ok(ids.iter().copied().filter(|id| t.users.contains_key(id)).collect())
	}

	async fn groups(&self) -> StoreResult<Vec<Group>> {
		Ok(self.inner.lock().await.groups.values().cloned().collect())
	}

	async fn group(&self, id: GroupId) -> StoreResult<Option<Group>> {
		Ok(self.inner.lock().await.groups.get(&id).cloned())
	}

	async fn insert_group(&self, name: &str, members: &BTreeSet<UserId>) -> StoreResult<Group> {
		let mut t = self.inner.lock().await;
		t.last_group_id += 1;
		let group = Group {
			id: GroupId(t.last_group_id),
			name: name.to_string(),
			members: members.clone(),
		};
		t.groups.insert(group.id, group.clone());
		Ok(group)
	}

	async fn update_group(&self, id: GroupId, name: &str, members: &BTreeSet<UserId>) -> StoreResult<Option<Group>> {
		let mut t = self.inner.lock().await;
		let Some(group) = t.groups.get_mut(&id) else {
			return Ok(None);
		};
		group.name = name.to_string();
		group.members = members.clone();
		Ok(Some(group.clone()))
	}

	async fn delete_group(&self, id: GroupId) -> StoreResult<bool> {
		let mut t = self.inner.lock().await;
		if t.groups.remove(&id).is_none() {
			return Ok(false);
		}
		t.messages.retain(|_, m| m.recipient != Recipient::Group(id));
		Ok(true)
	}

	async fn insert_message(&self, new: NewMessage) -> StoreResult<Message> {
		let mut t = self.inner.lock().await;
		let exists = match new.recipient {
			Recipient::User(u) => t.users.contains_key(&u),
			Recipient::Group(g) => t.groups.contains_key(&g),
		};
		if !exists {
			return Err(StoreError::MissingRecipient(new.recipient));
		}

		t.last_message_id += 1;
		let message = Message {
			id: MessageId(t.last_message_id),
			sender: new.sender,
			recipient: new.recipient,
			body: new.body,
			created_at: new.created_at,
			tags: new.tags,
		};
		t.messages.insert(message.id, message.clone());
		Ok(message)
	}

	async fn message(&self, id: MessageId) -> StoreResult<Option<Message>> {
		Ok(self.inner.lock().await.messages.get(&id).cloned())
	}

	async fn update_message_body(&self, id: MessageId, body: &str) -> StoreResult<Option<Message>> {
		let mut t = self.inner.lock().await;
		Ok(t.messages.get_mut(&id).map(|m| {
			m.body = body.to_string();
			m.clone()
		}))
	}

	async fn update_message_tags(&self, id: MessageId, tags: &BTreeSet<String>) -> StoreResult<Option<Message>> {
		let mut t = self.inner.lock().await;
		Ok(t.messages.get_mut(&id).map(|m| {
			m.tags = tags.clone();
			m.clone()
		}))
	}

	async fn delete_message(&self, id: MessageId) -> StoreResult<bool> {
		Ok(self.inner.lock().await.messages.remove(&id).is_some())
	}

	async fn direct_messages(&self, a: UserId, b: UserId) -> StoreResult<Vec<Message>> {
		let t = self.inner.lock().await;
		Ok(t.sorted(|m| {
			(m.sender == a && m.recipient == Recipient::User(b)) || (m.sender == b && m.recipient == Recipient::User(a))
		}))
	}

	async fn group_messages(&self, group: GroupId) -> StoreResult<Vec<Message>> {
		let t = self.inner.lock().await;
		Ok(t.sorted(|m| m.recipient == Recipient::Group(group)))
	}
}
