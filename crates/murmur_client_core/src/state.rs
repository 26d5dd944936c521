#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use murmur_domain::{Group, GroupId, Message, MessageId, Recipient, User, UserId, UserPresence};
use murmur_protocol::{ErrorKind, ServerEvent};
use tracing::debug;

/// Local model of what the server has told this client.
#[derive(Debug, Clone, Default)]
pub struct ChatState {
	pub me: Option<UserId>,
	pub users: BTreeMap<UserId, UserPresence>,
	pub groups: BTreeMap<GroupId, Group>,
	/// Keyed by the conversation as seen from `me`.
	pub conversations: BTreeMap<Recipient, Vec<Message>>,
	pub last_error: Option<(ErrorKind, String)>,
}

impl ChatState {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn apply(&mut self, event: &ServerEvent) {
		match event {
			ServerEvent::Error { kind, message, .. } => {
				self.last_error = Some((*kind, message.clone()));
			}
			ServerEvent::Welcome { user_id, users, groups } => {
				self.me = Some(*user_id);
				self.users = users.iter().map(|p| (p.user.id, p.clone())).collect();
				self.groups = groups.iter().map(|g| (g.id, g.clone())).collect();
				let groups = &self.groups;
				self.conversations.retain(|key, _| match key {
					Recipient::Group(id) => groups.contains_key(id),
					Recipient::User(_) => true,
				});
			}
			ServerEvent::UserAdded(presence) => {
				self.users.insert(presence.user.id, presence.clone());
			}
			ServerEvent::UserOnline(id) => self.set_online(*id, true),
			ServerEvent::UserOffline(id) => self.set_online(*id, false),
			ServerEvent::Conversation { recipient, messages } => {
				self.conversations.insert(*recipient, messages.clone());
			}
			ServerEvent::MessageSent(message) => {
				let Some(me) = self.me else {
					debug!(id = %message.id, "message before welcome; ignored");
					return;
				};
				let log = self.conversations.entry(message.conversation_for(me)).or_default();
				if !log.iter().any(|m| m.id == message.id) {
					log.push(message.clone());
				}
			}
			ServerEvent::MessageTagsEdited { id, tags } => {
				if let Some(m) = self.message_mut(*id) {
					m.tags = tags.clone();
				}
			}
			ServerEvent::MessageEdited { id, body } => {
				if let Some(m) = self.message_mut(*id) {
					m.body = body.clone();
				}
			}
			ServerEvent::MessageDeleted(id) => {
				for log in self.conversations.values_mut() {
					log.retain(|m| m.id != *id);
				}
			}
			ServerEvent::GroupAdded(group) | ServerEvent::GroupEdited(group) => {
				self.groups.insert(group.id, group.clone());
			}
			ServerEvent::GroupDeleted(id) => {
				self.groups.remove(id);
				self.conversations.remove(&Recipient::Group(*id));
			}
		}
	}

	pub fn conversation(&self, with: Recipient) -> &[Message] {
		self.conversations.get(&with).map(Vec::as_slice).unwrap_or(&[])
	}

	pub fn online_users(&self) -> impl Iterator<Item = &User> {
		self.users.values().filter(|p| p.online).map(|p| &p.user)
	}

	fn set_online(&mut self, id: UserId, online: bool) {
		if let Some(p) = self.users.get_mut(&id) {
			p.online = online;
		}
	}

	fn message_mut(&mut self, id: MessageId) -> Option<&mut Message> {
		self.conversations.values_mut().flat_map(|log| log.iter_mut()).find(|m| m.id == id)
	}
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeSet;

	use super::*;

	fn presence(id: i64, name: &str, online: bool) -> UserPresence {
		UserPresence {
			user: User {
				id: UserId(id),
				name: name.to_string(),
			},
			online,
		}
	}

	fn message(id: i64, sender: i64, recipient: Recipient, body: &str) -> Message {
		Message {
			id: MessageId(id),
			sender: UserId(sender),
			recipient,
			body: body.to_string(),
			created_at: 1_700_000_000 + id,
			tags: BTreeSet::new(),
		}
	}

	fn welcomed() -> ChatState {
		let mut state = ChatState::new();
		state.apply(&ServerEvent::Welcome {
			user_id: UserId(1),
			users: vec![presence(1, "alice", true), presence(2, "bob", false)],
			groups: vec![Group {
				id: GroupId(7),
				name: "crew".to_string(),
				members: BTreeSet::from([UserId(1), UserId(2)]),
			}],
		});
		state
	}

	#[test]
	fn welcome_and_presence() {
		let mut state = welcomed();
		assert_eq!(state.me, Some(UserId(1)));
		assert_eq!(state.online_users().map(|u| u.name.as_str()).collect::<Vec<_>>(), vec!["alice"]);

		state.apply(&ServerEvent::UserOnline(UserId(2)));
		state.apply(&ServerEvent::UserAdded(presence(3, "carol", false)));
		assert_eq!(state.online_users().count(), 2);
		assert_eq!(state.users.len(), 3);

		state.apply(&ServerEvent::UserOffline(UserId(1)));
		assert!(!state.users[&UserId(1)].online);
	}

	#[test]
	fn direct_messages_are_keyed_by_the_other_participant() {
		let mut state = welcomed();
		state.apply(&ServerEvent::MessageSent(message(1, 1, Recipient::User(UserId(2)), "hi")));
		state.apply(&ServerEvent::MessageSent(message(2, 2, Recipient::User(UserId(1)), "hey")));
		state.apply(&ServerEvent::MessageSent(message(2, 2, Recipient::User(UserId(1)), "hey")));

		let log = state.conversation(Recipient::User(UserId(2)));
		assert_eq!(log.iter().map(|m| m.body.as_str()).collect::<Vec<_>>(), vec!["hi", "hey"]);
	}

	#[test]
	fn edits_tags_and_deletes() {
		let mut state = welcomed();
		let group = Recipient::Group(GroupId(7));
		state.apply(&ServerEvent::Conversation {
			recipient: group,
			messages: vec![message(5, 2, group, "draft"), message(6, 1, group, "other")],
		});

		state.apply(&ServerEvent::MessageEdited {
			id: MessageId(5),
			body: "final".to_string(),
		});
		state.apply(&ServerEvent::MessageTagsEdited {
			id: MessageId(5),
			tags: BTreeSet::from(["news".to_string()]),
		});
		state.apply(&ServerEvent::MessageDeleted(MessageId(6)));

		let log = state.conversation(group);
		assert_eq!(log.len(), 1);
		assert_eq!(log[0].body, "final");
		assert!(log[0].tags.contains("news"));
	}

	#[test]
	fn group_deletion_drops_its_conversation() {
		let mut state = welcomed();
		let group = Recipient::Group(GroupId(7));
		state.apply(&ServerEvent::MessageSent(message(1, 2, group, "hello crew")));
		assert_eq!(state.conversation(group).len(), 1);

		state.apply(&ServerEvent::GroupDeleted(GroupId(7)));
		assert!(state.groups.is_empty());
		assert!(state.conversation(group).is_empty());
	}

	#[test]
	fn errors_are_remembered() {
		let mut state = ChatState::new();
		state.apply(&ServerEvent::error(ErrorKind::Conflict, "name in use"));
		assert_eq!(state.last_error, Some((ErrorKind::Conflict, "name in use".to_string())));
	}
}
