#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;
use std::collections::BTreeSet;

use murmur_domain::{Group, GroupId, Message, MessageId, Recipient, User, UserId, UserPresence};
use thiserror::Error;

use crate::framing::{FramingError, decode_single_frame, encode_frame};
use crate::pb;
use crate::version::PROTOCOL_VERSION;

#[derive(Debug, Error)]
pub enum ProtocolError {
	#[error(transparent)]
	Framing(#[from] FramingError),

	#[error("unsupported protocol version: {0}")]
	UnsupportedVersion(u32),

	#[error("missing field: {0}")]
	MissingField(&'static str),

	#[error("unknown error code: {0}")]
	UnknownErrorCode(String),
}

/// Error taxonomy carried by `ServerEvent::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	Validation,
	Conflict,
	NotFound,
	Unauthorized,
	Internal,
}

impl ErrorKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			ErrorKind::Validation => "VALIDATION",
			ErrorKind::Conflict => "CONFLICT",
			ErrorKind::NotFound => "NOT_FOUND",
			ErrorKind::Unauthorized => "UNAUTHORIZED",
			ErrorKind::Internal => "INTERNAL",
		}
	}
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ErrorKind {
	type Err = ProtocolError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"VALIDATION" => Ok(ErrorKind::Validation),
			"CONFLICT" => Ok(ErrorKind::Conflict),
			"NOT_FOUND" => Ok(ErrorKind::NotFound),
			"UNAUTHORIZED" => Ok(ErrorKind::Unauthorized),
			"INTERNAL" => Ok(ErrorKind::Internal),
			other => Err(ProtocolError::UnknownErrorCode(other.to_string())),
		}
	}
}

/// Requests a client may send.
///
/// Tags and member lists are carried as sent; the server normalizes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
	ClaimIdentity { name: String },
	FetchConversation { recipient: Recipient },
	SendMessage { body: String, recipient: Recipient },
	EditMessage { id: MessageId, body: String },
	EditTags { id: MessageId, tags: Vec<String> },
	DeleteMessage { id: MessageId },
	CreateGroup { name: String, members: Vec<UserId> },
	EditGroup { id: GroupId, name: String, members: Vec<UserId> },
	DeleteGroup { id: GroupId },
}

/// Events the server pushes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
	Error {
		kind: ErrorKind,
		message: String,
		/// `ClientRequest::name` of the rejected request, if the error answers one.
		request: Option<String>,
	},
	Welcome {
		user_id: UserId,
		users: Vec<UserPresence>,
		groups: Vec<Group>,
	},
	UserAdded(UserPresence),
	UserOnline(UserId),
	UserOffline(UserId),
	Conversation { recipient: Recipient, messages: Vec<Message> },
	MessageSent(Message),
	MessageTagsEdited { id: MessageId, tags: BTreeSet<String> },
	MessageEdited { id: MessageId, body: String },
	MessageDeleted(MessageId),
	GroupAdded(Group),
	GroupEdited(Group),
	GroupDeleted(GroupId),
}

/// Discriminant of a `ServerEvent`, used for typed subscriptions and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
	Error,
	Welcome,
	UserAdded,
	UserOnline,
	UserOffline,
	Conversation,
	MessageSent,
	MessageTagsEdited,
	MessageEdited,
	MessageDeleted,
	GroupAdded,
	GroupEdited,
	GroupDeleted,
}

impl EventKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			EventKind::Error => "error",
			EventKind::Welcome => "welcome",
			EventKind::UserAdded => "user_added",
			EventKind::UserOnline => "user_online",
			EventKind::UserOffline => "user_offline",
			EventKind::Conversation => "conversation",
			EventKind::MessageSent => "message_sent",
			EventKind::MessageTagsEdited => "message_tags_edited",
			EventKind::MessageEdited => "message_edited",
			EventKind::MessageDeleted => "message_deleted",
			EventKind::GroupAdded => "group_added",
			EventKind::GroupEdited => "group_edited",
			EventKind::GroupDeleted => "group_deleted",
		}
	}
}

impl ServerEvent {
	pub fn kind(&self) -> EventKind {
		match self {
			ServerEvent::Error { .. } => EventKind::Error,
			ServerEvent::Welcome { .. } => EventKind::Welcome,
			ServerEvent::UserAdded(_) => EventKind::UserAdded,
			ServerEvent::UserOnline(_) => EventKind::UserOnline,
			ServerEvent::UserOffline(_) => EventKind::UserOffline,
			ServerEvent::Conversation { .. } => EventKind::Conversation,
			ServerEvent::MessageSent(_) => EventKind::MessageSent,
			ServerEvent::MessageTagsEdited { .. } => EventKind::MessageTagsEdited,
			ServerEvent::MessageEdited { .. } => EventKind::MessageEdited,
			ServerEvent::MessageDeleted(_) => EventKind::MessageDeleted,
			ServerEvent::GroupAdded(_) => EventKind::GroupAdded,
			ServerEvent::GroupEdited(_) => EventKind::GroupEdited,
			ServerEvent::GroupDeleted(_) => EventKind::GroupDeleted,
		}
	}

	pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
		ServerEvent::Error {
			kind,
			message: message.into(),
			request: None,
		}
	}

	/// An error answering the request labelled `request`.
	pub fn rejected(request: &str, kind: ErrorKind, message: impl Into<String>) -> Self {
		ServerEvent::Error {
			kind,
			message: message.into(),
			request: Some(request.to_string()),
		}
	}

	/// Encode into one length-prefixed frame.
	pub fn encode(&self, max_frame_size: usize) -> Result<Vec<u8>, ProtocolError> {
		let env = pb::ServerEnvelope {
			version: PROTOCOL_VERSION,
			event: Some(self.to_pb()),
		};
		Ok(encode_frame(&env, max_frame_size)?)
	}

	/// Decode a buffer holding exactly one frame.
	pub fn decode(frame: &[u8], max_frame_size: usize) -> Result<Self, ProtocolError> {
		let env: pb::ServerEnvelope = decode_single_frame(frame, max_frame_size)?;
		check_version(env.version)?;
		Self::from_pb(env.event.ok_or(ProtocolError::MissingField("event"))?)
	}

	pub fn to_pb(&self) -> pb::server_envelope::Event {
		use pb::server_envelope::Event;

		match self {
			ServerEvent::Error { kind, message, request } => Event::Error(pb::Error {
				code: kind.as_str().to_string(),
				message: message.clone(),
				request: request.clone().unwrap_or_default(),
			}),
			ServerEvent::Welcome { user_id, users, groups } => Event::Welcome(pb::Welcome {
				user_id: user_id.get(),
				users: users.iter().map(presence_to_pb).collect(),
				groups: groups.iter().map(group_to_pb).collect(),
			}),
			ServerEvent::UserAdded(p) => Event::UserAdded(pb::UserAdded {
				user: Some(presence_to_pb(p)),
			}),
			ServerEvent::UserOnline(id) => Event::UserOnline(pb::UserPresence { user_id: id.get() }),
			ServerEvent::UserOffline(id) => Event::UserOffline(pb::UserPresence { user_id: id.get() }),
			ServerEvent::Conversation { recipient, messages } => Event::Conversation(pb::Conversation {
				recipient: Some(recipient_to_pb(*recipient)),
				messages: messages.iter().map(message_to_pb).collect(),
			}),
			ServerEvent::MessageSent(m) => Event::MessageSent(pb::MessageSent {
				message: Some(message_to_pb(m)),
			}),
			ServerEvent::MessageTagsEdited { id, tags } => Event::MessageTagsEdited(pb::MessageTagsEdited {
				id: id.get(),
				tags: tags.iter().cloned().collect(),
			}),
			ServerEvent::MessageEdited { id, body } => Event::MessageEdited(pb::MessageEdited {
				id: id.get(),
				body: body.clone(),
			}),
			ServerEvent::MessageDeleted(id) => Event::MessageDeleted(pb::MessageDeleted { id: id.get() }),
			ServerEvent::GroupAdded(g) => Event::GroupAdded(pb::GroupChanged {
				group: Some(group_to_pb(g)),
			}),
			ServerEvent::GroupEdited(g) => Event::GroupEdited(pb::GroupChanged {
				group: Some(group_to_pb(g)),
			}),
			ServerEvent::GroupDeleted(id) => Event::GroupDeleted(pb::GroupDeleted { id: id.get() }),
		}
	}

	pub fn from_pb(event: pb::server_envelope::Event) -> Result<Self, ProtocolError> {
		use pb::server_envelope::Event;

		Ok(match event {
			Event::Error(e) => ServerEvent::Error {
				kind: e.code.parse()?,
				message: e.message,
				request: Some(e.request).filter(|r| !r.is_empty()),
			},
			Event::Welcome(w) => ServerEvent::Welcome {
				user_id: UserId(w.user_id),
				users: w.users.into_iter().map(presence_from_pb).collect(),
				groups: w.groups.into_iter().map(group_from_pb).collect(),
			},
			Event::UserAdded(u) => ServerEvent::UserAdded(presence_from_pb(u.user.ok_or(ProtocolError::MissingField("user"))?)),
			Event::UserOnline(p) => ServerEvent::UserOnline(UserId(p.user_id)),
			Event::UserOffline(p) => ServerEvent::UserOffline(UserId(p.user_id)),
			Event::Conversation(c) => ServerEvent::Conversation {
				recipient: recipient_from_pb(c.recipient)?,
				messages: c.messages.into_iter().map(message_from_pb).collect::<Result<_, _>>()?,
			},
			Event::MessageSent(m) => {
				ServerEvent::MessageSent(message_from_pb(m.message.ok_or(ProtocolError::MissingField("message"))?)?)
			}
			Event::MessageTagsEdited(t) => ServerEvent::MessageTagsEdited {
				id: MessageId(t.id),
				tags: t.tags.into_iter().collect(),
			},
			Event::MessageEdited(m) => ServerEvent::MessageEdited {
				id: MessageId(m.id),
				body: m.body,
			},
			Event::MessageDeleted(m) => ServerEvent::MessageDeleted(MessageId(m.id)),
			Event::GroupAdded(g) => ServerEvent::GroupAdded(group_from_pb(g.group.ok_or(ProtocolError::MissingField("group"))?)),
			Event::GroupEdited(g) => ServerEvent::GroupEdited(group_from_pb(g.group.ok_or(ProtocolError::MissingField("group"))?)),
			Event::GroupDeleted(g) => ServerEvent::GroupDeleted(GroupId(g.id)),
		})
	}
}

impl ClientRequest {
	pub const CLAIM_IDENTITY: &'static str = "claim_identity";

	/// Short label for logs, metrics, and error replies.
	pub const fn name(&self) -> &'static str {
		match self {
			ClientRequest::ClaimIdentity { .. } => Self::CLAIM_IDENTITY,
			ClientRequest::FetchConversation { .. } => "fetch_conversation",
			ClientRequest::SendMessage { .. } => "send_message",
			ClientRequest::EditMessage { .. } => "edit_message",
			ClientRequest::EditTags { .. } => "edit_tags",
			ClientRequest::DeleteMessage { .. } => "delete_message",
			ClientRequest::CreateGroup { .. } => "create_group",
			ClientRequest::EditGroup { .. } => "edit_group",
			ClientRequest::DeleteGroup { .. } => "delete_group",
		}
	}

	pub fn encode(&self, max_frame_size: usize) -> Result<Vec<u8>, ProtocolError> {
		let env = pb::ClientEnvelope {
			version: PROTOCOL_VERSION,
			request: Some(self.to_pb()),
		};
		Ok(encode_frame(&env, max_frame_size)?)
	}

	pub fn decode(frame: &[u8], max_frame_size: usize) -> Result<Self, ProtocolError> {
		let env: pb::ClientEnvelope = decode_single_frame(frame, max_frame_size)?;
		check_version(env.version)?;
		Self::from_pb(env.request.ok_or(ProtocolError::MissingField("request"))?)
	}

	pub fn to_pb(&self) -> pb::client_envelope::Request {
		use pb::client_envelope::Request;

		match self {
			ClientRequest::ClaimIdentity { name } => Request::ClaimIdentity(pb::ClaimIdentity { name: name.clone() }),
			ClientRequest::FetchConversation { recipient } => Request::FetchConversation(pb::FetchConversation {
				recipient: Some(recipient_to_pb(*recipient)),
			}),
			ClientRequest::SendMessage { body, recipient } => Request::SendMessage(pb::SendMessage {
				body: body.clone(),
				recipient: Some(recipient_to_pb(*recipient)),
			}),
			ClientRequest::EditMessage { id, body } => Request::EditMessage(pb::EditMessage {
				id: id.get(),
				body: body.clone(),
			}),
			ClientRequest::EditTags { id, tags } => Request::EditTags(pb::EditTags {
				id: id.get(),
				tags: tags.clone(),
			}),
			ClientRequest::DeleteMessage { id } => Request::DeleteMessage(pb::DeleteMessage { id: id.get() }),
			ClientRequest::CreateGroup { name, members } => Request::CreateGroup(pb::CreateGroup {
				name: name.clone(),
				members: members.iter().map(|m| m.get()).collect(),
			}),
			ClientRequest::EditGroup { id, name, members } => Request::EditGroup(pb::EditGroup {
				id: id.get(),
				name: name.clone(),
				members: members.iter().map(|m| m.get()).collect(),
			}),
			ClientRequest::DeleteGroup { id } => Request::DeleteGroup(pb::DeleteGroup { id: id.get() }),
		}
	}

	pub fn from_pb(request: pb::client_envelope::Request) -> Result<Self, ProtocolError> {
		use pb::client_envelope::Request;

		Ok(match request {
			Request::ClaimIdentity(c) => ClientRequest::ClaimIdentity { name: c.name },
			Request::FetchConversation(f) => ClientRequest::FetchConversation {
				recipient: recipient_from_pb(f.recipient)?,
			},
			Request::SendMessage(s) => ClientRequest::SendMessage {
				body: s.body,
				recipient: recipient_from_pb(s.recipient)?,
			},
			Request::EditMessage(e) => ClientRequest::EditMessage {
				id: MessageId(e.id),
				body: e.body,
			},
			Request::EditTags(e) => ClientRequest::EditTags {
				id: MessageId(e.id),
				tags: e.tags,
			},
			Request::DeleteMessage(d) => ClientRequest::DeleteMessage { id: MessageId(d.id) },
			Request::CreateGroup(c) => ClientRequest::CreateGroup {
				name: c.name,
				members: c.members.into_iter().map(UserId).collect(),
			},
			Request::EditGroup(e) => ClientRequest::EditGroup {
				id: GroupId(e.id),
				name: e.name,
				members: e.members.into_iter().map(UserId).collect(),
			},
			Request::DeleteGroup(d) => ClientRequest::DeleteGroup { id: GroupId(d.id) },
		})
	}
}

fn check_version(version: u32) -> Result<(), ProtocolError> {
	if version != PROTOCOL_VERSION {
		return Err(ProtocolError::UnsupportedVersion(version));
	}
	Ok(())
}

pub fn recipient_to_pb(recipient: Recipient) -> pb::Recipient {
	let target = match recipient {
		Recipient::User(id) => pb::recipient::Target::User(id.get()),
		Recipient::Group(id) => pb::recipient::Target::Group(id.get()),
	};
	pb::Recipient { target: Some(target) }
}

pub fn recipient_from_pb(recipient: Option<pb::Recipient>) -> Result<Recipient, ProtocolError> {
	match recipient.and_then(|r| r.target) {
		Some(pb::recipient::Target::User(id)) => Ok(Recipient::User(UserId(id))),
		Some(pb::recipient::Target::Group(id)) => Ok(Recipient::Group(GroupId(id))),
		None => Err(ProtocolError::MissingField("recipient")),
	}
}

fn presence_to_pb(p: &UserPresence) -> pb::User {
	pb::User {
		id: p.user.id.get(),
		name: p.user.name.clone(),
		online: p.online,
	}
}

fn presence_from_pb(u: pb::User) -> UserPresence {
	UserPresence {
		user: User {
			id: UserId(u.id),
			name: u.name,
		},
		online: u.online,
	}
}

fn group_to_pb(g: &Group) -> pb::Group {
	pb::Group {
		id: g.id.get(),
		name: g.name.clone(),
		members: g.members.iter().map(|m| m.get()).collect(),
	}
}

fn group_from_pb(g: pb::Group) -> Group {
	Group {
		id: GroupId(g.id),
		name: g.name,
		members: g.members.into_iter().map(UserId).collect(),
	}
}

pub fn message_to_pb(m: &Message) -> pb::Message {
	pb::Message {
		id: m.id.get(),
		sender: m.sender.get(),
		recipient: Some(recipient_to_pb(m.recipient)),
		body: m.body.clone(),
		created_at: m.created_at,
		tags: m.tags.iter().cloned().collect(),
	}
}

pub fn message_from_pb(m: pb::Message) -> Result<Message, ProtocolError> {
	Ok(Message {
		id: MessageId(m.id),
		sender: UserId(m.sender),
		recipient: recipient_from_pb(m.recipient)?,
		body: m.body,
		created_at: m.created_at,
		tags: m.tags.into_iter().collect(),
	})
}
