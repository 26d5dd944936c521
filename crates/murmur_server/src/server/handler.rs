#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use murmur_domain::{
	DisplayName, DomainError, Group, GroupId, Message, MessageId, Recipient, UserId, UserPresence, normalize_tags,
	validate_body, validate_group_name,
};
use murmur_protocol::{ClientRequest, ErrorKind, ServerEvent};
use tracing::{debug, error, info, warn};

use crate::server::context::ServerContext;
use crate::server::error::{RequestError, RequestResult};
use crate::server::locks::LockKey;
use crate::server::membership::{diff, normalize_members, validate_members};
use crate::server::registry::{Audience, ClaimError, ConnId, ConnectionHandle, Unbound};
use crate::server::store::NewMessage;
use crate::util::time::unix_secs_now;

#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionState {
	Anonymous,
	Authenticated { user_id: UserId, name: String },
	Closed,
}

/// Per-connection protocol state machine.
///
/// Requests of one session are handled one at a time; sessions run concurrently.
pub struct Session {
	conn_id: ConnId,
	ctx: ServerContext,
	state: SessionState,
	/// Label of the request being handled.
	current: Option<&'static str>,
}

impl Session {
	/// Register the connection and start in the anonymous state.
	pub async fn open(ctx: ServerContext, conn_id: ConnId, handle: ConnectionHandle) -> Self {
		ctx.registry.write().await.attach(conn_id, handle);
		Self {
			conn_id,
			ctx,
			state: SessionState::Anonymous,
			current: None,
		}
	}

	pub fn user_id(&self) -> Option<UserId> {
		match self.state {
			SessionState::Authenticated { user_id, .. } => Some(user_id),
			_ => None,
		}
	}

	/// Handle one request. Failures are reported to this connection only.
	pub async fn handle(&mut self, req: ClientRequest) {
		if self.state == SessionState::Closed {
			return;
		}

		let name = req.name();
		metrics::counter!("murmur_server_requests_total", "request" => name).increment(1);

		self.current = Some(name);
		if let Err(e) = self.dispatch(req).await {
			let event = e.to_event(name);
			metrics::counter!("murmur_server_request_errors_total", "request" => name, "code" => e.kind().as_str())
				.increment(1);
			debug!(conn_id = self.conn_id, request = name, code = %e.kind(), error = %e, "request rejected");
			self.reply(&event).await;
		}
		self.current = None;
	}

	/// Report an undecodable frame.
	pub async fn reject_frame(&self, detail: &str) {
		metrics::counter!("murmur_server_request_errors_total", "request" => "malformed", "code" => ErrorKind::Validation.as_str())
			.increment(1);
		self.reply(&ServerEvent::error(ErrorKind::Validation, format!("malformed request: {detail}")))
			.await;
	}

	/// Unbind the connection and announce the user going offline if this was their last one.
	pub async fn close(&mut self) {
		let previous = std::mem::replace(&mut self.state, SessionState::Closed);

		let _guard = match &previous {
			SessionState::Authenticated { name, .. } => Some(self.ctx.locks.lock(LockKey::UserName(name.clone())).await),
			SessionState::Anonymous => None,
			SessionState::Closed => return,
		};

		let unbound = self.ctx.registry.write().await.unbind(self.conn_id);
		if let Some(Unbound {
			user,
			went_offline: true,
		}) = unbound
		{
			info!(conn_id = self.conn_id, user_id = %user, "user went offline");
			self.broadcast(&Audience::Everyone, &ServerEvent::UserOffline(user)).await;
		}
	}

	async fn dispatch(&mut self, req: ClientRequest) -> RequestResult<()> {
		match req {
			ClientRequest::ClaimIdentity { name } => self.claim_identity(&name).await,
			ClientRequest::FetchConversation { recipient } => self.fetch_conversation(recipient).await,
			ClientRequest::SendMessage { body, recipient } => self.send_message(&body, recipient).await,
			ClientRequest::EditMessage { id, body } => self.edit_message(id, &body).await,
			ClientRequest::EditTags { id, tags } => self.edit_tags(id, tags).await,
			ClientRequest::DeleteMessage { id } => self.delete_message(id).await,
			ClientRequest::CreateGroup { name, members } => self.create_group(&name, members).await,
			ClientRequest::EditGroup { id, name, members } => self.edit_group(id, &name, members).await,
			ClientRequest::DeleteGroup { id } => self.delete_group(id).await,
		}
	}

	/// Send `event` to this connection only.
	///
	/// A reply too large for one frame is replaced by an error so the requester always hears back.
	async fn reply(&self, event: &ServerEvent) {
		let to = Audience::Connection(self.conn_id);
		let Err(e) = self.ctx.hub.deliver(&to, event).await else {
			return;
		};
		warn!(conn_id = self.conn_id, event = event.kind().as_str(), error = %e, "reply does not fit in a frame");

		let message = "response too large";
		let fallback = match self.current {
			Some(request) => ServerEvent::rejected(request, ErrorKind::Internal, message),
			None => ServerEvent::error(ErrorKind::Internal, message),
		};
		if let Err(e) = self.ctx.hub.deliver(&to, &fallback).await {
			error!(conn_id = self.conn_id, error = %e, "failed to encode error reply");
		}
	}

	/// Fan `event` out to `audience`.
	async fn broadcast(&self, audience: &Audience, event: &ServerEvent) {
		if let Err(e) = self.ctx.hub.deliver(audience, event).await {
			error!(conn_id = self.conn_id, event = event.kind().as_str(), error = %e, "broadcast does not fit in a frame");
		}
	}

	fn require_user(&self) -> RequestResult<UserId> {
		self.user_id()
			.ok_or_else(|| RequestError::Unauthorized("claim an identity first".to_string()))
	}

	async fn claim_identity(&mut self, raw: &str) -> RequestResult<()> {
		let name = DisplayName::parse(raw)?;

		if let SessionState::Authenticated { user_id, name: current } = &self.state {
			if current != name.as_str() {
				return Err(RequestError::Validation(format!("already signed in as {current}")));
			}
			let user_id = *user_id;
			return self.send_welcome(user_id).await;
		}

		let _guard = self.ctx.locks.lock(LockKey::UserName(name.as_str().to_string())).await;

		let (user, created) = self.ctx.store.get_or_create_user(name.as_str()).await?;

		let claimed = self.ctx.registry.write().await.claim(self.conn_id, user.id);
		let change = match claimed {
			Ok(change) => change,
			Err(ClaimError::InUse) => return Err(RequestError::Conflict(format!("name {name} is already in use"))),
			Err(ClaimError::UnknownConnection) => {
				return Err(RequestError::Unauthorized("connection is closing".to_string()));
			}
		};

		self.state = SessionState::Authenticated {
			user_id: user.id,
			name: user.name.clone(),
		};
		info!(conn_id = self.conn_id, user_id = %user.id, name = %user.name, created, "identity claimed");

		self.send_welcome(user.id).await?;

		if created {
			let presence = UserPresence {
				user: user.clone(),
				online: true,
			};
			self.broadcast(&Audience::Everyone, &ServerEvent::UserAdded(presence)).await;
		}
		if change.came_online {
			self.broadcast(&Audience::Everyone, &ServerEvent::UserOnline(user.id)).await;
		}
		Ok(())
	}

	async fn send_welcome(&self, user_id: UserId) -> RequestResult<()> {
		let users = self.ctx.store.users().await?;
		let groups = self.ctx.store.groups().await?;

		let online = self.ctx.registry.read().await.online_users();
		let users: Vec<UserPresence> = users
			.into_iter()
			.map(|user| UserPresence {
				online: online.contains(&user.id),
				user,
			})
			.collect();

		self.reply(&ServerEvent::Welcome { user_id, users, groups }).await;
		Ok(())
	}

	async fn fetch_conversation(&self, recipient: Recipient) -> RequestResult<()> {
		let me = self.require_user()?;

		let messages = match recipient {
			Recipient::User(other) => {
				if self.ctx.store.user(other).await?.is_none() {
					return Err(RequestError::NotFound(format!("no such user: {other}")));
				}
				self.ctx.store.direct_messages(me, other).await?
			}
			Recipient::Group(group_id) => {
				let group = self
					.ctx
					.store
					.group(group_id)
					.await?
					.ok_or_else(|| RequestError::NotFound(format!("no such group: {group_id}")))?;
				if !group.is_member(me) {
					return Err(RequestError::Unauthorized(format!("not a member of group {group_id}")));
				}
				self.ctx.store.group_messages(group_id).await?
			}
		};

		self.reply(&ServerEvent::Conversation { recipient, messages }).await;
		Ok(())
	}

	async fn send_message(&self, body: &str, recipient: Recipient) -> RequestResult<()> {
		let me = self.require_user()?;
		let body = validate_body(body)?;

		// Held until the fan-out so a concurrent delete cannot orphan the message.
		let _guard = match recipient {
			Recipient::Group(group_id) => Some(self.ctx.locks.lock(LockKey::Group(group_id)).await),
			Recipient::User(_) => None,
		};

		match recipient {
			Recipient::User(to) => {
				if self.ctx.store.user(to).await?.is_none() {
					return Err(RequestError::NotFound(format!("no such user: {to}")));
				}
			}
			Recipient::Group(group_id) => {
				let group = self
					.ctx
					.store
					.group(group_id)
					.await?
					.ok_or_else(|| RequestError::NotFound(format!("no such group: {group_id}")))?;
				if !group.is_member(me) {
					return Err(RequestError::Unauthorized(format!("not a member of group {group_id}")));
				}
			}
		}

		let message = self
			.ctx
			.store
			.insert_message(NewMessage {
				sender: me,
				recipient,
				body: body.to_string(),
				created_at: unix_secs_now(),
				tags: BTreeSet::new(),
			})
			.await?;

		let audience = self.message_audience(&message).await?;
		self.broadcast(&audience, &ServerEvent::MessageSent(message)).await;
		Ok(())
	}

	async fn edit_message(&self, id: MessageId, body: &str) -> RequestResult<()> {
		let me = self.require_user()?;
		let body = validate_body(body)?;

		let _guard = self.ctx.locks.lock(LockKey::Message(id)).await;
		self.owned_message(id, me).await?;

		let updated = self
			.ctx
			.store
			.update_message_body(id, body)
			.await?
			.ok_or_else(|| RequestError::NotFound(format!("no such message: {id}")))?;

		let audience = self.message_audience(&updated).await?;
		let event = ServerEvent::MessageEdited {
			id,
			body: updated.body,
		};
		self.broadcast(&audience, &event).await;
		Ok(())
	}

	async fn edit_tags(&self, id: MessageId, tags: Vec<String>) -> RequestResult<()> {
		let me = self.require_user()?;
		let tags = normalize_tags(tags);

		let _guard = self.ctx.locks.lock(LockKey::Message(id)).await;
		self.owned_message(id, me).await?;

		let updated = self
			.ctx
			.store
			.update_message_tags(id, &tags)
			.await?
			.ok_or_else(|| RequestError::NotFound(format!("no such message: {id}")))?;

		let audience = self.message_audience(&updated).await?;
		let event = ServerEvent::MessageTagsEdited {
			id,
			tags: updated.tags,
		};
		self.broadcast(&audience, &event).await;
		Ok(())
	}

	async fn delete_message(&self, id: MessageId) -> RequestResult<()> {
		let me = self.require_user()?;

		let _guard = self.ctx.locks.lock(LockKey::Message(id)).await;
		let message = self.owned_message(id, me).await?;
		let audience = self.message_audience(&message).await?;

		if !self.ctx.store.delete_message(id).await? {
			return Err(RequestError::NotFound(format!("no such message: {id}")));
		}

		self.broadcast(&audience, &ServerEvent::MessageDeleted(id)).await;
		Ok(())
	}

	async fn create_group(&self, raw_name: &str, requested: Vec<UserId>) -> RequestResult<()> {
		let me = self.require_user()?;
		let name = validate_group_name(raw_name)?;
		let members = normalize_members(requested, me);
		self.check_members(&members).await?;

		let group = self.ctx.store.insert_group(&name, &members).await?;
		info!(conn_id = self.conn_id, group_id = %group.id, members = group.members.len(), "group created");

		let audience = Audience::Users(group.members.clone());
		self.broadcast(&audience, &ServerEvent::GroupAdded(group)).await;
		Ok(())
	}

	async fn edit_group(&self, id: GroupId, raw_name: &str, requested: Vec<UserId>) -> RequestResult<()> {
		let me = self.require_user()?;

		let _guard = self.ctx.locks.lock(LockKey::Group(id)).await;
		let current = self.member_group(id, me).await?;

		let name = validate_group_name(raw_name)?;
		let members: BTreeSet<UserId> = requested.into_iter().collect();
		if members.is_empty() {
			return Err(DomainError::EmptyMembers.into());
		}
		self.check_members(&members).await?;

		let updated = self
			.ctx
			.store
			.update_group(id, &name, &members)
			.await?
			.ok_or_else(|| RequestError::NotFound(format!("no such group: {id}")))?;

		let changes = diff(&current.members, &updated.members);
		debug!(
			group_id = %id,
			added = changes.added.len(),
			removed = changes.removed.len(),
			retained = changes.retained.len(),
			"group edited"
		);

		if !changes.added.is_empty() {
			self.broadcast(&Audience::Users(changes.added), &ServerEvent::GroupAdded(updated.clone()))
				.await;
		}
		if !changes.retained.is_empty() {
			self.broadcast(&Audience::Users(changes.retained), &ServerEvent::GroupEdited(updated))
				.await;
		}
		if !changes.removed.is_empty() {
			self.broadcast(&Audience::Users(changes.removed), &ServerEvent::GroupDeleted(id))
				.await;
		}
		Ok(())
	}

	async fn delete_group(&self, id: GroupId) -> RequestResult<()> {
		let me = self.require_user()?;

		let _guard = self.ctx.locks.lock(LockKey::Group(id)).await;
		let group = self.member_group(id, me).await?;

		if !self.ctx.store.delete_group(id).await? {
			return Err(RequestError::NotFound(format!("no such group: {id}")));
		}
		info!(conn_id = self.conn_id, group_id = %id, "group deleted");

		self.broadcast(&Audience::Users(group.members), &ServerEvent::GroupDeleted(id))
			.await;
		Ok(())
	}

	/// Fetch a message the requester sent.
	async fn owned_message(&self, id: MessageId, me: UserId) -> RequestResult<Message> {
		let message = self
			.ctx
			.store
			.message(id)
			.await?
			.ok_or_else(|| RequestError::NotFound(format!("no such message: {id}")))?;
		if message.sender != me {
			return Err(RequestError::Unauthorized("only the sender may change a message".to_string()));
		}
		Ok(message)
	}

	/// Fetch a group the requester belongs to.
	async fn member_group(&self, id: GroupId, me: UserId) -> RequestResult<Group> {
		let group = self
			.ctx
			.store
			.group(id)
			.await?
			.ok_or_else(|| RequestError::NotFound(format!("no such group: {id}")))?;
		if !group.is_member(me) {
			return Err(RequestError::Unauthorized(format!("not a member of group {id}")));
		}
		Ok(group)
	}

	async fn check_members(&self, members: &BTreeSet<UserId>) -> RequestResult<()> {
		let missing = validate_members(self.ctx.store.as_ref(), members).await?;
		if !missing.is_empty() {
			let ids: Vec<String> = missing.iter().map(|id| id.to_string()).collect();
			return Err(RequestError::Validation(format!("unknown members: {}", ids.join(", "))));
		}
		Ok(())
	}

	/// Sender plus the target user, or sender plus the target group's current members.
	async fn message_audience(&self, message: &Message) -> RequestResult<Audience> {
		let mut users = BTreeSet::from([message.sender]);
		match message.recipient {
			Recipient::User(to) => {
				users.insert(to);
			}
			Recipient::Group(group_id) => {
				if let Some(group) = self.ctx.store.group(group_id).await? {
					users.extend(group.members);
				}
			}
		}
		Ok(Audience::Users(users))
	}
}
