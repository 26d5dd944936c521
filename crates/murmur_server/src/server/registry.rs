#![forbid(unsafe_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use murmur_domain::UserId;
use tokio::sync::{Notify, mpsc};

/// Server-assigned connection identifier.
pub type ConnId = u64;

/// Outbound side of a live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
	/// Encoded frames waiting for the writer task.
	pub outbound: mpsc::Sender<Bytes>,

	/// Fired when the outbound queue overflowed and the connection must close.
	pub overflow: Arc<Notify>,
}

impl ConnectionHandle {
	pub fn new(outbound: mpsc::Sender<Bytes>) -> Self {
		Self {
			outbound,
			overflow: Arc::new(Notify::new()),
		}
	}
}

/// Who an event is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
	/// Every live connection, bound or not.
	Everyone,
	/// Every connection bound to one of these users.
	Users(BTreeSet<UserId>),
	/// One connection.
	Connection(ConnId),
}

/// Result of binding a connection to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceChange {
	/// The user had no bound connection before this bind.
	pub came_online: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unbound {
	pub user: UserId,
	/// That was the user's last bound connection.
	pub went_offline: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimError {
	/// Another live connection is bound to the user.
	InUse,
	/// The connection was never attached (or already detached).
	UnknownConnection,
}

#[derive(Debug)]
struct Entry {
	handle: ConnectionHandle,
	user: Option<UserId>,
}

/// Authoritative map of live connections and the user each one is bound to.
///
/// "Online" is derived from here and nowhere else.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
	conns: HashMap<ConnId, Entry>,
	conns_by_user: HashMap<UserId, HashSet<ConnId>>,
}

impl ConnectionRegistry {
	/// Register a live connection with no bound user.
	pub fn attach(&mut self, conn: ConnId, handle: ConnectionHandle) {
		if let Some(prev) = self.conns.insert(conn, Entry { handle, user: None })
			&& let Some(user) = prev.user
		{
			self.forget(user, conn);
		}
	}

	/// Bind `conn` to `user`, replacing any previous binding of that connection.
	///
	/// Returns `None` if the connection is not attached.
	pub fn bind(&mut self, conn: ConnId, user: UserId) -> Option<PresenceChange> {
		let entry = self.conns.get_mut(&conn)?;
		let previous = entry.user.replace(user);

		if let Some(prev) = previous
			&& prev != user
		{
			self.forget(prev, conn);
		}

		let set = self.conns_by_user.entry(user).or_default();
		let came_online = set.is_empty();
		set.insert(conn);
		Some(PresenceChange { came_online })
	}

	/// Bind `conn` to `user` only if no other connection holds that user.
	pub fn claim(&mut self, conn: ConnId, user: UserId) -> Result<PresenceChange, ClaimError> {
		if !self.conns.contains_key(&conn) {
			return Err(ClaimError::UnknownConnection);
		}
		if self
			.conns_by_user
			.get(&user)
			.is_some_and(|set| set.iter().any(|c| *c != conn))
		{
			return Err(ClaimError::InUse);
		}
		self.bind(conn, user).ok_or(ClaimError::UnknownConnection)
	}

	/// Remove the connection entirely.
	///
	/// Returns the user it was bound to, if any.
	pub fn unbind(&mut self, conn: ConnId) -> Option<Unbound> {
		let entry = self.conns.remove(&conn)?;
		let user = entry.user?;
		let went_offline = self.forget(user, conn);
		Some(Unbound { user, went_offline })
	}

	pub fn is_online(&self, user: UserId) -> bool {
		self.conns_by_user.get(&user).is_some_and(|set| !set.is_empty())
	}

	pub fn connections_for(&self, user: UserId) -> Vec<ConnId> {
		let mut out: Vec<ConnId> = self
			.conns_by_user
			.get(&user)
			.map(|set| set.iter().copied().collect())
			.unwrap_or_default();
		out.sort_unstable();
		out
	}

	pub fn all_connections(&self) -> Vec<ConnId> {
		let mut out: Vec<ConnId> = self.conns.keys().copied().collect();
		out.sort_unstable();
		out
	}

	pub fn online_users(&self) -> BTreeSet<UserId> {
		self.conns_by_user.keys().copied().filter(|u| self.is_online(*u)).collect()
	}

	#[cfg(test)]
	pub fn user_for(&self, conn: ConnId) -> Option<UserId> {
		self.conns.get(&conn).and_then(|e| e.user)
	}

	pub fn handle(&self, conn: ConnId) -> Option<&ConnectionHandle> {
		self.conns.get(&conn).map(|e| &e.handle)
	}

	#[cfg(test)]
	pub fn len(&self) -> usize {
		self.conns.len()
	}

	/// Resolve an audience to the live connections that should receive the event.
	pub fn resolve(&self, audience: &Audience) -> Vec<(ConnId, ConnectionHandle)> {
		let ids: Vec<ConnId> = match audience {
			Audience::Everyone => self.all_connections(),
			Audience::Connection(conn) => vec![*conn],
			Audience::Users(users) => {
				let mut ids: Vec<ConnId> = users.iter().flat_map(|u| self.connections_for(*u)).collect();
				ids.sort_unstable();
				ids.dedup();
				ids
			}
		};

		ids.into_iter()
			.filter_map(|id| self.handle(id).map(|h| (id, h.clone())))
			.collect()
	}

	/// Drop `conn` from the user's set; returns true if the set became empty.
	fn forget(&mut self, user: UserId, conn: ConnId) -> bool {
		let Some(set) = self.conns_by_user.get_mut(&user) else {
			return false;
		};
		set.remove(&conn);
		if set.is_empty() {
			self.conns_by_user.remove(&user);
			true
		} else {
			false
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn handle() -> ConnectionHandle {
		let (tx, _rx) = mpsc::channel(1);
		ConnectionHandle::new(tx)
	}

	#[test]
	fn presence_follows_bound_connections() {
		let mut reg = ConnectionRegistry::default();
		reg.attach(1, handle());
		reg.attach(2, handle());

		assert_eq!(reg.bind(1, UserId(7)), Some(PresenceChange { came_online: true }));
		assert_eq!(reg.bind(2, UserId(7)), Some(PresenceChange { came_online: false }));
		assert!(reg.is_online(UserId(7)));
		assert_eq!(reg.connections_for(UserId(7)), vec![1, 2]);

		assert_eq!(
			reg.unbind(1),
			Some(Unbound {
				user: UserId(7),
				went_offline: false
			})
		);
		assert!(reg.is_online(UserId(7)));
		assert_eq!(
			reg.unbind(2),
			Some(Unbound {
				user: UserId(7),
				went_offline: true
			})
		);
		assert!(!reg.is_online(UserId(7)));
		assert!(reg.online_users().is_empty());
		assert_eq!(reg.len(), 0);
	}

	#[test]
	fn claim_is_exclusive_across_connections() {
		let mut reg = ConnectionRegistry::default();
		reg.attach(1, handle());
		reg.attach(2, handle());

		assert!(reg.claim(1, UserId(3)).is_ok());
		assert_eq!(reg.claim(2, UserId(3)), Err(ClaimError::InUse));
		assert_eq!(reg.claim(1, UserId(3)), Ok(PresenceChange { came_online: false }));
		assert_eq!(reg.claim(9, UserId(4)), Err(ClaimError::UnknownConnection));

		reg.unbind(1);
		assert!(reg.claim(2, UserId(3)).is_ok(), "name is free once its holder is gone");
	}

	#[test]
	fn unbinding_anonymous_connection_reports_nothing() {
		let mut reg = ConnectionRegistry::default();
		reg.attach(1, handle());
		assert_eq!(reg.unbind(1), None);
		assert_eq!(reg.unbind(1), None);
		assert!(reg.all_connections().is_empty());
	}

	#[test]
	fn rebinding_moves_presence() {
		let mut reg = ConnectionRegistry::default();
		reg.attach(1, handle());
		reg.bind(1, UserId(1));
		reg.bind(1, UserId(2));
		assert!(!reg.is_online(UserId(1)));
		assert!(reg.is_online(UserId(2)));
		assert_eq!(reg.user_for(1), Some(UserId(2)));
	}

	#[test]
	fn resolve_dedups_and_skips_offline_users() {
		let mut reg = ConnectionRegistry::default();
		for conn in 1..=3 {
			reg.attach(conn, handle());
		}
		reg.bind(1, UserId(10));
		reg.bind(2, UserId(10));
		reg.bind(3, UserId(11));

		let users: BTreeSet<UserId> = [UserId(10), UserId(11), UserId(12)].into_iter().collect();
		let ids: Vec<ConnId> = reg.resolve(&Audience::Users(users)).into_iter().map(|(c, _)| c).collect();
		assert_eq!(ids, vec![1, 2, 3]);

		let ids: Vec<ConnId> = reg.resolve(&Audience::Connection(42)).into_iter().map(|(c, _)| c).collect();
		assert!(ids.is_empty());

		reg.attach(4, handle());
		assert_eq!(reg.resolve(&Audience::Everyone).len(), 4);
	}
}
