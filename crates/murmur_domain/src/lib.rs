#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum display name length in characters.
pub const MAX_NAME_LEN: usize = 32;

/// Errors raised by domain validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
	#[error("name must not be empty")]
	EmptyName,
	#[error("name is too long: len={len} max={max}")]
	NameTooLong { len: usize, max: usize },
	#[error("name contains an invalid character: {0:?}")]
	InvalidNameChar(char),
	#[error("group name must not be empty")]
	EmptyGroupName,
	#[error("message body must not be empty")]
	EmptyBody,
	#[error("group must have at least one member")]
	EmptyMembers,
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

macro_rules! id_newtype {
	($(#[$meta:meta])* $name:ident) => {
		$(#[$meta])*
		#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(pub i64);

		impl $name {
			pub const fn get(self) -> i64 {
				self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl FromStr for $name {
			type Err = DomainError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				s.trim()
					.parse::<i64>()
					.map(Self)
					.map_err(|_| DomainError::InvalidFormat(format!("expected integer id, got {s:?}")))
			}
		}
	};
}

id_newtype!(
	/// Store-assigned user identifier.
	UserId
);
id_newtype!(
	/// Store-assigned group identifier.
	GroupId
);
id_newtype!(
	/// Store-assigned message identifier.
	MessageId
);

/// A validated display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DisplayName(String);

impl DisplayName {
	/// Trim and validate a claimed name.
	pub fn parse(raw: &str) -> Result<Self, DomainError> {
		let name = raw.trim();
		if name.is_empty() {
			return Err(DomainError::EmptyName);
		}

		let len = name.chars().count();
		if len > MAX_NAME_LEN {
			return Err(DomainError::NameTooLong { len, max: MAX_NAME_LEN });
		}

		if let Some(c) = name.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == ' ')) {
			return Err(DomainError::InvalidNameChar(c));
		}

		Ok(Self(name.to_string()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for DisplayName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Trim a group name and reject blank ones.
pub fn validate_group_name(raw: &str) -> Result<String, DomainError> {
	let name = raw.trim();
	if name.is_empty() {
		return Err(DomainError::EmptyGroupName);
	}
	Ok(name.to_string())
}

/// Reject blank message bodies. The body is kept as written.
pub fn validate_body(raw: &str) -> Result<&str, DomainError> {
	if raw.trim().is_empty() {
		return Err(DomainError::EmptyBody);
	}
	Ok(raw)
}

/// Trim, drop blanks, and deduplicate tags.
pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
	I: IntoIterator<Item = S>,
	S: AsRef<str>,
{
	tags.into_iter()
		.map(|t| t.as_ref().trim().to_string())
		.filter(|t| !t.is_empty())
		.collect()
}

/// Target of a message or conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum Recipient {
	User(UserId),
	Group(GroupId),
}

impl Recipient {
	pub const USER_PREFIX: &'static str = "user:";
	pub const GROUP_PREFIX: &'static str = "group:";
}

impl fmt::Display for Recipient {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Recipient::User(id) => write!(f, "{}{id}", Self::USER_PREFIX),
			Recipient::Group(id) => write!(f, "{}{id}", Self::GROUP_PREFIX),
		}
	}
}

impl FromStr for Recipient {
	type Err = DomainError;

	/// Parse `user:<id>` or `group:<id>`.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if let Some(rest) = s.strip_prefix(Self::USER_PREFIX) {
			return Ok(Recipient::User(rest.parse()?));
		}
		if let Some(rest) = s.strip_prefix(Self::GROUP_PREFIX) {
			return Ok(Recipient::Group(rest.parse()?));
		}
		Err(DomainError::InvalidFormat(format!("expected user:<id> or group:<id>, got {s:?}")))
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
	pub id: UserId,
	pub name: String,
}

/// A user plus the derived online flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPresence {
	pub user: User,
	pub online: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
	pub id: GroupId,
	pub name: String,
	pub members: BTreeSet<UserId>,
}

impl Group {
	pub fn is_member(&self, user: UserId) -> bool {
		self.members.contains(&user)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
	pub id: MessageId,
	pub sender: UserId,
	pub recipient: Recipient,
	pub body: String,
	/// Seconds since the Unix epoch.
	pub created_at: i64,
	pub tags: BTreeSet<String>,
}

impl Message {
	/// The conversation this message belongs to, as seen by `viewer`.
	///
	/// Direct messages are keyed by the other participant; group messages by the group.
	pub fn conversation_for(&self, viewer: UserId) -> Recipient {
		match self.recipient {
			Recipient::User(to) if self.sender == viewer => Recipient::User(to),
			Recipient::User(_) => Recipient::User(self.sender),
			Recipient::Group(g) => Recipient::Group(g),
		}
	}
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;

	use super::*;

	#[test]
	fn display_name_trims_and_validates() {
		assert_eq!(DisplayName::parse("  alice ").unwrap().as_str(), "alice");
		assert_eq!(DisplayName::parse("bob_the builder2").unwrap().as_str(), "bob_the builder2");
		assert_eq!(DisplayName::parse("   "), Err(DomainError::EmptyName));
		assert_eq!(DisplayName::parse("al!ce"), Err(DomainError::InvalidNameChar('!')));
		assert!(matches!(
			DisplayName::parse(&"x".repeat(MAX_NAME_LEN + 1)),
			Err(DomainError::NameTooLong { .. })
		));
		assert!(DisplayName::parse(&"x".repeat(MAX_NAME_LEN)).is_ok());
	}

	#[test]
	fn recipient_parse_and_display() {
		assert_eq!("user:7".parse::<Recipient>().unwrap(), Recipient::User(UserId(7)));
		assert_eq!("group:3".parse::<Recipient>().unwrap(), Recipient::Group(GroupId(3)));
		assert_eq!(Recipient::Group(GroupId(3)).to_string(), "group:3");
		assert!("room:1".parse::<Recipient>().is_err());
		assert!("user:abc".parse::<Recipient>().is_err());
	}

	#[test]
	fn tags_are_trimmed_and_deduplicated() {
		let tags = normalize_tags(["  urgent", "urgent", "", " ", "later "]);
		assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec!["later", "urgent"]);
	}

	#[test]
	fn blank_group_names_and_bodies_are_rejected() {
		assert_eq!(validate_group_name("  team "), Ok("team".to_string()));
		assert_eq!(validate_group_name("\t"), Err(DomainError::EmptyGroupName));
		assert_eq!(validate_body(" hi "), Ok(" hi "));
		assert_eq!(validate_body("  "), Err(DomainError::EmptyBody));
	}

	#[test]
	fn conversation_key_depends_on_viewer() {
		let msg = Message {
			id: MessageId(1),
			sender: UserId(1),
			recipient: Recipient::User(UserId(2)),
			body: "hello".to_string(),
			created_at: 0,
			tags: BTreeSet::new(),
		};
		assert_eq!(msg.conversation_for(UserId(1)), Recipient::User(UserId(2)));
		assert_eq!(msg.conversation_for(UserId(2)), Recipient::User(UserId(1)));
	}

	proptest! {
		#[test]
		fn normalize_tags_is_idempotent(tags in proptest::collection::vec("[ a-z,]{0,8}", 0..12)) {
			let once = normalize_tags(&tags);
			let twice = normalize_tags(&once);
			prop_assert_eq!(&once, &twice);
			prop_assert!(once.iter().all(|t| !t.is_empty() && t.trim() == t));
		}
	}
}
