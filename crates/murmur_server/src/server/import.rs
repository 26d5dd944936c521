#![forbid(unsafe_code)]

//! One-shot import of JSON-lines dumps (`users.db`, `groups.db`, `messages.db`).

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use anyhow::Context as _;
use murmur_domain::{DisplayName, GroupId, Recipient, UserId, normalize_tags, validate_body, validate_group_name};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::server::store::{NewMessage, StoreBackend};

#[derive(Debug, Deserialize)]
struct LegacyUser {
	#[serde(rename = "_id")]
	id: String,
	username: String,
}

#[derive(Debug, Deserialize)]
struct LegacyGroup {
	#[serde(rename = "_id")]
	id: String,
	name: String,
	#[serde(default)]
	members: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyMessage {
	sender: String,
	receiving_user: Option<String>,
	receiving_group: Option<String>,
	message: String,
	/// Milliseconds since the Unix epoch.
	#[serde(default)]
	created_at: i64,
	tags: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
	pub users: usize,
	pub groups: usize,
	pub messages: usize,
	pub skipped: usize,
}

/// Legacy tags are one space/comma separated string, compared case-insensitively.
fn split_legacy_tags(raw: Option<&str>) -> BTreeSet<String> {
	let Some(raw) = raw else {
		return BTreeSet::new();
	};
	normalize_tags(raw.split([' ', ',']).map(|t| t.to_lowercase()))
}

async fn read_lines<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
	let text = tokio::fs::read_to_string(path)
		.await
		.with_context(|| format!("read {}", path.display()))?;

	text.lines()
		.enumerate()
		.filter(|(_, line)| !line.trim().is_empty())
		.map(|(n, line)| serde_json::from_str(line).with_context(|| format!("parse {}:{}", path.display(), n + 1)))
		.collect()
}

/// Import every record that references known users/groups; everything else is skipped and counted.
pub async fn import_legacy(store: &dyn StoreBackend, dir: &Path) -> anyhow::Result<ImportReport> {
	let users: Vec<LegacyUser> = read_lines(&dir.join("users.db")).await?;
	let groups: Vec<LegacyGroup> = read_lines(&dir.join("groups.db")).await?;
	let mut messages: Vec<LegacyMessage> = read_lines(&dir.join("messages.db")).await?;

	let mut report = ImportReport::default();
	let mut user_ids: HashMap<String, UserId> = HashMap::new();
	let mut group_ids: HashMap<String, GroupId> = HashMap::new();

	for u in users {
		let name = match DisplayName::parse(&u.username) {
			Ok(name) => name,
			Err(e) => {
				warn!(legacy_id = %u.id, username = %u.username, error = %e, "import: skipping user");
				report.skipped += 1;
				continue;
			}
		};
		let (user, _) = store.get_or_create_user(name.as_str()).await?;
		user_ids.insert(u.id, user.id);
		report.users += 1;
	}
	info!(count = report.users, "import: users");

	for g in groups {
		let members: BTreeSet<UserId> = g.members.iter().filter_map(|m| user_ids.get(m).copied()).collect();
		let name = match validate_group_name(&g.name) {
			Ok(name) if !members.is_empty() => name,
			_ => {
				warn!(legacy_id = %g.id, "import: skipping group without name or known members");
				report.skipped += 1;
				continue;
			}
		};
		let group = store.insert_group(&name, &members).await?;
		group_ids.insert(g.id, group.id);
		report.groups += 1;
	}
	info!(count = report.groups, "import: groups");

	messages.sort_by_key(|m| m.created_at);

	for m in messages {
		let sender = user_ids.get(&m.sender).copied();
		let recipient = match (&m.receiving_user, &m.receiving_group) {
			(Some(u), None) => user_ids.get(u).copied().map(Recipient::User),
			(None, Some(g)) => group_ids.get(g).copied().map(Recipient::Group),
			_ => None,
		};
		let (Some(sender), Some(recipient)) = (sender, recipient) else {
			report.skipped += 1;
			continue;
		};
		if validate_body(&m.message).is_err() {
			report.skipped += 1;
			continue;
		}

		store
			.insert_message(NewMessage {
				sender,
				recipient,
				tags: split_legacy_tags(m.tags.as_deref()),
				body: m.message,
				created_at: m.created_at.div_euclid(1000),
			})
			.await?;
		report.messages += 1;
	}
	info!(count = report.messages, skipped = report.skipped, "import: messages");

	Ok(report)
}
