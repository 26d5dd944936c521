#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use murmur_domain::UserId;

use crate::server::store::{StoreBackend, StoreResult};

/// How a group's member set changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
	pub added: BTreeSet<UserId>,
	pub removed: BTreeSet<UserId>,
	pub retained: BTreeSet<UserId>,
}

pub fn diff(old: &BTreeSet<UserId>, new: &BTreeSet<UserId>) -> MembershipDiff {
	MembershipDiff {
		added: new.difference(old).copied().collect(),
		removed: old.difference(new).copied().collect(),
		retained: old.intersection(new).copied().collect(),
	}
}

/// Requested members plus the creator.
pub fn normalize_members(requested: impl IntoIterator<Item = UserId>, creator: UserId) -> BTreeSet<UserId> {
	let mut members: BTreeSet<UserId> = requested.into_iter().collect();
	members.insert(creator);
	members
}

/// Ids in `ids` that do not resolve to a user. Empty means all are valid.
pub async fn validate_members(store: &dyn StoreBackend, ids: &BTreeSet<UserId>) -> StoreResult<BTreeSet<UserId>> {
	let found = store.existing_users(ids).await?;
	Ok(ids.difference(&found).copied().collect())
}
