#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use murmur_domain::{GroupId, MessageId, Recipient, UserId};

use super::{InMemoryStore, NewMessage, SharedStore, SqliteStore, StoreError, open_store};

async fn backends() -> Vec<(&'static str, SharedStore)> {
	let sqlite = SqliteStore::connect("sqlite::memory:").await.expect("sqlite in-memory");
	vec![
		("memory", Arc::new(InMemoryStore::default()) as SharedStore),
		("sqlite", Arc::new(sqlite) as SharedStore),
	]
}

fn members(ids: &[i64]) -> BTreeSet<UserId> {
	ids.iter().copied().map(UserId).collect()
}

fn new_message(sender: UserId, recipient: Recipient, body: &str, created_at: i64) -> NewMessage {
	NewMessage {
		sender,
		recipient,
		body: body.to_string(),
		created_at,
		tags: BTreeSet::new(),
	}
}

#[tokio::test]
async fn get_or_create_user_is_idempotent() {
	for (label, store) in backends().await {
		let (alice, created) = store.get_or_create_user("alice").await.unwrap();
		assert!(created, "{label}: first claim creates");
		let (again, created) = store.get_or_create_user("alice").await.unwrap();
		assert!(!created, "{label}: second claim reuses");
		assert_eq!(alice, again, "{label}");

		let (bob, _) = store.get_or_create_user("bob").await.unwrap();
		assert_ne!(alice.id, bob.id, "{label}");
		assert_eq!(store.users().await.unwrap().len(), 2, "{label}");
		assert_eq!(store.user(bob.id).await.unwrap(), Some(bob), "{label}");
		assert_eq!(store.user(UserId(999)).await.unwrap(), None, "{label}");
	}
}

#[tokio::test]
async fn concurrent_claims_of_one_name_create_one_user() {
	for (label, store) in backends().await {
		let mut tasks = Vec::new();
		for _ in 0..8 {
			let store = store.clone();
			tasks.push(tokio::spawn(async move { store.get_or_create_user("carol").await }));
		}

		let mut created = 0;
		let mut ids = BTreeSet::new();
		for t in tasks {
			let (user, was_created) = t.await.unwrap().unwrap();
			ids.insert(user.id);
			if was_created {
				created += 1;
			}
		}
		assert_eq!(created, 1, "{label}: exactly one creator");
		assert_eq!(ids.len(), 1, "{label}: every caller sees the same id");
	}
}

#[tokio::test]
async fn existing_users_filters_unknown_ids() {
	for (label, store) in backends().await {
		let (a, _) = store.get_or_create_user("a").await.unwrap();
		let (b, _) = store.get_or_create_user("b").await.unwrap();

		let asked = [a.id, b.id, UserId(404)].into_iter().collect();
		let found = store.existing_users(&asked).await.unwrap();
		assert_eq!(found, [a.id, b.id].into_iter().collect(), "{label}");
		assert!(store.existing_users(&BTreeSet::new()).await.unwrap().is_empty(), "{label}");
	}
}

#[tokio::test]
async fn group_lifecycle_replaces_members_and_cascades_messages() {
	for (label, store) in backends().await {
		let (a, _) = store.get_or_create_user("a").await.unwrap();
		let (b, _) = store.get_or_create_user("b").await.unwrap();
		let (c, _) = store.get_or_create_user("c").await.unwrap();

		let group = store.insert_group("team", &members(&[a.id.get(), b.id.get()])).await.unwrap();
		assert_eq!(store.group(group.id).await.unwrap().as_ref(), Some(&group), "{label}");

		let edited = store
			.update_group(group.id, "crew", &members(&[b.id.get(), c.id.get()]))
			.await
			.unwrap()
			.expect("group exists");
		assert_eq!(edited.name, "crew", "{label}");
		assert_eq!(edited.members, members(&[b.id.get(), c.id.get()]), "{label}");
		assert_eq!(store.groups().await.unwrap(), vec![edited.clone()], "{label}");

		let in_group = store
			.insert_message(new_message(b.id, Recipient::Group(group.id), "hi crew", 10))
			.await
			.unwrap();
		let direct = store
			.insert_message(new_message(a.id, Recipient::User(b.id), "hi b", 11))
			.await
			.unwrap();

		assert!(store.delete_group(group.id).await.unwrap(), "{label}");
		assert!(!store.delete_group(group.id).await.unwrap(), "{label}: second delete is a no-op");
		assert_eq!(store.group(group.id).await.unwrap(), None, "{label}");
		assert_eq!(store.message(in_group.id).await.unwrap(), None, "{label}: group message cascaded");
		assert_eq!(store.message(direct.id).await.unwrap(), Some(direct), "{label}: direct message kept");
		assert!(
			store.update_group(GroupId(404), "x", &BTreeSet::new()).await.unwrap().is_none(),
			"{label}"
		);
	}
}

#[tokio::test]
async fn messages_to_missing_recipients_are_refused() {
	for (label, store) in backends().await {
		let (a, _) = store.get_or_create_user("a").await.unwrap();
		let group = store.insert_group("team", &members(&[a.id.get()])).await.unwrap();
		assert!(store.delete_group(group.id).await.unwrap(), "{label}");

		for recipient in [Recipient::Group(group.id), Recipient::User(UserId(404))] {
			let err = store
				.insert_message(new_message(a.id, recipient, "into the void", 1))
				.await
				.expect_err("missing recipient");
			assert!(
				matches!(err, StoreError::MissingRecipient(r) if r == recipient),
				"{label}: {err}"
			);
		}
		assert!(store.group_messages(group.id).await.unwrap().is_empty(), "{label}");
	}
}

#[tokio::test]
async fn conversations_are_ordered_and_scoped() {
	for (label, store) in backends().await {
		let (a, _) = store.get_or_create_user("a").await.unwrap();
		let (b, _) = store.get_or_create_user("b").await.unwrap();
		let (c, _) = store.get_or_create_user("c").await.unwrap();

		let late = store
			.insert_message(new_message(a.id, Recipient::User(b.id), "late", 30))
			.await
			.unwrap();
		let early = store
			.insert_message(new_message(b.id, Recipient::User(a.id), "early", 10))
			.await
			.unwrap();
		let tie = store
			.insert_message(new_message(a.id, Recipient::User(b.id), "tie", 30))
			.await
			.unwrap();
		store
			.insert_message(new_message(a.id, Recipient::User(c.id), "other", 20))
			.await
			.unwrap();

		let ab: Vec<MessageId> = store.direct_messages(a.id, b.id).await.unwrap().iter().map(|m| m.id).collect();
		assert_eq!(ab, vec![early.id, late.id, tie.id], "{label}");

		let ba: Vec<MessageId> = store.direct_messages(b.id, a.id).await.unwrap().iter().map(|m| m.id).collect();
		assert_eq!(ab, ba, "{label}: symmetric");
		assert!(store.direct_messages(b.id, c.id).await.unwrap().is_empty(), "{label}");
	}
}

#[tokio::test]
async fn message_edits_and_deletes() {
	for (label, store) in backends().await {
		let (a, _) = store.get_or_create_user("a").await.unwrap();
		let msg = store
			.insert_message(new_message(a.id, Recipient::User(a.id), "draft", 1))
			.await
			.unwrap();

		let edited = store.update_message_body(msg.id, "final").await.unwrap().unwrap();
		assert_eq!(edited.body, "final", "{label}");

		let tags: BTreeSet<String> = ["todo", "work"].into_iter().map(String::from).collect();
		let tagged = store.update_message_tags(msg.id, &tags).await.unwrap().unwrap();
		assert_eq!(tagged.tags, tags, "{label}");
		assert_eq!(tagged.body, "final", "{label}");
		assert_eq!(store.message(msg.id).await.unwrap(), Some(tagged), "{label}");

		assert!(store.delete_message(msg.id).await.unwrap(), "{label}");
		assert!(!store.delete_message(msg.id).await.unwrap(), "{label}");
		assert!(store.update_message_body(msg.id, "gone").await.unwrap().is_none(), "{label}");
		assert!(store.update_message_tags(msg.id, &tags).await.unwrap().is_none(), "{label}");
	}
}

#[tokio::test]
async fn sqlite_file_store_survives_reopen() {
	let dir = tempfile::tempdir().expect("tempdir");
	let url = format!("sqlite://{}", dir.path().join("murmur.db").display());

	let (user_id, group_id) = {
		let store = open_store(Some(&url)).await.expect("open");
		let (u, _) = store.get_or_create_user("dana").await.unwrap();
		let g = store.insert_group("ops", &members(&[u.id.get()])).await.unwrap();
		store
			.insert_message(NewMessage {
				tags: ["pinned".to_string()].into_iter().collect(),
				..new_message(u.id, Recipient::Group(g.id), "persisted", 5)
			})
			.await
			.unwrap();
		(u.id, g.id)
	};

	let store = open_store(Some(&url)).await.expect("reopen");
	let (again, created) = store.get_or_create_user("dana").await.unwrap();
	assert!(!created);
	assert_eq!(again.id, user_id);

	let msgs = store.group_messages(group_id).await.unwrap();
	assert_eq!(msgs.len(), 1);
	assert_eq!(msgs[0].body, "persisted");
	assert!(msgs[0].tags.contains("pinned"));
}

#[tokio::test]
async fn non_sqlite_urls_are_rejected() {
	let err = open_store(Some("postgres://localhost/murmur")).await.err().expect("rejected");
	assert!(matches!(err, StoreError::UnsupportedUrl(_)));
}
