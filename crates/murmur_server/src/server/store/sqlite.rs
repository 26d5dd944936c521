#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use murmur_domain::{Group, GroupId, Message, MessageId, Recipient, User, UserId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::{NewMessage, StoreBackend, StoreError, StoreResult};

type MessageRow = (i64, i64, Option<i64>, Option<i64>, String, i64, String);

/// Store backed by SQLite through sqlx, with embedded migrations.
#[derive(Clone)]
pub struct SqliteStore {
	pool: SqlitePool,
}

impl SqliteStore {
	pub async fn connect(database_url: &str) -> StoreResult<Self> {
		if !database_url.starts_with("sqlite:") {
			return Err(StoreError::UnsupportedUrl(database_url.to_string()));
		}

		let opts = SqliteConnectOptions::from_str(database_url)?
			.create_if_missing(true)
			.foreign_keys(true);

		let mut pool_opts = SqlitePoolOptions::new();
		if database_url.contains(":memory:") || database_url.contains("mode=memory") {
			// Each connection to `:memory:` is a separate database.
			pool_opts = pool_opts
				.max_connections(1)
				.min_connections(1)
				.idle_timeout(None)
				.max_lifetime(None);
		}

		let pool = pool_opts.connect_with(opts).await?;
		sqlx::migrate!("migrations/sqlite").run(&pool).await?;
		Ok(Self { pool })
	}

	async fn load_message(&self, id: MessageId) -> StoreResult<Option<Message>> {
		let row: Option<MessageRow> = sqlx::query_as(
			"SELECT id, sender, recipient_user, recipient_group, body, created_at, tags FROM messages WHERE id = ?",
		)
		.bind(id.get())
		.fetch_optional(&self.pool)
		.await?;
		row.map(message_from_row).transpose()
	}
}

fn message_from_row(row: MessageRow) -> StoreResult<Message> {
	let (id, sender, recipient_user, recipient_group, body, created_at, tags) = row;
	let recipient = match (recipient_user, recipient_group) {
		(Some(u), None) => Recipient::User(UserId(u)),
		(None, Some(g)) => Recipient::Group(GroupId(g)),
		_ => return Err(StoreError::Corrupt(format!("message {id} has no single recipient"))),
	};
	let tags: BTreeSet<String> =
		serde_json::from_str(&tags).map_err(|e| StoreError::Corrupt(format!("message {id} tags: {e}")))?;

	Ok(Message {
		id: MessageId(id),
		sender: UserId(sender),
		recipient,
		body,
		created_at,
		tags,
	})
}

fn tags_to_json(tags: &BTreeSet<String>) -> StoreResult<String> {
	serde_json::to_string(tags).map_err(|e| StoreError::Corrupt(format!("encode tags: {e}")))
}

async fn insert_members(
	tx: &mut sqlx::Transaction<'_, Sqlite>,
	group: GroupId,
	members: &BTreeSet<UserId>,
) -> StoreResult<()> {
	for member in members {
		sqlx::query("INSERT INTO chat_group_members (group_id, user_id) VALUES (?, ?)")
			.bind(group.get())
			.bind(member.get())
			.execute(&mut **tx)
			.await?;
	}
	Ok(())
}

#[async_trait::async_trait]
impl StoreBackend for SqliteStore {
	async fn get_or_create_user(&self, name: &str) -> StoreResult<(User, bool)> {
		let mut tx = self.pool.begin().await?;

		let created = sqlx::query("INSERT INTO users (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
			.bind(name)
			.execute(&mut *tx)
			.await?
			.rows_affected()
			== 1;

		let (id,): (i64,) = sqlx::query_as("SELECT id FROM users WHERE name = ?")
			.bind(name)
			.fetch_one(&mut *tx)
			.await?;

		tx.commit().await?;

		Ok((
			User {
				id: UserId(id),
				name: name.to_string(),
			},
			created,
		))
	}

	async fn users(&self) -> StoreResult<Vec<User>> {
		let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, name FROM users ORDER BY id")
			.fetch_all(&self.pool)
			.await?;
		Ok(rows
			.into_iter()
			.map(|(id, name)| User { id: UserId(id), name })
			.collect())
	}

	async fn user(&self, id: UserId) -> StoreResult<Option<User>> {
		let row: Option<(i64, String)> = sqlx::query_as("SELECT id, name FROM users WHERE id = ?")
			.bind(id.get())
			.fetch_optional(&self.pool)
			.await?;
		Ok(row.map(|(id, name)| User { id: UserId(id), name }))
	}

	async fn existing_users(&self, ids: &BTreeSet<UserId>) -> StoreResult<BTreeSet<UserId>> {
		if ids.is_empty() {
			return Ok(BTreeSet::new());
		}

		let mut qb = QueryBuilder::<Sqlite>::new("SELECT id FROM users WHERE id IN (");
		let mut separated = qb.separated(", ");
		for id in ids {
			separated.push_bind(id.get());
		}
		separated.push_unseparated(")");

		let rows: Vec<(i64,)> = qb.build_query_as().fetch_all(&self.pool).await?;
		Ok(rows.into_iter().map(|(id,)| UserId(id)).collect())
	}

	async fn groups(&self) -> StoreResult<Vec<Group>> {
		let groups: Vec<(i64, String)> = sqlx::query_as("SELECT id, name FROM chat_groups ORDER BY id")
			.fetch_all(&self.pool)
			.await?;
		let members: Vec<(i64, i64)> = sqlx::query_as("SELECT group_id, user_id FROM chat_group_members")
			.fetch_all(&self.pool)
			.await?;

		let mut by_id: BTreeMap<i64, Group> = groups
			.into_iter()
			.map(|(id, name)| {
				(
					id,
					Group {
						id: GroupId(id),
						name,
						members: BTreeSet::new(),
					},
				)
			})
			.collect();
		for (group_id, user_id) in members {
			if let Some(g) = by_id.get_mut(&group_id) {
				g.members.insert(UserId(user_id));
			}
		}
		Ok(by_id.into_values().collect())
	}

	async fn group(&self, id: GroupId) -> StoreResult<Option<Group>> {
		let Some((_, name)): Option<(i64, String)> = sqlx::query_as("SELECT id, name FROM chat_groups WHERE id = ?")
			.bind(id.get())
			.fetch_optional(&self.pool)
			.await?
		else {
			return Ok(None);
		};

		let members: Vec<(i64,)> = sqlx::query_as("SELECT user_id FROM chat_group_members WHERE group_id = ?")
			.bind(id.get())
			.fetch_all(&self.pool)
			.await?;

		Ok(Some(Group {
			id,
			name,
			members: members.into_iter().map(|(u,)| UserId(u)).collect(),
		}))
	}

	async fn insert_group(&self, name: &str, members: &BTreeSet<UserId>) -> StoreResult<Group> {
		let mut tx = self.pool.begin().await?;

		let id = sqlx::query("INSERT INTO chat_groups (name) VALUES (?)")
			.bind(name)
			.execute(&mut *tx)
			.await?
			.last_insert_rowid();
		let id = GroupId(id);
		insert_members(&mut tx, id, members).await?;

		tx.commit().await?;

		Ok(Group {
			id,
			name: name.to_string(),
			members: members.clone(),
		})
	}

	async fn update_group(&self, id: GroupId, name: &str, members: &BTreeSet<UserId>) -> StoreResult<Option<Group>> {
		let mut tx = self.pool.begin().await?;

		let updated = sqlx::query("UPDATE chat_groups SET name = ? WHERE id = ?")
			.bind(name)
			.bind(id.get())
			.execute(&mut *tx)
			.await?
			.rows_affected();
		if updated == 0 {
			return Ok(None);
		}

		sqlx::query("DELETE FROM chat_group_members WHERE group_id = ?")
			.bind(id.get())
			.execute(&mut *tx)
			.await?;
		insert_members(&mut tx, id, members).await?;

		tx.commit().await?;

		Ok(Some(Group {
			id,
			name: name.to_string(),
			members: members.clone(),
		}))
	}

	async fn delete_group(&self, id: GroupId) -> StoreResult<bool> {
		let mut tx = self.pool.begin().await?;

		sqlx::query("DELETE FROM messages WHERE recipient_group = ?")
			.bind(id.get())
			.execute(&mut *tx)
			.await?;
		sqlx::query("DELETE FROM chat_group_members WHERE group_id = ?")
			.bind(id.get())
			.execute(&mut *tx)
			.await?;
		let deleted = sqlx::query("DELETE FROM chat_groups WHERE id = ?")
			.bind(id.get())
			.execute(&mut *tx)
			.await?
			.rows_affected();

		tx.commit().await?;
		Ok(deleted > 0)
	}

	async fn insert_message(&self, new: NewMessage) -> StoreResult<Message> {
		let (recipient_user, recipient_group) = match new.recipient {
			Recipient::User(u) => (Some(u.get()), None),
			Recipient::Group(g) => (None, Some(g.get())),
		};

		let id = sqlx::query(
			"INSERT INTO messages (sender, recipient_user, recipient_group, body, created_at, tags) \
			VALUES (?, ?, ?, ?, ?, ?)",
		)
		.bind(new.sender.get())
		.bind(recipient_user)
		.bind(recipient_group)
		.bind(&new.body)
		.bind(new.created_at)
		.bind(tags_to_json(&new.tags)?)
		.execute(&self.pool)
		.await
		.map_err(|e| match &e {
			sqlx::Error::Database(db) if db.is_foreign_key_violation() => StoreError::MissingRecipient(new.recipient),
			_ => StoreError::from(e),
		})?
		.last_insert_rowid();

		Ok(Message {
			id: MessageId(id),
			sender: new.sender,
			recipient: new.recipient,
			body: new.body,
			created_at: new.created_at,
			tags: new.tags,
		})
	}

	async fn message(&self, id: MessageId) -> StoreResult<Option<Message>> {
		self.load_message(id).await
	}

	async fn update_message_body(&self, id: MessageId, body: &str) -> StoreResult<Option<Message>> {
		let updated = sqlx::query("UPDATE messages SET body = ? WHERE id = ?")
			.bind(body)
			.bind(id.get())
			.execute(&self.pool)
			.await?
			.rows_affected();
		if updated == 0 {
			return Ok(None);
		}
		self.load_message(id).await
	}

	async fn update_message_tags(&self, id: MessageId, tags: &BTreeSet<String>) -> StoreResult<Option<Message>> {
		let updated = sqlx::query("UPDATE messages SET tags = ? WHERE id = ?")
			.bind(tags_to_json(tags)?)
			.bind(id.get())
			.execute(&self.pool)
			.await?
			.rows_affected();
		if updated == 0 {
			return Ok(None);
		}
		self.load_message(id).await
	}

	async fn delete_message(&self, id: MessageId) -> StoreResult<bool> {
		let deleted = sqlx::query("DELETE FROM messages WHERE id = ?")
			.bind(id.get())
			.execute(&self.pool)
			.await?
			.rows_affected();
		Ok(deleted > 0)
	}

	async fn direct_messages(&self, a: UserId, b: UserId) -> StoreResult<Vec<Message>> {
		let rows: Vec<MessageRow> = sqlx::query_as(
			"SELECT id, sender, recipient_user, recipient_group, body, created_at, tags FROM messages \
			WHERE (sender = ? AND recipient_user = ?) OR (sender = ? AND recipient_user = ?) \
			ORDER BY created_at ASC, id ASC",
		)
		.bind(a.get())
		.bind(b.get())
		.bind(b.get())
		.bind(a.get())
		.fetch_all(&self.pool)
		.await?;
		rows.into_iter().map(message_from_row).collect()
	}

	async fn group_messages(&self, group: GroupId) -> StoreResult<Vec<Message>> {
		let rows: Vec<MessageRow> = sqlx::query_as(
			"SELECT id, sender, recipient_user, recipient_group, body, created_at, tags FROM messages \
			WHERE recipient_group = ? ORDER BY created_at ASC, id ASC",
		)
		.bind(group.get())
		.fetch_all(&self.pool)
		.await?;
		rows.into_iter().map(message_from_row).collect()
	}
}
