//! PostgreSQL implementations of the storage collaborators.
//!
//! Queries are checked at runtime (`query_as` + `FromRow`) so the crate builds
//! without a live database. The schema lives under `db/schema`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{Chat, Message, MessageStatus, PublicUser, Timestamp, is_empty_body};
use sqlx::{FromRow, PgPool, types::Json};
use tracing::{instrument, warn};
use uuid::Uuid;

use super::{
    ChatStore, MessageStore, NewUser, StoreError, StoreResult, User, UserStore,
    dedupe_participants,
};

macro_rules! select_messages {
    ($tail:literal) => {
        concat!(
            "SELECT m.id, m.chat_id, m.sender_id, m.content, m.status, m.created_at, ",
            "m.updated_at, m.deleted_at, m.attachment_url, ",
            "u.username AS sender_username, u.email AS sender_email, ",
            "u.created_at AS sender_created_at, u.updated_at AS sender_updated_at ",
            "FROM messages m LEFT JOIN users u ON u.id = m.sender_id ",
            $tail
        )
    };
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    hashed_password: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.hashed_password,
            created_at: row.created_at.into(),
            updated_at: row.updated_at.into(),
        }
    }
}

#[derive(FromRow)]
struct PublicUserRow {
    id: Uuid,
    username: String,
    email: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PublicUserRow> for PublicUser {
    fn from(row: PublicUserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            created_at: row.created_at.into(),
            updated_at: row.updated_at.into(),
        }
    }
}

#[derive(FromRow)]
struct ChatRow {
    id: Uuid,
    name: String,
    is_group: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ChatRow {
    fn into_chat(self, other_participants: Vec<PublicUser>) -> Chat {
        Chat {
            id: self.id,
            name: self.name,
            is_group: self.is_group,
            created_at: self.created_at.into(),
            updated_at: self.updated_at.into(),
            other_participants,
            last_message: None,
            unread_count: 0,
            last_read_at: None,
        }
    }
}

#[derive(FromRow)]
struct UserChatRow {
    id: Uuid,
    name: String,
    is_group: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_read_at: Option<DateTime<Utc>>,
    unread_count: i64,
    other_participants: Json<Vec<PublicUser>>,
    last_message_id: Option<Uuid>,
}

#[derive(FromRow)]
struct MessageRow {
    id: Uuid,
    chat_id: Uuid,
    sender_id: Uuid,
    content: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
    attachment_url: Option<String>,
    sender_username: Option<String>,
    sender_email: Option<String>,
    sender_created_at: Option<DateTime<Utc>>,
    sender_updated_at: Option<DateTime<Utc>>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        let status = row.status.parse().unwrap_or_else(|_| {
            warn!(message_id = %row.id, status = %row.status, "unknown stored message status");
            MessageStatus::default()
        });

        let sender = match (
            row.sender_username,
            row.sender_email,
            row.sender_created_at,
            row.sender_updated_at,
        ) {
            (Some(username), Some(email), Some(created_at), Some(updated_at)) => PublicUser {
                id: row.sender_id,
                username,
                email,
                created_at: created_at.into(),
                updated_at: updated_at.into(),
            },
            _ => PublicUser::unknown(row.sender_id),
        };

        let mut message = Self {
            id: row.id,
            chat_id: row.chat_id,
            sender_id: row.sender_id,
            content: row.content,
            timestamp: row.created_at.into(),
            updated_at: row.updated_at.into(),
            status,
            attachment_url: row.attachment_url,
            deleted_at: row.deleted_at.map(Timestamp::from),
            is_deleted: false,
            is_edited: false,
            sender: Some(sender),
        };
        message.normalize();
        message
    }
}

fn map_user_insert_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            match db_err.constraint() {
                Some("users_email_key") => return StoreError::EmailExists,
                Some("users_username_key") => return StoreError::UsernameExists,
                _ => {}
            }
        }
    }
    StoreError::Database(err)
}

/// Users table access.
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    #[instrument(skip(self, user), fields(username = %user.username), err)]
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let row: UserRow = sqlx::query_as(
            r"
            INSERT INTO users (username, email, hashed_password)
            VALUES ($1, $2, $3)
            RETURNING id, username, email, hashed_password, created_at, updated_at
            ",
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(map_user_insert_error)?;

        Ok(row.into())
    }

    #[instrument(skip(self), err)]
    async fn get_user_by_email(&self, email: &str) -> StoreResult<User> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, username, email, hashed_password, created_at, updated_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::from).ok_or(StoreError::UserNotFound)
    }

    #[instrument(skip(self), err)]
    async fn get_user_by_id(&self, id: Uuid) -> StoreResult<User> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, username, email, hashed_password, created_at, updated_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::from).ok_or(StoreError::UserNotFound)
    }

    #[instrument(skip(self), err)]
    async fn search_users(&self, query: &str, limit: i64) -> StoreResult<Vec<PublicUser>> {
        let pattern = format!("%{}%", query.trim().to_lowercase());
        let rows: Vec<PublicUserRow> = sqlx::query_as(
            r"
            SELECT id, username, email, created_at, updated_at
            FROM users
            WHERE LOWER(username) LIKE $1 OR LOWER(email) LIKE $1
            ORDER BY username ASC
            LIMIT $2
            ",
        )
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PublicUser::from).collect())
    }
}

/// Chats and membership access.
#[derive(Clone)]
pub struct PgChatStore {
    pool: PgPool,
}

impl PgChatStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn participants(&self, chat_id: Uuid) -> StoreResult<Vec<PublicUser>> {
        let rows: Vec<PublicUserRow> = sqlx::query_as(
            r"
            SELECT u.id, u.username, u.email, u.created_at, u.updated_at
            FROM users u
            JOIN chat_participants cp ON cp.user_id = u.id
            WHERE cp.chat_id = $1
            ",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PublicUser::from).collect())
    }
}

#[async_trait]
impl ChatStore for PgChatStore {
    #[instrument(skip(self, participants), fields(count = participants.len()), err)]
    async fn create_chat(
        &self,
        name: &str,
        is_group: bool,
        participants: &[Uuid],
    ) -> StoreResult<Chat> {
        let members = dedupe_participants(participants);
        if members.is_empty() {
            return Err(StoreError::Validation(
                "at least one participant is required to create a chat".into(),
            ));
        }
        let is_group = is_group || members.len() > 2;

        // Same clock as message timestamps, so unread counts compare like with like.
        let now = Timestamp::now().0;
        let mut transaction = self.pool.begin().await?;
        let row: ChatRow = sqlx::query_as(
            r"
            INSERT INTO chats (name, is_group, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            RETURNING id, name, is_group, created_at, updated_at
            ",
        )
        .bind(name)
        .bind(is_group)
        .bind(now)
        .fetch_one(&mut *transaction)
        .await?;

        for user_id in &members {
            sqlx::query(
                r"
                INSERT INTO chat_participants (chat_id, user_id, created_at, last_read_at)
                VALUES ($1, $2, $3, $3)
                ON CONFLICT (chat_id, user_id) DO NOTHING
                ",
            )
            .bind(row.id)
            .bind(user_id)
            .bind(now)
            .execute(&mut *transaction)
            .await?;
        }
        transaction.commit().await?;

        let participants = self.participants(row.id).await?;
        Ok(row.into_chat(participants))
    }

    #[instrument(skip(self), err)]
    async fn get_chat_by_id(&self, chat_id: Uuid) -> StoreResult<Chat> {
        let row: Option<ChatRow> = sqlx::query_as(
            "SELECT id, name, is_group, created_at, updated_at FROM chats WHERE id = $1",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or(StoreError::ChatNotFound)?;
        let participants = self.participants(chat_id).await?;
        Ok(row.into_chat(participants))
    }

    #[instrument(skip(self), err)]
    async fn get_chat_by_participant_ids(&self, a: Uuid, b: Uuid) -> StoreResult<Chat> {
        let row: Option<ChatRow> = sqlx::query_as(
            r"
            SELECT c.id, c.name, c.is_group, c.created_at, c.updated_at
            FROM chats c
            WHERE c.is_group = FALSE
              AND EXISTS (SELECT 1 FROM chat_participants cp WHERE cp.chat_id = c.id AND cp.user_id = $1)
              AND EXISTS (SELECT 1 FROM chat_participants cp WHERE cp.chat_id = c.id AND cp.user_id = $2)
              AND (SELECT COUNT(*) FROM chat_participants cp WHERE cp.chat_id = c.id) = 2
            LIMIT 1
            ",
        )
        .bind(a)
        .bind(b)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or(StoreError::ChatNotFound)?;
        let participants = self.participants(row.id).await?;
        Ok(row.into_chat(participants))
    }

    #[instrument(skip(self), err)]
    async fn get_user_chats(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Chat>> {
        let rows: Vec<UserChatRow> = sqlx::query_as(
            r"
            WITH mine AS (
                SELECT chat_id, last_read_at FROM chat_participants WHERE user_id = $1
            ),
            last_messages AS (
                SELECT DISTINCT ON (m.chat_id) m.chat_id, m.id, m.created_at
                FROM messages m
                JOIN mine ON mine.chat_id = m.chat_id
                ORDER BY m.chat_id, m.created_at DESC
            )
            SELECT
                c.id, c.name, c.is_group, c.created_at, c.updated_at,
                mine.last_read_at,
                (
                    SELECT COUNT(*) FROM messages m
                    WHERE m.chat_id = c.id
                      AND m.sender_id <> $1
                      AND m.deleted_at IS NULL
                      AND m.created_at > COALESCE(mine.last_read_at, 'epoch'::timestamptz)
                ) AS unread_count,
                COALESCE((
                    SELECT jsonb_agg(jsonb_build_object(
                        'id', u.id,
                        'username', u.username,
                        'email', u.email,
                        'createdAt', u.created_at,
                        'updatedAt', u.updated_at
                    ))
                    FROM chat_participants cp
                    JOIN users u ON u.id = cp.user_id
                    WHERE cp.chat_id = c.id AND cp.user_id <> $1
                ), '[]'::jsonb) AS other_participants,
                lm.id AS last_message_id
            FROM chats c
            JOIN mine ON mine.chat_id = c.id
            LEFT JOIN last_messages lm ON lm.chat_id = c.id
            ORDER BY lm.created_at DESC NULLS LAST, c.updated_at DESC
            LIMIT $2 OFFSET $3
            ",
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let last_ids: Vec<Uuid> = rows.iter().filter_map(|row| row.last_message_id).collect();
        let last_messages: Vec<Message> = if last_ids.is_empty() {
            Vec::new()
        } else {
            sqlx::query_as::<_, MessageRow>(select_messages!("WHERE m.id = ANY($1)"))
                .bind(&last_ids)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .map(Message::from)
                .collect()
        };

        Ok(rows
            .into_iter()
            .map(|row| Chat {
                id: row.id,
                name: row.name,
                is_group: row.is_group,
                created_at: row.created_at.into(),
                updated_at: row.updated_at.into(),
                other_participants: row.other_participants.0,
                last_message: row.last_message_id.and_then(|id| {
                    last_messages.iter().find(|message| message.id == id).cloned()
                }),
                unread_count: row.unread_count,
                last_read_at: row.last_read_at.map(Timestamp::from),
            })
            .collect())
    }

    #[instrument(skip(self), err)]
    async fn add_user_to_chat(&self, chat_id: Uuid, user_id: Uuid) -> StoreResult<()> {
        let now = Timestamp::now().0;
        let mut transaction = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE chats SET is_group = TRUE, updated_at = $2 WHERE id = $1",
        )
        .bind(chat_id)
        .bind(now)
        .execute(&mut *transaction)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::ChatNotFound);
        }

        sqlx::query(
            r"
            INSERT INTO chat_participants (chat_id, user_id, created_at, last_read_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (chat_id, user_id) DO NOTHING
            ",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(now)
        .execute(&mut *transaction)
        .await?;

        transaction.commit().await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn remove_user_from_chat(&self, chat_id: Uuid, user_id: Uuid) -> StoreResult<()> {
        let mut transaction = self.pool.begin().await?;
        sqlx::query("DELETE FROM chat_participants WHERE chat_id = $1 AND user_id = $2")
            .bind(chat_id)
            .bind(user_id)
            .execute(&mut *transaction)
            .await?;
        let updated = sqlx::query("UPDATE chats SET updated_at = NOW() WHERE id = $1")
            .bind(chat_id)
            .execute(&mut *transaction)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::ChatNotFound);
        }
        transaction.commit().await?;
        Ok(())
    }

    async fn get_all_participants_in_chat(&self, chat_id: Uuid) -> StoreResult<Vec<PublicUser>> {
        self.participants(chat_id).await
    }

    #[instrument(skip(self), err)]
    async fn update_chat_name(&self, chat_id: Uuid, name: &str) -> StoreResult<Chat> {
        let row: Option<ChatRow> = sqlx::query_as(
            r"
            UPDATE chats
            SET name = $1,
                is_group = CASE WHEN $1 <> '' THEN TRUE ELSE is_group END,
                updated_at = NOW()
            WHERE id = $2
            RETURNING id, name, is_group, created_at, updated_at
            ",
        )
        .bind(name)
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or(StoreError::ChatNotFound)?;
        let participants = self.participants(chat_id).await?;
        Ok(row.into_chat(participants))
    }

    #[instrument(skip(self), err)]
    async fn update_participant_read_through(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
        read_through: Timestamp,
    ) -> StoreResult<()> {
        let updated = sqlx::query(
            r"
            UPDATE chat_participants
            SET last_read_at = GREATEST(COALESCE(last_read_at, 'epoch'::timestamptz), $3)
            WHERE chat_id = $1 AND user_id = $2
            ",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(read_through.0)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::ParticipantNotFound);
        }

        sqlx::query("UPDATE chats SET updated_at = GREATEST(updated_at, NOW()) WHERE id = $1")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Messages table access.
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    #[instrument(skip(self, message), fields(message_id = %message.id, chat_id = %message.chat_id), err)]
    async fn create_message(&self, message: &Message) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO messages (id, chat_id, sender_id, content, status, attachment_url, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(message.id)
        .bind(message.chat_id)
        .bind(message.sender_id)
        .bind(&message.content)
        .bind(message.status.as_str())
        .bind(message.attachment_url.as_deref())
        .bind(message.timestamp.0)
        .bind(message.updated_at.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get_messages_by_chat_id(
        &self,
        chat_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(select_messages!(
            "WHERE m.chat_id = $1 ORDER BY m.created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(chat_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Message::from).collect())
    }

    #[instrument(skip(self), err)]
    async fn get_message_by_id(&self, message_id: Uuid) -> StoreResult<Message> {
        let row: Option<MessageRow> = sqlx::query_as(select_messages!("WHERE m.id = $1"))
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Message::from).ok_or(StoreError::MessageNotFound)
    }

    #[instrument(skip(self), err)]
    async fn update_message_status(
        &self,
        message_id: Uuid,
        status: MessageStatus,
    ) -> StoreResult<()> {
        let updated = sqlx::query("UPDATE messages SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::MessageNotFound);
        }
        Ok(())
    }

    #[instrument(skip(self, content), err)]
    async fn update_message_content(
        &self,
        message_id: Uuid,
        author_id: Uuid,
        content: &str,
        attachment_url: Option<&str>,
    ) -> StoreResult<Message> {
        if is_empty_body(content, attachment_url) {
            return Err(StoreError::Validation(
                "message must contain content or an attachment".into(),
            ));
        }

        let updated: Option<Uuid> = sqlx::query_scalar(
            r"
            UPDATE messages
            SET content = $1, attachment_url = $2, updated_at = GREATEST(NOW(), created_at)
            WHERE id = $3 AND sender_id = $4 AND deleted_at IS NULL
            RETURNING id
            ",
        )
        .bind(content)
        .bind(attachment_url)
        .bind(message_id)
        .bind(author_id)
        .fetch_optional(&self.pool)
        .await?;

        let id = updated.ok_or(StoreError::MessageNotFound)?;
        self.get_message_by_id(id).await
    }

    #[instrument(skip(self), err)]
    async fn soft_delete_message(&self, message_id: Uuid, author_id: Uuid) -> StoreResult<Message> {
        let deleted: Option<Uuid> = sqlx::query_scalar(
            r"
            UPDATE messages
            SET deleted_at = NOW(), updated_at = NOW(), content = '', attachment_url = NULL
            WHERE id = $1 AND sender_id = $2 AND deleted_at IS NULL
            RETURNING id
            ",
        )
        .bind(message_id)
        .bind(author_id)
        .fetch_optional(&self.pool)
        .await?;

        let id = deleted.ok_or(StoreError::MessageNotFound)?;
        self.get_message_by_id(id).await
    }

    #[instrument(skip(self), err)]
    async fn get_unread_message_count_for_user_in_chat(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*)
            FROM messages m
            JOIN chat_participants cp ON cp.chat_id = m.chat_id AND cp.user_id = $2
            WHERE m.chat_id = $1
              AND m.sender_id <> $2
              AND m.deleted_at IS NULL
              AND m.created_at > COALESCE(cp.last_read_at, 'epoch'::timestamptz)
            ",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
