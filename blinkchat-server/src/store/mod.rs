//! Storage collaborators for users, chats and messages.
//!
//! The broker and the HTTP handlers only ever see the traits below, shared as
//! `Arc<dyn ...>` through [`Stores`]. Two implementations exist: an in-process
//! [`memory::MemoryStore`] and the PostgreSQL stores in [`postgres`].

use std::sync::Arc;

use async_trait::async_trait;
use shared::models::{Chat, Message, MessageStatus, PublicUser, Timestamp};
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

/// Errors surfaced by every storage implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("chat not found")]
    ChatNotFound,
    #[error("chat participant not found")]
    ParticipantNotFound,
    #[error("message not found")]
    MessageNotFound,
    #[error("user not found")]
    UserNotFound,
    #[error("email already exists")]
    EmailExists,
    #[error("username already exists")]
    UsernameExists,
    #[error("{0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Server-side account record. Carries the password hash and is never
/// serialized; convert with [`User::to_public`] before it leaves the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl User {
    #[must_use]
    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Fields required to create an account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;

    async fn get_user_by_email(&self, email: &str) -> StoreResult<User>;

    async fn get_user_by_id(&self, id: Uuid) -> StoreResult<User>;

    /// Case-insensitive substring match over username and email, ordered by
    /// username.
    async fn search_users(&self, query: &str, limit: i64) -> StoreResult<Vec<PublicUser>>;
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Create a chat with the given members. Duplicate ids are collapsed and
    /// more than two distinct members always yields a group. Every member's
    /// watermark starts at creation time.
    async fn create_chat(
        &self,
        name: &str,
        is_group: bool,
        participants: &[Uuid],
    ) -> StoreResult<Chat>;

    /// Chat metadata with `other_participants` holding every member.
    async fn get_chat_by_id(&self, chat_id: Uuid) -> StoreResult<Chat>;

    /// The non-group chat whose only two members are `a` and `b`.
    async fn get_chat_by_participant_ids(&self, a: Uuid, b: Uuid) -> StoreResult<Chat>;

    /// Chats of `user_id` as that user sees them, most recently active first.
    async fn get_user_chats(&self, user_id: Uuid, limit: i64, offset: i64)
    -> StoreResult<Vec<Chat>>;

    /// Idempotent. Adding a member always turns the chat into a group.
    async fn add_user_to_chat(&self, chat_id: Uuid, user_id: Uuid) -> StoreResult<()>;

    async fn remove_user_from_chat(&self, chat_id: Uuid, user_id: Uuid) -> StoreResult<()>;

    /// Every member, in no particular order. Unknown chats have no members.
    async fn get_all_participants_in_chat(&self, chat_id: Uuid) -> StoreResult<Vec<PublicUser>>;

    async fn update_chat_name(&self, chat_id: Uuid, name: &str) -> StoreResult<Chat>;

    /// Advance the member's watermark. The later of the stored and requested
    /// values wins.
    async fn update_participant_read_through(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
        read_through: Timestamp,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create_message(&self, message: &Message) -> StoreResult<()>;

    /// Newest first, sender attached.
    async fn get_messages_by_chat_id(
        &self,
        chat_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Message>>;

    async fn get_message_by_id(&self, message_id: Uuid) -> StoreResult<Message>;

    async fn update_message_status(&self, message_id: Uuid, status: MessageStatus)
    -> StoreResult<()>;

    /// Only the author may edit, and never after deletion.
    async fn update_message_content(
        &self,
        message_id: Uuid,
        author_id: Uuid,
        content: &str,
        attachment_url: Option<&str>,
    ) -> StoreResult<Message>;

    /// Only the author may delete. The record stays with its content cleared.
    async fn soft_delete_message(&self, message_id: Uuid, author_id: Uuid) -> StoreResult<Message>;

    /// Messages from others, not deleted, newer than the user's watermark.
    async fn get_unread_message_count_for_user_in_chat(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<i64>;
}

/// The three collaborators bundled for sharing.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub chats: Arc<dyn ChatStore>,
    pub messages: Arc<dyn MessageStore>,
}

impl Stores {
    /// Backed by one shared [`memory::MemoryStore`].
    #[must_use]
    pub fn in_memory() -> Self {
        let store = Arc::new(memory::MemoryStore::new());
        Self {
            users: store.clone(),
            chats: store.clone(),
            messages: store,
        }
    }

    /// Backed by PostgreSQL.
    #[must_use]
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self {
            users: Arc::new(postgres::PgUserStore::new(pool.clone())),
            chats: Arc::new(postgres::PgChatStore::new(pool.clone())),
            messages: Arc::new(postgres::PgMessageStore::new(pool)),
        }
    }
}

/// Drop empty ids and duplicates while keeping first-seen order.
pub(crate) fn dedupe_participants(participants: &[Uuid]) -> Vec<Uuid> {
    let mut ordered = Vec::with_capacity(participants.len());
    for id in participants {
        if !id.is_nil() && !ordered.contains(id) {
            ordered.push(*id);
        }
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_keeps_first_seen_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let ids = dedupe_participants(&[a, b, a, Uuid::nil(), b]);
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn public_projection_drops_password_hash() {
        let now = Timestamp::now();
        let user = User {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            password_hash: "$argon2id$...".into(),
            created_at: now,
            updated_at: now,
        };
        let public = user.to_public();
        assert_eq!(public.username, "alice");
        let json = serde_json::to_string(&public).unwrap();
        assert!(!json.contains("argon2"));
    }
}
