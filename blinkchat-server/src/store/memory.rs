use std::{cmp::Reverse, collections::HashMap};

use async_trait::async_trait;
use shared::models::{Chat, Message, MessageStatus, PublicUser, Timestamp, is_empty_body};
use tokio::sync::RwLock;
use tracing::instrument;
use uuid::Uuid;

use super::{
    ChatStore, MessageStore, NewUser, StoreError, StoreResult, User, UserStore,
    dedupe_participants,
};

#[derive(Debug, Clone)]
struct Member {
    user_id: Uuid,
    last_read_at: Option<Timestamp>,
}

#[derive(Debug, Clone)]
struct ChatRecord {
    id: Uuid,
    name: String,
    is_group: bool,
    created_at: Timestamp,
    updated_at: Timestamp,
    members: Vec<Member>,
}

impl ChatRecord {
    fn has_member(&self, user_id: Uuid) -> bool {
        self.members.iter().any(|member| member.user_id == user_id)
    }

    fn to_chat(&self, other_participants: Vec<PublicUser>) -> Chat {
        Chat {
            id: self.id,
            name: self.name.clone(),
            is_group: self.is_group,
            created_at: self.created_at,
            updated_at: self.updated_at,
            other_participants,
            last_message: None,
            unread_count: 0,
            last_read_at: None,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    users: HashMap<Uuid, User>,
    chats: HashMap<Uuid, ChatRecord>,
    messages: HashMap<Uuid, Message>,
}

impl State {
    fn public_user(&self, id: Uuid) -> PublicUser {
        self.users
            .get(&id)
            .map_or_else(|| PublicUser::unknown(id), User::to_public)
    }

    fn participants(&self, chat: &ChatRecord) -> Vec<PublicUser> {
        chat.members
            .iter()
            .map(|member| self.public_user(member.user_id))
            .collect()
    }

    fn hydrate(&self, message: &Message) -> Message {
        let mut copy = message.clone();
        copy.sender = Some(self.public_user(message.sender_id));
        copy.normalize();
        copy
    }

    fn unread_count(&self, chat: &ChatRecord, user_id: Uuid) -> i64 {
        let watermark = chat
            .members
            .iter()
            .find(|member| member.user_id == user_id)
            .and_then(|member| member.last_read_at);

        let count = self
            .messages
            .values()
            .filter(|message| message.chat_id == chat.id)
            .filter(|message| message.sender_id != user_id && message.deleted_at.is_none())
            .filter(|message| watermark.is_none_or(|mark| message.timestamp > mark))
            .count();
        i64::try_from(count).unwrap_or(i64::MAX)
    }

    fn last_message(&self, chat_id: Uuid) -> Option<Message> {
        self.messages
            .values()
            .filter(|message| message.chat_id == chat_id)
            .max_by_key(|message| message.timestamp)
            .map(|message| self.hydrate(message))
    }
}

/// Process-local storage for every collaborator trait.
///
/// All state sits behind one lock so multi-step operations such as chat
/// creation are atomic with respect to each other.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn page<T>(items: Vec<T>, limit: i64, offset: i64) -> Vec<T> {
    let skip = usize::try_from(offset.max(0)).unwrap_or(usize::MAX);
    let take = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
    items.into_iter().skip(skip).take(take).collect()
}

#[async_trait]
impl UserStore for MemoryStore {
    #[instrument(skip(self, user), fields(username = %user.username), err)]
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let mut state = self.state.write().await;
        if state.users.values().any(|existing| existing.email == user.email) {
            return Err(StoreError::EmailExists);
        }
        if state
            .users
            .values()
            .any(|existing| existing.username == user.username)
        {
            return Err(StoreError::UsernameExists);
        }

        let now = Timestamp::now();
        let record = User {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<User> {
        let state = self.state.read().await;
        state
            .users
            .values()
            .find(|user| user.email == email)
            .cloned()
            .ok_or(StoreError::UserNotFound)
    }

    async fn get_user_by_id(&self, id: Uuid) -> StoreResult<User> {
        let state = self.state.read().await;
        state.users.get(&id).cloned().ok_or(StoreError::UserNotFound)
    }

    async fn search_users(&self, query: &str, limit: i64) -> StoreResult<Vec<PublicUser>> {
        let needle = query.trim().to_lowercase();
        let state = self.state.read().await;
        let mut matches: Vec<PublicUser> = state
            .users
            .values()
            .filter(|user| {
                user.username.to_lowercase().contains(&needle)
                    || user.email.to_lowercase().contains(&needle)
            })
            .map(User::to_public)
            .collect();
        matches.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(page(matches, limit, 0))
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
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

        let now = Timestamp::now();
        let record = ChatRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            is_group: is_group || members.len() > 2,
            created_at: now,
            updated_at: now,
            members: members
                .into_iter()
                .map(|user_id| Member {
                    user_id,
                    last_read_at: Some(now),
                })
                .collect(),
        };

        let mut state = self.state.write().await;
        let chat = record.to_chat(state.participants(&record));
        state.chats.insert(record.id, record);
        Ok(chat)
    }

    async fn get_chat_by_id(&self, chat_id: Uuid) -> StoreResult<Chat> {
        let state = self.state.read().await;
        let record = state.chats.get(&chat_id).ok_or(StoreError::ChatNotFound)?;
        Ok(record.to_chat(state.participants(record)))
    }

    async fn get_chat_by_participant_ids(&self, a: Uuid, b: Uuid) -> StoreResult<Chat> {
        let state = self.state.read().await;
        state
            .chats
            .values()
            .filter(|chat| !chat.is_group && chat.members.len() == 2)
            .find(|chat| chat.has_member(a) && chat.has_member(b))
            .map(|record| record.to_chat(state.participants(record)))
            .ok_or(StoreError::ChatNotFound)
    }

    async fn get_user_chats(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Chat>> {
        let state = self.state.read().await;
        let mut chats: Vec<Chat> = state
            .chats
            .values()
            .filter(|record| record.has_member(user_id))
            .map(|record| {
                let participants = state.participants(record);
                let mut chat = record.to_chat(Vec::new()).for_viewer(&participants, user_id);
                chat.last_message = state.last_message(record.id);
                chat.unread_count = state.unread_count(record, user_id);
                chat.last_read_at = record
                    .members
                    .iter()
                    .find(|member| member.user_id == user_id)
                    .and_then(|member| member.last_read_at);
                chat
            })
            .collect();

        chats.sort_by_key(|chat| {
            (
                Reverse(chat.last_message.as_ref().map(|message| message.timestamp)),
                Reverse(chat.updated_at),
            )
        });
        Ok(page(chats, limit, offset))
    }

    async fn add_user_to_chat(&self, chat_id: Uuid, user_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let record = state
            .chats
            .get_mut(&chat_id)
            .ok_or(StoreError::ChatNotFound)?;
        if !record.has_member(user_id) {
            record.members.push(Member {
                user_id,
                last_read_at: Some(Timestamp::now()),
            });
        }
        record.is_group = true;
        record.updated_at = Timestamp::now();
        Ok(())
    }

    async fn remove_user_from_chat(&self, chat_id: Uuid, user_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let record = state
            .chats
            .get_mut(&chat_id)
            .ok_or(StoreError::ChatNotFound)?;
        record.members.retain(|member| member.user_id != user_id);
        record.updated_at = Timestamp::now();
        Ok(())
    }

    async fn get_all_participants_in_chat(&self, chat_id: Uuid) -> StoreResult<Vec<PublicUser>> {
        let state = self.state.read().await;
        Ok(state
            .chats
            .get(&chat_id)
            .map(|record| state.participants(record))
            .unwrap_or_default())
    }

    async fn update_chat_name(&self, chat_id: Uuid, name: &str) -> StoreResult<Chat> {
        let mut state = self.state.write().await;
        let record = state
            .chats
            .get_mut(&chat_id)
            .ok_or(StoreError::ChatNotFound)?;
        record.name = name.to_string();
        if !name.is_empty() {
            record.is_group = true;
        }
        record.updated_at = Timestamp::now();
        let record = record.clone();
        Ok(record.to_chat(state.participants(&record)))
    }

    async fn update_participant_read_through(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
        read_through: Timestamp,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let record = state
            .chats
            .get_mut(&chat_id)
            .ok_or(StoreError::ParticipantNotFound)?;
        let member = record
            .members
            .iter_mut()
            .find(|member| member.user_id == user_id)
            .ok_or(StoreError::ParticipantNotFound)?;
        member.last_read_at = Some(member.last_read_at.map_or(read_through, |current| {
            current.max(read_through)
        }));
        record.updated_at = record.updated_at.max(Timestamp::now());
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    #[instrument(skip(self, message), fields(message_id = %message.id, chat_id = %message.chat_id), err)]
    async fn create_message(&self, message: &Message) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if !state.chats.contains_key(&message.chat_id) {
            return Err(StoreError::ChatNotFound);
        }
        let mut stored = message.clone();
        stored.sender = None;
        state.messages.insert(stored.id, stored);
        Ok(())
    }

    async fn get_messages_by_chat_id(
        &self,
        chat_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Message>> {
        let state = self.state.read().await;
        let mut messages: Vec<&Message> = state
            .messages
            .values()
            .filter(|message| message.chat_id == chat_id)
            .collect();
        messages.sort_by_key(|message| Reverse(message.timestamp));
        Ok(page(messages, limit, offset)
            .into_iter()
            .map(|message| state.hydrate(message))
            .collect())
    }

    async fn get_message_by_id(&self, message_id: Uuid) -> StoreResult<Message> {
        let state = self.state.read().await;
        state
            .messages
            .get(&message_id)
            .map(|message| state.hydrate(message))
            .ok_or(StoreError::MessageNotFound)
    }

    async fn update_message_status(
        &self,
        message_id: Uuid,
        status: MessageStatus,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let message = state
            .messages
            .get_mut(&message_id)
            .ok_or(StoreError::MessageNotFound)?;
        message.status = status;
        Ok(())
    }

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

        let mut state = self.state.write().await;
        let message = state
            .messages
            .get_mut(&message_id)
            .filter(|message| message.sender_id == author_id && message.deleted_at.is_none())
            .ok_or(StoreError::MessageNotFound)?;
        message.content = content.to_string();
        message.attachment_url = attachment_url.map(str::to_string);
        message.updated_at = Timestamp::now().max(message.timestamp);
        let message = message.clone();
        Ok(state.hydrate(&message))
    }

    async fn soft_delete_message(&self, message_id: Uuid, author_id: Uuid) -> StoreResult<Message> {
        let mut state = self.state.write().await;
        let message = state
            .messages
            .get_mut(&message_id)
            .filter(|message| message.sender_id == author_id && message.deleted_at.is_none())
            .ok_or(StoreError::MessageNotFound)?;
        let now = Timestamp::now();
        message.deleted_at = Some(now);
        message.updated_at = now;
        message.content.clear();
        message.attachment_url = None;
        let message = message.clone();
        Ok(state.hydrate(&message))
    }

    async fn get_unread_message_count_for_user_in_chat(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<i64> {
        let state = self.state.read().await;
        Ok(state
            .chats
            .get(&chat_id)
            .filter(|record| record.has_member(user_id))
            .map_or(0, |record| state.unread_count(record, user_id)))
    }
}
