use std::fmt;

use shared::models::{Chat, Message, PublicUser, is_empty_body};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::store::{StoreError, Stores};

/// Why a message could not be posted. Every variant carries a short text
/// suitable for the client.
#[derive(Debug, Error)]
pub enum ChatServiceError {
    #[error("Message content or attachment required")]
    EmptyBody,
    #[error("New message requires chatId or receiverId")]
    MissingTarget,
    #[error("Cannot send message to yourself")]
    SelfMessage,
    #[error("Chat not found")]
    ChatNotFound,
    #[error("You are not a participant of this chat")]
    NotParticipant,
    #[error("Error processing message details")]
    ParticipantLookup(#[source] StoreError),
    #[error("Error processing message")]
    ChatLookup(#[source] StoreError),
    #[error("Error creating chat for message")]
    ChatCreation(#[source] StoreError),
    #[error("Failed to send message (DB error)")]
    Persist(#[source] StoreError),
}

pub type ChatServiceResult<T> = Result<T, ChatServiceError>;

/// Where a new message goes and who must hear about it.
#[derive(Debug, Clone)]
pub struct MessageTarget {
    pub chat_id: Uuid,
    /// Participants other than the sender.
    pub recipients: Vec<Uuid>,
    /// Set when resolving the target created a direct chat.
    pub created: Option<Chat>,
}

/// Posting rules shared by the WebSocket and REST entry points.
#[derive(Clone)]
pub struct ChatService {
    stores: Stores,
}

impl fmt::Debug for ChatService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatService").finish()
    }
}

impl ChatService {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Reject a message that has neither text nor an attachment.
    pub fn validate_body(content: &str, attachment: Option<&str>) -> ChatServiceResult<()> {
        if is_empty_body(content, attachment) {
            return Err(ChatServiceError::EmptyBody);
        }
        Ok(())
    }

    /// Resolve the chat a message is addressed to.
    ///
    /// An explicit chat wins over a receiver. For a receiver the direct chat
    /// between the two users is looked up and created when missing.
    #[instrument(skip(self))]
    pub async fn resolve_target(
        &self,
        sender_id: Uuid,
        chat_id: Option<Uuid>,
        receiver_id: Option<Uuid>,
    ) -> ChatServiceResult<MessageTarget> {
        if let Some(chat_id) = chat_id {
            let participants = self
                .stores
                .chats
                .get_all_participants_in_chat(chat_id)
                .await
                .map_err(ChatServiceError::ParticipantLookup)?;
            if participants.is_empty() {
                return Err(ChatServiceError::ChatNotFound);
            }
            if !participants.iter().any(|p| p.id == sender_id) {
                return Err(ChatServiceError::NotParticipant);
            }
            return Ok(MessageTarget {
                chat_id,
                recipients: other_ids(&participants, sender_id),
                created: None,
            });
        }

        let Some(receiver_id) = receiver_id else {
            return Err(ChatServiceError::MissingTarget);
        };
        if receiver_id == sender_id {
            return Err(ChatServiceError::SelfMessage);
        }

        match self
            .stores
            .chats
            .get_chat_by_participant_ids(sender_id, receiver_id)
            .await
        {
            Ok(chat) => Ok(MessageTarget {
                chat_id: chat.id,
                recipients: vec![receiver_id],
                created: None,
            }),
            Err(StoreError::ChatNotFound) => {
                let chat = self
                    .stores
                    .chats
                    .create_chat("", false, &[sender_id, receiver_id])
                    .await
                    .map_err(ChatServiceError::ChatCreation)?;
                info!(chat_id = %chat.id, %sender_id, %receiver_id, "created direct chat");
                Ok(MessageTarget {
                    chat_id: chat.id,
                    recipients: vec![receiver_id],
                    created: Some(chat),
                })
            }
            Err(err) => Err(ChatServiceError::ChatLookup(err)),
        }
    }

    /// Persist a message, advance the sender's own watermark and attach the
    /// sender profile.
    #[instrument(skip(self, target, content, attachment), fields(chat_id = %target.chat_id))]
    pub async fn post_message(
        &self,
        sender_id: Uuid,
        target: &MessageTarget,
        content: &str,
        attachment: Option<String>,
    ) -> ChatServiceResult<Message> {
        let mut message = Message::new(target.chat_id, sender_id, content.trim(), attachment);
        self.stores
            .messages
            .create_message(&message)
            .await
            .map_err(ChatServiceError::Persist)?;

        if let Err(err) = self
            .stores
            .chats
            .update_participant_read_through(target.chat_id, sender_id, message.timestamp)
            .await
        {
            debug!(error = %err, "could not advance sender watermark");
        }

        let sender = match self.stores.users.get_user_by_id(sender_id).await {
            Ok(user) => user.to_public(),
            Err(err) => {
                warn!(error = %err, %sender_id, "could not load sender profile");
                PublicUser::unknown(sender_id)
            }
        };
        message.sender = Some(sender);

        Ok(message)
    }
}

fn other_ids(participants: &[PublicUser], viewer: Uuid) -> Vec<Uuid> {
    participants
        .iter()
        .map(|p| p.id)
        .filter(|id| *id != viewer)
        .collect()
}
