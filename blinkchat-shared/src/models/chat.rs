use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Message, PublicUser, Timestamp};

/// A conversation between two or more users.
///
/// `other_participants`, `last_message`, `unread_count` and `last_read_at`
/// are viewer-relative and filled in per recipient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    /// Unique identifier for the chat.
    pub id: Uuid,

    /// Display name; empty for direct chats.
    #[serde(default)]
    pub name: String,

    /// Group chats have a name or more than two members.
    #[serde(default)]
    pub is_group: bool,

    /// Creation time.
    pub created_at: Timestamp,

    /// Last metadata or activity change.
    pub updated_at: Timestamp,

    /// Members other than the viewer.
    #[serde(default)]
    pub other_participants: Vec<PublicUser>,

    /// Most recent message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,

    /// Messages from others newer than the viewer's watermark.
    #[serde(default)]
    pub unread_count: i64,

    /// The viewer's read watermark.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_read_at: Option<Timestamp>,
}

impl Chat {
    /// Copy of this chat as seen by `viewer`.
    #[must_use]
    pub fn for_viewer(&self, participants: &[PublicUser], viewer: Uuid) -> Self {
        let mut copy = self.clone();
        copy.other_participants = filter_participants_for_viewer(participants, viewer);
        copy
    }
}

/// Every participant except `viewer`.
#[must_use]
pub fn filter_participants_for_viewer(participants: &[PublicUser], viewer: Uuid) -> Vec<PublicUser> {
    participants
        .iter()
        .filter(|participant| participant.id != viewer)
        .cloned()
        .collect()
}

/// Request to create a chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    /// Users to add besides the caller.
    pub participant_ids: Vec<Uuid>,

    /// Optional display name; a named chat is always a group.
    #[serde(default)]
    pub name: Option<String>,
}

/// Request to change chat metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateChatRequest {
    /// New display name.
    #[serde(default)]
    pub name: Option<String>,
}

/// Request to add members to a chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ModifyChatParticipantsRequest {
    /// Users to add.
    pub user_ids: Vec<Uuid>,
}

/// Request to advance the caller's read watermark.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MarkChatReadRequest {
    /// Read-through time; defaults to now.
    #[serde(default)]
    pub read_through: Option<Timestamp>,
}

/// Result of advancing a read watermark.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MarkChatReadResponse {
    /// The chat that was marked.
    pub chat_id: Uuid,

    /// Remaining unread messages.
    pub unread_count: i64,

    /// Watermark that was requested.
    pub read_through: Timestamp,
}
