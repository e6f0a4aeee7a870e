use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use super::{PublicUser, Timestamp};

/// Delivery state of a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Stored by the server.
    #[default]
    Sent,
    /// Received by at least one recipient device.
    Delivered,
    /// Seen by the recipient.
    Read,
}

impl MessageStatus {
    /// Canonical string used on the wire and in persistence.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            _ => Err("unknown message status"),
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique identifier for the message.
    pub id: Uuid,

    /// Chat the message belongs to.
    pub chat_id: Uuid,

    /// Author of the message.
    pub sender_id: Uuid,

    /// Message body. Always empty once the message is deleted.
    pub content: String,

    /// Creation time.
    pub timestamp: Timestamp,

    /// Last modification time.
    pub updated_at: Timestamp,

    /// Delivery state.
    pub status: MessageStatus,

    /// Optional attachment reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,

    /// Soft deletion time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,

    /// Whether the message was soft deleted.
    #[serde(default)]
    pub is_deleted: bool,

    /// Whether the message was edited after creation.
    #[serde(default)]
    pub is_edited: bool,

    /// Author profile, populated for API and broadcast payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<PublicUser>,
}

impl Message {
    /// Build a freshly sent message stamped with the current time.
    #[must_use]
    pub fn new(
        chat_id: Uuid,
        sender_id: Uuid,
        content: impl Into<String>,
        attachment_url: Option<String>,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            id: Uuid::new_v4(),
            chat_id,
            sender_id,
            content: content.into(),
            timestamp: now,
            updated_at: now,
            status: MessageStatus::Sent,
            attachment_url,
            deleted_at: None,
            is_deleted: false,
            is_edited: false,
            sender: None,
        }
    }

    /// Recompute the derived flags from the stored timestamps.
    ///
    /// A deleted message never exposes its content or attachment.
    pub fn normalize(&mut self) {
        self.is_edited = self.updated_at != self.timestamp;
        self.is_deleted = self.deleted_at.is_some();
        if self.is_deleted {
            self.content.clear();
            self.attachment_url = None;
        }
    }
}

/// Returns `true` when neither text content nor an attachment is present.
#[must_use]
pub fn is_empty_body(content: &str, attachment: Option<&str>) -> bool {
    content.trim().is_empty() && attachment.is_none()
}

/// Request to send a message through the REST API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest {
    /// Existing chat to post into.
    #[serde(default)]
    pub chat_id: Option<Uuid>,

    /// Direct recipient, used when no chat is known yet.
    #[serde(default)]
    pub receiver_id: Option<Uuid>,

    /// Message body.
    #[serde(default)]
    pub content: String,

    /// Optional attachment reference.
    #[serde(default)]
    pub attachment: Option<String>,
}

/// Request to edit a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMessageRequest {
    /// Replacement body.
    #[serde(default)]
    pub content: Option<String>,

    /// Replacement attachment reference.
    #[serde(default)]
    pub attachment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            MessageStatus::Sent,
            MessageStatus::Delivered,
            MessageStatus::Read,
        ] {
            assert_eq!(status.as_str().parse::<MessageStatus>(), Ok(status));
        }
        assert!("seen".parse::<MessageStatus>().is_err());
    }

    #[test]
    fn new_message_is_sent_and_unedited() {
        let message = Message::new(Uuid::new_v4(), Uuid::new_v4(), "hi", None);
        assert_eq!(message.status, MessageStatus::Sent);
        assert_eq!(message.timestamp, message.updated_at);
        assert!(!message.is_edited);
        assert!(!message.is_deleted);
    }

    #[test]
    fn normalize_hides_deleted_content() {
        let mut message = Message::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "secret",
            Some("https://cdn.example/file.png".into()),
        );
        message.deleted_at = Some(Timestamp::now());
        message.updated_at = Timestamp(message.timestamp.0 + chrono::Duration::seconds(5));
        message.normalize();

        assert!(message.is_deleted);
        assert!(message.is_edited);
        assert!(message.content.is_empty());
        assert!(message.attachment_url.is_none());
    }

    #[test]
    fn message_serializes_with_wire_names() {
        let message = Message::new(Uuid::new_v4(), Uuid::new_v4(), "hello", None);
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["content"], "hello");
        assert_eq!(value["status"], "sent");
        assert!(value.get("chatId").is_some());
        assert!(value.get("senderId").is_some());
        assert!(value.get("attachmentUrl").is_none());
        assert_eq!(value["isDeleted"], false);
    }

    #[test]
    fn empty_body_requires_content_or_attachment() {
        assert!(is_empty_body("   ", None));
        assert!(!is_empty_body("", Some("https://cdn.example/a.png")));
        assert!(!is_empty_body("hi", None));
    }

    #[test]
    fn create_request_accepts_partial_payloads() {
        let request: CreateMessageRequest =
            serde_json::from_str(r#"{"receiverId":"6f1c1f3e-3d59-4b8c-9b7a-1d2e3f405060","content":"yo"}"#)
                .unwrap();
        assert!(request.chat_id.is_none());
        assert!(request.receiver_id.is_some());
        assert!(request.attachment.is_none());
    }
}
