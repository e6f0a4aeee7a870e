//! # WebSocket envelopes
//!
//! Every frame exchanged over `/ws` is a JSON object of the form
//! `{ "type": <tag>, "payload": <object> }`. Inbound frames are decoded into
//! [`InboundEvent`], outbound frames are produced from [`OutboundEvent`].

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;
use uuid::Uuid;

use super::{Chat, Message, MessageStatus, Timestamp};

/// Payload of an inbound `new_message` frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewMessagePayload {
    /// Existing chat to post into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<Uuid>,

    /// Direct recipient, used when no chat is known yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<Uuid>,

    /// Message body.
    #[serde(default)]
    pub content: String,

    /// Optional attachment reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,

    /// Client correlation id echoed back in the acknowledgement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_temp_id: Option<String>,
}

/// Payload of `message_status_update` in both directions.
///
/// Clients may omit `userId` and `timestamp`; the broker always fills them in
/// before broadcasting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageStatusUpdatePayload {
    /// Message whose status changed.
    pub message_id: Uuid,

    /// Chat containing the message.
    pub chat_id: Uuid,

    /// New status.
    pub status: MessageStatus,

    /// User who changed the status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,

    /// When the change was processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
}

/// Payload of `typing_indicator` in both directions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicatorPayload {
    /// Chat the user is typing in.
    pub chat_id: Uuid,

    /// The typing user.
    pub user_id: Uuid,

    /// Whether typing started or stopped.
    pub is_typing: bool,
}

/// Acknowledgement returned to the sender once a message is stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageSentAckPayload {
    /// Correlation id supplied by the client, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_temp_id: Option<String>,

    /// Identifier assigned by the server.
    pub server_msg_id: Uuid,

    /// Chat the message was stored in.
    pub chat_id: Uuid,

    /// Creation time of the stored message.
    pub timestamp: Timestamp,

    /// Stored status.
    pub status: MessageStatus,

    /// Stored attachment reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
}

/// Payload of `new_chat` and `chat_updated`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatPayload {
    /// The chat as seen by the recipient.
    pub chat: Chat,
}

/// Payload of `message_updated` and `message_deleted`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePayload {
    /// The affected message.
    pub message: Message,
}

/// Payload of `error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    /// Human readable description.
    pub message: String,

    /// Optional machine readable code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Frames a client may send.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum InboundEvent {
    /// Send a message into a chat or to a direct recipient.
    NewMessage(NewMessagePayload),
    /// Report a delivery or read receipt.
    MessageStatusUpdate(MessageStatusUpdatePayload),
    /// Start or stop typing.
    TypingIndicator(TypingIndicatorPayload),
    /// A tag the server does not recognise.
    #[serde(skip_serializing)]
    Unknown(String),
}

/// Why an inbound frame could not be decoded.
#[derive(Debug, Error)]
pub enum InboundDecodeError {
    /// The frame is not a `{ type, payload }` object.
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    /// The tag is known but the payload does not match it.
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        /// The recognised tag.
        kind: &'static str,
        /// Decoder failure.
        #[source]
        source: serde_json::Error,
    },
}

impl InboundDecodeError {
    /// Message sent back to the originating connection.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Self::Malformed(_) => "Invalid message format".to_string(),
            Self::InvalidPayload { kind, .. } => format!("Invalid {kind} payload"),
        }
    }
}

#[derive(Deserialize)]
struct RawEnvelope<'a> {
    #[serde(rename = "type")]
    kind: String,
    #[serde(borrow, default)]
    payload: Option<&'a RawValue>,
}

impl InboundEvent {
    /// Wire tag of the event.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::NewMessage(_) => "new_message",
            Self::MessageStatusUpdate(_) => "message_status_update",
            Self::TypingIndicator(_) => "typing_indicator",
            Self::Unknown(kind) => kind,
        }
    }

    /// Decode a text frame.
    ///
    /// The envelope is parsed first with the payload left raw, then the
    /// payload is decoded straight into the type selected by the tag.
    ///
    /// # Errors
    /// Returns [`InboundDecodeError::Malformed`] when the envelope itself is
    /// not valid and [`InboundDecodeError::InvalidPayload`] when a known tag
    /// carries a payload of the wrong shape.
    pub fn decode(raw: &str) -> Result<Self, InboundDecodeError> {
        let envelope: RawEnvelope<'_> =
            serde_json::from_str(raw).map_err(InboundDecodeError::Malformed)?;

        match envelope.kind.as_str() {
            "new_message" => {
                decode_payload("new_message", envelope.payload).map(Self::NewMessage)
            }
            "message_status_update" => decode_payload("message_status_update", envelope.payload)
                .map(Self::MessageStatusUpdate),
            "typing_indicator" => {
                decode_payload("typing_indicator", envelope.payload).map(Self::TypingIndicator)
            }
            _ => Ok(Self::Unknown(envelope.kind.clone())),
        }
    }
}

fn decode_payload<T>(kind: &'static str, payload: Option<&RawValue>) -> Result<T, InboundDecodeError>
where
    T: for<'de> Deserialize<'de>,
{
    let raw = payload.map_or("null", RawValue::get);
    serde_json::from_str(raw).map_err(|source| InboundDecodeError::InvalidPayload { kind, source })
}

/// Frames the server pushes to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// A message delivered to a recipient.
    NewMessage(Message),
    /// Confirmation to the sender that a message was stored.
    MessageSentAck(MessageSentAckPayload),
    /// A delivery or read receipt.
    MessageStatusUpdate(MessageStatusUpdatePayload),
    /// Someone started or stopped typing.
    TypingIndicator(TypingIndicatorPayload),
    /// The recipient joined a chat.
    NewChat(ChatPayload),
    /// Chat metadata or membership changed.
    ChatUpdated(ChatPayload),
    /// A message was edited.
    MessageUpdated(MessagePayload),
    /// A message was soft deleted.
    MessageDeleted(MessagePayload),
    /// A request from this connection failed.
    Error(ErrorPayload),
}

impl OutboundEvent {
    /// Build an `error` envelope without a code.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
            code: None,
        })
    }

    /// Wire tag of the event.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "new_message",
            Self::MessageSentAck(_) => "message_sent_ack",
            Self::MessageStatusUpdate(_) => "message_status_update",
            Self::TypingIndicator(_) => "typing_indicator",
            Self::NewChat(_) => "new_chat",
            Self::ChatUpdated(_) => "chat_updated",
            Self::MessageUpdated(_) => "message_updated",
            Self::MessageDeleted(_) => "message_deleted",
            Self::Error(_) => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_new_message() {
        let receiver = Uuid::new_v4();
        let raw = json!({
            "type": "new_message",
            "payload": { "receiverId": receiver, "content": "hi", "clientTempId": "tmp-1" }
        })
        .to_string();

        let InboundEvent::NewMessage(payload) = InboundEvent::decode(&raw).unwrap() else {
            panic!("expected new_message");
        };
        assert_eq!(payload.receiver_id, Some(receiver));
        assert_eq!(payload.content, "hi");
        assert_eq!(payload.client_temp_id.as_deref(), Some("tmp-1"));
        assert!(payload.chat_id.is_none());
    }

    #[test]
    fn decodes_status_update_without_server_fields() {
        let raw = json!({
            "type": "message_status_update",
            "payload": { "messageId": Uuid::new_v4(), "chatId": Uuid::new_v4(), "status": "read" }
        })
        .to_string();

        let InboundEvent::MessageStatusUpdate(payload) = InboundEvent::decode(&raw).unwrap() else {
            panic!("expected message_status_update");
        };
        assert_eq!(payload.status, MessageStatus::Read);
        assert!(payload.user_id.is_none());
        assert!(payload.timestamp.is_none());
    }

    #[test]
    fn unknown_tag_is_preserved() {
        let raw = json!({ "type": "presence_ping", "payload": {} }).to_string();
        let event = InboundEvent::decode(&raw).unwrap();
        assert_eq!(event, InboundEvent::Unknown("presence_ping".into()));
        assert_eq!(event.kind(), "presence_ping");
    }

    #[test]
    fn malformed_json_reports_format_error() {
        let err = InboundEvent::decode("{not json").unwrap_err();
        assert!(matches!(err, InboundDecodeError::Malformed(_)));
        assert_eq!(err.client_message(), "Invalid message format");
    }

    #[test]
    fn wrong_payload_shape_names_the_tag() {
        let raw = json!({ "type": "typing_indicator", "payload": { "chatId": "nope" } }).to_string();
        let err = InboundEvent::decode(&raw).unwrap_err();
        assert_eq!(err.client_message(), "Invalid typing_indicator payload");
    }

    #[test]
    fn missing_payload_for_known_tag_is_invalid() {
        let raw = json!({ "type": "new_message" }).to_string();
        let err = InboundEvent::decode(&raw).unwrap_err();
        assert_eq!(err.client_message(), "Invalid new_message payload");
    }

    #[test]
    fn outbound_error_uses_envelope_shape() {
        let value = serde_json::to_value(OutboundEvent::error("Unknown message type")).unwrap();
        assert_eq!(
            value,
            json!({ "type": "error", "payload": { "message": "Unknown message type" } })
        );
    }

    #[test]
    fn outbound_ack_round_trips_for_clients() {
        let ack = OutboundEvent::MessageSentAck(MessageSentAckPayload {
            client_temp_id: Some("tmp-9".into()),
            server_msg_id: Uuid::new_v4(),
            chat_id: Uuid::new_v4(),
            timestamp: Timestamp::now(),
            status: MessageStatus::Sent,
            attachment_url: None,
        });
        let text = serde_json::to_string(&ack).unwrap();
        assert!(text.contains("\"type\":\"message_sent_ack\""));
        assert!(text.contains("\"serverMsgId\""));
        let parsed: OutboundEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.kind(), "message_sent_ack");
    }

    #[test]
    fn inbound_events_encode_for_clients() {
        let event = InboundEvent::TypingIndicator(TypingIndicatorPayload {
            chat_id: Uuid::nil(),
            user_id: Uuid::nil(),
            is_typing: true,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "typing_indicator");
        assert_eq!(value["payload"]["isTyping"], true);
    }
}
