//! Domain and wire models shared between the server and its clients.

pub mod chat;
pub mod events;
pub mod message;
pub mod timestamp;
pub mod user;

pub use chat::{
    Chat, CreateChatRequest, MarkChatReadRequest, MarkChatReadResponse,
    ModifyChatParticipantsRequest, UpdateChatRequest, filter_participants_for_viewer,
};
pub use events::{
    ChatPayload, ErrorPayload, InboundDecodeError, InboundEvent, MessagePayload,
    MessageSentAckPayload, MessageStatusUpdatePayload, NewMessagePayload, OutboundEvent,
    TypingIndicatorPayload,
};
pub use message::{
    CreateMessageRequest, Message, MessageStatus, UpdateMessageRequest, is_empty_body,
};
pub use timestamp::Timestamp;
pub use user::{AuthResponse, CreateUserRequest, LoginRequest, PublicUser};
