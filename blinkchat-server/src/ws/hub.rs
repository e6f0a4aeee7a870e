//! The broker. Lifecycle events and inbound frames are handled one at a time
//! by [`HubWorker`], so "find or create the direct chat" can never race with
//! itself. Broadcasts run on the caller's task and only take the registry's
//! read lock.

use std::sync::Arc;

use shared::{
    config::server::WebSocketConfig,
    models::{
        Chat, ChatPayload, InboundEvent, Message, MessagePayload, MessageSentAckPayload,
        MessageStatusUpdatePayload, NewMessagePayload, OutboundEvent, PublicUser, Timestamp,
        TypingIndicatorPayload,
    },
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::{client::Client, registry::Registry};
use crate::{
    services::chat_service::{ChatService, ChatServiceError},
    store::Stores,
};

/// Pending lifecycle and inbound events awaiting the worker.
const EVENT_QUEUE_CAPACITY: usize = 1024;

enum HubEvent {
    Register {
        client: Client,
        registered: oneshot::Sender<()>,
    },
    Unregister(Client),
    Inbound { client: Client, raw: String },
}

/// Cheap, cloneable handle to the broker.
#[derive(Clone)]
pub struct Hub {
    events: mpsc::Sender<HubEvent>,
    registry: Arc<Registry>,
    stores: Stores,
    chats: ChatService,
    settings: Arc<WebSocketConfig>,
}

/// The serialized dispatch task. Spawn [`HubWorker::run`] exactly once.
pub struct HubWorker {
    hub: Hub,
    events: mpsc::Receiver<HubEvent>,
}

impl HubWorker {
    /// Process events in arrival order, each to completion before the next.
    /// Runs for the lifetime of the process.
    pub async fn run(mut self) {
        info!("hub worker started");
        while let Some(event) = self.events.recv().await {
            self.hub.process(event).await;
        }
    }
}

impl Hub {
    /// Build the broker over `stores`. Nothing is processed until the
    /// returned worker runs.
    #[must_use]
    pub fn new(stores: Stores, settings: WebSocketConfig) -> (Self, HubWorker) {
        let (events, receiver) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let hub = Self {
            events,
            registry: Arc::new(Registry::new()),
            chats: ChatService::new(stores.clone()),
            stores,
            settings: Arc::new(settings),
        };
        let worker = HubWorker {
            hub: hub.clone(),
            events: receiver,
        };
        (hub, worker)
    }

    /// Socket limits and timers every connection uses.
    #[must_use]
    pub fn settings(&self) -> &WebSocketConfig {
        &self.settings
    }

    /// Read access to the live connections, for presence checks.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// A new connection handle for `user_id`, sized by `send_buffer`.
    #[must_use]
    pub fn connect(&self, user_id: Uuid) -> (Client, mpsc::Receiver<String>) {
        Client::new(user_id, self.settings.send_buffer)
    }

    /// Add `client` through the worker. Returns once broadcasts can reach it.
    pub async fn register(&self, client: Client) {
        let (registered, done) = oneshot::channel();
        self.submit(HubEvent::Register { client, registered }).await;
        if done.await.is_err() {
            warn!("hub worker stopped before registering the client");
        }
    }

    /// Remove `client` through the worker and close its outbound queue.
    pub async fn unregister(&self, client: Client) {
        self.submit(HubEvent::Unregister(client)).await;
    }

    /// Queue a raw inbound frame from `client` for processing.
    pub async fn dispatch(&self, client: Client, raw: String) {
        self.submit(HubEvent::Inbound { client, raw }).await;
    }

    async fn submit(&self, event: HubEvent) {
        if self.events.send(event).await.is_err() {
            warn!("hub worker is not running; event discarded");
        }
    }

    async fn process(&self, event: HubEvent) {
        match event {
            HubEvent::Register { client, registered } => {
                let connections = self.registry.register(client.clone()).await;
                // The caller may have given up waiting; registration stands.
                let _ = registered.send(());
                metrics::counter!("ws_connections_total").increment(1);
                info!(
                    user_id = %client.user_id(),
                    conn_id = %client.id(),
                    connections,
                    "client registered"
                );
            }
            HubEvent::Unregister(client) => {
                if self.registry.unregister(&client).await {
                    info!(user_id = %client.user_id(), conn_id = %client.id(), "client unregistered");
                }
            }
            HubEvent::Inbound { client, raw } => self.handle_inbound(&client, &raw).await,
        }
    }

    async fn handle_inbound(&self, client: &Client, raw: &str) {
        let event = match InboundEvent::decode(raw) {
            Ok(event) => event,
            Err(err) => {
                warn!(user_id = %client.user_id(), error = %err, "rejected inbound frame");
                reject(client, &err.client_message());
                return;
            }
        };

        metrics::counter!("ws_inbound_events_total", "type" => metric_label(&event)).increment(1);
        debug!(user_id = %client.user_id(), kind = event.kind(), "processing inbound event");

        match event {
            InboundEvent::NewMessage(payload) => self.handle_new_message(client, payload).await,
            InboundEvent::MessageStatusUpdate(payload) => {
                self.handle_status_update(client, payload).await;
            }
            InboundEvent::TypingIndicator(payload) => {
                self.handle_typing_indicator(client, payload).await;
            }
            InboundEvent::Unknown(kind) => {
                warn!(user_id = %client.user_id(), kind, "unknown message type");
                reject(client, "Unknown message type");
            }
        }
    }

    #[instrument(skip_all, fields(user_id = %client.user_id()))]
    async fn handle_new_message(&self, client: &Client, payload: NewMessagePayload) {
        let sender_id = client.user_id();
        let attachment = payload
            .attachment_url
            .filter(|url| !url.trim().is_empty());

        let target = match ChatService::validate_body(&payload.content, attachment.as_deref()) {
            Ok(()) => {
                self.chats
                    .resolve_target(sender_id, payload.chat_id, payload.receiver_id)
                    .await
            }
            Err(err) => Err(err),
        };
        let target = match target {
            Ok(target) => target,
            Err(err) => {
                log_service_error(&err);
                reject(client, &err.to_string());
                return;
            }
        };

        let message = match self
            .chats
            .post_message(sender_id, &target, &payload.content, attachment)
            .await
        {
            Ok(message) => message,
            Err(err) => {
                log_service_error(&err);
                reject(client, &err.to_string());
                return;
            }
        };

        client.send(&OutboundEvent::MessageSentAck(MessageSentAckPayload {
            client_temp_id: payload.client_temp_id,
            server_msg_id: message.id,
            chat_id: message.chat_id,
            timestamp: message.timestamp,
            status: message.status,
            attachment_url: message.attachment_url.clone(),
        }));

        self.broadcast_message_to_targets(&message, &target.recipients, target.created.as_ref())
            .await;
    }

    #[instrument(skip_all, fields(user_id = %client.user_id(), message_id = %payload.message_id))]
    async fn handle_status_update(&self, client: &Client, payload: MessageStatusUpdatePayload) {
        let actor = client.user_id();
        let original = match self.stores.messages.get_message_by_id(payload.message_id).await {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "status update for a message that cannot be loaded");
                reject(client, "Failed to update message status (DB error)");
                return;
            }
        };

        match self
            .stores
            .chats
            .get_all_participants_in_chat(original.chat_id)
            .await
        {
            Ok(participants) if participants.iter().any(|p| p.id == actor) => {}
            Ok(_) => {
                warn!(chat_id = %original.chat_id, "status update from a non-participant");
                reject(client, "You are not a participant of this chat");
                return;
            }
            Err(err) => {
                error!(error = %err, "failed to load participants for status update");
                reject(client, "Failed to update message status (DB error)");
                return;
            }
        }

        if let Err(err) = self
            .stores
            .messages
            .update_message_status(payload.message_id, payload.status)
            .await
        {
            error!(error = %err, "failed to update message status");
            reject(client, "Failed to update message status (DB error)");
            return;
        }

        let event = OutboundEvent::MessageStatusUpdate(MessageStatusUpdatePayload {
            message_id: payload.message_id,
            chat_id: original.chat_id,
            status: payload.status,
            user_id: Some(actor),
            timestamp: Some(Timestamp::now()),
        });
        let Some(frame) = encode(&event) else {
            return;
        };

        let mut targets = Vec::with_capacity(2);
        if original.sender_id != actor {
            targets.push(original.sender_id);
        }
        targets.push(actor);
        self.registry.send_to_users(&targets, &frame).await;
    }

    #[instrument(skip_all, fields(user_id = %client.user_id(), chat_id = %payload.chat_id))]
    async fn handle_typing_indicator(&self, client: &Client, payload: TypingIndicatorPayload) {
        let actor = client.user_id();
        if payload.user_id != actor {
            warn!(claimed = %payload.user_id, "typing indicator user mismatch");
            reject(client, "Typing indicator user ID mismatch");
            return;
        }

        let participants = match self
            .stores
            .chats
            .get_all_participants_in_chat(payload.chat_id)
            .await
        {
            Ok(participants) if !participants.is_empty() => participants,
            Ok(_) => {
                reject(client, "Chat not found for typing indicator");
                return;
            }
            Err(err) => {
                warn!(error = %err, "failed to load participants for typing indicator");
                reject(client, "Chat not found for typing indicator");
                return;
            }
        };

        if !participants.iter().any(|p| p.id == actor) {
            reject(client, "You are not a participant of this chat");
            return;
        }

        let targets = other_ids(&participants, actor);
        if let Some(frame) = encode(&OutboundEvent::TypingIndicator(payload)) {
            self.registry.send_to_users(&targets, &frame).await;
        }
    }

    /// Push any envelope to every connection of one user.
    pub async fn broadcast_to_user(&self, user_id: Uuid, event: &OutboundEvent) -> usize {
        match encode(event) {
            Some(frame) => self.registry.send_to_user(user_id, &frame).await,
            None => 0,
        }
    }

    /// Fan a stored message out to every participant except its sender.
    ///
    /// `created_chat` is the direct chat created for this message, if any;
    /// recipients then get `new_chat` before `new_message`.
    pub async fn broadcast_chat_message(&self, message: &Message, created_chat: Option<&Chat>) {
        let participants = match self
            .stores
            .chats
            .get_all_participants_in_chat(message.chat_id)
            .await
        {
            Ok(participants) => participants,
            Err(err) => {
                warn!(chat_id = %message.chat_id, error = %err, "failed to load participants for broadcast");
                return;
            }
        };
        let targets = other_ids(&participants, message.sender_id);
        self.broadcast_message_to_targets(message, &targets, created_chat)
            .await;
    }

    async fn broadcast_message_to_targets(
        &self,
        message: &Message,
        targets: &[Uuid],
        created_chat: Option<&Chat>,
    ) {
        if targets.is_empty() {
            return;
        }

        if let Some(chat) = created_chat {
            let mut chat = chat.clone();
            chat.last_message = Some(message.clone());
            match self
                .stores
                .chats
                .get_all_participants_in_chat(message.chat_id)
                .await
            {
                Ok(participants) => {
                    self.broadcast_new_chat(&chat, Some(&participants), message.sender_id, targets)
                        .await;
                }
                Err(err) => {
                    warn!(chat_id = %chat.id, error = %err, "failed to load participants for new chat");
                }
            }
        }

        let Some(frame) = encode(&OutboundEvent::NewMessage(message.clone())) else {
            return;
        };
        let delivered = self.registry.send_to_users(targets, &frame).await;
        debug!(
            message_id = %message.id,
            chat_id = %message.chat_id,
            recipients = targets.len(),
            delivered,
            "broadcast message"
        );
    }

    /// Announce a chat to users who just joined it.
    ///
    /// Targets are `explicit_targets` when given, otherwise every participant,
    /// never the initiator. Each recipient gets their own copy with themselves
    /// left out of `otherParticipants`.
    pub async fn broadcast_new_chat(
        &self,
        chat: &Chat,
        participants: Option<&[PublicUser]>,
        initiator: Uuid,
        explicit_targets: &[Uuid],
    ) {
        let loaded;
        let participants = match participants {
            Some(participants) => participants,
            None => match self.stores.chats.get_all_participants_in_chat(chat.id).await {
                Ok(fetched) => {
                    loaded = fetched;
                    loaded.as_slice()
                }
                Err(err) => {
                    warn!(chat_id = %chat.id, error = %err, "failed to load participants for new chat");
                    return;
                }
            },
        };

        let mut targets: Vec<Uuid> = if explicit_targets.is_empty() {
            participants.iter().map(|p| p.id).collect()
        } else {
            explicit_targets.to_vec()
        };
        targets.retain(|id| *id != initiator);
        targets.sort_unstable();
        targets.dedup();

        for target in targets {
            let mut copy = chat.for_viewer(participants, target);
            if copy
                .last_message
                .as_ref()
                .is_some_and(|last| last.sender_id != target)
                && copy.unread_count == 0
            {
                copy.unread_count = 1;
            }
            let event = OutboundEvent::NewChat(ChatPayload { chat: copy });
            self.broadcast_to_user(target, &event).await;
        }
    }

    /// Push fresh chat metadata to every participant.
    pub async fn broadcast_chat_updated(
        &self,
        chat_id: Uuid,
        name: &str,
        participants: Option<&[PublicUser]>,
    ) {
        let mut chat = match self.stores.chats.get_chat_by_id(chat_id).await {
            Ok(chat) => chat,
            Err(err) => {
                warn!(%chat_id, error = %err, "failed to load chat for update broadcast");
                return;
            }
        };
        name.clone_into(&mut chat.name);

        let loaded;
        let participants = match participants {
            Some(participants) => participants,
            None => match self.stores.chats.get_all_participants_in_chat(chat_id).await {
                Ok(fetched) => {
                    loaded = fetched;
                    loaded.as_slice()
                }
                Err(err) => {
                    warn!(%chat_id, error = %err, "failed to load participants for update broadcast");
                    return;
                }
            },
        };

        for participant in participants {
            let event = OutboundEvent::ChatUpdated(ChatPayload {
                chat: chat.for_viewer(participants, participant.id),
            });
            self.broadcast_to_user(participant.id, &event).await;
        }
    }

    /// Tell the author and every participant that a message was edited.
    pub async fn broadcast_message_update(&self, message: &Message) {
        let event = OutboundEvent::MessageUpdated(MessagePayload {
            message: message.clone(),
        });
        self.broadcast_to_message_audience(message, &event).await;
    }

    /// Tell the author and every participant that a message was deleted.
    pub async fn broadcast_message_deletion(&self, message: &Message) {
        let event = OutboundEvent::MessageDeleted(MessagePayload {
            message: message.clone(),
        });
        self.broadcast_to_message_audience(message, &event).await;
    }

    async fn broadcast_to_message_audience(&self, message: &Message, event: &OutboundEvent) {
        let participants = match self
            .stores
            .chats
            .get_all_participants_in_chat(message.chat_id)
            .await
        {
            Ok(participants) => participants,
            Err(err) => {
                warn!(chat_id = %message.chat_id, error = %err, "failed to load participants");
                return;
            }
        };

        let mut targets: Vec<Uuid> = participants.iter().map(|p| p.id).collect();
        targets.push(message.sender_id);
        targets.sort_unstable();
        targets.dedup();

        if let Some(frame) = encode(event) {
            self.registry.send_to_users(&targets, &frame).await;
        }
    }
}

fn reject(client: &Client, message: &str) {
    client.send(&OutboundEvent::error(message));
}

fn encode(event: &OutboundEvent) -> Option<String> {
    serde_json::to_string(event)
        .map_err(|err| warn!(error = %err, kind = event.kind(), "failed to encode outbound event"))
        .ok()
}

fn other_ids(participants: &[PublicUser], viewer: Uuid) -> Vec<Uuid> {
    participants
        .iter()
        .map(|p| p.id)
        .filter(|id| *id != viewer)
        .collect()
}

fn metric_label(event: &InboundEvent) -> &'static str {
    match event {
        InboundEvent::NewMessage(_) => "new_message",
        InboundEvent::MessageStatusUpdate(_) => "message_status_update",
        InboundEvent::TypingIndicator(_) => "typing_indicator",
        InboundEvent::Unknown(_) => "unknown",
    }
}

fn log_service_error(err: &ChatServiceError) {
    match err {
        ChatServiceError::ParticipantLookup(source)
        | ChatServiceError::ChatLookup(source)
        | ChatServiceError::ChatCreation(source)
        | ChatServiceError::Persist(source) => error!(error = %source, "{err}"),
        _ => debug!(reason = %err, "rejected new message"),
    }
}
