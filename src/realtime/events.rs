/// Realtime event engine.
///
/// Binds presence, conversation routing and persistence together. Each
/// connected client is a long-lived duplex event channel; inbound frames
/// decode into `ClientEvent`, outbound frames encode from `ServerEvent`.
/// Every handler contains its own failures: one failing event never affects
/// other connections or later events on the same connection.
use crate::error::{AppError, AppResult};
use crate::models::message::{MessageResponse, NewMessage};
use crate::realtime::conversation::{conversation_id_for, personal_room};
use crate::realtime::manager::SocketManager;
use crate::realtime::presence::PresenceRegistry;
use crate::realtime::{MessageStore, UserDirectory};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Connection registry - maps session ids to their websocket senders.
type ConnectionRegistry = Arc<RwLock<HashMap<String, tokio::sync::mpsc::UnboundedSender<String>>>>;

/// Inbound events. Wire format: `{"event": "<name>", "data": <payload>}`;
/// event names and payload field names are fixed for compatibility with
/// existing clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "join-user")]
    JoinUser(String),
    #[serde(rename = "join-conversation")]
    JoinConversation(String),
    #[serde(rename = "send-message")]
    SendMessage(SendMessagePayload),
    #[serde(rename = "typing-start")]
    TypingStart(TypingStartPayload),
    #[serde(rename = "typing-stop")]
    TypingStop(TypingStopPayload),
    #[serde(rename = "delete-message")]
    DeleteMessage(DeleteMessagePayload),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub conversation_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingStartPayload {
    pub conversation_id: String,
    pub user_id: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingStopPayload {
    pub conversation_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessagePayload {
    pub message_id: String,
    pub conversation_id: String,
}

/// Outbound events, encoded as `{"event": "<name>", "data": <payload>}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "online-users")]
    OnlineUsers(Vec<String>),
    #[serde(rename = "user-online")]
    UserOnline(String),
    #[serde(rename = "user-offline")]
    UserOffline(String),
    #[serde(rename = "new-message")]
    NewMessage(MessageResponse),
    #[serde(rename = "message-notification")]
    MessageNotification(MessageNotificationPayload),
    #[serde(rename = "user-typing")]
    UserTyping(UserTypingPayload),
    #[serde(rename = "user-stop-typing")]
    UserStopTyping(UserStopTypingPayload),
    #[serde(rename = "message-deleted")]
    MessageDeleted(MessageDeletedPayload),
    #[serde(rename = "message-error")]
    MessageError(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageNotificationPayload {
    pub conversation_id: String,
    pub message: String,
    pub sender: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTypingPayload {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStopTypingPayload {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeletedPayload {
    pub message_id: String,
}

#[derive(Clone)]
pub struct EventHandler {
    manager: SocketManager,
    presence: Arc<PresenceRegistry>,
    connections: ConnectionRegistry,
    store: Arc<dyn MessageStore>,
    directory: Arc<dyn UserDirectory>,
}

impl EventHandler {
    pub fn new(
        manager: SocketManager,
        presence: Arc<PresenceRegistry>,
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            manager,
            presence,
            connections: Arc::new(RwLock::new(HashMap::new())),
            store,
            directory,
        }
    }

    pub fn manager(&self) -> &SocketManager {
        &self.manager
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// Register a freshly accepted connection.
    pub async fn register_connection(
        &self,
        sid: &str,
        sender: tokio::sync::mpsc::UnboundedSender<String>,
    ) {
        self.manager.create_session(sid).await;

        let mut connections = self.connections.write().await;
        connections.insert(sid.to_string(), sender);
        drop(connections);

        tracing::info!("Registered connection: {}", sid);
    }

    /// Tear down a connection: drop its sender, release its presence entry
    /// (broadcasting user-offline only if this handle owned one), and scrub
    /// its room memberships.
    pub async fn handle_disconnect(&self, sid: &str) {
        let mut connections = self.connections.write().await;
        connections.remove(sid);
        drop(connections); // Release lock before async operations

        if let Some(user_id) = self.presence.unregister(sid).await {
            self.broadcast_all(&ServerEvent::UserOffline(user_id.clone()))
                .await;
            tracing::info!("User {} is now offline", user_id);
        }

        self.manager.remove_session(sid).await;
        tracing::info!("Unregistered connection: {}", sid);
    }

    fn encode(event: &ServerEvent) -> Option<String> {
        match serde_json::to_string(event) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::error!("Failed to encode server event: {}", e);
                None
            }
        }
    }

    /// Emit an event to a single session.
    pub async fn emit_to_session(&self, sid: &str, event: &ServerEvent) -> Result<(), String> {
        let Some(frame) = Self::encode(event) else {
            return Err("Encoding failed".to_string());
        };

        let connections = self.connections.read().await;
        if let Some(sender) = connections.get(sid) {
            sender.send(frame).map_err(|e| e.to_string())?;
            Ok(())
        } else {
            Err(format!("Session not found: {}", sid))
        }
    }

    /// Broadcast an event to every session in a room, optionally excluding
    /// one sid. Dropped recipients are skipped; delivery to the rest still
    /// succeeds.
    pub async fn broadcast_to_room(
        &self,
        room: &str,
        event: &ServerEvent,
        exclude_sid: Option<&str>,
    ) -> usize {
        let Some(frame) = Self::encode(event) else {
            return 0;
        };

        let sids = self.manager.get_room_sessions(room).await;
        let connections = self.connections.read().await;
        let mut sent = 0;

        for sid in sids {
            if Some(sid.as_str()) == exclude_sid {
                continue;
            }
            if let Some(sender) = connections.get(&sid) {
                if sender.send(frame.clone()).is_ok() {
                    sent += 1;
                }
            }
        }

        sent
    }

    /// Broadcast an event to every connected client.
    pub async fn broadcast_all(&self, event: &ServerEvent) -> usize {
        let Some(frame) = Self::encode(event) else {
            return 0;
        };

        let connections = self.connections.read().await;
        let mut sent = 0;

        for sender in connections.values() {
            if sender.send(frame.clone()).is_ok() {
                sent += 1;
            }
        }

        sent
    }

    /// Dispatch one inbound event. Events from the same connection are
    /// processed in arrival order by the gateway read loop.
    pub async fn dispatch(&self, sid: &str, event: ClientEvent) {
        match event {
            ClientEvent::JoinUser(user_id) => self.handle_join_user(sid, user_id).await,
            ClientEvent::JoinConversation(conversation_id) => {
                self.handle_join_conversation(sid, conversation_id).await
            }
            ClientEvent::SendMessage(payload) => self.handle_send_message(sid, payload).await,
            ClientEvent::TypingStart(payload) => self.handle_typing_start(sid, payload).await,
            ClientEvent::TypingStop(payload) => self.handle_typing_stop(sid, payload).await,
            ClientEvent::DeleteMessage(payload) => self.handle_delete_message(sid, payload).await,
        }
    }

    /// join-user: remember the identity, join the personal room, register
    /// presence, announce to everyone and hydrate the caller with the
    /// current online list.
    async fn handle_join_user(&self, sid: &str, user_id: String) {
        if user_id.trim().is_empty() {
            tracing::warn!("Rejected join-user with empty user id on {}", sid);
            return;
        }

        if let Err(e) = self.manager.set_session_user(sid, &user_id).await {
            tracing::warn!("join-user on unknown session {}: {}", sid, e);
            return;
        }

        if let Err(e) = self.manager.join_room(sid, &personal_room(&user_id)).await {
            tracing::warn!("Failed to join personal room for {}: {}", user_id, e);
            return;
        }

        self.presence.register(&user_id, sid).await;
        tracing::info!("User {} joined their room and is now online", user_id);

        self.broadcast_all(&ServerEvent::UserOnline(user_id)).await;

        let online = self.presence.list_online().await;
        if let Err(e) = self
            .emit_to_session(sid, &ServerEvent::OnlineUsers(online))
            .await
        {
            tracing::warn!("Failed to send online-users to {}: {}", sid, e);
        }
    }

    async fn handle_join_conversation(&self, sid: &str, conversation_id: String) {
        if conversation_id.trim().is_empty() {
            tracing::warn!("Rejected join-conversation with empty id on {}", sid);
            return;
        }

        if let Err(e) = self.manager.join_room(sid, &conversation_id).await {
            tracing::warn!("join-conversation failed on {}: {}", sid, e);
            return;
        }
        tracing::info!("Session {} joined conversation: {}", sid, conversation_id);
    }

    /// send-message: validate, persist, enrich, broadcast. The message is
    /// never announced to any client before it is durably appended. Any
    /// failure is reported to the sending connection only.
    async fn handle_send_message(&self, sid: &str, payload: SendMessagePayload) {
        if let Err(e) = self.send_message_inner(sid, payload).await {
            tracing::error!("Socket message error: {}", e);
            let _ = self
                .emit_to_session(
                    sid,
                    &ServerEvent::MessageError("Error sending message".to_string()),
                )
                .await;
        }
    }

    async fn send_message_inner(&self, sid: &str, payload: SendMessagePayload) -> AppResult<()> {
        let remembered = self
            .manager
            .session_user(sid)
            .await
            .ok_or_else(|| AppError::Validation("Connection is not identified".to_string()))?;

        if payload.sender_id.trim().is_empty()
            || payload.receiver_id.trim().is_empty()
            || payload.content.is_empty()
        {
            return Err(AppError::Validation("Malformed message payload".to_string()));
        }

        // The sender field must match the identity remembered at
        // join-user time.
        if payload.sender_id != remembered {
            return Err(AppError::Validation(
                "Sender does not match connection identity".to_string(),
            ));
        }

        let expected = conversation_id_for(&payload.sender_id, &payload.receiver_id);
        if payload.conversation_id != expected {
            return Err(AppError::Validation(
                "Conversation id does not match participants".to_string(),
            ));
        }

        // Persist before any broadcast: no message goes live that a reload
        // of history would not also show.
        let message = self
            .store
            .create(NewMessage {
                sender_id: payload.sender_id.clone(),
                receiver_id: payload.receiver_id.clone(),
                conversation_id: payload.conversation_id.clone(),
                content: payload.content.clone(),
            })
            .await?;

        let sender = self
            .directory
            .find_by_id(&payload.sender_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Sender not found".to_string()))?;

        let sender_name = sender.username.clone();

        let mut outgoing = MessageResponse::from(message);
        outgoing.sender = Some(sender);

        self.broadcast_to_room(
            &payload.conversation_id,
            &ServerEvent::NewMessage(outgoing),
            None,
        )
        .await;

        self.broadcast_to_room(
            &personal_room(&payload.receiver_id),
            &ServerEvent::MessageNotification(MessageNotificationPayload {
                conversation_id: payload.conversation_id,
                message: payload.content,
                sender: sender_name,
            }),
            None,
        )
        .await;

        Ok(())
    }

    /// Typing indicators are transient: no state, re-broadcast to everyone
    /// in the conversation except the sender.
    async fn handle_typing_start(&self, sid: &str, payload: TypingStartPayload) {
        if payload.conversation_id.trim().is_empty() || payload.user_id.trim().is_empty() {
            return;
        }

        self.broadcast_to_room(
            &payload.conversation_id,
            &ServerEvent::UserTyping(UserTypingPayload {
                user_id: payload.user_id,
                username: payload.username,
            }),
            Some(sid),
        )
        .await;
    }

    async fn handle_typing_stop(&self, sid: &str, payload: TypingStopPayload) {
        if payload.conversation_id.trim().is_empty() || payload.user_id.trim().is_empty() {
            return;
        }

        self.broadcast_to_room(
            &payload.conversation_id,
            &ServerEvent::UserStopTyping(UserStopTypingPayload {
                user_id: payload.user_id,
            }),
            Some(sid),
        )
        .await;
    }

    /// delete-message: only the original sender, as remembered on this
    /// connection, may delete. Denied attempts are a silent no-op; the
    /// caller learns nothing, including whether the message exists.
    async fn handle_delete_message(&self, sid: &str, payload: DeleteMessagePayload) {
        let Some(remembered) = self.manager.session_user(sid).await else {
            return;
        };

        let message = match self.store.find_by_id(&payload.message_id).await {
            Ok(found) => found,
            Err(e) => {
                tracing::error!("Delete message lookup error: {}", e);
                let _ = self
                    .emit_to_session(
                        sid,
                        &ServerEvent::MessageError("Error deleting message".to_string()),
                    )
                    .await;
                return;
            }
        };

        let Some(message) = message else {
            return;
        };

        if message.sender_id != remembered {
            return;
        }

        if let Err(e) = self.store.delete_by_id(&message.id).await {
            tracing::error!("Delete message error: {}", e);
            let _ = self
                .emit_to_session(
                    sid,
                    &ServerEvent::MessageError("Error deleting message".to_string()),
                )
                .await;
            return;
        }

        self.broadcast_to_room(
            &message.conversation_id,
            &ServerEvent::MessageDeleted(MessageDeletedPayload {
                message_id: message.id,
            }),
            None,
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::Message;
    use crate::models::user::UserPublicResponse;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::sync::Mutex;

    struct MemoryStore {
        messages: Mutex<HashMap<String, Message>>,
        next_seq: Mutex<i64>,
        fail_writes: bool,
    }

    impl MemoryStore {
        fn new() -> Self {
            Self {
                messages: Mutex::new(HashMap::new()),
                next_seq: Mutex::new(0),
                fail_writes: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail_writes: true,
                ..Self::new()
            }
        }

        async fn len(&self) -> usize {
            self.messages.lock().await.len()
        }
    }

    #[async_trait]
    impl MessageStore for MemoryStore {
        async fn create(&self, message: NewMessage) -> AppResult<Message> {
            if self.fail_writes {
                return Err(AppError::InternalServerError("store down".to_string()));
            }

            let mut seq = self.next_seq.lock().await;
            *seq += 1;

            let stored = Message {
                id: format!("msg-{}", *seq),
                sender_id: message.sender_id,
                receiver_id: message.receiver_id,
                conversation_id: message.conversation_id,
                content: message.content,
                created_at: *seq,
            };

            self.messages
                .lock()
                .await
                .insert(stored.id.clone(), stored.clone());
            Ok(stored)
        }

        async fn find_by_id(&self, id: &str) -> AppResult<Option<Message>> {
            Ok(self.messages.lock().await.get(id).cloned())
        }

        async fn delete_by_id(&self, id: &str) -> AppResult<()> {
            if self.fail_writes {
                return Err(AppError::InternalServerError("store down".to_string()));
            }
            self.messages.lock().await.remove(id);
            Ok(())
        }

        async fn find_by_conversation(&self, conversation_id: &str) -> AppResult<Vec<Message>> {
            let messages = self.messages.lock().await;
            let mut found: Vec<Message> = messages
                .values()
                .filter(|m| m.conversation_id == conversation_id)
                .cloned()
                .collect();
            found.sort_by_key(|m| m.created_at);
            Ok(found)
        }
    }

    struct MemoryDirectory {
        users: HashMap<String, UserPublicResponse>,
    }

    impl MemoryDirectory {
        fn with_users(users: &[(&str, &str)]) -> Self {
            let users = users
                .iter()
                .map(|(id, username)| {
                    (
                        id.to_string(),
                        UserPublicResponse {
                            id: id.to_string(),
                            username: username.to_string(),
                            profile: None,
                        },
                    )
                })
                .collect();
            Self { users }
        }
    }

    #[async_trait]
    impl UserDirectory for MemoryDirectory {
        async fn find_by_id(&self, id: &str) -> AppResult<Option<UserPublicResponse>> {
            Ok(self.users.get(id).cloned())
        }
    }

    fn handler_with(
        store: Arc<MemoryStore>,
        directory: MemoryDirectory,
    ) -> (EventHandler, Arc<MemoryStore>) {
        let handler = EventHandler::new(
            SocketManager::new(),
            Arc::new(PresenceRegistry::new()),
            store.clone(),
            Arc::new(directory),
        );
        (handler, store)
    }

    fn default_handler() -> (EventHandler, Arc<MemoryStore>) {
        handler_with(
            Arc::new(MemoryStore::new()),
            MemoryDirectory::with_users(&[("1", "alice"), ("2", "bob")]),
        )
    }

    async fn connect(handler: &EventHandler, sid: &str) -> UnboundedReceiver<String> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        handler.register_connection(sid, tx).await;
        rx
    }

    fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(serde_json::from_str(&frame).unwrap());
        }
        frames
    }

    fn frames_named<'a>(frames: &'a [Value], event: &str) -> Vec<&'a Value> {
        frames
            .iter()
            .filter(|f| f["event"] == json!(event))
            .collect()
    }

    #[tokio::test]
    async fn test_identify_hydrates_and_announces() {
        let (handler, _store) = default_handler();

        let mut alice = connect(&handler, "sid-a").await;
        handler
            .dispatch("sid-a", ClientEvent::JoinUser("1".to_string()))
            .await;

        let frames = drain(&mut alice);
        // Own user-online broadcast plus the online-users hydration
        assert_eq!(frames_named(&frames, "user-online").len(), 1);
        let online = &frames_named(&frames, "online-users")[0]["data"];
        assert_eq!(online.as_array().unwrap(), &vec![json!("1")]);

        let mut bob = connect(&handler, "sid-b").await;
        handler
            .dispatch("sid-b", ClientEvent::JoinUser("2".to_string()))
            .await;

        // Alice sees bob come online
        let frames = drain(&mut alice);
        assert_eq!(frames_named(&frames, "user-online")[0]["data"], json!("2"));

        // Bob's hydration list holds both users
        let frames = drain(&mut bob);
        let online = frames_named(&frames, "online-users")[0]["data"]
            .as_array()
            .unwrap()
            .clone();
        assert_eq!(online.len(), 2);
    }

    #[tokio::test]
    async fn test_send_message_scenario() {
        let (handler, store) = default_handler();

        let mut alice = connect(&handler, "sid-a").await;
        let mut bob = connect(&handler, "sid-b").await;

        handler
            .dispatch("sid-a", ClientEvent::JoinUser("1".to_string()))
            .await;
        handler
            .dispatch("sid-b", ClientEvent::JoinUser("2".to_string()))
            .await;
        handler
            .dispatch("sid-a", ClientEvent::JoinConversation("1_2".to_string()))
            .await;
        handler
            .dispatch("sid-b", ClientEvent::JoinConversation("1_2".to_string()))
            .await;

        drain(&mut alice);
        drain(&mut bob);

        handler
            .dispatch(
                "sid-a",
                ClientEvent::SendMessage(SendMessagePayload {
                    sender_id: "1".to_string(),
                    receiver_id: "2".to_string(),
                    content: "hi".to_string(),
                    conversation_id: "1_2".to_string(),
                }),
            )
            .await;

        // Bob receives both the conversation broadcast and the personal
        // notification
        let frames = drain(&mut bob);
        let new_messages = frames_named(&frames, "new-message");
        assert_eq!(new_messages.len(), 1);
        assert_eq!(new_messages[0]["data"]["content"], json!("hi"));
        assert_eq!(
            new_messages[0]["data"]["sender"]["username"],
            json!("alice")
        );
        assert_eq!(new_messages[0]["data"]["conversationId"], json!("1_2"));

        let notifications = frames_named(&frames, "message-notification");
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0]["data"]["conversationId"], json!("1_2"));
        assert_eq!(notifications[0]["data"]["message"], json!("hi"));
        assert_eq!(notifications[0]["data"]["sender"], json!("alice"));

        // Persistence happened before the broadcast: history already holds
        // the message
        let history = store.find_by_conversation("1_2").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "hi");

        // No error frames on the sending side
        let frames = drain(&mut alice);
        assert!(frames_named(&frames, "message-error").is_empty());
    }

    #[tokio::test]
    async fn test_send_message_requires_identity() {
        let (handler, store) = default_handler();

        let mut anon = connect(&handler, "sid-x").await;
        handler
            .dispatch(
                "sid-x",
                ClientEvent::SendMessage(SendMessagePayload {
                    sender_id: "1".to_string(),
                    receiver_id: "2".to_string(),
                    content: "hi".to_string(),
                    conversation_id: "1_2".to_string(),
                }),
            )
            .await;

        let frames = drain(&mut anon);
        assert_eq!(frames_named(&frames, "message-error").len(), 1);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_send_message_rejects_spoofed_sender() {
        let (handler, store) = default_handler();

        let mut mallory = connect(&handler, "sid-m").await;
        handler
            .dispatch("sid-m", ClientEvent::JoinUser("2".to_string()))
            .await;
        drain(&mut mallory);

        handler
            .dispatch(
                "sid-m",
                ClientEvent::SendMessage(SendMessagePayload {
                    sender_id: "1".to_string(),
                    receiver_id: "2".to_string(),
                    content: "hi".to_string(),
                    conversation_id: "1_2".to_string(),
                }),
            )
            .await;

        let frames = drain(&mut mallory);
        assert_eq!(frames_named(&frames, "message-error").len(), 1);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_send_message_rejects_conversation_mismatch() {
        let (handler, store) = default_handler();

        let mut alice = connect(&handler, "sid-a").await;
        handler
            .dispatch("sid-a", ClientEvent::JoinUser("1".to_string()))
            .await;
        drain(&mut alice);

        handler
            .dispatch(
                "sid-a",
                ClientEvent::SendMessage(SendMessagePayload {
                    sender_id: "1".to_string(),
                    receiver_id: "2".to_string(),
                    content: "hi".to_string(),
                    conversation_id: "1_3".to_string(),
                }),
            )
            .await;

        let frames = drain(&mut alice);
        assert_eq!(frames_named(&frames, "message-error").len(), 1);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_store_failure_notifies_sender_only() {
        let (handler, _store) = handler_with(
            Arc::new(MemoryStore::failing()),
            MemoryDirectory::with_users(&[("1", "alice"), ("2", "bob")]),
        );

        let mut alice = connect(&handler, "sid-a").await;
        let mut bob = connect(&handler, "sid-b").await;
        handler
            .dispatch("sid-a", ClientEvent::JoinUser("1".to_string()))
            .await;
        handler
            .dispatch("sid-b", ClientEvent::JoinUser("2".to_string()))
            .await;
        handler
            .dispatch("sid-b", ClientEvent::JoinConversation("1_2".to_string()))
            .await;
        drain(&mut alice);
        drain(&mut bob);

        handler
            .dispatch(
                "sid-a",
                ClientEvent::SendMessage(SendMessagePayload {
                    sender_id: "1".to_string(),
                    receiver_id: "2".to_string(),
                    content: "hi".to_string(),
                    conversation_id: "1_2".to_string(),
                }),
            )
            .await;

        let frames = drain(&mut alice);
        assert_eq!(frames_named(&frames, "message-error").len(), 1);

        // The failure never leaks to other participants
        let frames = drain(&mut bob);
        assert!(frames.is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_owner() {
        let (handler, store) = default_handler();

        let mut alice = connect(&handler, "sid-a").await;
        let mut bob = connect(&handler, "sid-b").await;
        handler
            .dispatch("sid-a", ClientEvent::JoinUser("1".to_string()))
            .await;
        handler
            .dispatch("sid-b", ClientEvent::JoinUser("2".to_string()))
            .await;
        handler
            .dispatch("sid-a", ClientEvent::JoinConversation("1_2".to_string()))
            .await;
        handler
            .dispatch("sid-b", ClientEvent::JoinConversation("1_2".to_string()))
            .await;

        handler
            .dispatch(
                "sid-a",
                ClientEvent::SendMessage(SendMessagePayload {
                    sender_id: "1".to_string(),
                    receiver_id: "2".to_string(),
                    content: "hi".to_string(),
                    conversation_id: "1_2".to_string(),
                }),
            )
            .await;
        drain(&mut alice);
        drain(&mut bob);

        handler
            .dispatch(
                "sid-a",
                ClientEvent::DeleteMessage(DeleteMessagePayload {
                    message_id: "msg-1".to_string(),
                    conversation_id: "1_2".to_string(),
                }),
            )
            .await;

        assert_eq!(store.len().await, 0);

        // Exactly one message-deleted per conversation subscriber
        let frames = drain(&mut bob);
        let deleted = frames_named(&frames, "message-deleted");
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0]["data"]["messageId"], json!("msg-1"));
    }

    #[tokio::test]
    async fn test_delete_by_non_owner_is_silent() {
        let (handler, store) = default_handler();

        let mut alice = connect(&handler, "sid-a").await;
        let mut bob = connect(&handler, "sid-b").await;
        handler
            .dispatch("sid-a", ClientEvent::JoinUser("1".to_string()))
            .await;
        handler
            .dispatch("sid-b", ClientEvent::JoinUser("2".to_string()))
            .await;
        handler
            .dispatch("sid-a", ClientEvent::JoinConversation("1_2".to_string()))
            .await;
        handler
            .dispatch("sid-b", ClientEvent::JoinConversation("1_2".to_string()))
            .await;

        handler
            .dispatch(
                "sid-a",
                ClientEvent::SendMessage(SendMessagePayload {
                    sender_id: "1".to_string(),
                    receiver_id: "2".to_string(),
                    content: "hi".to_string(),
                    conversation_id: "1_2".to_string(),
                }),
            )
            .await;
        drain(&mut alice);
        drain(&mut bob);

        // Bob tries to delete alice's message
        handler
            .dispatch(
                "sid-b",
                ClientEvent::DeleteMessage(DeleteMessagePayload {
                    message_id: "msg-1".to_string(),
                    conversation_id: "1_2".to_string(),
                }),
            )
            .await;

        // Message stays; nobody hears anything, including the caller
        assert_eq!(store.len().await, 1);
        assert!(drain(&mut alice).is_empty());
        assert!(drain(&mut bob).is_empty());
    }

    #[tokio::test]
    async fn test_typing_excludes_sender() {
        let (handler, _store) = default_handler();

        let mut alice = connect(&handler, "sid-a").await;
        let mut bob = connect(&handler, "sid-b").await;
        handler
            .dispatch("sid-a", ClientEvent::JoinConversation("1_2".to_string()))
            .await;
        handler
            .dispatch("sid-b", ClientEvent::JoinConversation("1_2".to_string()))
            .await;

        handler
            .dispatch(
                "sid-a",
                ClientEvent::TypingStart(TypingStartPayload {
                    conversation_id: "1_2".to_string(),
                    user_id: "1".to_string(),
                    username: Some("alice".to_string()),
                }),
            )
            .await;

        let frames = drain(&mut bob);
        let typing = frames_named(&frames, "user-typing");
        assert_eq!(typing.len(), 1);
        assert_eq!(typing[0]["data"]["userId"], json!("1"));
        assert_eq!(typing[0]["data"]["username"], json!("alice"));

        // The sender never hears their own indicator
        assert!(drain(&mut alice).is_empty());

        handler
            .dispatch(
                "sid-a",
                ClientEvent::TypingStop(TypingStopPayload {
                    conversation_id: "1_2".to_string(),
                    user_id: "1".to_string(),
                }),
            )
            .await;

        let frames = drain(&mut bob);
        assert_eq!(frames_named(&frames, "user-stop-typing").len(), 1);
        assert!(drain(&mut alice).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_without_identify_is_silent() {
        let (handler, _store) = default_handler();

        let mut alice = connect(&handler, "sid-a").await;
        handler
            .dispatch("sid-a", ClientEvent::JoinUser("1".to_string()))
            .await;
        drain(&mut alice);

        let _anon = connect(&handler, "sid-anon").await;
        handler.handle_disconnect("sid-anon").await;

        let frames = drain(&mut alice);
        assert!(frames_named(&frames, "user-offline").is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_broadcasts_offline() {
        let (handler, _store) = default_handler();

        let mut alice = connect(&handler, "sid-a").await;
        let _bob = connect(&handler, "sid-b").await;
        handler
            .dispatch("sid-a", ClientEvent::JoinUser("1".to_string()))
            .await;
        handler
            .dispatch("sid-b", ClientEvent::JoinUser("2".to_string()))
            .await;
        drain(&mut alice);

        handler.handle_disconnect("sid-b").await;

        let frames = drain(&mut alice);
        let offline = frames_named(&frames, "user-offline");
        assert_eq!(offline.len(), 1);
        assert_eq!(offline[0]["data"], json!("2"));
        assert_eq!(handler.presence().list_online().await, vec!["1".to_string()]);
    }

    #[test]
    fn test_client_event_envelope_decoding() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"event":"join-user","data":"42"}"#).unwrap();
        assert!(matches!(event, ClientEvent::JoinUser(ref id) if id == "42"));

        let event: ClientEvent = serde_json::from_str(
            r#"{"event":"send-message","data":{"senderId":"1","receiverId":"2","content":"hi","conversationId":"1_2"}}"#,
        )
        .unwrap();
        match event {
            ClientEvent::SendMessage(payload) => {
                assert_eq!(payload.sender_id, "1");
                assert_eq!(payload.conversation_id, "1_2");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // Unknown events and malformed payloads fail at the boundary
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"no-such-event","data":{}}"#)
            .is_err());
        assert!(serde_json::from_str::<ClientEvent>(
            r#"{"event":"delete-message","data":{"messageId":7}}"#
        )
        .is_err());
    }

    #[test]
    fn test_server_event_envelope_encoding() {
        let frame = serde_json::to_value(ServerEvent::MessageDeleted(MessageDeletedPayload {
            message_id: "m-1".to_string(),
        }))
        .unwrap();
        assert_eq!(
            frame,
            json!({"event": "message-deleted", "data": {"messageId": "m-1"}})
        );

        let frame = serde_json::to_value(ServerEvent::UserOnline("42".to_string())).unwrap();
        assert_eq!(frame, json!({"event": "user-online", "data": "42"}));
    }
}
