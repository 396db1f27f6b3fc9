use crate::models::user::UserPublicResponse;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A persisted chat message. Immutable once stored, except for deletion.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub conversation_id: String,
    pub content: String,
    pub created_at: i64,
}

/// Input for appending a message to the store. The id and timestamp are
/// assigned by the store at insert time.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub conversation_id: String,
    pub content: String,
}

/// Outgoing message DTO: the persisted record plus the sender's public
/// profile projection. Built per broadcast; the stored row never carries
/// the denormalized profile data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub conversation_id: String,
    pub content: String,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<UserPublicResponse>,
}

impl From<Message> for MessageResponse {
    fn from(msg: Message) -> Self {
        MessageResponse {
            id: msg.id,
            sender_id: msg.sender_id,
            receiver_id: msg.receiver_id,
            conversation_id: msg.conversation_id,
            content: msg.content,
            created_at: msg.created_at,
            sender: None, // Populated by the service layer
        }
    }
}
