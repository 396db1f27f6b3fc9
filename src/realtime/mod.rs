//! Realtime messaging and presence subsystem.
//!
//! Architecture:
//! - Conversation: deterministic two-party channel ids
//! - Presence: userId -> live connection registry
//! - Manager: session and room membership bookkeeping
//! - Events: the event engine binding presence, routing and persistence
//! - Socket: the actix-ws gateway feeding the engine

pub mod conversation;
pub mod events;
pub mod manager;
pub mod presence;
pub mod socket;

use crate::error::AppResult;
use crate::models::message::{Message, NewMessage};
use crate::models::user::UserPublicResponse;
use async_trait::async_trait;

/// Durable append-only log of chat messages, keyed by conversation.
/// The engine never caches messages beyond a single send/broadcast.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create(&self, message: NewMessage) -> AppResult<Message>;
    async fn find_by_id(&self, id: &str) -> AppResult<Option<Message>>;
    async fn delete_by_id(&self, id: &str) -> AppResult<()>;
    async fn find_by_conversation(&self, conversation_id: &str) -> AppResult<Vec<Message>>;
}

/// User lookup with a public-safe field projection.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<UserPublicResponse>>;
}

pub use events::EventHandler;
pub use manager::SocketManager;
pub use presence::PresenceRegistry;
