use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::models::message::{Message, NewMessage};
use crate::realtime::MessageStore;
use crate::utils::time::current_timestamp_seconds;
use async_trait::async_trait;
use uuid::Uuid;

#[derive(Clone)]
pub struct MessageService {
    db: Database,
}

impl MessageService {
    pub fn new(db: &Database) -> Self {
        MessageService { db: db.clone() }
    }

    pub async fn create_message(&self, message: NewMessage) -> AppResult<Message> {
        let id = Uuid::new_v4().to_string();
        let now = current_timestamp_seconds();

        sqlx::query(
            r#"
            INSERT INTO message (id, sender_id, receiver_id, conversation_id, content, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&id)
        .bind(&message.sender_id)
        .bind(&message.receiver_id)
        .bind(&message.conversation_id)
        .bind(&message.content)
        .bind(now)
        .execute(&self.db.pool)
        .await?;

        self.get_message_by_id(&id)
            .await?
            .ok_or_else(|| AppError::InternalServerError("Failed to create message".to_string()))
    }

    pub async fn get_message_by_id(&self, id: &str) -> AppResult<Option<Message>> {
        let result = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, sender_id, receiver_id, conversation_id, content, created_at
            FROM message
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db.pool)
        .await?;

        Ok(result)
    }

    pub async fn delete_message(&self, id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM message WHERE id = $1")
            .bind(id)
            .execute(&self.db.pool)
            .await?;

        Ok(())
    }

    /// Full history of a conversation, oldest first.
    pub async fn get_conversation_messages(
        &self,
        conversation_id: &str,
    ) -> AppResult<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, sender_id, receiver_id, conversation_id, content, created_at
            FROM message
            WHERE conversation_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.db.pool)
        .await?;

        Ok(messages)
    }
}

#[async_trait]
impl MessageStore for MessageService {
    async fn create(&self, message: NewMessage) -> AppResult<Message> {
        self.create_message(message).await
    }

    async fn find_by_id(&self, id: &str) -> AppResult<Option<Message>> {
        self.get_message_by_id(id).await
    }

    async fn delete_by_id(&self, id: &str) -> AppResult<()> {
        self.delete_message(id).await
    }

    async fn find_by_conversation(&self, conversation_id: &str) -> AppResult<Vec<Message>> {
        self.get_conversation_messages(conversation_id).await
    }
}
