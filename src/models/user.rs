use serde::{Deserialize, Serialize};
use sqlx::types::JsonValue;
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub profile: Option<JsonValue>,
    pub created_at: i64,
}

/// Public-safe projection of a user: what gets attached to outgoing
/// messages and returned in the chat roster. Never carries credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserPublicResponse {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<JsonValue>,
}

impl From<User> for UserPublicResponse {
    fn from(user: User) -> Self {
        UserPublicResponse {
            id: user.id,
            username: user.username,
            profile: user.profile,
        }
    }
}
