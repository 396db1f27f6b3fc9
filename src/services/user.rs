use crate::db::Database;
use crate::error::AppResult;
use crate::models::user::{User, UserPublicResponse};
use crate::realtime::UserDirectory;
use async_trait::async_trait;

#[derive(Clone)]
pub struct UserService {
    db: Database,
}

impl UserService {
    pub fn new(db: &Database) -> Self {
        UserService { db: db.clone() }
    }

    pub async fn get_user_by_id(&self, id: &str) -> AppResult<Option<User>> {
        let result = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, role, profile, created_at
            FROM "user"
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db.pool)
        .await?;

        Ok(result)
    }

    /// Chat roster: every user except the caller, public fields only.
    pub async fn get_users_excluding(&self, user_id: &str) -> AppResult<Vec<UserPublicResponse>> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, role, profile, created_at
            FROM "user"
            WHERE id != $1
            ORDER BY username ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db.pool)
        .await?;

        Ok(users.into_iter().map(UserPublicResponse::from).collect())
    }
}

#[async_trait]
impl UserDirectory for UserService {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<UserPublicResponse>> {
        Ok(self
            .get_user_by_id(id)
            .await?
            .map(UserPublicResponse::from))
    }
}
