pub mod message;
pub mod user;

pub use user::User;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: Option<i64>,
    pub iat: Option<i64>,
}
