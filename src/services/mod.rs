pub mod message;
pub mod user;

pub use message::MessageService;
pub use user::UserService;
