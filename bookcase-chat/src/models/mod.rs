mod conversation;
pub mod input;
mod message;
mod timestamp;
mod user;

pub use conversation::Conversation;
pub use message::Message;
pub use user::UserSummary;
