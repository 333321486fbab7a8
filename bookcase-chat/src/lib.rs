//! Bookcase chat client core
//!
//! Keeps a signed-in user's conversation list and per-peer histories in sync
//! with the chat backend through a REST gateway and a STOMP push channel.

pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod push;
pub mod store;

pub use config::ChatConfig;
pub use error::{ChatError, Result};
pub use gateway::{ChatGateway, HttpGateway};
pub use models::input::SendMessageInput;
pub use models::{Conversation, Message, UserSummary};
pub use push::{NullPushChannel, PushChannel, StompPushChannel};
pub use store::{ChatEvent, ChatSession, ChatState};
