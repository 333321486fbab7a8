//! REST side of the chat backend.

mod http;

pub use http::HttpGateway;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::input::SendMessageInput;
use crate::models::{Conversation, Message};

/// The three chat endpoints the session depends on.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Conversations of `self_id`, one per peer.
    async fn list_conversations(&self, self_id: i64) -> Result<Vec<Conversation>>;

    /// History between `self_id` and `peer_id`, oldest first.
    async fn list_messages(&self, self_id: i64, peer_id: i64) -> Result<Vec<Message>>;

    /// Persists a message and returns it with its server-assigned id and timestamp.
    async fn send_message(&self, input: &SendMessageInput) -> Result<Message>;
}
