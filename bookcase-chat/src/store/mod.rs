//! Conversation store: cached state and the session that drives it.

mod session;
mod state;

pub use session::ChatSession;
pub use state::{BusyFlag, ChatState};

use crate::models::Message;

/// State changes published by a [`ChatSession`].
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// The conversation list was replaced
    ConversationsLoaded { count: usize },
    /// The history with a peer was replaced
    HistoryLoaded { peer_id: i64, count: usize },
    /// A message was sent or received and merged
    MessageAdded { peer_id: i64, message: Message },
}
