use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::Message;
use super::user::UserSummary;

/// Latest exchange with one peer. Keyed by `user.id`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub user: UserSummary,
    #[serde(default)]
    pub last_message: Option<Message>,
}

impl Conversation {
    pub fn new(user: UserSummary, last_message: Option<Message>) -> Self {
        Self { user, last_message }
    }

    pub fn peer_id(&self) -> i64 {
        self.user.id
    }

    pub fn last_sent_at(&self) -> Option<DateTime<Utc>> {
        self.last_message.as_ref().map(|m| m.sent_at)
    }
}
