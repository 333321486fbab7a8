use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::user::UserSummary;

/// A direct message. Immutable once the server has assigned its id.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    #[serde(rename = "conteudo")]
    pub content: String,
    #[serde(rename = "dataEnvio", with = "super::timestamp")]
    pub sent_at: DateTime<Utc>,
    #[serde(rename = "lida", default)]
    pub read: bool,
    #[serde(rename = "remetente")]
    pub sender: UserSummary,
    #[serde(rename = "destinatario")]
    pub recipient: UserSummary,
}

impl Message {
    /// The participant that is not `self_id`.
    ///
    /// Returns `None` when `self_id` is on neither side or the message is
    /// addressed to its own sender.
    pub fn peer_of(&self, self_id: i64) -> Option<&UserSummary> {
        if self.sender.id == self.recipient.id {
            return None;
        }
        if self.sender.id == self_id {
            Some(&self.recipient)
        } else if self.recipient.id == self_id {
            Some(&self.sender)
        } else {
            None
        }
    }

    pub fn is_from(&self, user_id: i64) -> bool {
        self.sender.id == user_id
    }
}
