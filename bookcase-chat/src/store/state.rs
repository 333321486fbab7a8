//! Client-side conversation cache.
//!
//! Every method here is a synchronous state transition; the async side lives
//! in `session`. Histories are kept sorted by `(sent_at, id)` and never hold
//! two messages with the same id. The conversation list is ordered most
//! recent first and is re-ordered in place on every update.

use std::collections::{HashMap, HashSet};

use crate::error::{ChatError, Result};
use crate::models::{Conversation, Message, UserSummary};

/// In-flight operation kinds, each with its own busy flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyFlag {
    Conversations,
    Messages,
    Sending,
}

#[derive(Debug, Default)]
pub struct ChatState {
    conversations: Vec<Conversation>,
    histories: HashMap<i64, Vec<Message>>,
    selected_peer: Option<i64>,
    filter: String,
    loading_conversations: u32,
    loading_messages: u32,
    sending: u32,
    conversations_generation: u64,
    history_generations: HashMap<i64, u64>,
    /// Messages applied to a peer while a history load for it is in flight.
    pending_appends: HashMap<i64, Vec<Message>>,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    // --- reads -------------------------------------------------------------

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn conversation(&self, peer_id: i64) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.user.id == peer_id)
    }

    /// History with `peer_id`, oldest first. Empty if never loaded.
    pub fn messages(&self, peer_id: i64) -> &[Message] {
        self.histories
            .get(&peer_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn has_history(&self, peer_id: i64) -> bool {
        self.histories.contains_key(&peer_id)
    }

    pub fn selected_peer(&self) -> Option<i64> {
        self.selected_peer
    }

    pub fn selected_conversation(&self) -> Option<&Conversation> {
        self.selected_peer.and_then(|id| self.conversation(id))
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Conversations whose peer name or email contains the filter, ignoring case.
    pub fn filtered_conversations(&self) -> Vec<&Conversation> {
        let needle = self.filter.trim().to_lowercase();
        self.conversations
            .iter()
            .filter(|c| needle.is_empty() || c.user.matches(&needle))
            .collect()
    }

    pub fn total_unread(&self) -> u32 {
        self.conversations
            .iter()
            .filter_map(|c| c.user.unread)
            .sum()
    }

    pub fn is_loading_conversations(&self) -> bool {
        self.loading_conversations > 0
    }

    pub fn is_loading_messages(&self) -> bool {
        self.loading_messages > 0
    }

    pub fn is_sending(&self) -> bool {
        self.sending > 0
    }

    // --- plain setters -----------------------------------------------------

    pub fn select_peer(&mut self, peer_id: Option<i64>) {
        self.selected_peer = peer_id;
    }

    pub fn set_filter(&mut self, text: impl Into<String>) {
        self.filter = text.into();
    }

    /// Reset the unread counter of `peer_id`, if it has a conversation.
    pub fn mark_read(&mut self, peer_id: i64) {
        if let Some(conv) = self.conversations.iter_mut().find(|c| c.user.id == peer_id) {
            conv.user.unread = Some(0);
        }
    }

    pub(crate) fn begin_busy(&mut self, flag: BusyFlag) {
        *self.busy_counter(flag) += 1;
    }

    pub(crate) fn end_busy(&mut self, flag: BusyFlag) {
        let counter = self.busy_counter(flag);
        *counter = counter.saturating_sub(1);
    }

    fn busy_counter(&mut self, flag: BusyFlag) -> &mut u32 {
        match flag {
            BusyFlag::Conversations => &mut self.loading_conversations,
            BusyFlag::Messages => &mut self.loading_messages,
            BusyFlag::Sending => &mut self.sending,
        }
    }

    // --- resyncs -----------------------------------------------------------

    /// Replace the conversation list wholesale. Later duplicates of a peer are dropped.
    pub fn set_conversations(&mut self, list: Vec<Conversation>) {
        let mut seen = HashSet::new();
        self.conversations = list
            .into_iter()
            .filter(|c| seen.insert(c.user.id))
            .collect();
    }

    /// Replace the history with `peer_id` wholesale.
    ///
    /// The list is sorted and de-duplicated first. If its newest message is
    /// newer than what the conversation list knows, the conversation is
    /// updated (or created) from it.
    pub fn set_messages(&mut self, peer_id: i64, mut list: Vec<Message>) {
        list.sort_by_key(|m| (m.sent_at, m.id));
        let mut seen = HashSet::new();
        list.retain(|m| seen.insert(m.id));

        let newest = list.last().cloned();
        self.histories.insert(peer_id, list);

        if let Some(message) = newest {
            let peer = if message.sender.id == peer_id {
                message.sender.clone()
            } else {
                message.recipient.clone()
            };
            if peer.id == peer_id {
                self.promote_conversation(peer, message);
            }
        }
    }

    pub(crate) fn begin_conversations_load(&mut self) -> u64 {
        self.conversations_generation += 1;
        self.conversations_generation
    }

    /// Apply a conversation list unless a newer load was issued meanwhile.
    pub(crate) fn finish_conversations_load(&mut self, generation: u64, list: Vec<Conversation>) -> bool {
        if generation != self.conversations_generation {
            return false;
        }
        self.set_conversations(list);
        true
    }

    /// Start tracking a history load. Appends recorded for earlier loads
    /// are dropped; only what arrives from here on survives the snapshot.
    pub(crate) fn begin_history_load(&mut self, peer_id: i64) -> u64 {
        let generation = self.history_generations.entry(peer_id).or_insert(0);
        *generation += 1;
        self.pending_appends.insert(peer_id, Vec::new());
        *generation
    }

    fn is_current_history_load(&self, peer_id: i64, generation: u64) -> bool {
        self.history_generations.get(&peer_id) == Some(&generation)
    }

    /// Apply a fetched history unless a newer load for the peer was issued.
    ///
    /// Messages applied while the request was in flight are merged back on
    /// top of the snapshot.
    pub(crate) fn finish_history_load(&mut self, peer_id: i64, generation: u64, list: Vec<Message>) -> bool {
        if !self.is_current_history_load(peer_id, generation) {
            return false;
        }
        let pending = self.pending_appends.remove(&peer_id).unwrap_or_default();
        self.set_messages(peer_id, list);
        for message in &pending {
            self.insert_into_history(peer_id, message);
        }
        true
    }

    /// Forget a failed or cancelled load; the previous history stays in place.
    pub(crate) fn abandon_history_load(&mut self, peer_id: i64, generation: u64) {
        if self.is_current_history_load(peer_id, generation) {
            self.pending_appends.remove(&peer_id);
        }
    }

    // --- merges ------------------------------------------------------------

    /// Merge a server-authoritative message, sent or received.
    ///
    /// The peer is whichever participant is not `self_id`. Returns `false`
    /// when the message was already known.
    pub fn receive_message(&mut self, message: Message, self_id: i64) -> Result<bool> {
        let peer = message.peer_of(self_id).cloned().ok_or_else(|| {
            ChatError::Validation(format!(
                "Message {} ({} -> {}) does not involve user {}",
                message.id, message.sender.id, message.recipient.id, self_id
            ))
        })?;
        Ok(self.apply_message(peer, message))
    }

    /// Append `message` to the history with `peer` and move the peer's
    /// conversation to the front. No-op if the id is already in the history.
    pub(crate) fn apply_message(&mut self, peer: UserSummary, message: Message) -> bool {
        if !self.insert_into_history(peer.id, &message) {
            return false;
        }
        if let Some(pending) = self.pending_appends.get_mut(&peer.id) {
            pending.push(message.clone());
        }
        self.promote_conversation(peer, message);
        true
    }

    fn insert_into_history(&mut self, peer_id: i64, message: &Message) -> bool {
        let history = self.histories.entry(peer_id).or_default();
        if history.iter().any(|m| m.id == message.id) {
            return false;
        }
        let key = (message.sent_at, message.id);
        let idx = history.partition_point(|m| (m.sent_at, m.id) <= key);
        history.insert(idx, message.clone());
        true
    }

    /// Set `message` as the peer's last message and re-insert the entry at
    /// the front. Late, older deliveries leave the entry where it is.
    fn promote_conversation(&mut self, peer: UserSummary, message: Message) {
        let conv = match self.conversations.iter().position(|c| c.user.id == peer.id) {
            Some(idx) => {
                let current = self.conversations[idx].last_sent_at();
                let is_older = current.is_some_and(|at| at > message.sent_at);
                let is_same = self.conversations[idx]
                    .last_message
                    .as_ref()
                    .is_some_and(|m| m.id == message.id);
                if is_older || is_same {
                    return;
                }
                let mut conv = self.conversations.remove(idx);
                conv.last_message = Some(message);
                conv
            }
            None => Conversation::new(peer, Some(message)),
        };
        self.insert_by_recency(conv);
    }

    /// Index 0, unless leading entries already carry a strictly newer message.
    fn insert_by_recency(&mut self, conv: Conversation) {
        let at = conv.last_sent_at();
        let idx = self
            .conversations
            .iter()
            .position(|c| match (c.last_sent_at(), at) {
                (Some(theirs), Some(ours)) => theirs <= ours,
                _ => true,
            })
            .unwrap_or(self.conversations.len());
        self.conversations.insert(idx, conv);
    }
}
