use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::state::{BusyFlag, ChatState};
use super::ChatEvent;
use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::gateway::{ChatGateway, HttpGateway};
use crate::models::input::SendMessageInput;
use crate::models::{Conversation, Message};
use crate::push::{self, NullPushChannel, PushChannel};

const EVENT_CAPACITY: usize = 256;

fn lock(state: &Mutex<ChatState>) -> MutexGuard<'_, ChatState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Raises a busy flag for as long as it lives.
///
/// The flag drops back on every exit path, including errors and a cancelled
/// future.
struct BusyGuard<'a> {
    state: &'a Mutex<ChatState>,
    flag: BusyFlag,
}

impl<'a> BusyGuard<'a> {
    fn acquire(state: &'a Mutex<ChatState>, flag: BusyFlag) -> Self {
        lock(state).begin_busy(flag);
        Self { state, flag }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        lock(self.state).end_busy(self.flag);
    }
}

/// Tracks one history load. Dropping it unsettled, on failure or when the
/// load future is cancelled, stops recording appends for that generation.
struct HistoryLoad<'a> {
    state: &'a Mutex<ChatState>,
    peer_id: i64,
    generation: u64,
    settled: bool,
}

impl<'a> HistoryLoad<'a> {
    fn begin(state: &'a Mutex<ChatState>, peer_id: i64) -> Self {
        let generation = lock(state).begin_history_load(peer_id);
        Self {
            state,
            peer_id,
            generation,
            settled: false,
        }
    }

    /// Apply the snapshot; false when a newer load superseded this one.
    fn finish(mut self, list: Vec<Message>) -> bool {
        self.settled = true;
        lock(self.state).finish_history_load(self.peer_id, self.generation, list)
    }
}

impl Drop for HistoryLoad<'_> {
    fn drop(&mut self) {
        if !self.settled {
            lock(self.state).abandon_history_load(self.peer_id, self.generation);
        }
    }
}

/// One signed-in user's chat: the cached state plus the gateway and push
/// channel that feed it.
///
/// All methods take `&self`. The state lock is only held for synchronous
/// transitions, never across a request.
pub struct ChatSession {
    self_id: i64,
    gateway: Arc<dyn ChatGateway>,
    push: Box<dyn PushChannel>,
    state: Mutex<ChatState>,
    events: broadcast::Sender<ChatEvent>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl ChatSession {
    /// Pull-only session.
    pub fn new(self_id: i64, gateway: Arc<dyn ChatGateway>) -> Arc<Self> {
        Self::with_push(self_id, gateway, Box::new(NullPushChannel))
    }

    pub fn with_push(
        self_id: i64,
        gateway: Arc<dyn ChatGateway>,
        push: Box<dyn PushChannel>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            self_id,
            gateway,
            push,
            state: Mutex::new(ChatState::new()),
            events,
            listener: Mutex::new(None),
        })
    }

    /// Session backed by the REST gateway and whichever push channel the
    /// configuration selects.
    pub fn from_config(config: &ChatConfig, self_id: i64) -> Result<Arc<Self>> {
        let gateway = HttpGateway::new(config)?;
        Ok(Self::with_push(
            self_id,
            Arc::new(gateway),
            push::from_config(config),
        ))
    }

    pub fn self_id(&self) -> i64 {
        self.self_id
    }

    fn state(&self) -> MutexGuard<'_, ChatState> {
        lock(&self.state)
    }

    fn emit(&self, event: ChatEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Change notifications for a presentation layer.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Run `f` against a consistent view of the state.
    pub fn read<R>(&self, f: impl FnOnce(&ChatState) -> R) -> R {
        f(&self.state())
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.state().conversations().to_vec()
    }

    pub fn filtered_conversations(&self) -> Vec<Conversation> {
        self.state()
            .filtered_conversations()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn messages(&self, peer_id: i64) -> Vec<Message> {
        self.state().messages(peer_id).to_vec()
    }

    pub fn selected_peer(&self) -> Option<i64> {
        self.state().selected_peer()
    }

    pub fn is_loading_conversations(&self) -> bool {
        self.state().is_loading_conversations()
    }

    pub fn is_loading_messages(&self) -> bool {
        self.state().is_loading_messages()
    }

    pub fn is_sending(&self) -> bool {
        self.state().is_sending()
    }

    pub fn set_filter(&self, text: impl Into<String>) {
        self.state().set_filter(text);
    }

    /// Fetch the conversation list and replace the cached one.
    ///
    /// A response that arrives after a newer call was issued is dropped.
    pub async fn load_conversations(&self) -> Result<()> {
        let _busy = BusyGuard::acquire(&self.state, BusyFlag::Conversations);
        let generation = self.state().begin_conversations_load();

        let list = self
            .gateway
            .list_conversations(self.self_id)
            .await
            .inspect_err(|e| warn!(error = %e, "Failed to load conversations"))?;

        let count = list.len();
        let applied = self.state().finish_conversations_load(generation, list);
        if applied {
            info!(count, "Conversations loaded");
            self.emit(ChatEvent::ConversationsLoaded { count });
        } else {
            debug!(generation, "Discarded superseded conversation list");
        }
        Ok(())
    }

    /// Fetch the history with `peer_id` and replace the cached one.
    ///
    /// On failure the previous history stays in place.
    pub async fn load_messages(&self, peer_id: i64) -> Result<()> {
        let _busy = BusyGuard::acquire(&self.state, BusyFlag::Messages);
        let load = HistoryLoad::begin(&self.state, peer_id);
        let generation = load.generation;

        match self.gateway.list_messages(self.self_id, peer_id).await {
            Ok(list) => {
                let applied = load.finish(list);
                if applied {
                    let count = self.state().messages(peer_id).len();
                    debug!(peer_id, count, "History loaded");
                    self.emit(ChatEvent::HistoryLoaded { peer_id, count });
                } else {
                    debug!(peer_id, generation, "Discarded superseded history");
                }
                Ok(())
            }
            Err(e) => {
                drop(load);
                warn!(peer_id, error = %e, "Failed to load history");
                Err(e)
            }
        }
    }

    /// Send `text` to `peer_id` and merge the stored message the server returns.
    ///
    /// Input is trimmed and validated before any request; on any failure
    /// the cache is left exactly as it was.
    pub async fn send_message(&self, peer_id: i64, text: &str) -> Result<Message> {
        let input = SendMessageInput::new(self.self_id, peer_id, text)?;

        let _busy = BusyGuard::acquire(&self.state, BusyFlag::Sending);
        let saved = self
            .gateway
            .send_message(&input)
            .await
            .inspect_err(|e| warn!(peer_id, error = %e, "Failed to send message"))?;

        let peer = saved.peer_of(self.self_id).cloned().ok_or_else(|| {
            ChatError::Validation(format!(
                "Server returned message {} outside the conversation with {}",
                saved.id, peer_id
            ))
        })?;

        if self.state().apply_message(peer.clone(), saved.clone()) {
            self.emit(ChatEvent::MessageAdded {
                peer_id: peer.id,
                message: saved.clone(),
            });
        }
        info!(peer_id = peer.id, message_id = saved.id, "Message sent");
        Ok(saved)
    }

    /// Merge a message delivered by the push channel.
    ///
    /// Returns `false` for a duplicate delivery.
    pub fn receive_message(&self, message: Message) -> Result<bool> {
        let message_id = message.id;
        let peer_id = message.peer_of(self.self_id).map(|p| p.id);
        let applied = self
            .state()
            .receive_message(message.clone(), self.self_id)?;

        if let (true, Some(peer_id)) = (applied, peer_id) {
            debug!(peer_id, message_id, "Message received");
            self.emit(ChatEvent::MessageAdded { peer_id, message });
        }
        Ok(applied)
    }

    /// Select `peer_id`, clear its unread counter and load its history.
    pub async fn open_peer(&self, peer_id: i64) -> Result<()> {
        {
            let mut state = self.state();
            state.select_peer(Some(peer_id));
            state.mark_read(peer_id);
        }
        self.load_messages(peer_id).await
    }

    pub fn close_peer(&self) {
        self.state().select_peer(None);
    }

    /// Connect the push channel and merge everything it delivers.
    ///
    /// A failure leaves the session working pull-only.
    pub async fn start_push(self: &Arc<Self>) -> Result<()> {
        let (sink, mut inbox) = mpsc::unbounded_channel();
        self.push.connect(self.self_id, sink).await?;

        let session: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(message) = inbox.recv().await {
                let Some(session) = session.upgrade() else {
                    break;
                };
                match session.receive_message(message) {
                    Ok(true) => {}
                    Ok(false) => debug!("Ignored duplicate delivery"),
                    Err(e) => warn!(error = %e, "Dropped pushed message"),
                }
            }
            debug!("Push listener stopped");
        });

        let previous = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(())
    }

    pub fn is_push_connected(&self) -> bool {
        self.push.is_connected()
    }

    /// Close the push channel and stop listening.
    pub fn shutdown(&self) {
        self.push.disconnect();
        let handle = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
