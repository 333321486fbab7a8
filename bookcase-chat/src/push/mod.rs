//! Push channel: server-initiated message delivery.

mod client;
pub mod frame;

pub use client::StompPushChannel;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::ChatConfig;
use crate::error::Result;
use crate::models::Message;

/// Where a push channel hands decoded messages to the session
pub type PushSink = mpsc::UnboundedSender<Message>;

/// Private topic carrying every message addressed to or sent by `user_id`
pub fn user_topic(user_id: i64) -> String {
    format!("/user/{}/topic/mensagens", user_id)
}

#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Start delivering `user_id`'s messages into `sink`.
    ///
    /// Returns once the connection loop is running; drops and reconnects are
    /// handled inside the channel.
    async fn connect(&self, user_id: i64, sink: PushSink) -> Result<()>;

    fn disconnect(&self);

    fn is_connected(&self) -> bool;
}

/// Channel that never delivers. The session stays correct through explicit loads.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPushChannel;

#[async_trait]
impl PushChannel for NullPushChannel {
    async fn connect(&self, user_id: i64, _sink: PushSink) -> Result<()> {
        info!(user_id, "Push disabled, session runs pull-only");
        Ok(())
    }

    fn disconnect(&self) {}

    fn is_connected(&self) -> bool {
        false
    }
}

/// Pick the push implementation for `config`.
pub fn from_config(config: &ChatConfig) -> Box<dyn PushChannel> {
    match &config.push_url {
        Some(url) => Box::new(StompPushChannel::new(url.clone(), config)),
        None => Box::new(NullPushChannel),
    }
}
