use bookcase_chat::{ChatConfig, ChatError, ChatEvent, ChatSession};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ChatError> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ChatConfig::from_env()?;
    let user_id = config
        .user_id
        .ok_or_else(|| ChatError::Config("BOOKCASE_USER_ID is required".to_string()))?;

    let session = ChatSession::from_config(&config, user_id)?;
    let mut events = session.subscribe();

    match session.load_conversations().await {
        Ok(()) => {
            for conv in session.conversations() {
                info!(
                    peer_id = conv.peer_id(),
                    name = %conv.user.name,
                    unread = conv.user.unread.unwrap_or(0),
                    last = conv.last_message.as_ref().map(|m| m.content.as_str()).unwrap_or(""),
                    "Conversation"
                );
            }
        }
        Err(e) if e.is_auth() => {
            error!("Token rejected, sign in again");
            return Err(e);
        }
        Err(e) => warn!(error = %e, "Could not load conversations"),
    }

    if let Err(e) = session.start_push().await {
        warn!(error = %e, "Live updates unavailable, continuing pull-only");
    }

    info!(user_id, "Listening for messages, press Ctrl+C to quit");
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                }
                break;
            }
            event = events.recv() => match event {
                Ok(ChatEvent::MessageAdded { peer_id, message }) => {
                    let direction = if message.is_from(user_id) { "sent" } else { "received" };
                    info!(peer_id, message_id = message.id, direction, content = %message.content, "Message");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event listener fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    }

    session.shutdown();
    info!("Shut down");
    Ok(())
}
