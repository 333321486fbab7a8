use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use super::frame::{negotiate_heartbeat, Frame};
use super::{user_topic, PushChannel, PushSink};
use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::models::Message;

const SUBSCRIPTION_ID: &str = "sub-0";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, WsMessage>;
type WsRead = SplitStream<WsStream>;

/// How a live connection ended
enum Ended {
    /// Disconnect requested or the session went away; do not reconnect
    Shutdown,
    /// Server side went away; reconnect after the delay
    Dropped,
}

#[derive(Debug, Clone)]
struct Settings {
    url: Url,
    token: Option<String>,
    heartbeat: Duration,
    reconnect_delay: Duration,
    connect_timeout: Duration,
}

/// STOMP-over-WebSocket push channel.
///
/// Subscribes to the user's private topic and keeps the subscription alive
/// across drops, re-subscribing after every reconnect.
pub struct StompPushChannel {
    settings: Settings,
    connected: Arc<AtomicBool>,
    /// Shutdown signal broadcaster
    shutdown_tx: broadcast::Sender<()>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl StompPushChannel {
    pub fn new(url: Url, config: &ChatConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            settings: Settings {
                url,
                token: config.token.clone(),
                heartbeat: config.heartbeat,
                reconnect_delay: config.reconnect_delay,
                connect_timeout: config.connect_timeout,
            },
            connected: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            task: StdMutex::new(None),
        }
    }

    pub fn url(&self) -> &Url {
        &self.settings.url
    }
}

#[async_trait]
impl PushChannel for StompPushChannel {
    async fn connect(&self, user_id: i64, sink: PushSink) -> Result<()> {
        let scheme = self.settings.url.scheme();
        if scheme != "ws" && scheme != "wss" {
            return Err(ChatError::PushUnavailable(format!(
                "unsupported push URL scheme {:?}",
                scheme
            )));
        }

        // a second connect replaces the running loop
        let previous = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(previous) = previous {
            let _ = self.shutdown_tx.send(());
            previous.abort();
        }

        let settings = self.settings.clone();
        let connected = self.connected.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let topic = user_topic(user_id);
            loop {
                if sink.is_closed() {
                    debug!("Push sink closed, stopping reconnection");
                    break;
                }

                info!(url = %settings.url, "Connecting to chat push gateway");

                let outcome =
                    run_connection(&settings, &topic, &sink, &connected, &mut shutdown_rx).await;
                connected.store(false, Ordering::SeqCst);

                match outcome {
                    Ok(Ended::Shutdown) => break,
                    Ok(Ended::Dropped) => info!("Push connection dropped"),
                    Err(e) => error!(error = %e, url = %settings.url, "Push connection failed"),
                }

                debug!(delay = ?settings.reconnect_delay, "Reconnecting push channel");
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Shutdown signal received, stopping reconnection");
                        break;
                    }
                    _ = sleep(settings.reconnect_delay) => {}
                }
            }
            connected.store(false, Ordering::SeqCst);
        });

        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    fn disconnect(&self) {
        info!("Initiating push disconnect");
        // the loop sends DISCONNECT and a close frame on its way out
        let _ = self.shutdown_tx.send(());
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

async fn run_connection(
    settings: &Settings,
    topic: &str,
    sink: &PushSink,
    connected: &AtomicBool,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> Result<Ended> {
    let (ws_stream, _) = connect_async(settings.url.as_str()).await?;
    let (mut write, mut read) = ws_stream.split();

    let host = settings.url.host_str().unwrap_or("localhost");
    let connect = Frame::connect(host, settings.token.as_deref(), settings.heartbeat);
    write.send(WsMessage::Text(connect.encode().into())).await?;

    let connected_frame = timeout(settings.connect_timeout, await_connected(&mut read))
        .await
        .map_err(|_| ChatError::PushUnavailable("timed out waiting for CONNECTED".to_string()))??;

    let (outgoing, incoming) =
        negotiate_heartbeat(settings.heartbeat, connected_frame.get("heart-beat"));
    debug!(?outgoing, ?incoming, "STOMP session established");

    let subscribe = Frame::subscribe(SUBSCRIPTION_ID, topic);
    write.send(WsMessage::Text(subscribe.encode().into())).await?;
    connected.store(true, Ordering::SeqCst);
    info!(topic, "Subscribed to push topic");

    let beat_period = outgoing.max(Duration::from_millis(1));
    let mut beat = interval_at(Instant::now() + beat_period, beat_period);
    let grace = incoming * 2;
    let idle = sleep(grace);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, closing push connection");
                close(&mut write).await;
                return Ok(Ended::Shutdown);
            }
            _ = beat.tick(), if !outgoing.is_zero() => {
                write.send(WsMessage::Text("\n".to_string().into())).await?;
            }
            _ = &mut idle, if !incoming.is_zero() => {
                warn!(?grace, "No traffic from push gateway, dropping connection");
                return Ok(Ended::Dropped);
            }
            msg = read.next() => {
                if !incoming.is_zero() {
                    idle.as_mut().reset(Instant::now() + grace);
                }
                let text = match msg {
                    Some(Ok(WsMessage::Text(text))) => text.to_string(),
                    Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!("Ignoring non UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!("Push gateway closed connection");
                        return Ok(Ended::Dropped);
                    }
                    Some(Err(e)) => return Err(e.into()),
                    _ => continue,
                };

                let frame = match Frame::parse(&text) {
                    Ok(Some(frame)) => frame,
                    Ok(None) => {
                        trace!("Heart-beat");
                        continue;
                    }
                    Err(e) => {
                        warn!(error = %e, "Ignoring malformed frame");
                        continue;
                    }
                };

                match frame.command.as_str() {
                    "MESSAGE" => {
                        if !deliver(&frame, sink) {
                            close(&mut write).await;
                            return Ok(Ended::Shutdown);
                        }
                    }
                    "ERROR" => {
                        warn!(
                            reason = frame.get("message").unwrap_or_default(),
                            body = %frame.body,
                            "Push gateway reported an error"
                        );
                        return Ok(Ended::Dropped);
                    }
                    other => debug!(command = other, "Ignoring frame"),
                }
            }
        }
    }
}

/// Read until CONNECTED. An ERROR frame or a closed socket fails the attempt.
async fn await_connected(read: &mut WsRead) -> Result<Frame> {
    while let Some(msg) = read.next().await {
        let text = match msg? {
            WsMessage::Text(text) => text.to_string(),
            WsMessage::Close(_) => break,
            _ => continue,
        };
        match Frame::parse(&text)? {
            Some(frame) if frame.command == "CONNECTED" => return Ok(frame),
            Some(frame) if frame.command == "ERROR" => {
                return Err(ChatError::PushUnavailable(
                    frame
                        .get("message")
                        .map(str::to_string)
                        .unwrap_or_else(|| frame.body.clone()),
                ))
            }
            Some(frame) => debug!(command = %frame.command, "Unexpected frame before CONNECTED"),
            None => {}
        }
    }
    Err(ChatError::PushUnavailable(
        "connection closed during STOMP handshake".to_string(),
    ))
}

/// Forward a MESSAGE body to the session. False once the session is gone.
fn deliver(frame: &Frame, sink: &PushSink) -> bool {
    match serde_json::from_str::<Message>(&frame.body) {
        Ok(message) => {
            debug!(message_id = message.id, "Pushed message");
            sink.send(message).is_ok()
        }
        Err(e) => {
            warn!(error = %e, "Ignoring undecodable push payload");
            true
        }
    }
}

async fn close(write: &mut WsWrite) {
    let disconnect = Frame::disconnect().encode();
    if let Err(e) = write.send(WsMessage::Text(disconnect.into())).await {
        warn!(error = %e, "Failed to send DISCONNECT");
    }
    if let Err(e) = write.send(WsMessage::Close(None)).await {
        warn!(error = %e, "Failed to send close frame");
    }
}
