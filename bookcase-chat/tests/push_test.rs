//! STOMP push channel against a real WebSocket server speaking just enough
//! of the broker side: CONNECTED, then MESSAGE frames on the subscription.

use std::time::Duration;

use bookcase_chat::push::frame::Frame;
use bookcase_chat::push::{PushChannel, StompPushChannel};
use bookcase_chat::{ChatConfig, ChatSession};
use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

const ME: i64 = 1;

fn wire_message(id: i64, from: i64, to: i64) -> Value {
    json!({
        "id": id,
        "conteudo": format!("message {id}"),
        "dataEnvio": "2024-01-01T10:05:00Z",
        "lida": false,
        "remetente": {"id": from, "nome": format!("user{from}")},
        "destinatario": {"id": to, "nome": format!("user{to}")}
    })
}

async fn next_frame<S>(read: &mut S) -> Option<Frame>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(Ok(msg)) = read.next().await {
        if let Message::Text(text) = msg {
            if let Ok(Some(frame)) = Frame::parse(&text) {
                return Some(frame);
            }
        }
    }
    None
}

/// Start a broker stub on a random port. Every connection gets `deliveries`
/// after it subscribes; with `drop_first` the first connection is closed
/// right after that. Client frames are reported on the returned channel.
async fn start_test_broker(
    deliveries: Vec<Value>,
    drop_first: bool,
) -> (Url, mpsc::UnboundedReceiver<Frame>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut connection = 0;
        while let Ok((stream, _)) = listener.accept().await {
            let ws_stream = tokio_tungstenite::accept_async(stream).await.unwrap();
            let seen = seen_tx.clone();
            let deliveries = deliveries.clone();
            let close_after_delivery = drop_first && connection == 0;
            connection += 1;

            tokio::spawn(async move {
                let (mut write, mut read) = ws_stream.split();

                let Some(connect) = next_frame(&mut read).await else { return };
                let _ = seen.send(connect);
                let connected = Frame::new("CONNECTED")
                    .header("version", "1.2")
                    .header("heart-beat", "0,0");
                write.send(Message::Text(connected.encode().into())).await.unwrap();

                let Some(subscribe) = next_frame(&mut read).await else { return };
                let destination = subscribe.get("destination").unwrap_or_default().to_string();
                let subscription = subscribe.get("id").unwrap_or_default().to_string();
                let _ = seen.send(subscribe);

                for (n, body) in deliveries.iter().enumerate() {
                    let frame = Frame::new("MESSAGE")
                        .header("destination", destination.as_str())
                        .header("subscription", subscription.as_str())
                        .header("message-id", n.to_string())
                        .header("content-type", "application/json")
                        .with_body(body.to_string());
                    write.send(Message::Text(frame.encode().into())).await.unwrap();
                    // heart-beats in between must be ignored
                    write.send(Message::Text("\n".to_string().into())).await.unwrap();
                }

                if close_after_delivery {
                    let _ = write.send(Message::Close(None)).await;
                    return;
                }

                while let Some(frame) = next_frame(&mut read).await {
                    let _ = seen.send(frame);
                }
            });
        }
    });

    let url = Url::parse(&format!("ws://127.0.0.1:{}/chat-websocket/websocket", port)).unwrap();
    (url, seen_rx)
}

fn config(url: Url) -> ChatConfig {
    ChatConfig::default()
        .with_push_url(Some(url))
        .with_token("push-token")
        .with_reconnect_delay(Duration::from_millis(50))
}

async fn expect_frame(seen: &mut mpsc::UnboundedReceiver<Frame>) -> Frame {
    timeout(Duration::from_secs(5), seen.recv())
        .await
        .expect("Timeout waiting for client frame")
        .expect("Broker stopped")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never became true");
}

#[tokio::test]
async fn test_connect_subscribe_and_deliver() {
    let (url, mut seen) = start_test_broker(vec![wire_message(101, 2, ME)], false).await;
    let channel = StompPushChannel::new(url.clone(), &config(url));
    let (sink, mut inbox) = mpsc::unbounded_channel();

    channel.connect(ME, sink).await.unwrap();

    let connect = expect_frame(&mut seen).await;
    assert_eq!(connect.command, "CONNECT");
    assert_eq!(connect.get("accept-version"), Some("1.2"));
    assert_eq!(connect.get("host"), Some("127.0.0.1"));
    assert_eq!(connect.get("Authorization"), Some("Bearer push-token"));

    let subscribe = expect_frame(&mut seen).await;
    assert_eq!(subscribe.command, "SUBSCRIBE");
    assert_eq!(subscribe.get("destination"), Some("/user/1/topic/mensagens"));

    let message = timeout(Duration::from_secs(5), inbox.recv())
        .await
        .expect("Timeout waiting for push")
        .expect("Channel closed");
    assert_eq!(message.id, 101);
    assert_eq!(message.sender.id, 2);
    assert!(channel.is_connected());

    channel.disconnect();
    let disconnect = expect_frame(&mut seen).await;
    assert_eq!(disconnect.command, "DISCONNECT");
    wait_until(|| !channel.is_connected()).await;
}

#[tokio::test]
async fn test_resubscribes_after_drop_without_duplicates() {
    let (url, mut seen) = start_test_broker(vec![wire_message(101, 2, ME)], true).await;
    let session = ChatSession::from_config(&config(url), ME).unwrap();

    session.start_push().await.unwrap();

    let mut destinations = Vec::new();
    while destinations.len() < 2 {
        let frame = expect_frame(&mut seen).await;
        if frame.command == "SUBSCRIBE" {
            destinations.push(frame.get("destination").unwrap_or_default().to_string());
        }
    }
    assert_eq!(destinations, vec!["/user/1/topic/mensagens"; 2]);

    wait_until(|| session.is_push_connected() && !session.messages(2).is_empty()).await;
    // give the second delivery of 101 time to land
    tokio::time::sleep(Duration::from_millis(100)).await;

    let ids: Vec<i64> = session.messages(2).iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![101]);
    assert_eq!(
        session.conversations().iter().map(|c| c.peer_id()).collect::<Vec<_>>(),
        vec![2]
    );

    session.shutdown();
}

#[tokio::test]
async fn test_undecodable_payload_is_skipped() {
    let (url, _seen) = start_test_broker(
        vec![json!({"not": "a message"}), wire_message(7, ME, 3)],
        false,
    )
    .await;
    let session = ChatSession::from_config(&config(url), ME).unwrap();

    session.start_push().await.unwrap();

    wait_until(|| !session.messages(3).is_empty()).await;
    assert_eq!(session.messages(3)[0].id, 7);
    session.shutdown();
}

#[tokio::test]
async fn test_unreachable_broker_keeps_session_usable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let url = Url::parse(&format!("ws://127.0.0.1:{}/chat-websocket/websocket", port)).unwrap();
    let session = ChatSession::from_config(&config(url), ME).unwrap();

    session.start_push().await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert!(!session.is_push_connected());
    assert!(session.receive_message(serde_json::from_value(wire_message(1, 2, ME)).unwrap()).unwrap());
    session.shutdown();
}
