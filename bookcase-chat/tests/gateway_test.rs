//! HttpGateway against a local axum server standing in for the chat API.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bookcase_chat::{ChatConfig, ChatError, ChatGateway, HttpGateway, SendMessageInput};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use url::Url;

const TOKEN: &str = "test-token";

#[derive(Debug, Clone)]
struct Recorded {
    path: &'static str,
    authorization: Option<String>,
    query: HashMap<String, String>,
    body: Option<Value>,
}

type Log = Arc<Mutex<Vec<Recorded>>>;

fn authorization(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn wire_message(id: i64, from: i64, to: i64, content: &str) -> Value {
    json!({
        "id": id,
        "conteudo": content,
        "dataEnvio": "2024-01-01T10:05:00",
        "lida": false,
        "remetente": {"id": from, "nome": format!("user{from}")},
        "destinatario": {"id": to, "nome": format!("user{to}")}
    })
}

async fn conversations(
    State(log): State<Log>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let authorized = authorization(&headers).as_deref() == Some("Bearer test-token");
    log.lock().unwrap().push(Recorded {
        path: "conversations",
        authorization: authorization(&headers),
        query,
        body: None,
    });
    if !authorized {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"})));
    }
    (
        StatusCode::OK,
        Json(json!([
            {
                "user": {"id": 2, "nome": "Ana", "email": "ana@example.com", "unread": 3},
                "lastMessage": wire_message(100, 2, 1, "oi")
            },
            {"user": {"id": 3, "nome": "Bruno"}}
        ])),
    )
}

async fn messages(
    State(log): State<Log>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    log.lock().unwrap().push(Recorded {
        path: "messages",
        authorization: authorization(&headers),
        query: query.clone(),
        body: None,
    });
    if query.get("userId").map(String::as_str) == Some("99") {
        return (StatusCode::INTERNAL_SERVER_ERROR, "history unavailable").into_response();
    }
    Json(json!([
        wire_message(100, 2, 1, "oi"),
        wire_message(101, 1, 2, "tudo bem?")
    ]))
    .into_response()
}

async fn send(State(log): State<Log>, headers: HeaderMap, Json(body): Json<Value>) -> impl IntoResponse {
    log.lock().unwrap().push(Recorded {
        path: "enviar",
        authorization: authorization(&headers),
        query: HashMap::new(),
        body: Some(body.clone()),
    });
    let from = body["remetenteId"].as_i64().unwrap_or_default();
    let to = body["destinatarioId"].as_i64().unwrap_or_default();
    let content = body["conteudo"].as_str().unwrap_or_default().to_string();
    Json(wire_message(300, from, to, &content))
}

async fn start_test_server() -> (Url, Log) {
    let log: Log = Arc::default();
    let app = Router::new()
        .route("/api/chat/conversations", get(conversations))
        .route("/api/chat/messages", get(messages))
        .route("/api/chat/enviar", post(send))
        .with_state(log.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (Url::parse(&format!("http://{}/api", addr)).unwrap(), log)
}

fn gateway(base: Url, token: Option<&str>) -> HttpGateway {
    let mut config = ChatConfig::default().with_api_base_url(base).with_push_url(None);
    if let Some(token) = token {
        config = config.with_token(token);
    }
    HttpGateway::new(&config).unwrap()
}

#[tokio::test]
async fn test_list_conversations() {
    let (base, log) = start_test_server().await;
    let gateway = gateway(base, Some(TOKEN));

    let list = gateway.list_conversations(1).await.unwrap();

    assert_eq!(list.len(), 2);
    assert_eq!(list[0].user.name, "Ana");
    assert_eq!(list[0].user.unread, Some(3));
    assert_eq!(list[0].last_message.as_ref().unwrap().id, 100);
    assert!(list[1].last_message.is_none());

    let recorded = log.lock().unwrap()[0].clone();
    assert_eq!(recorded.path, "conversations");
    assert_eq!(recorded.authorization.as_deref(), Some("Bearer test-token"));
    assert_eq!(recorded.query.get("usuarioId").map(String::as_str), Some("1"));
}

#[tokio::test]
async fn test_rejected_token_maps_to_unauthorized() {
    let (base, _log) = start_test_server().await;

    let err = gateway(base.clone(), Some("wrong")).list_conversations(1).await.unwrap_err();
    assert!(matches!(err, ChatError::Unauthorized { status: 401 }));
    assert!(err.is_auth());

    let err = gateway(base, None).list_conversations(1).await.unwrap_err();
    assert!(err.is_auth());
}

#[tokio::test]
async fn test_list_messages() {
    let (base, log) = start_test_server().await;
    let gateway = gateway(base, Some(TOKEN));

    let history = gateway.list_messages(1, 2).await.unwrap();

    assert_eq!(history.iter().map(|m| m.id).collect::<Vec<_>>(), vec![100, 101]);
    assert_eq!(history[1].content, "tudo bem?");

    let recorded = log.lock().unwrap()[0].clone();
    assert_eq!(recorded.query.get("currentUserId").map(String::as_str), Some("1"));
    assert_eq!(recorded.query.get("userId").map(String::as_str), Some("2"));
}

#[tokio::test]
async fn test_server_error_carries_body() {
    let (base, _log) = start_test_server().await;
    let gateway = gateway(base, Some(TOKEN));

    match gateway.list_messages(1, 99).await.unwrap_err() {
        ChatError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "history unavailable");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_send_message_posts_wire_body() {
    let (base, log) = start_test_server().await;
    let gateway = gateway(base, Some(TOKEN));

    let input = SendMessageInput::new(1, 2, " boa leitura ").unwrap();
    let saved = gateway.send_message(&input).await.unwrap();

    assert_eq!(saved.id, 300);
    assert_eq!(saved.content, "boa leitura");
    assert_eq!(saved.sender.id, 1);
    assert_eq!(saved.recipient.id, 2);

    let recorded = log.lock().unwrap()[0].clone();
    assert_eq!(recorded.path, "enviar");
    assert_eq!(recorded.authorization.as_deref(), Some("Bearer test-token"));
    assert_eq!(
        recorded.body,
        Some(json!({"remetenteId": 1, "destinatarioId": 2, "conteudo": "boa leitura"}))
    );
}

#[tokio::test]
async fn test_unreachable_server_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let base = Url::parse(&format!("http://{}/api", addr)).unwrap();
    let err = gateway(base, Some(TOKEN)).list_conversations(1).await.unwrap_err();
    assert!(matches!(err, ChatError::Transport(_)));
}
