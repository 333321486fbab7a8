use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use super::ChatGateway;
use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::models::input::SendMessageInput;
use crate::models::{Conversation, Message};

const CONVERSATIONS_PATH: &str = "chat/conversations";
const MESSAGES_PATH: &str = "chat/messages";
const SEND_PATH: &str = "chat/enviar";

/// `ChatGateway` over HTTP with bearer authentication.
pub struct HttpGateway {
    client: reqwest::Client,
    conversations_url: Url,
    messages_url: Url,
    send_url: Url,
    token: Option<String>,
}

impl HttpGateway {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            conversations_url: config.endpoint(CONVERSATIONS_PATH)?,
            messages_url: config.endpoint(MESSAGES_PATH)?,
            send_url: config.endpoint(SEND_PATH)?,
            token: config.token.clone(),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Map non-2xx statuses to errors, then decode the JSON body.
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        warn!(status = status.as_u16(), url = %response.url(), "Chat request rejected");
        return Err(ChatError::Unauthorized {
            status: status.as_u16(),
        });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ChatError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl ChatGateway for HttpGateway {
    async fn list_conversations(&self, self_id: i64) -> Result<Vec<Conversation>> {
        debug!(self_id, "Fetching conversations");
        let response = self
            .authorize(self.client.get(self.conversations_url.clone()))
            .query(&[("usuarioId", self_id)])
            .send()
            .await?;
        read_json(response).await
    }

    async fn list_messages(&self, self_id: i64, peer_id: i64) -> Result<Vec<Message>> {
        debug!(self_id, peer_id, "Fetching message history");
        let response = self
            .authorize(self.client.get(self.messages_url.clone()))
            .query(&[("currentUserId", self_id), ("userId", peer_id)])
            .send()
            .await?;
        read_json(response).await
    }

    async fn send_message(&self, input: &SendMessageInput) -> Result<Message> {
        debug!(peer_id = input.recipient_id, "Posting message");
        let response = self
            .authorize(self.client.post(self.send_url.clone()))
            .json(input)
            .send()
            .await?;
        read_json(response).await
    }
}
