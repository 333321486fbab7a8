//! Client configuration

use crate::error::{ChatError, Result};
use std::time::Duration;
use tracing::info;
use url::Url;

const DEFAULT_API_URL: &str = "http://localhost:8080/api";
const DEFAULT_PUSH_URL: &str = "ws://localhost:8080/chat-websocket/websocket";

/// Chat client configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// REST base URL; endpoint paths are appended to it
    pub api_base_url: Url,

    /// STOMP WebSocket endpoint; `None` runs the session pull-only
    pub push_url: Option<Url>,

    /// Bearer credential sent with every request and on STOMP CONNECT
    pub token: Option<String>,

    /// Current user id (only the binary reads it from the environment)
    pub user_id: Option<i64>,

    /// REST request timeout
    pub request_timeout: Duration,

    /// Wait before re-opening a dropped push connection
    pub reconnect_delay: Duration,

    /// STOMP heart-beat interval, both directions
    pub heartbeat: Duration,

    /// Deadline for the STOMP CONNECTED frame
    pub connect_timeout: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_base_url: Url::parse(DEFAULT_API_URL).expect("default API URL is valid"),
            push_url: Some(Url::parse(DEFAULT_PUSH_URL).expect("default push URL is valid")),
            token: None,
            user_id: None,
            request_timeout: Duration::from_secs(15),
            reconnect_delay: Duration::from_millis(5000),
            heartbeat: Duration::from_millis(10000),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ChatConfig {
    /// Build configuration from the environment, loading `.env` first if present
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            info!(path = %path.display(), "Loaded environment file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("BOOKCASE_API_URL") {
            config.api_base_url = parse_url("BOOKCASE_API_URL", &raw)?;
        }

        if let Some(raw) = lookup("BOOKCASE_PUSH_URL") {
            let raw = raw.trim();
            config.push_url = if raw.is_empty() || raw.eq_ignore_ascii_case("off") {
                None
            } else {
                Some(parse_url("BOOKCASE_PUSH_URL", raw)?)
            };
        }

        config.token = lookup("BOOKCASE_TOKEN")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        if let Some(raw) = lookup("BOOKCASE_USER_ID") {
            config.user_id = Some(raw.trim().parse::<i64>().map_err(|_| {
                ChatError::Config("BOOKCASE_USER_ID must be a number".to_string())
            })?);
        }

        if let Some(secs) = parse_u64(&lookup, "BOOKCASE_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_u64(&lookup, "BOOKCASE_RECONNECT_DELAY_MS")? {
            config.reconnect_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_u64(&lookup, "BOOKCASE_HEARTBEAT_MS")? {
            config.heartbeat = Duration::from_millis(ms);
        }

        info!(
            api = %config.api_base_url,
            push = ?config.push_url.as_ref().map(Url::as_str),
            authenticated = config.token.is_some(),
            "Chat configuration resolved"
        );

        Ok(config)
    }

    pub fn with_api_base_url(mut self, url: Url) -> Self {
        self.api_base_url = url;
        self
    }

    pub fn with_push_url(mut self, url: Option<Url>) -> Self {
        self.push_url = url;
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Full URL of a REST endpoint below the base URL
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let mut base = self.api_base_url.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path.trim_start_matches('/'))
            .map_err(|e| ChatError::Config(format!("Invalid endpoint {}: {}", path, e)))
    }
}

fn parse_url(key: &str, raw: &str) -> Result<Url> {
    Url::parse(raw.trim()).map_err(|e| ChatError::Config(format!("{} is not a valid URL: {}", key, e)))
}

fn parse_u64<F>(lookup: &F, key: &str) -> Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map_err(|_| ChatError::Config(format!("{} must be a non-negative number", key)))
        })
        .transpose()
}
