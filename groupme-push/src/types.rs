//! Public types for the groupme-push crate.

use std::time::Duration;

use tokio_tungstenite::tungstenite;

pub(crate) const DEFAULT_API_URL: &str = "https://api.groupme.com/v3";
pub(crate) const DEFAULT_HANDSHAKE_URL: &str = "https://push.groupme.com/faye";
pub(crate) const DEFAULT_PUSH_URL: &str = "wss://push.groupme.com/faye";
pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable read by [`PushConfig::from_env`].
pub const ACCESS_TOKEN_ENV: &str = "GROUPME_ACCESS_TOKEN";

/// Logical event categories a handler can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// A new message in a group (`line.create`).
    Message,
    /// A new direct message (`direct_message.create`).
    DirectMessage,
    /// A message was liked (`like.create`).
    Like,
    /// A message was favorited (`favorite`).
    Favorite,
    /// Catch-all for any data type not listed above.
    Other,
}

impl Category {
    /// Map a push `data.type` to its category.
    ///
    /// Returns `None` for unrecognized types; those are routed to
    /// [`Category::Other`] with the full `data` object.
    pub fn from_type(kind: &str) -> Option<Self> {
        match kind {
            "line.create" => Some(Self::Message),
            "direct_message.create" => Some(Self::DirectMessage),
            "favorite" => Some(Self::Favorite),
            "like.create" => Some(Self::Like),
            _ => None,
        }
    }
}

/// Configuration for [`PushClient`](crate::PushClient).
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// GroupMe access token, sent on identity lookup and in every `ext` block.
    pub access_token: String,
    /// REST API base. Defaults to `"https://api.groupme.com/v3"`.
    pub api_url: String,
    /// HTTP endpoint for the Bayeux handshake. Defaults to `"https://push.groupme.com/faye"`.
    pub handshake_url: String,
    /// Websocket endpoint. Defaults to `"wss://push.groupme.com/faye"`.
    pub push_url: String,
    /// Timeout for the identity and handshake requests.
    pub request_timeout: Duration,
    /// Timeout for opening the websocket.
    pub connect_timeout: Duration,
    /// Drop events sent by the connected user.
    pub disregard_self: bool,
}

impl PushConfig {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            api_url: DEFAULT_API_URL.to_string(),
            handshake_url: DEFAULT_HANDSHAKE_URL.to_string(),
            push_url: DEFAULT_PUSH_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            disregard_self: false,
        }
    }

    /// Build a config from `GROUPME_ACCESS_TOKEN`.
    pub fn from_env() -> Result<Self, Error> {
        match std::env::var(ACCESS_TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => Ok(Self::new(token.trim())),
            Ok(_) => Err(Error::Config(format!("{ACCESS_TOKEN_ENV} is empty"))),
            Err(e) => Err(Error::Config(format!("{ACCESS_TOKEN_ENV}: {e}"))),
        }
    }

    pub fn disregard_self(mut self, enabled: bool) -> Self {
        self.disregard_self = enabled;
        self
    }
}

/// Errors returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("identity lookup failed: {0}")]
    Identity(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("malformed id: {0:?}")]
    MalformedId(String),

    #[error("WebSocket error: {0}")]
    Transport(Box<tungstenite::Error>),

    #[error("connection closed by server")]
    Closed,

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("config error: {0}")]
    Config(String),
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Error::Transport(Box::new(e))
    }
}
