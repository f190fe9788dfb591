//! Chat endpoint client.
//!
//! A [`RequestLifecycle`] owns one `POST /chat` exchange. Replies arrive either
//! as JSON text or as a progressively streamed audio body, selected by the
//! response `Content-Type`; both are exposed through [`Reply`].

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use zara_core::config::Config;
use zara_core::error::UNREACHABLE_MESSAGE;
use zara_core::{AbortToken, SessionError};

pub mod request;
pub mod stream;

pub use request::RequestLifecycle;
pub use stream::{ChunkStream, abortable};

/// Errors from a chat exchange or from consuming its reply stream.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request cancelled")]
    Cancelled,

    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid reply body: {0}")]
    InvalidBody(String),

    #[error("audio source error: {0}")]
    Source(#[from] std::io::Error),
}

impl From<RequestError> for SessionError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Cancelled => SessionError::UserCancelled,
            RequestError::Status { status, message } => SessionError::Network {
                status: Some(status),
                message,
            },
            RequestError::Transport(e) => SessionError::Network {
                status: e.status().map(|s| s.as_u16()),
                message: UNREACHABLE_MESSAGE.into(),
            },
            RequestError::InvalidBody(message) => SessionError::Network {
                status: None,
                message,
            },
            RequestError::Source(e) => SessionError::Playback(e.to_string()),
        }
    }
}

/// A reply to one chat request.
pub enum Reply {
    /// JSON mode: the text still has to be spoken client-side.
    Text(String),
    /// Streamed-audio mode.
    Audio {
        content_type: String,
        chunks: ChunkStream,
    },
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Audio { content_type, .. } => f
                .debug_struct("Audio")
                .field("content_type", content_type)
                .finish_non_exhaustive(),
        }
    }
}

/// HTTP client bound to the chat endpoint. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ChatClient {
    url: String,
    http: reqwest::Client,
}

impl ChatClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Build a client from the `server` section of the config.
    pub fn from_config(config: &Config) -> Result<Self, RequestError> {
        let server = config.server();
        let mut builder =
            reqwest::Client::builder().danger_accept_invalid_certs(server.accept_invalid_certs);
        if let Some(secs) = server.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            url: config.chat_url(),
            http: builder.build()?,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Start a new exchange bound to `abort`.
    pub fn lifecycle(&self, abort: AbortToken) -> RequestLifecycle {
        RequestLifecycle::new(self.clone(), abort)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zara_core::ErrorKind;

    #[test]
    fn test_cancel_maps_to_user_cancelled() {
        let err: SessionError = RequestError::Cancelled.into();
        assert_eq!(err.kind(), ErrorKind::UserCancelled);
    }

    #[test]
    fn test_status_maps_to_network_with_message() {
        let err: SessionError = RequestError::Status {
            status: 503,
            message: "busy".into(),
        }
        .into();
        assert_eq!(
            err,
            SessionError::Network {
                status: Some(503),
                message: "busy".into()
            }
        );
    }

    #[test]
    fn test_client_url_from_config() {
        let config = Config::parse(r#"{ server: { base_url: "http://10.0.0.2:8080" } }"#).unwrap();
        let client = ChatClient::from_config(&config).unwrap();
        assert_eq!(client.url(), "http://10.0.0.2:8080/chat");
    }
}
