//! One outstanding chat exchange.

use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info, warn};

use zara_core::{AbortToken, ChatRequest, ChatResponse, ErrorBody};

use crate::{ChatClient, Reply, RequestError, abortable};

/// Owns a single network exchange and its cancellation.
pub struct RequestLifecycle {
    client: ChatClient,
    abort: AbortToken,
}

impl RequestLifecycle {
    pub fn new(client: ChatClient, abort: AbortToken) -> Self {
        Self { client, abort }
    }

    pub fn abort_token(&self) -> &AbortToken {
        &self.abort
    }

    /// Stop producing chunks. Pending suspensions resolve with
    /// [`RequestError::Cancelled`].
    pub fn cancel(&self) {
        self.abort.fire();
    }

    pub fn is_cancelled(&self) -> bool {
        self.abort.is_fired()
    }

    /// Send `request` and classify the reply by its content type.
    pub async fn send(&self, request: &ChatRequest) -> Result<Reply, RequestError> {
        if self.abort.is_fired() {
            return Err(RequestError::Cancelled);
        }

        debug!(
            url = self.client.url(),
            message_len = request.message.len(),
            visual_context = request.visual_context.is_some(),
            "Sending chat request"
        );

        let pending = self.client.http().post(self.client.url()).json(request).send();
        let response = tokio::select! {
            biased;
            _ = self.abort.fired() => return Err(RequestError::Cancelled),
            response = pending => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = tokio::select! {
                biased;
                _ = self.abort.fired() => return Err(RequestError::Cancelled),
                body = response.text() => body.unwrap_or_default(),
            };
            let err = status_error(status, &body);
            warn!(%status, error = %err, "Chat request failed");
            return Err(err);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_ascii_lowercase();

        if is_json(&content_type) {
            let body = tokio::select! {
                biased;
                _ = self.abort.fired() => return Err(RequestError::Cancelled),
                body = response.bytes() => body?,
            };
            let reply: ChatResponse = serde_json::from_slice(&body)
                .map_err(|e| RequestError::InvalidBody(e.to_string()))?;
            info!(reply_len = reply.response.len(), "Received text reply");
            return Ok(Reply::Text(reply.response));
        }

        info!(%content_type, "Streaming audio reply");
        Ok(Reply::Audio {
            content_type,
            chunks: abortable(response.bytes_stream(), self.abort.clone()),
        })
    }
}

fn is_json(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    essence == "application/json" || essence.ends_with("+json")
}

/// Build the error for a non-2xx reply, preferring the server's own message.
fn status_error(status: StatusCode, body: &str) -> RequestError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .map(|b| b.error)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("Server returned {status}"));
    RequestError::Status {
        status: status.as_u16(),
        message,
    }
}
