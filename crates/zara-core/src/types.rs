use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One unit of reply audio as received from the network.
///
/// Immutable once received; cloning only bumps a reference count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk(Bytes);

impl Chunk {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<Bytes> for Chunk {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

/// Auxiliary observation about the user attached to a chat request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualContext {
    #[serde(default)]
    pub is_smiling: bool,
    #[serde(default)]
    pub fingers_up: u32,
}

/// Body of `POST /chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual_context: Option<VisualContext>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            visual_context: None,
        }
    }

    pub fn with_visual_context(mut self, context: Option<VisualContext>) -> Self {
        self.visual_context = context;
        self
    }
}

/// JSON-mode reply body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
}

/// Error body returned with non-2xx statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_without_context_omits_field() {
        let json = serde_json::to_value(ChatRequest::new("hello")).unwrap();
        assert_eq!(json, serde_json::json!({"message": "hello"}));
    }

    #[test]
    fn test_request_with_context_is_camel_case() {
        let req = ChatRequest::new("what am I doing?").with_visual_context(Some(VisualContext {
            is_smiling: true,
            fingers_up: 2,
        }));
        let json = serde_json::to_value(req).unwrap();
        assert_eq!(json["visualContext"]["isSmiling"], true);
        assert_eq!(json["visualContext"]["fingersUp"], 2);
    }

    #[test]
    fn test_chunk_shares_buffer() {
        let chunk = Chunk::new(vec![1u8, 2, 3]);
        let copy = chunk.clone();
        assert_eq!(copy.as_bytes().as_ptr(), chunk.as_bytes().as_ptr());
        assert_eq!(chunk.len(), 3);
    }
}
