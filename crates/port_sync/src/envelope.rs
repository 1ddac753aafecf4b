use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::NetworkError;

/// One queued message as delivered by the server.  The payload is opaque to
/// this layer; only delivery metadata is lifted out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

#[derive(Deserialize)]
struct QueueBody {
    #[serde(default)]
    data: Option<Vec<MessageEnvelope>>,
}

/// Decode a queue response body.  A body without `data` (or an empty body)
/// is [`NetworkError::NoResponseData`]; `{"data": []}` is an empty list.
pub fn decode_queue_body(body: &[u8]) -> Result<Vec<MessageEnvelope>, NetworkError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(NetworkError::NoResponseData);
    }
    let parsed: QueueBody =
        serde_json::from_slice(body).map_err(|e| NetworkError::Decode(e.to_string()))?;
    parsed.data.ok_or(NetworkError::NoResponseData)
}
