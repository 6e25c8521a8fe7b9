//! Result of one turn.

use serde::{Deserialize, Serialize};

/// What `send_message` resolves with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub text: String,
    pub conversation_id: String,
    /// Id of the user message this reply answers.
    pub parent_message_id: String,
    /// Id of the stored assistant message.
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Backend-specific payload (final raw message, continuation credentials).
    #[serde(default)]
    pub details: serde_json::Value,
    /// The backend cut the reply short and substitute text was used.
    #[serde(default)]
    pub interrupted: bool,
}
