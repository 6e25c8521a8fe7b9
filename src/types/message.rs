//! Conversation messages.

use serde::{Deserialize, Serialize};

/// Who authored a message.
///
/// Older records label assistant turns with the backend's persona name, so
/// `ChatGPT`, `Bing` and `Sydney` are accepted as aliases when loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    User,
    #[serde(alias = "ChatGPT", alias = "Bing", alias = "Sydney")]
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
            Self::System => "System",
        }
    }
}

/// One node of a conversation tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub parent_message_id: Option<String>,
    pub role: Role,
    #[serde(alias = "message")]
    pub text: String,
    /// Raw backend payload kept alongside assistant replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        parent_message_id: Option<String>,
        role: Role,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            parent_message_id,
            role,
            text: text.into(),
            details: None,
        }
    }

    /// A user message with a freshly generated id.
    pub fn user(parent_message_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(new_id(), Some(parent_message_id.into()), Role::User, text)
    }

    /// An assistant message with a freshly generated id.
    pub fn assistant(parent_message_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(new_id(), Some(parent_message_id.into()), Role::Assistant, text)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Generate a new opaque id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_records_deserialize() {
        let raw = r#"{"id":"b","parentMessageId":"a","role":"ChatGPT","message":"hi"}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.text, "hi");
        assert_eq!(msg.parent_message_id.as_deref(), Some("a"));
    }

    #[test]
    fn serializes_camel_case_without_empty_details() {
        let msg = Message::new("1", None, Role::User, "Hello!");
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["parentMessageId"], serde_json::Value::Null);
        assert_eq!(v["role"], "User");
        assert!(v.get("details").is_none());
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(new_id(), new_id());
        let msg = Message::user("root", "x");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.parent_message_id.as_deref(), Some("root"));
    }
}
