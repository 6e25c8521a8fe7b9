//! Chat backends.
//!
//! Each backend turns one user message into an [`EventStream`] and knows how
//! to record a successful reply. Everything else about a turn lives in
//! [`ConversationSession`](crate::session::ConversationSession).

mod browser;
mod completion;
mod sydney;

pub use browser::BrowserBackend;
pub use completion::CompletionBackend;
pub use sydney::{SydneyBackend, SydneyOptions, ToneStyle};

use crate::defaults::namespaces;
use crate::error::LlmError;
use crate::session::SendOptions;
use crate::streaming::{EventStream, Resolution};
use crate::types::{Conversation, Message};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Closed set of supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Official completion API.
    Completion,
    /// Browser-session API behind a reverse proxy.
    Browser,
    /// WebSocket chat hub.
    Sydney,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completion => "chatgpt",
            Self::Browser => "chatgpt-browser",
            Self::Sydney => "bing",
        }
    }

    /// Store namespace for this backend's conversations.
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::Completion => namespaces::COMPLETION,
            Self::Browser => namespaces::BROWSER,
            Self::Sydney => namespaces::SYDNEY,
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chatgpt" => Ok(Self::Completion),
            "chatgpt-browser" => Ok(Self::Browser),
            "bing" | "sydney" => Ok(Self::Sydney),
            other => Err(LlmError::InvalidInput(format!(
                "Unknown backend '{other}'. Valid options: chatgpt, chatgpt-browser, bing"
            ))),
        }
    }
}

/// Input to [`ChatBackend::open_turn`].
pub struct TurnRequest<'a> {
    pub conversation_id: &'a str,
    pub conversation: &'a Conversation,
    /// Already appended to `conversation`.
    pub user_message: &'a Message,
    /// Root-first path ending at `user_message`.
    pub ancestry: Vec<Message>,
    pub options: &'a SendOptions,
    pub is_new: bool,
}

/// A turn whose stream is open.
pub struct OpenedTurn {
    pub events: EventStream,
    /// Merged into the conversation metadata if the turn succeeds.
    pub metadata: Map<String, Value>,
}

impl OpenedTurn {
    pub fn new(events: EventStream) -> Self {
        Self {
            events,
            metadata: Map::new(),
        }
    }
}

/// How a resolved turn is recorded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settlement {
    /// Id for the assistant message; a fresh one is generated when absent.
    pub message_id: Option<String>,
    /// Returned to the caller and stored with the assistant message.
    pub details: Value,
}

#[async_trait]
pub trait ChatBackend: Send + Sync + 'static {
    fn kind(&self) -> BackendKind;

    /// Build the request for this turn and open its event stream.
    async fn open_turn(&self, turn: TurnRequest<'_>) -> Result<OpenedTurn, LlmError>;

    /// Record a successful resolution. The default merges the turn metadata
    /// and returns the raw terminal payload as details.
    fn settle(
        &self,
        resolution: &Resolution,
        metadata: Map<String, Value>,
        conversation: &mut Conversation,
    ) -> Settlement {
        conversation.metadata.extend(metadata);
        Settlement {
            message_id: None,
            details: resolution.raw.clone(),
        }
    }

    fn supports_titles(&self) -> bool {
        false
    }

    /// One-shot title for a new conversation.
    async fn generate_title(
        &self,
        _conversation: &Conversation,
        _user_message: &Message,
        _reply: &Message,
    ) -> Result<String, LlmError> {
        Err(LlmError::UnsupportedOperation(format!(
            "{} does not generate titles",
            self.kind()
        )))
    }
}
