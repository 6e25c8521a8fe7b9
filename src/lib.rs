//! chatweave
//!
//! Conversation-tree chat client for completion-style and streaming chat
//! backends.
//!
//! Conversations are trees of messages linked by parent ids. Every turn walks
//! from the new user message back to the root, packs as much of that path as
//! fits a token budget into a prompt, streams the reply and stores it as a
//! new child. Three backends are supported: the official completion API, a
//! browser-session API behind a reverse proxy, and a WebSocket chat hub.
//!
//! ```rust,ignore
//! use chatweave::prelude::*;
//!
//! let client = ChatClient::from_config(ClientConfig::new(BackendConfig::Completion(
//!     CompletionConfig::new(std::env::var("OPENAI_API_KEY")?),
//! )))?;
//! let first = client.send_message("Hello!", SendOptions::new()).await?;
//! let next = client
//!     .send_message("Tell me more", SendOptions::following(&first))
//!     .await?;
//! ```
#![deny(unsafe_code)]

pub mod backends;
pub mod client;
pub mod config;
pub mod conversation;
pub mod defaults;
pub mod error;
pub mod prompt;
pub mod session;
pub mod streaming;
pub mod telemetry;
pub mod tokens;
pub mod transport;
pub mod types;
pub mod utils;

pub use client::ChatClient;
pub use error::LlmError;
pub use session::{ConversationSession, SendOptions};

/// Commonly used types.
pub mod prelude {
    pub use crate::backends::{
        BackendKind, BrowserBackend, ChatBackend, CompletionBackend, SydneyBackend,
        SydneyOptions, ToneStyle,
    };
    pub use crate::client::ChatClient;
    pub use crate::config::{
        BackendConfig, BrowserConfig, ClientConfig, CompletionConfig, HttpConfig, ModelOptions,
        SessionConfig, StoreConfig, SydneyConfig,
    };
    pub use crate::conversation::{ConversationStore, NamespacedStore};
    pub use crate::error::{ErrorKind, LlmError};
    pub use crate::session::{ConversationSession, SendOptions};
    pub use crate::streaming::{ReplyEvent, ReplyStreamHandle};
    pub use crate::types::{ChatReply, Conversation, Message, PromptBudget, Role};
    pub use crate::utils::CancelHandle;
}
