//! Backend-agnostic entry point.

use crate::backends::{BackendKind, BrowserBackend, CompletionBackend, SydneyBackend};
use crate::config::{BackendConfig, ClientConfig};
use crate::conversation::{KeyValueBackend, NamespacedStore};
use crate::error::LlmError;
use crate::session::{ConversationSession, SendOptions};
use crate::streaming::ReplyStreamHandle;
use crate::types::ChatReply;
use std::sync::Arc;

/// One of the supported backends, each behind its own session.
#[derive(Clone)]
pub enum ChatClient {
    Completion(ConversationSession<CompletionBackend>),
    Browser(ConversationSession<BrowserBackend>),
    Sydney(ConversationSession<SydneyBackend>),
}

impl ChatClient {
    /// Build a client and open the configured store.
    pub fn from_config(config: ClientConfig) -> Result<Self, LlmError> {
        let store = config.store.open();
        Self::with_store(config, store)
    }

    /// Build a client over a shared raw store. Conversations land under the
    /// backend's namespace, so clients of different backends can share one
    /// store.
    pub fn with_store(
        config: ClientConfig,
        store: Arc<dyn KeyValueBackend>,
    ) -> Result<Self, LlmError> {
        config.validate()?;
        let kind = config.backend.kind();
        let store = Arc::new(NamespacedStore::new(store, kind.namespace()));
        let session = config.session;

        let client = match config.backend {
            BackendConfig::Completion(c) => Self::Completion(ConversationSession::new(
                CompletionBackend::new(c)?,
                store,
                session,
            )),
            BackendConfig::Browser(c) => {
                Self::Browser(ConversationSession::new(BrowserBackend::new(c)?, store, session))
            }
            BackendConfig::Sydney(c) => {
                Self::Sydney(ConversationSession::new(SydneyBackend::new(c)?, store, session))
            }
        };
        tracing::debug!(backend = %kind, "chat client ready");
        Ok(client)
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Completion(_) => BackendKind::Completion,
            Self::Browser(_) => BackendKind::Browser,
            Self::Sydney(_) => BackendKind::Sydney,
        }
    }

    pub async fn send_message(
        &self,
        text: impl Into<String>,
        options: SendOptions,
    ) -> Result<ChatReply, LlmError> {
        match self {
            Self::Completion(s) => s.send_message(text, options).await,
            Self::Browser(s) => s.send_message(text, options).await,
            Self::Sydney(s) => s.send_message(text, options).await,
        }
    }

    pub async fn send_message_stream(
        &self,
        text: impl Into<String>,
        options: SendOptions,
    ) -> Result<ReplyStreamHandle, LlmError> {
        match self {
            Self::Completion(s) => s.send_message_stream(text, options).await,
            Self::Browser(s) => s.send_message_stream(text, options).await,
            Self::Sydney(s) => s.send_message_stream(text, options).await,
        }
    }

    /// Remove this backend's conversations from the store.
    pub async fn clear_conversations(&self) -> Result<(), LlmError> {
        match self {
            Self::Completion(s) => s.clear().await,
            Self::Browser(s) => s.clear().await,
            Self::Sydney(s) => s.clear().await,
        }
    }
}

impl From<ConversationSession<CompletionBackend>> for ChatClient {
    fn from(session: ConversationSession<CompletionBackend>) -> Self {
        Self::Completion(session)
    }
}

impl From<ConversationSession<BrowserBackend>> for ChatClient {
    fn from(session: ConversationSession<BrowserBackend>) -> Self {
        Self::Browser(session)
    }
}

impl From<ConversationSession<SydneyBackend>> for ChatClient {
    fn from(session: ConversationSession<SydneyBackend>) -> Self {
        Self::Sydney(session)
    }
}
