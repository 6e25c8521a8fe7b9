//! Turn orchestration.
//!
//! A [`ConversationSession`] owns one backend and one conversation store. Each
//! call to [`ConversationSession::send_message_stream`] runs a single turn:
//! load the conversation, append the user message, open the backend stream,
//! fold its events through a [`ResponseAggregator`] and, on success, append
//! the assistant message and persist.

use crate::backends::{ChatBackend, SydneyOptions, TurnRequest};
use crate::config::{ModelOptions, SessionConfig};
use crate::conversation::{ConversationStore, linearize};
use crate::error::{LlmError, summarize};
use crate::streaming::{
    EventStream, ReplyEvent, ReplyStreamHandle, Resolution, ResponseAggregator, Transition,
};
use crate::types::{ChatReply, Conversation, Message, Role, new_id};
use crate::utils::CancelHandle;
use futures::StreamExt;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Per-call options. Anything left unset falls back to the backend
/// configuration.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Continue this conversation; a new id is generated when absent.
    pub conversation_id: Option<String>,
    /// Message the new user message answers; a new root id when absent.
    pub parent_message_id: Option<String>,
    pub cancel: Option<CancelHandle>,
    /// Ask the backend for a title on the first turn of a new conversation.
    pub generate_title: bool,
    pub prompt_prefix: Option<String>,
    pub model_options: Option<ModelOptions>,
    pub sydney: SydneyOptions,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue after `parent_message_id` in `conversation_id`.
    pub fn continuing(
        conversation_id: impl Into<String>,
        parent_message_id: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: Some(conversation_id.into()),
            parent_message_id: Some(parent_message_id.into()),
            ..Self::default()
        }
    }

    /// Options that continue the conversation `reply` belongs to.
    pub fn following(reply: &ChatReply) -> Self {
        Self::continuing(&reply.conversation_id, &reply.message_id)
    }

    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_title(mut self) -> Self {
        self.generate_title = true;
        self
    }

    pub fn with_prompt_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prompt_prefix = Some(prefix.into());
        self
    }

    pub fn with_model_options(mut self, options: ModelOptions) -> Self {
        self.model_options = Some(options);
        self
    }

    pub fn with_sydney(mut self, sydney: SydneyOptions) -> Self {
        self.sydney = sydney;
        self
    }
}

struct SessionInner<B> {
    backend: B,
    store: Arc<dyn ConversationStore>,
    config: SessionConfig,
}

/// Conversation-tree chat session over one backend.
///
/// Cheap to clone; clones share the backend and store.
pub struct ConversationSession<B> {
    inner: Arc<SessionInner<B>>,
}

impl<B> Clone for ConversationSession<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// State of a turn whose stream is open.
struct PendingTurn {
    conversation_id: String,
    conversation: Conversation,
    user_message: Message,
    metadata: Map<String, Value>,
    is_new: bool,
    generate_title: bool,
}

impl<B: ChatBackend> ConversationSession<B> {
    pub fn new(backend: B, store: Arc<dyn ConversationStore>, config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                backend,
                store,
                config,
            }),
        }
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Run a turn to completion.
    pub async fn send_message(
        &self,
        text: impl Into<String>,
        options: SendOptions,
    ) -> Result<ChatReply, LlmError> {
        let mut stream = self.send_message_stream(text, options).await?.stream;
        while let Some(event) = stream.next().await {
            if let ReplyEvent::Completed(reply) = event? {
                return Ok(*reply);
            }
        }
        Err(LlmError::transport("Reply stream ended without a result", false))
    }

    /// Start a turn and stream its deltas.
    ///
    /// Errors raised before the backend stream opens (oversized prompt,
    /// failed handshake) are returned here; later ones arrive as the final
    /// stream item. The conversation is only persisted when the stream ends
    /// with [`ReplyEvent::Completed`].
    pub async fn send_message_stream(
        &self,
        text: impl Into<String>,
        options: SendOptions,
    ) -> Result<ReplyStreamHandle, LlmError> {
        // The turn gets its own handle so aborting it leaves the caller's handle
        // usable for other turns.
        let cancel = options
            .cancel
            .as_ref()
            .map(CancelHandle::child)
            .unwrap_or_default();
        let conversation_id = options.conversation_id.clone().unwrap_or_else(new_id);
        let parent_id = options.parent_message_id.clone().unwrap_or_else(new_id);

        let stored = self.inner.store.get(&conversation_id).await?;
        let is_new = stored.is_none();
        let mut conversation = stored.unwrap_or_default();
        let user_message = Message::new(new_id(), Some(parent_id), Role::User, text);
        conversation.push(user_message.clone());
        let ancestry = linearize(&conversation.messages, &user_message.id);

        let turn = TurnRequest {
            conversation_id: &conversation_id,
            conversation: &conversation,
            user_message: &user_message,
            ancestry,
            options: &options,
            is_new,
        };
        let timeout = self.inner.config.request_timeout;
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(LlmError::Cancelled("Request was cancelled.".to_string()));
            }
            opened = tokio::time::timeout(timeout, self.inner.backend.open_turn(turn)) => {
                opened.map_err(|_| timeout_error(timeout))??
            }
        };
        tracing::debug!(
            backend = %self.inner.backend.kind(),
            %conversation_id,
            user_message_id = %user_message.id,
            "turn stream opened"
        );

        let pending = PendingTurn {
            conversation_id,
            conversation,
            user_message,
            metadata: opened.metadata,
            is_new,
            generate_title: options.generate_title,
        };
        let stream = self.drive(opened.events, pending, cancel.clone());
        Ok(ReplyStreamHandle {
            stream: Box::pin(stream),
            cancel,
        })
    }

    /// Remove every conversation in this session's store.
    pub async fn clear(&self) -> Result<(), LlmError> {
        self.inner.store.clear().await
    }

    fn drive(
        &self,
        mut events: EventStream,
        pending: PendingTurn,
        cancel: CancelHandle,
    ) -> impl futures::Stream<Item = Result<ReplyEvent, LlmError>> + Send + 'static {
        let session = self.clone();
        let timeout = self.inner.config.request_timeout;
        async_stream::stream! {
            let mut aggregator = ResponseAggregator::new();
            aggregator.start();
            loop {
                let transition = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => aggregator.cancel(),
                    next = tokio::time::timeout(timeout, events.next()) => match next {
                        Ok(Some(event)) => aggregator.apply(event),
                        Ok(None) => aggregator.fail(LlmError::transport(
                            "Stream ended without a reply.",
                            false,
                        )),
                        Err(_) => aggregator.fail(timeout_error(timeout)),
                    },
                };
                match transition {
                    Transition::Progress(delta) => yield Ok(ReplyEvent::Delta(delta)),
                    Transition::Ignored => {}
                    Transition::Rejected(error) => {
                        drop(events);
                        tracing::warn!(
                            conversation_id = %pending.conversation_id,
                            kind = %summarize(&error),
                            error = %error,
                            "turn rejected"
                        );
                        yield Err(error);
                        break;
                    }
                    Transition::Resolved(resolution) => {
                        drop(events);
                        yield session.finish(pending, resolution).await.map(|reply| {
                            ReplyEvent::Completed(Box::new(reply))
                        });
                        break;
                    }
                }
            }
        }
    }

    async fn finish(
        &self,
        pending: PendingTurn,
        resolution: Resolution,
    ) -> Result<ChatReply, LlmError> {
        let PendingTurn {
            conversation_id,
            mut conversation,
            user_message,
            metadata,
            is_new,
            generate_title,
        } = pending;
        let backend = &self.inner.backend;

        let settlement = backend.settle(&resolution, metadata, &mut conversation);
        let reply_message = Message::new(
            settlement.message_id.unwrap_or_else(new_id),
            Some(user_message.id.clone()),
            Role::Assistant,
            resolution.text.clone(),
        )
        .with_details(settlement.details.clone());
        conversation.push(reply_message.clone());

        let mut title = None;
        if is_new && generate_title && backend.supports_titles() {
            match backend
                .generate_title(&conversation, &user_message, &reply_message)
                .await
            {
                Ok(generated) if !generated.is_empty() => {
                    conversation.title = Some(generated.clone());
                    title = Some(generated);
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(
                        %conversation_id,
                        kind = %summarize(&error),
                        %error,
                        "title generation failed"
                    );
                }
            }
        }

        self.inner.store.set(&conversation_id, &conversation).await?;
        tracing::info!(
            backend = %backend.kind(),
            %conversation_id,
            message_id = %reply_message.id,
            interrupted = resolution.interrupted,
            "turn completed"
        );

        Ok(ChatReply {
            text: resolution.text,
            conversation_id,
            parent_message_id: user_message.id,
            message_id: reply_message.id,
            title,
            details: settlement.details,
            interrupted: resolution.interrupted,
        })
    }
}

fn timeout_error(timeout: std::time::Duration) -> LlmError {
    LlmError::TimeoutError(format!(
        "No response from the backend within {} ms",
        timeout.as_millis()
    ))
}
