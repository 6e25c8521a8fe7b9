use crate::error::LlmError;
use crate::types::ChatReply;
use crate::utils::cancel::CancelHandle;
use futures::Stream;
use std::pin::Pin;

/// Logical event decoded from the wire. Lives for one turn only.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Newly generated text.
    PartialText { delta: String },
    /// The backend finished the reply.
    Done {
        final_text: String,
        raw: serde_json::Value,
    },
    /// The backend cut the reply short; `partial_text` replaces the answer.
    InterruptedByModeration {
        partial_text: String,
        raw: serde_json::Value,
    },
    /// The connection failed or was closed abnormally.
    TransportError { message: String, retryable: bool },
    /// The backend reported an error inside the stream.
    RemoteError { kind: String, message: String },
    /// A payload could not be understood.
    Malformed { message: String },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::PartialText { .. })
    }
}

impl From<LlmError> for StreamEvent {
    fn from(error: LlmError) -> Self {
        match error {
            LlmError::TransportError {
                message, retryable, ..
            } => Self::TransportError { message, retryable },
            LlmError::RemoteError { kind, message } => Self::RemoteError { kind, message },
            LlmError::ParseError(message) | LlmError::JsonError(message) => {
                Self::Malformed { message }
            }
            other => Self::TransportError {
                retryable: other.is_retryable(),
                message: other.to_string(),
            },
        }
    }
}

/// Decoded events of one turn.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// What callers of the streaming API receive.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyEvent {
    /// Text appended to the reply.
    Delta(String),
    /// Final item of a successful turn.
    Completed(Box<ChatReply>),
}

pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<ReplyEvent, LlmError>> + Send>>;

/// A reply stream plus the handle that aborts it.
pub struct ReplyStreamHandle {
    pub stream: ReplyStream,
    pub cancel: CancelHandle,
}

impl ReplyStreamHandle {
    pub fn into_parts(self) -> (ReplyStream, CancelHandle) {
        (self.stream, self.cancel)
    }
}
