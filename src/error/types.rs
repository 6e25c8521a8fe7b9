//! Core error types.

use thiserror::Error;

/// Machine-readable classification of an [`LlmError`].
///
/// Front ends map these onto exit codes or HTTP statuses without matching on
/// message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    PromptTooLarge,
    BackendHandshake,
    Remote,
    Transport,
    Timeout,
    Cancellation,
    Parse,
    Store,
    InvalidInput,
    Unsupported,
}

impl ErrorKind {
    /// Stable snake_case identifier.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration_error",
            Self::PromptTooLarge => "prompt_too_large",
            Self::BackendHandshake => "backend_handshake_error",
            Self::Remote => "remote_error",
            Self::Transport => "transport_error",
            Self::Timeout => "timeout_error",
            Self::Cancellation => "cancellation_error",
            Self::Parse => "parse_error",
            Self::Store => "store_error",
            Self::InvalidInput => "invalid_input",
            Self::Unsupported => "unsupported_operation",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error type returned by every fallible operation in this crate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    /// Invalid client or budget configuration. Raised at setup time.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The newest message alone does not fit in the prompt budget.
    #[error(
        "Prompt is too long. Max token count is {max_tokens}, but prompt is {prompt_tokens} tokens long ({overflow} over)"
    )]
    PromptTooLarge {
        max_tokens: usize,
        prompt_tokens: usize,
        overflow: usize,
    },

    /// A session handshake was refused by the remote side.
    #[error("{kind}: {message}")]
    HandshakeError { kind: String, message: String },

    /// The remote side reported an error inside an otherwise healthy stream.
    #[error("{kind}: {message}")]
    RemoteError { kind: String, message: String },

    /// Connection-level failure (HTTP status, socket error, unexpected close).
    #[error("Transport error: {message}")]
    TransportError {
        message: String,
        status: Option<u16>,
        retryable: bool,
    },

    /// No terminal event arrived within the inactivity window.
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// The caller aborted the turn.
    #[error("Request cancelled: {0}")]
    Cancelled(String),

    /// A frame or payload could not be interpreted.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    JsonError(String),

    /// Conversation store failure.
    #[error("Store error: {0}")]
    StoreError(String),

    /// Caller supplied an unusable argument.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The selected backend does not offer this operation.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
}

impl LlmError {
    /// Machine-readable kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigurationError(_) => ErrorKind::Configuration,
            Self::PromptTooLarge { .. } => ErrorKind::PromptTooLarge,
            Self::HandshakeError { .. } => ErrorKind::BackendHandshake,
            Self::RemoteError { .. } => ErrorKind::Remote,
            Self::TransportError { .. } => ErrorKind::Transport,
            Self::TimeoutError(_) => ErrorKind::Timeout,
            Self::Cancelled(_) => ErrorKind::Cancellation,
            Self::ParseError(_) | Self::JsonError(_) => ErrorKind::Parse,
            Self::StoreError(_) => ErrorKind::Store,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::UnsupportedOperation(_) => ErrorKind::Unsupported,
        }
    }

    /// Optional numeric code for front ends.
    ///
    /// Transport errors report the HTTP status when one was received; the
    /// other kinds report the status a gateway would conventionally answer with.
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::TransportError { status, .. } => *status,
            Self::PromptTooLarge { .. } | Self::InvalidInput(_) => Some(400),
            Self::HandshakeError { kind, .. } if kind == "UnauthorizedRequest" => Some(401),
            Self::HandshakeError { .. } | Self::RemoteError { .. } => Some(502),
            Self::TimeoutError(_) => Some(504),
            Self::Cancelled(_) => Some(499),
            Self::UnsupportedOperation(_) => Some(501),
            Self::ConfigurationError(_)
            | Self::ParseError(_)
            | Self::JsonError(_)
            | Self::StoreError(_) => None,
        }
    }

    /// Whether retrying the same turn could succeed.
    ///
    /// Nothing in this crate retries automatically; this is a hint for callers.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransportError { retryable, .. } => *retryable,
            Self::TimeoutError(_) => true,
            _ => false,
        }
    }

    /// True when the turn was aborted by the caller rather than failing.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}
