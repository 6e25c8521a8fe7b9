//! Error constructors used across backends.

use super::types::LlmError;

impl LlmError {
    /// Prompt overflow for a budget of `max_tokens`.
    pub fn prompt_too_large(max_tokens: usize, prompt_tokens: usize) -> Self {
        Self::PromptTooLarge {
            max_tokens,
            prompt_tokens,
            overflow: prompt_tokens.saturating_sub(max_tokens),
        }
    }

    /// Non-success HTTP status. 408, 429 and 5xx are flagged retryable.
    pub fn http_status(status: u16, body: impl AsRef<str>) -> Self {
        let body = body.as_ref();
        Self::TransportError {
            message: format!("Failed to send message. HTTP {status} - {body}"),
            status: Some(status),
            retryable: status == 408 || status == 429 || status >= 500,
        }
    }

    /// Connection-level failure without an HTTP status.
    pub fn transport(message: impl Into<String>, retryable: bool) -> Self {
        Self::TransportError {
            message: message.into(),
            status: None,
            retryable,
        }
    }

    /// Remote-side error with a named kind.
    pub fn remote(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RemoteError {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Refused session handshake.
    pub fn handshake(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HandshakeError {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Short human summary, used in logs where the full message would be noisy.
pub fn summarize(error: &LlmError) -> String {
    match error.code() {
        Some(code) => format!("{} ({code})", error.kind()),
        None => error.kind().to_string(),
    }
}
