//! Type Conversions for LlmError
//!
//! This module contains From trait implementations for converting
//! common error types into LlmError.

use super::types::LlmError;

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        let retryable = err.is_timeout() || err.is_connect();
        Self::TransportError {
            message: err.to_string(),
            status: err.status().map(|s| s.as_u16()),
            retryable,
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<std::io::Error> for LlmError {
    fn from(err: std::io::Error) -> Self {
        Self::StoreError(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LlmError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        let retryable = matches!(
            err,
            WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Io(_)
        );
        Self::TransportError {
            message: format!("WebSocket error: {err}"),
            status: None,
            retryable,
        }
    }
}
