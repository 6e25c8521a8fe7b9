//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chatweave::error::LlmError;
use chatweave::tokens::{MessageTokenProfile, TokenCounter, Tokenizer};
use chatweave::transport::{WebSocketConnector, WsConnection, WsPeer};
use reqwest::header::HeaderMap;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use wiremock::ResponseTemplate;

pub const RS: char = '\u{1e}';

/// `text/event-stream` response with one `data:` event per payload.
pub fn sse_response<S: AsRef<str>>(payloads: &[S]) -> ResponseTemplate {
    let body: String = payloads
        .iter()
        .map(|p| format!("data: {}\n\n", p.as_ref()))
        .collect();
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

pub fn chat_delta(text: &str) -> String {
    json!({"choices": [{"delta": {"content": text}, "index": 0}]}).to_string()
}

pub fn text_delta(text: &str) -> String {
    json!({"choices": [{"text": text, "index": 0}]}).to_string()
}

pub fn browser_snapshot(message_id: &str, conversation_id: &str, text: &str) -> String {
    json!({
        "message": {
            "id": message_id,
            "author": {"role": "assistant"},
            "content": {"content_type": "text", "parts": [text]},
        },
        "conversation_id": conversation_id,
    })
    .to_string()
}

/// Counts one token per `#`, so prompt costs are exact.
pub struct HashTokenizer;

impl Tokenizer for HashTokenizer {
    fn encoding(&self) -> &str {
        "hash"
    }

    fn count_tokens(&self, text: &str) -> usize {
        text.matches('#').count()
    }
}

pub fn hash_counter(model: &str) -> Arc<TokenCounter> {
    Arc::new(TokenCounter::new(
        Arc::new(HashTokenizer),
        MessageTokenProfile::for_model(model),
    ))
}

/// One record of the chat hub protocol, terminated by the separator.
pub fn record(value: Value) -> String {
    format!("{value}{RS}")
}

pub fn hub_update(text: &str) -> String {
    record(json!({
        "type": 1,
        "target": "update",
        "arguments": [{"messages": [{"author": "bot", "text": text}]}],
    }))
}

pub fn hub_final(text: &str) -> String {
    record(json!({
        "type": 2,
        "invocationId": "0",
        "item": {
            "messages": [
                {"author": "user", "text": "question"},
                {"author": "bot", "text": text, "suggestedResponses": [{"text": "More"}]},
            ],
            "conversationExpiryTime": "2026-10-19T06:00:00Z",
            "result": {"value": "Success"},
        },
    }))
}

/// Hands out pre-scripted in-memory connections in order.
#[derive(Default)]
pub struct FakeHub {
    connections: Mutex<VecDeque<WsConnection>>,
    pub urls: Mutex<Vec<String>>,
    pub cookies: Mutex<Vec<Option<String>>>,
}

impl FakeHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a connection that answers the protocol handshake and then
    /// delivers `frames`. The peer is returned so the test can inspect what
    /// was sent.
    pub async fn script(&self, frames: Vec<String>) -> WsPeer {
        let (connection, peer) = WsConnection::in_memory();
        assert!(peer.push(record(json!({}))).await);
        for frame in frames {
            assert!(peer.push(frame).await);
        }
        self.connections.lock().unwrap().push_back(connection);
        peer
    }
}

#[async_trait]
impl WebSocketConnector for FakeHub {
    async fn connect(&self, url: &str, headers: &HeaderMap) -> Result<WsConnection, LlmError> {
        self.urls.lock().unwrap().push(url.to_string());
        self.cookies.lock().unwrap().push(
            headers
                .get("cookie")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        );
        self.connections
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::transport("no scripted connection", false))
    }
}

/// Records received by the far end, separators stripped.
pub async fn sent_records(peer: &mut WsPeer, count: usize) -> Vec<Value> {
    let mut records = Vec::new();
    while records.len() < count {
        let Some(frame) = peer.next_sent().await else {
            break;
        };
        for raw in frame.split(RS).filter(|r| !r.is_empty()) {
            records.push(serde_json::from_str(raw).unwrap());
        }
    }
    records
}
