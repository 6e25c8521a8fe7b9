//! Browser-session backend behind a reverse proxy.

use super::{BackendKind, ChatBackend, OpenedTurn, Settlement, TurnRequest};
use crate::config::BrowserConfig;
use crate::error::LlmError;
use crate::streaming::{Resolution, SseDecoder, SsePayload, decode_frames};
use crate::transport::{HttpTransport, ReqwestTransport, TransportRequest};
use crate::types::{Conversation, Message};
use async_trait::async_trait;
use reqwest::header::COOKIE;
use secrecy::ExposeSecret;
use serde_json::{Map, Value, json};
use std::sync::Arc;

/// Metadata key holding the server-side conversation id.
const REMOTE_CONVERSATION_ID: &str = "remoteConversationId";

pub struct BrowserBackend {
    config: BrowserConfig,
    transport: Arc<dyn HttpTransport>,
}

impl BrowserBackend {
    pub fn new(config: BrowserConfig) -> Result<Self, LlmError> {
        let transport = ReqwestTransport::from_config(&config.http)?;
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(
        config: BrowserConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, LlmError> {
        config.validate()?;
        Ok(Self { config, transport })
    }

    fn authorize(&self, mut request: TransportRequest) -> Result<TransportRequest, LlmError> {
        if let Some(token) = &self.config.access_token {
            request = request.with_bearer(token.expose_secret())?;
        }
        if let Some(cookies) = &self.config.cookies {
            request = request.with_header(COOKIE.as_str(), cookies)?;
        }
        Ok(request)
    }

    /// Proxy root, i.e. the conversation URL without its `/conversation` tail.
    fn api_base(&self) -> &str {
        let url = self.config.reverse_proxy_url.trim_end_matches('/');
        url.strip_suffix("/conversation").unwrap_or(url)
    }

    pub(crate) fn request_body(&self, turn: &TurnRequest<'_>) -> Value {
        let model = turn
            .options
            .model_options
            .as_ref()
            .and_then(|o| o.model.clone())
            .unwrap_or_else(|| self.config.model.clone());
        let mut body = json!({
            "action": "next",
            "parent_message_id": turn.user_message.parent_message_id,
            "model": model,
            "messages": [{
                "id": turn.user_message.id,
                "role": "user",
                "content": {
                    "content_type": "text",
                    "parts": [turn.user_message.text],
                },
            }],
        });
        if let Some(remote) = remote_conversation_id(turn.conversation) {
            body["conversation_id"] = json!(remote);
        }
        body
    }
}

fn remote_conversation_id(conversation: &Conversation) -> Option<&str> {
    conversation
        .metadata
        .get(REMOTE_CONVERSATION_ID)
        .and_then(Value::as_str)
}

#[async_trait]
impl ChatBackend for BrowserBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Browser
    }

    async fn open_turn(&self, turn: TurnRequest<'_>) -> Result<OpenedTurn, LlmError> {
        let body = self.request_body(&turn);
        tracing::debug!(
            conversation_id = turn.conversation_id,
            remote = remote_conversation_id(turn.conversation).unwrap_or("-"),
            "opening browser turn"
        );
        let request = self.authorize(TransportRequest::post(&self.config.reverse_proxy_url, body))?;
        let frames = self.transport.execute_sse(request).await?;
        Ok(OpenedTurn::new(decode_frames(
            frames,
            SseDecoder::new(SsePayload::Snapshot),
        )))
    }

    fn settle(
        &self,
        resolution: &Resolution,
        mut metadata: Map<String, Value>,
        conversation: &mut Conversation,
    ) -> Settlement {
        if let Some(remote) = resolution.raw.get("conversation_id").and_then(Value::as_str) {
            metadata.insert(REMOTE_CONVERSATION_ID.to_string(), json!(remote));
        }
        conversation.metadata.extend(metadata);
        Settlement {
            message_id: resolution
                .raw
                .pointer("/message/id")
                .and_then(Value::as_str)
                .map(str::to_string),
            details: resolution.raw.clone(),
        }
    }

    fn supports_titles(&self) -> bool {
        true
    }

    async fn generate_title(
        &self,
        conversation: &Conversation,
        _user_message: &Message,
        reply: &Message,
    ) -> Result<String, LlmError> {
        let remote = remote_conversation_id(conversation).ok_or_else(|| {
            LlmError::InvalidInput("Conversation has no remote id yet".to_string())
        })?;
        let url = format!("{}/conversation/gen_title/{remote}", self.api_base());
        let body = json!({ "message_id": reply.id, "model": self.config.model });
        let response = self
            .transport
            .execute_json(self.authorize(TransportRequest::post(url, body))?)
            .await?;
        response
            .get("title")
            .and_then(Value::as_str)
            .map(|t| t.trim().to_string())
            .ok_or_else(|| LlmError::ParseError("Title response has no title".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SendOptions;
    use crate::types::Role;

    struct Unused;

    #[async_trait]
    impl HttpTransport for Unused {
        async fn execute_json(&self, _: TransportRequest) -> Result<Value, LlmError> {
            unreachable!()
        }
        async fn execute_sse(
            &self,
            _: TransportRequest,
        ) -> Result<crate::streaming::FrameStream<crate::streaming::SseFrame>, LlmError> {
            unreachable!()
        }
    }

    fn backend() -> BrowserBackend {
        BrowserBackend::with_transport(
            BrowserConfig::new("token").with_reverse_proxy_url("https://proxy.test/api/conversation"),
            Arc::new(Unused),
        )
        .unwrap()
    }

    fn turn<'a>(
        conversation: &'a Conversation,
        user: &'a Message,
        options: &'a SendOptions,
    ) -> TurnRequest<'a> {
        TurnRequest {
            conversation_id: "c1",
            conversation,
            user_message: user,
            ancestry: vec![user.clone()],
            options,
            is_new: true,
        }
    }

    #[test]
    fn body_continues_remote_conversation() {
        let backend = backend();
        let mut conversation = Conversation::new();
        let user = Message::new("u1", Some("a0".into()), Role::User, "Hello!");
        conversation.push(user.clone());
        let options = SendOptions::default();

        let body = backend.request_body(&turn(&conversation, &user, &options));
        assert_eq!(body["action"], "next");
        assert_eq!(body["parent_message_id"], "a0");
        assert_eq!(body["messages"][0]["content"]["parts"][0], "Hello!");
        assert!(body.get("conversation_id").is_none());

        conversation
            .metadata
            .insert(REMOTE_CONVERSATION_ID.into(), json!("remote-1"));
        let body = backend.request_body(&turn(&conversation, &user, &options));
        assert_eq!(body["conversation_id"], "remote-1");
    }

    #[test]
    fn settle_adopts_remote_ids() {
        let backend = backend();
        let mut conversation = Conversation::new();
        let resolution = Resolution {
            text: "Hi".into(),
            raw: json!({"message": {"id": "m-remote"}, "conversation_id": "remote-9"}),
            interrupted: false,
        };
        let settlement = backend.settle(&resolution, Map::new(), &mut conversation);
        assert_eq!(settlement.message_id.as_deref(), Some("m-remote"));
        assert_eq!(remote_conversation_id(&conversation), Some("remote-9"));
        assert_eq!(backend.api_base(), "https://proxy.test/api");
    }
}
