//! Official completion API backend.

use super::{BackendKind, ChatBackend, OpenedTurn, TurnRequest};
use crate::config::{CompletionConfig, ModelOptions};
use crate::defaults;
use crate::error::LlmError;
use crate::prompt::{BuiltPrompt, ModelFamily, Prompt, PromptBuilder, PromptFormat, PromptMode};
use crate::session::SendOptions;
use crate::streaming::{SseDecoder, SsePayload, decode_frames};
use crate::tokens::{StructuredMessage, TokenCounter};
use crate::transport::{HttpTransport, ReqwestTransport, TransportRequest};
use crate::types::{Conversation, Message, PromptBudget};
use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

static TITLE_NOISE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9' ]"));

/// Everything needed to send one completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub built: BuiltPrompt,
    pub family: ModelFamily,
    pub url: String,
    pub body: Value,
}

pub struct CompletionBackend {
    config: CompletionConfig,
    api_key: SecretString,
    budget: PromptBudget,
    transport: Arc<dyn HttpTransport>,
    counters: Mutex<HashMap<String, Arc<TokenCounter>>>,
    fixed_counter: Option<Arc<TokenCounter>>,
    fixed_date: Option<NaiveDate>,
}

impl CompletionBackend {
    pub fn new(config: CompletionConfig) -> Result<Self, LlmError> {
        let transport = ReqwestTransport::from_config(&config.http)?;
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(
        config: CompletionConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, LlmError> {
        config.validate()?;
        let api_key = config.resolved_api_key().ok_or_else(|| {
            LlmError::ConfigurationError("API key is required".to_string())
        })?;
        let budget = config.budget()?;
        Ok(Self {
            config,
            api_key,
            budget,
            transport,
            counters: Mutex::new(HashMap::new()),
            fixed_counter: None,
            fixed_date: None,
        })
    }

    /// Count tokens with `counter` for every model.
    pub fn with_token_counter(mut self, counter: Arc<TokenCounter>) -> Self {
        self.fixed_counter = Some(counter);
        self
    }

    /// Date shown in the default instructions instead of today's.
    pub fn with_current_date(mut self, date: NaiveDate) -> Self {
        self.fixed_date = Some(date);
        self
    }

    pub fn budget(&self) -> PromptBudget {
        self.budget
    }

    fn counter(&self, model: &str) -> Result<Arc<TokenCounter>, LlmError> {
        if let Some(counter) = &self.fixed_counter {
            return Ok(counter.clone());
        }
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| LlmError::ConfigurationError("token counter lock poisoned".into()))?;
        if let Some(counter) = counters.get(model) {
            return Ok(counter.clone());
        }
        let counter = Arc::new(TokenCounter::for_model(model)?);
        counters.insert(model.to_string(), counter.clone());
        Ok(counter)
    }

    fn url(&self, family: ModelFamily) -> String {
        if let Some(url) = &self.config.reverse_proxy_url {
            return url.clone();
        }
        let base = self.config.base_url.trim_end_matches('/');
        if family.is_chat() {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/completions")
        }
    }

    fn today(&self) -> NaiveDate {
        self.fixed_date
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    /// Prompt and request body for a turn whose history is `ancestry`.
    pub fn build_request(
        &self,
        ancestry: &[Message],
        options: &SendOptions,
    ) -> Result<CompletionRequest, LlmError> {
        let model_options = match &options.model_options {
            Some(overrides) => self.config.model_options.merge(overrides),
            None => self.config.model_options.clone(),
        };
        let model = model_options.model_or_default().to_string();
        let family = ModelFamily::from_model(&model);
        let format = PromptFormat::for_family(family)
            .with_labels(&self.config.user_label, &self.config.assistant_label);
        let mode = if family.is_chat() {
            PromptMode::Structured
        } else {
            PromptMode::Flat
        };
        let prefix = options
            .prompt_prefix
            .as_deref()
            .or(self.config.prompt_prefix.as_deref());

        let counter = self.counter(&model)?;
        let built = PromptBuilder::new(&counter, &format, self.budget, mode, self.today())
            .with_prefix(prefix)
            .build(ancestry)?;
        tracing::debug!(
            %model,
            prompt_tokens = built.token_count,
            max_tokens = built.max_response_tokens,
            kept = built.context.len(),
            "built completion prompt"
        );

        let body = request_body(&model_options, &model, &format, &built)?;
        Ok(CompletionRequest {
            url: self.url(family),
            built,
            family,
            body,
        })
    }

    async fn complete_once(&self, body: Value) -> Result<Value, LlmError> {
        let request = TransportRequest::post(self.url(ModelFamily::Chat), body)
            .with_bearer(self.api_key.expose_secret())?;
        self.transport.execute_json(request).await
    }
}

fn request_body(
    options: &ModelOptions,
    model: &str,
    format: &PromptFormat,
    built: &BuiltPrompt,
) -> Result<Value, LlmError> {
    let mut body = serde_json::to_value(options)?;
    let Value::Object(fields) = &mut body else {
        return Err(LlmError::InvalidInput(
            "model options must serialize to an object".to_string(),
        ));
    };
    fields.insert("model".to_string(), json!(model));
    fields.insert("stream".to_string(), json!(true));
    fields.insert("max_tokens".to_string(), json!(built.max_response_tokens));
    if options.stop.is_none() {
        fields.insert("stop".to_string(), json!(format.default_stop_sequences()));
    }
    match &built.prompt {
        Prompt::Messages(messages) => fields.insert("messages".to_string(), json!(messages)),
        Prompt::Text(text) => fields.insert("prompt".to_string(), json!(text)),
    };
    Ok(body)
}

/// Strip everything but letters, digits, apostrophes and spaces.
fn clean_title(raw: &str) -> Result<String, LlmError> {
    let noise = TITLE_NOISE
        .as_ref()
        .map_err(|e| LlmError::ConfigurationError(format!("title filter: {e}")))?;
    Ok(noise.replace_all(raw, "").trim().to_string())
}

#[async_trait]
impl ChatBackend for CompletionBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Completion
    }

    async fn open_turn(&self, turn: TurnRequest<'_>) -> Result<OpenedTurn, LlmError> {
        let request = self.build_request(&turn.ancestry, turn.options)?;
        let payload = if request.family.is_chat() {
            SsePayload::ChatDelta
        } else {
            SsePayload::TextDelta
        };
        let http = TransportRequest::post(request.url, request.body)
            .with_bearer(self.api_key.expose_secret())?;
        let frames = self.transport.execute_sse(http).await?;
        Ok(OpenedTurn::new(decode_frames(frames, SseDecoder::new(payload))))
    }

    fn supports_titles(&self) -> bool {
        true
    }

    async fn generate_title(
        &self,
        _conversation: &Conversation,
        user_message: &Message,
        reply: &Message,
    ) -> Result<String, LlmError> {
        let instructions = format!(
            "{}\n\n||>Message:\n{}\n||>Response:\n{}\n\n||>Title:",
            defaults::prompts::TITLE_INSTRUCTIONS,
            user_message.text,
            reply.text
        );
        let body = json!({
            "model": defaults::models::COMPLETION_MODEL,
            "temperature": 0,
            "presence_penalty": 0,
            "frequency_penalty": 0,
            "messages": [StructuredMessage::system(instructions)],
        });
        let response = self.complete_once(body).await?;
        let raw = response
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| LlmError::ParseError("Title response has no content".to_string()))?;
        clean_title(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::{MessageTokenProfile, Tokenizer};
    use crate::types::Role;

    struct CharTokenizer;

    impl Tokenizer for CharTokenizer {
        fn encoding(&self) -> &str {
            "chars"
        }
        fn count_tokens(&self, text: &str) -> usize {
            text.chars().count() / 4
        }
    }

    struct NoTransport;

    #[async_trait]
    impl HttpTransport for NoTransport {
        async fn execute_json(&self, _: TransportRequest) -> Result<Value, LlmError> {
            Err(LlmError::transport("offline", false))
        }
        async fn execute_sse(
            &self,
            _: TransportRequest,
        ) -> Result<crate::streaming::FrameStream<crate::streaming::SseFrame>, LlmError> {
            Err(LlmError::transport("offline", false))
        }
    }

    fn backend(config: CompletionConfig) -> CompletionBackend {
        CompletionBackend::with_transport(config, Arc::new(NoTransport))
            .unwrap()
            .with_token_counter(Arc::new(TokenCounter::new(
                Arc::new(CharTokenizer),
                MessageTokenProfile::for_model("gpt-3.5-turbo"),
            )))
            .with_current_date(NaiveDate::from_ymd_opt(2026, 10, 18).unwrap())
    }

    fn hello() -> Vec<Message> {
        vec![Message::new("u1", Some("root".into()), Role::User, "Hello!")]
    }

    #[test]
    fn chat_models_get_structured_body() {
        let backend = backend(
            CompletionConfig::new("k")
                .with_base_url("https://api.example.com/v1/")
                .with_budget(4095, 1000, None),
        );
        let request = backend.build_request(&hello(), &SendOptions::default()).unwrap();

        assert_eq!(request.url, "https://api.example.com/v1/chat/completions");
        assert_eq!(request.body["stream"], true);
        assert_eq!(request.body["model"], "gpt-3.5-turbo");
        assert_eq!(request.body["max_tokens"], 1000);
        assert_eq!(request.body["messages"][0]["name"], "instructions");
        assert!(
            request.body["messages"][1]["content"]
                .as_str()
                .unwrap()
                .contains("||>User:\nHello!\n")
        );
        assert_eq!(request.body["stop"][1], "\nUser:");
    }

    #[test]
    fn text_models_get_flat_prompt_and_overrides_apply_per_call() {
        let backend = backend(CompletionConfig::new("k").with_model("text-davinci-003"));
        let options = SendOptions {
            model_options: Some(ModelOptions {
                temperature: Some(0.1),
                stop: Some(vec!["END".into()]),
                ..Default::default()
            }),
            prompt_prefix: Some("Answer in French.\n\n".into()),
            ..Default::default()
        };
        let request = backend.build_request(&hello(), &options).unwrap();

        assert!(request.url.ends_with("/completions"));
        assert!(!request.url.ends_with("/chat/completions"));
        let prompt = request.body["prompt"].as_str().unwrap();
        assert!(prompt.starts_with("||>Instructions:\nAnswer in French.\n\n"));
        assert!(prompt.ends_with("||>User:\nHello!\n||>ChatGPT:\n"));
        assert_eq!(request.body["stop"], json!(["END"]));
        assert!((request.body["temperature"].as_f64().unwrap() - 0.1).abs() < 1e-6);

        let plain = backend.build_request(&hello(), &SendOptions::default()).unwrap();
        assert!(plain.body.get("temperature").is_none());
    }

    #[test]
    fn reverse_proxy_replaces_endpoint() {
        let backend = backend(
            CompletionConfig::new("k").with_reverse_proxy_url("https://proxy.example.com/v1/chat"),
        );
        let request = backend.build_request(&hello(), &SendOptions::default()).unwrap();
        assert_eq!(request.url, "https://proxy.example.com/v1/chat");
    }

    #[test]
    fn titles_are_sanitized() {
        assert_eq!(clean_title("  \"Greeting, Friends!\"\n").unwrap(), "Greeting Friends");
        assert_eq!(clean_title("Don't Panic").unwrap(), "Don't Panic");
    }
}
