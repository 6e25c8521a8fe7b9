//! Client configuration
//!
//! Every struct here deserializes from a config file; credentials are kept in
//! [`SecretString`] and never serialized back out.

use crate::backends::{BackendKind, ToneStyle};
use crate::conversation::{FileBackend, KeyValueBackend, MemoryBackend};
use crate::defaults;
use crate::error::LlmError;
use crate::prompt::ModelFamily;
use crate::types::PromptBudget;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// HTTP client settings shared by every backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Whole-request timeout. Streaming turns rely on the session inactivity
    /// timeout instead, so this is unset by default.
    #[serde(deserialize_with = "duration_secs_opt")]
    pub timeout: Option<Duration>,
    #[serde(deserialize_with = "duration_secs_opt")]
    pub connect_timeout: Option<Duration>,
    /// Extra headers sent with every request.
    pub headers: HashMap<String, String>,
    /// Proxy URL, e.g. `http://127.0.0.1:7890`.
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            connect_timeout: Some(defaults::http::CONNECT_TIMEOUT),
            headers: HashMap::new(),
            proxy: None,
            user_agent: Some(defaults::http::USER_AGENT.to_string()),
        }
    }
}

impl HttpConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Sampling parameters passed through to the completion API.
///
/// Per-call overrides are merged over the configured base with [`merge`]; the
/// base is never modified.
///
/// [`merge`]: ModelOptions::merge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

impl ModelOptions {
    /// `overrides` wins wherever it is set.
    pub fn merge(&self, overrides: &ModelOptions) -> ModelOptions {
        ModelOptions {
            model: overrides.model.clone().or_else(|| self.model.clone()),
            temperature: overrides.temperature.or(self.temperature),
            top_p: overrides.top_p.or(self.top_p),
            presence_penalty: overrides.presence_penalty.or(self.presence_penalty),
            frequency_penalty: overrides.frequency_penalty.or(self.frequency_penalty),
            stop: overrides.stop.clone().or_else(|| self.stop.clone()),
        }
    }

    pub fn model_or_default(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or(defaults::models::COMPLETION_MODEL)
    }
}

/// Official completion API.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompletionConfig {
    /// Falls back to `OPENAI_API_KEY`.
    #[serde(deserialize_with = "secret_opt")]
    pub api_key: Option<SecretString>,
    pub base_url: String,
    /// Full endpoint URL that replaces `{base_url}/...` when set.
    pub reverse_proxy_url: Option<String>,
    pub model_options: ModelOptions,
    pub max_context_tokens: Option<usize>,
    pub max_response_tokens: Option<usize>,
    pub max_prompt_tokens: Option<usize>,
    pub user_label: String,
    pub assistant_label: String,
    /// Replaces the default instructions preamble.
    pub prompt_prefix: Option<String>,
    pub http: HttpConfig,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: defaults::endpoints::OPENAI_BASE_URL.to_string(),
            reverse_proxy_url: None,
            model_options: ModelOptions::default(),
            max_context_tokens: None,
            max_response_tokens: None,
            max_prompt_tokens: None,
            user_label: defaults::prompts::USER_LABEL.to_string(),
            assistant_label: defaults::prompts::ASSISTANT_LABEL.to_string(),
            prompt_prefix: None,
            http: HttpConfig::default(),
        }
    }
}

impl CompletionConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(SecretString::from(api_key.into())),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_reverse_proxy_url(mut self, url: impl Into<String>) -> Self {
        self.reverse_proxy_url = Some(url.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_options.model = Some(model.into());
        self
    }

    pub fn with_model_options(mut self, options: ModelOptions) -> Self {
        self.model_options = options;
        self
    }

    pub fn with_budget(
        mut self,
        max_context_tokens: usize,
        max_response_tokens: usize,
        max_prompt_tokens: Option<usize>,
    ) -> Self {
        self.max_context_tokens = Some(max_context_tokens);
        self.max_response_tokens = Some(max_response_tokens);
        self.max_prompt_tokens = max_prompt_tokens;
        self
    }

    pub fn with_labels(mut self, user: impl Into<String>, assistant: impl Into<String>) -> Self {
        self.user_label = user.into();
        self.assistant_label = assistant.into();
        self
    }

    pub fn with_prompt_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prompt_prefix = Some(prefix.into());
        self
    }

    pub fn with_http_config(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }

    /// Configured key, else `OPENAI_API_KEY`.
    pub fn resolved_api_key(&self) -> Option<SecretString> {
        self.api_key.clone().or_else(|| {
            std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.is_empty())
                .map(SecretString::from)
        })
    }

    /// Token budget for the configured model.
    pub fn budget(&self) -> Result<PromptBudget, LlmError> {
        let family = ModelFamily::from_model(self.model_options.model_or_default());
        let context = self.max_context_tokens.unwrap_or(if family.is_chat() {
            defaults::budget::CHAT_MAX_CONTEXT_TOKENS
        } else {
            defaults::budget::TEXT_MAX_CONTEXT_TOKENS
        });
        let response = self
            .max_response_tokens
            .unwrap_or(defaults::budget::MAX_RESPONSE_TOKENS);
        let budget = PromptBudget::new(context, response)?;
        match self.max_prompt_tokens {
            Some(prompt) => budget.with_max_prompt_tokens(prompt),
            None => Ok(budget),
        }
    }

    pub fn validate(&self) -> Result<(), LlmError> {
        if self.resolved_api_key().is_none() {
            return Err(LlmError::ConfigurationError(
                "API key is required (set apiKey or OPENAI_API_KEY)".to_string(),
            ));
        }
        validate_url("Base URL", &self.base_url)?;
        if let Some(url) = &self.reverse_proxy_url {
            validate_url("Reverse proxy URL", url)?;
        }
        self.budget().map(|_| ())
    }
}

/// Unofficial browser-session backend behind a reverse proxy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrowserConfig {
    pub reverse_proxy_url: String,
    #[serde(deserialize_with = "secret_opt")]
    pub access_token: Option<SecretString>,
    pub cookies: Option<String>,
    pub model: String,
    pub http: HttpConfig,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            reverse_proxy_url: defaults::endpoints::BROWSER_CONVERSATION_URL.to_string(),
            access_token: None,
            cookies: None,
            model: defaults::models::BROWSER_MODEL.to_string(),
            http: HttpConfig::default(),
        }
    }
}

impl BrowserConfig {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(SecretString::from(access_token.into())),
            ..Self::default()
        }
    }

    pub fn with_reverse_proxy_url(mut self, url: impl Into<String>) -> Self {
        self.reverse_proxy_url = url.into();
        self
    }

    pub fn with_cookies(mut self, cookies: impl Into<String>) -> Self {
        self.cookies = Some(cookies.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn validate(&self) -> Result<(), LlmError> {
        validate_url("Reverse proxy URL", &self.reverse_proxy_url)?;
        if self.access_token.is_none() && self.cookies.is_none() {
            return Err(LlmError::ConfigurationError(
                "An access token or session cookies are required".to_string(),
            ));
        }
        Ok(())
    }
}

/// WebSocket chat hub backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SydneyConfig {
    pub host: String,
    pub chathub_url: String,
    /// Value of the `_U` cookie.
    #[serde(deserialize_with = "secret_opt")]
    pub user_token: Option<SecretString>,
    /// Full cookie header; takes precedence over `user_token`.
    pub cookies: Option<String>,
    pub tone: ToneStyle,
    /// Replaces the default persona in jailbreak mode.
    pub system_message: Option<String>,
    pub http: HttpConfig,
}

impl Default for SydneyConfig {
    fn default() -> Self {
        Self {
            host: defaults::endpoints::SYDNEY_HOST.to_string(),
            chathub_url: defaults::endpoints::SYDNEY_CHATHUB_URL.to_string(),
            user_token: None,
            cookies: None,
            tone: ToneStyle::default(),
            system_message: None,
            http: HttpConfig::default(),
        }
    }
}

impl SydneyConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_chathub_url(mut self, url: impl Into<String>) -> Self {
        self.chathub_url = url.into();
        self
    }

    pub fn with_user_token(mut self, token: impl Into<String>) -> Self {
        self.user_token = Some(SecretString::from(token.into()));
        self
    }

    pub fn with_tone(mut self, tone: ToneStyle) -> Self {
        self.tone = tone;
        self
    }

    pub fn validate(&self) -> Result<(), LlmError> {
        validate_url("Host", &self.host)?;
        if !self.chathub_url.starts_with("ws://") && !self.chathub_url.starts_with("wss://") {
            return Err(LlmError::ConfigurationError(
                "Chat hub URL must start with ws:// or wss://".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which backend a client talks to, with its settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend")]
pub enum BackendConfig {
    #[serde(rename = "chatgpt")]
    Completion(CompletionConfig),
    #[serde(rename = "chatgpt-browser")]
    Browser(BrowserConfig),
    #[serde(rename = "bing")]
    Sydney(SydneyConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Completion(_) => BackendKind::Completion,
            Self::Browser(_) => BackendKind::Browser,
            Self::Sydney(_) => BackendKind::Sydney,
        }
    }

    pub fn validate(&self) -> Result<(), LlmError> {
        match self {
            Self::Completion(c) => c.validate(),
            Self::Browser(c) => c.validate(),
            Self::Sydney(c) => c.validate(),
        }
    }
}

/// Per-turn behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// A turn fails if no frame arrives for this long.
    #[serde(deserialize_with = "duration_secs")]
    pub request_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: defaults::timeouts::STREAM_INACTIVITY,
        }
    }
}

impl SessionConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Where conversations are kept.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    #[default]
    Memory,
    File { path: PathBuf },
}

impl StoreConfig {
    pub fn open(&self) -> Arc<dyn KeyValueBackend> {
        match self {
            Self::Memory => Arc::new(MemoryBackend::new()),
            Self::File { path } => Arc::new(FileBackend::new(path.clone())),
        }
    }
}

/// Everything needed to build a [`ChatClient`](crate::ChatClient).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(flatten)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl ClientConfig {
    pub fn new(backend: BackendConfig) -> Self {
        Self {
            backend,
            session: SessionConfig::default(),
            store: StoreConfig::default(),
        }
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    pub fn validate(&self) -> Result<(), LlmError> {
        if self.session.request_timeout.is_zero() {
            return Err(LlmError::ConfigurationError(
                "Request timeout must be greater than zero".to_string(),
            ));
        }
        self.backend.validate()
    }
}

fn validate_url(what: &str, url: &str) -> Result<(), LlmError> {
    if url.is_empty() {
        return Err(LlmError::ConfigurationError(format!("{what} cannot be empty")));
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(LlmError::ConfigurationError(format!(
            "{what} must start with http:// or https://"
        )));
    }
    Ok(())
}

fn secret_opt<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()).map(SecretString::from))
}

fn duration_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_secs)
}

fn duration_secs_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let secs: Option<u64> = Option::deserialize(deserializer)?;
    Ok(secs.map(Duration::from_secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serde_json::json;

    #[test]
    fn budget_defaults_follow_model_family() {
        let chat = CompletionConfig::new("k");
        assert_eq!(chat.budget().unwrap().max_context_tokens(), 4095);
        assert_eq!(chat.budget().unwrap().max_prompt_tokens(), 4095 - 1024);

        let text = CompletionConfig::new("k").with_model("text-davinci-003");
        assert_eq!(text.budget().unwrap().max_context_tokens(), 4097);
    }

    #[test]
    fn invalid_budget_fails_at_validation() {
        let config = CompletionConfig::new("k").with_budget(100, 20, Some(90));
        assert!(matches!(
            config.validate(),
            Err(LlmError::ConfigurationError(msg)) if msg.contains("maxPromptTokens")
        ));
    }

    #[test]
    fn merge_prefers_overrides() {
        let base = ModelOptions {
            model: Some("gpt-3.5-turbo".into()),
            temperature: Some(0.8),
            top_p: Some(1.0),
            ..Default::default()
        };
        let call = ModelOptions {
            temperature: Some(0.2),
            ..Default::default()
        };
        let merged = base.merge(&call);
        assert_eq!(merged.temperature, Some(0.2));
        assert_eq!(merged.top_p, Some(1.0));
        assert_eq!(merged.model_or_default(), "gpt-3.5-turbo");
        assert_eq!(base.temperature, Some(0.8));
    }

    #[test]
    fn client_config_deserializes_by_backend_tag() {
        let config: ClientConfig = serde_json::from_value(json!({
            "backend": "chatgpt",
            "apiKey": "sk-test",
            "maxContextTokens": 100,
            "maxResponseTokens": 20,
            "modelOptions": {"model": "gpt-4", "temperature": 0.5},
            "session": {"requestTimeout": 30},
            "store": {"type": "file", "path": "cache.json"}
        }))
        .unwrap();

        assert_eq!(config.backend.kind(), BackendKind::Completion);
        assert_eq!(config.session.request_timeout, Duration::from_secs(30));
        assert!(matches!(config.store, StoreConfig::File { .. }));
        let BackendConfig::Completion(completion) = &config.backend else {
            panic!("expected completion backend");
        };
        assert_eq!(
            completion.api_key.as_ref().unwrap().expose_secret(),
            "sk-test"
        );
        assert_eq!(completion.model_options.temperature, Some(0.5));
        config.validate().unwrap();
    }

    #[test]
    fn sydney_config_requires_websocket_url() {
        let bad = SydneyConfig::default().with_chathub_url("https://example.com/hub");
        assert!(bad.validate().is_err());
        assert!(SydneyConfig::default().validate().is_ok());

        let config: ClientConfig =
            serde_json::from_value(json!({"backend": "bing", "tone": "creative"})).unwrap();
        let BackendConfig::Sydney(sydney) = config.backend else {
            panic!("expected sydney backend");
        };
        assert_eq!(sydney.tone, ToneStyle::Creative);
    }
}
