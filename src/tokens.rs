//! Token counting
//!
//! The tokenizer itself is a black box behind [`Tokenizer`]; [`TokenCounter`]
//! adds memoisation and the per-message accounting used by chat-style prompts.

use crate::defaults;
use crate::error::LlmError;
use lru::LruCache;
use serde::Serialize;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, OnceLock};
use tiktoken_rs::CoreBPE;

/// Text → token count.
pub trait Tokenizer: Send + Sync {
    /// Encoding or model name this tokenizer implements.
    fn encoding(&self) -> &str;

    /// Number of tokens in `text`.
    fn count_tokens(&self, text: &str) -> usize;
}

/// BPE tokenizer backed by `tiktoken-rs`.
#[derive(Clone)]
pub struct TiktokenTokenizer {
    encoding: String,
    bpe: Arc<CoreBPE>,
}

static BPE_TABLES: OnceLock<Mutex<HashMap<String, Arc<CoreBPE>>>> = OnceLock::new();

impl TiktokenTokenizer {
    /// Tokenizer for an encoding (`cl100k_base`, `p50k_base`, ...) or a model
    /// name. Tables are built once per name and shared process-wide.
    pub fn for_encoding(name: &str) -> Result<Self, LlmError> {
        let tables = BPE_TABLES.get_or_init(|| Mutex::new(HashMap::new()));
        let mut guard = tables
            .lock()
            .map_err(|_| LlmError::ConfigurationError("tokenizer table lock poisoned".into()))?;

        if let Some(bpe) = guard.get(name) {
            return Ok(Self {
                encoding: name.to_string(),
                bpe: bpe.clone(),
            });
        }

        let bpe = Arc::new(load_bpe(name)?);
        guard.insert(name.to_string(), bpe.clone());
        Ok(Self {
            encoding: name.to_string(),
            bpe,
        })
    }

    /// Tokenizer appropriate for `model`: `cl100k_base` for `gpt-` models,
    /// otherwise the model's own tables with `p50k_base` as fallback.
    pub fn for_model(model: &str) -> Result<Self, LlmError> {
        if model.starts_with("gpt-") {
            return Self::for_encoding("cl100k_base");
        }
        Self::for_encoding(model).or_else(|_| Self::for_encoding("p50k_base"))
    }
}

fn load_bpe(name: &str) -> Result<CoreBPE, LlmError> {
    let loaded = match name {
        "cl100k_base" => tiktoken_rs::cl100k_base(),
        "o200k_base" => tiktoken_rs::o200k_base(),
        "p50k_base" => tiktoken_rs::p50k_base(),
        "p50k_edit" => tiktoken_rs::p50k_edit(),
        "r50k_base" | "gpt2" => tiktoken_rs::r50k_base(),
        model => tiktoken_rs::get_bpe_from_model(model),
    };
    loaded.map_err(|e| {
        LlmError::ConfigurationError(format!("Unknown tokenizer encoding '{name}': {e}"))
    })
}

impl Tokenizer for TiktokenTokenizer {
    fn encoding(&self) -> &str {
        &self.encoding
    }

    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

impl std::fmt::Debug for TiktokenTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokenTokenizer")
            .field("encoding", &self.encoding)
            .finish()
    }
}

/// Fixed per-message overheads of a chat model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageTokenProfile {
    pub tokens_per_message: i64,
    pub tokens_per_name: i64,
}

impl MessageTokenProfile {
    pub fn for_model(model: &str) -> Self {
        if model.starts_with("gpt-4") {
            Self {
                tokens_per_message: 3,
                tokens_per_name: 1,
            }
        } else {
            Self {
                tokens_per_message: 4,
                tokens_per_name: -1,
            }
        }
    }
}

/// A chat message as sent to structured-message backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructuredMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub content: String,
}

impl StructuredMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            name: None,
            content: content.into(),
        }
    }

    pub fn named_system(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            name: Some(name.into()),
            content: content.into(),
        }
    }
}

/// Memoising token counter.
pub struct TokenCounter {
    tokenizer: Arc<dyn Tokenizer>,
    profile: MessageTokenProfile,
    cache: Mutex<LruCache<String, usize>>,
}

impl TokenCounter {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, profile: MessageTokenProfile) -> Self {
        Self::with_capacity(tokenizer, profile, defaults::budget::TOKEN_CACHE_CAPACITY)
    }

    pub fn with_capacity(
        tokenizer: Arc<dyn Tokenizer>,
        profile: MessageTokenProfile,
        capacity: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            tokenizer,
            profile,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Counter with the tokenizer and profile of `model`.
    pub fn for_model(model: &str) -> Result<Self, LlmError> {
        let tokenizer = TiktokenTokenizer::for_model(model)?;
        Ok(Self::new(
            Arc::new(tokenizer),
            MessageTokenProfile::for_model(model),
        ))
    }

    pub fn profile(&self) -> MessageTokenProfile {
        self.profile
    }

    pub fn encoding(&self) -> &str {
        self.tokenizer.encoding()
    }

    /// Tokens in `text`.
    pub fn count(&self, text: &str) -> usize {
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(n) = cache.get(text) {
                return *n;
            }
            let n = self.tokenizer.count_tokens(text);
            cache.put(text.to_string(), n);
            return n;
        }
        self.tokenizer.count_tokens(text)
    }

    /// Tokens a structured message costs, including the fixed per-message
    /// overhead and the `name` adjustment.
    pub fn count_message(&self, message: &StructuredMessage) -> usize {
        let mut total = self.profile.tokens_per_message;
        total += self.count(&message.role) as i64;
        if let Some(name) = &message.name {
            total += self.count(name) as i64 + self.profile.tokens_per_name;
        }
        total += self.count(&message.content) as i64;
        total.max(0) as usize
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("encoding", &self.tokenizer.encoding())
            .field("profile", &self.profile)
            .finish()
    }
}
