//! Token budget for one prompt/response exchange.

use crate::error::LlmError;
use serde::{Deserialize, Serialize};

/// `max_prompt_tokens + max_response_tokens <= max_context_tokens`, checked at
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawBudget", into = "RawBudget")]
pub struct PromptBudget {
    max_context_tokens: usize,
    max_response_tokens: usize,
    max_prompt_tokens: usize,
}

impl PromptBudget {
    /// Budget whose prompt share is everything not reserved for the response.
    pub fn new(max_context_tokens: usize, max_response_tokens: usize) -> Result<Self, LlmError> {
        if max_response_tokens > max_context_tokens {
            return Err(LlmError::ConfigurationError(format!(
                "maxResponseTokens ({max_response_tokens}) must be less than or equal to maxContextTokens ({max_context_tokens})"
            )));
        }
        Ok(Self {
            max_context_tokens,
            max_response_tokens,
            max_prompt_tokens: max_context_tokens - max_response_tokens,
        })
    }

    /// Narrow the prompt share explicitly.
    pub fn with_max_prompt_tokens(self, max_prompt_tokens: usize) -> Result<Self, LlmError> {
        let total = max_prompt_tokens + self.max_response_tokens;
        if total > self.max_context_tokens {
            return Err(LlmError::ConfigurationError(format!(
                "maxPromptTokens + max_tokens ({max_prompt_tokens} + {} = {total}) must be less than or equal to maxContextTokens ({})",
                self.max_response_tokens, self.max_context_tokens
            )));
        }
        Ok(Self {
            max_prompt_tokens,
            ..self
        })
    }

    pub fn max_context_tokens(&self) -> usize {
        self.max_context_tokens
    }

    pub fn max_response_tokens(&self) -> usize {
        self.max_response_tokens
    }

    pub fn max_prompt_tokens(&self) -> usize {
        self.max_prompt_tokens
    }

    /// Room left for the reply once the prompt is `prompt_tokens` long.
    pub fn response_limit(&self, prompt_tokens: usize) -> usize {
        self.max_context_tokens
            .saturating_sub(prompt_tokens)
            .min(self.max_response_tokens)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBudget {
    max_context_tokens: usize,
    max_response_tokens: usize,
    #[serde(default)]
    max_prompt_tokens: Option<usize>,
}

impl TryFrom<RawBudget> for PromptBudget {
    type Error = LlmError;

    fn try_from(raw: RawBudget) -> Result<Self, Self::Error> {
        let budget = Self::new(raw.max_context_tokens, raw.max_response_tokens)?;
        match raw.max_prompt_tokens {
            Some(prompt) => budget.with_max_prompt_tokens(prompt),
            None => Ok(budget),
        }
    }
}

impl From<PromptBudget> for RawBudget {
    fn from(b: PromptBudget) -> Self {
        Self {
            max_context_tokens: b.max_context_tokens,
            max_response_tokens: b.max_response_tokens,
            max_prompt_tokens: Some(b.max_prompt_tokens),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_prompt_share() {
        let b = PromptBudget::new(100, 20).unwrap();
        assert_eq!(b.max_prompt_tokens(), 80);
    }

    #[test]
    fn rejects_overcommitted_budget() {
        let err = PromptBudget::new(100, 20)
            .unwrap()
            .with_max_prompt_tokens(90)
            .unwrap_err();
        assert!(matches!(err, LlmError::ConfigurationError(_)));
        assert!(PromptBudget::new(10, 20).is_err());
    }

    #[test]
    fn response_limit_is_capped() {
        let b = PromptBudget::new(100, 20).unwrap();
        assert_eq!(b.response_limit(30), 20);
        assert_eq!(b.response_limit(90), 10);
        assert_eq!(b.response_limit(150), 0);
    }

    #[test]
    fn deserialization_validates() {
        let ok: PromptBudget =
            serde_json::from_str(r#"{"maxContextTokens":100,"maxResponseTokens":20,"maxPromptTokens":50}"#)
                .unwrap();
        assert_eq!(ok.max_prompt_tokens(), 50);
        let bad = serde_json::from_str::<PromptBudget>(
            r#"{"maxContextTokens":100,"maxResponseTokens":20,"maxPromptTokens":81}"#,
        );
        assert!(bad.is_err());
    }
}
