//! Newest-first prompt truncation.

use super::format::PromptFormat;
use crate::defaults::budget::STRUCTURED_PRIMING_TOKENS;
use crate::error::LlmError;
use crate::tokens::{StructuredMessage, TokenCounter};
use crate::types::{Message, PromptBudget};
use chrono::NaiveDate;

/// How the transcript is handed to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    /// Two system messages: instructions, then the rendered transcript.
    Structured,
    /// One string: preamble, transcript, assistant cue.
    Flat,
}

/// Backend-ready prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    Messages(Vec<StructuredMessage>),
    Text(String),
}

impl Prompt {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Messages(_) => None,
        }
    }

    pub fn as_messages(&self) -> Option<&[StructuredMessage]> {
        match self {
            Self::Messages(messages) => Some(messages),
            Self::Text(_) => None,
        }
    }
}

/// Output of [`PromptBuilder::build`].
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltPrompt {
    pub prompt: Prompt,
    pub token_count: usize,
    /// Response limit left by this prompt, capped at the configured maximum.
    pub max_response_tokens: usize,
    /// Messages that made it into the prompt, root-first.
    pub context: Vec<Message>,
}

pub struct PromptBuilder<'a> {
    counter: &'a TokenCounter,
    format: &'a PromptFormat,
    budget: PromptBudget,
    mode: PromptMode,
    prefix: Option<&'a str>,
    today: NaiveDate,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(
        counter: &'a TokenCounter,
        format: &'a PromptFormat,
        budget: PromptBudget,
        mode: PromptMode,
        today: NaiveDate,
    ) -> Self {
        Self {
            counter,
            format,
            budget,
            mode,
            prefix: None,
            today,
        }
    }

    /// Replace the default instructions.
    pub fn with_prefix(mut self, prefix: Option<&'a str>) -> Self {
        self.prefix = prefix;
        self
    }

    /// Build from a root-first ancestry.
    ///
    /// Messages are taken newest first. If the newest one does not fit the
    /// prompt budget the build fails; once at least one message fits, the first
    /// one that would overflow ends the walk and everything older is dropped.
    pub fn build(&self, ancestry: &[Message]) -> Result<BuiltPrompt, LlmError> {
        let preamble = self.format.preamble(self.prefix, self.today);
        let suffix = self.format.suffix();
        let max_prompt_tokens = self.budget.max_prompt_tokens();

        let mut token_count = match self.mode {
            PromptMode::Structured => {
                self.counter
                    .count_message(&StructuredMessage::named_system("instructions", &*preamble))
                    + self
                        .counter
                        .count_message(&StructuredMessage::system(&*suffix))
            }
            PromptMode::Flat => self.counter.count(&format!("{preamble}{suffix}")),
        };

        let mut lines = Vec::new();
        for message in ancestry.iter().rev() {
            let line = self.format.message_line(message);
            let candidate = token_count + self.counter.count(&line);
            if candidate > max_prompt_tokens {
                if lines.is_empty() {
                    return Err(LlmError::prompt_too_large(max_prompt_tokens, candidate));
                }
                tracing::debug!(
                    kept = lines.len(),
                    dropped = ancestry.len() - lines.len(),
                    "prompt budget reached, dropping older history"
                );
                break;
            }
            token_count = candidate;
            lines.push(line);
        }
        lines.reverse();

        let kept = lines.len();
        let context = ancestry[ancestry.len() - kept..].to_vec();
        let transcript = lines.concat();

        let prompt = match self.mode {
            PromptMode::Structured => {
                token_count += STRUCTURED_PRIMING_TOKENS;
                Prompt::Messages(vec![
                    StructuredMessage::named_system("instructions", preamble),
                    StructuredMessage::system(format!("{transcript}{suffix}")),
                ])
            }
            PromptMode::Flat => Prompt::Text(format!("{preamble}{transcript}{suffix}")),
        };

        Ok(BuiltPrompt {
            prompt,
            token_count,
            max_response_tokens: self.budget.response_limit(token_count),
            context,
        })
    }
}
