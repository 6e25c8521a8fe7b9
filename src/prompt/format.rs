//! Prompt framing per model family.

use crate::defaults::prompts;
use crate::types::{Message, Role};
use chrono::NaiveDate;

/// Completion model families, told apart by model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    /// `gpt-*` chat models: structured messages.
    Chat,
    /// Leaked chat checkpoints served as text completions with ChatML tokens.
    UnofficialChat,
    /// Plain text completion models.
    Text,
}

impl ModelFamily {
    pub fn from_model(model: &str) -> Self {
        if model.starts_with("gpt-") {
            Self::Chat
        } else if model.starts_with("text-chat-davinci") || model.starts_with("text-davinci-002-render")
        {
            Self::UnofficialChat
        } else {
            Self::Text
        }
    }

    pub fn is_chat(&self) -> bool {
        matches!(self, Self::Chat)
    }
}

/// Delimiters and labels used to render a transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptFormat {
    pub start_token: String,
    pub end_token: String,
    pub user_label: String,
    pub assistant_label: String,
    pub system_label: String,
}

impl PromptFormat {
    pub fn for_family(family: ModelFamily) -> Self {
        let (start, end) = match family {
            ModelFamily::UnofficialChat => ("<|im_start|>", "<|im_end|>"),
            ModelFamily::Chat | ModelFamily::Text => ("||>", ""),
        };
        Self {
            start_token: start.to_string(),
            end_token: end.to_string(),
            user_label: prompts::USER_LABEL.to_string(),
            assistant_label: prompts::ASSISTANT_LABEL.to_string(),
            system_label: "System".to_string(),
        }
    }

    pub fn with_labels(mut self, user: impl Into<String>, assistant: impl Into<String>) -> Self {
        self.user_label = user.into();
        self.assistant_label = assistant.into();
        self
    }

    fn label(&self, role: Role) -> &str {
        match role {
            Role::User => &self.user_label,
            Role::Assistant => &self.assistant_label,
            Role::System => &self.system_label,
        }
    }

    /// Instruction block placed before the earliest included message.
    pub fn preamble(&self, prefix: Option<&str>, today: NaiveDate) -> String {
        let start = &self.start_token;
        let end = &self.end_token;
        match prefix.filter(|p| !p.trim().is_empty()) {
            // A prefix already ending in the end token is used verbatim. With
            // an empty end token that is every prefix.
            Some(prefix) => {
                let body = if prefix.ends_with(end.as_str()) {
                    prefix.to_string()
                } else {
                    format!("{}{end}\n\n", prefix.trim())
                };
                format!("{start}Instructions:\n{body}")
            }
            None => {
                let date = today.format("%B %-d, %Y");
                format!(
                    "{start}Instructions:\n{}\nCurrent date: {date}{end}\n\n",
                    prompts::DEFAULT_INSTRUCTIONS
                )
            }
        }
    }

    /// One transcript entry.
    pub fn message_line(&self, message: &Message) -> String {
        format!(
            "{}{}:\n{}{}\n",
            self.start_token,
            self.label(message.role),
            message.text,
            self.end_token
        )
    }

    /// Cue for the assistant to answer.
    pub fn suffix(&self) -> String {
        format!("{}{}:\n", self.start_token, self.assistant_label)
    }

    /// Stop sequences used when the caller configured none.
    pub fn default_stop_sequences(&self) -> Vec<String> {
        let mut stops = vec![self.start_token.clone()];
        if !self.end_token.is_empty() && self.end_token != self.start_token {
            stops.push(self.end_token.clone());
        }
        stops.push(format!("\n{}:", self.user_label));
        stops.push("<|diff_marker|>".to_string());
        stops
    }
}
