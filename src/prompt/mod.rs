//! Token-budgeted prompt assembly.
//!
//! - `format`: delimiters, role labels and the instruction preamble of each model family
//! - `builder`: newest-first truncation into a structured or flat prompt

mod builder;
mod format;

pub use builder::{BuiltPrompt, Prompt, PromptBuilder, PromptMode};
pub use format::{ModelFamily, PromptFormat};
