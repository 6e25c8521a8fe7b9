//! Core data types: messages, conversations, prompt budgets and replies.

mod budget;
mod conversation;
mod message;
mod reply;

pub use budget::PromptBudget;
pub use conversation::Conversation;
pub use message::{Message, Role, new_id};
pub use reply::ChatReply;
