//! Conversation trees and their persistence.

pub mod graph;
pub mod store;

pub use graph::{MessageGraph, linearize};
pub use store::{
    ConversationStore, FileBackend, KeyValueBackend, MemoryBackend, NamespacedStore,
};
