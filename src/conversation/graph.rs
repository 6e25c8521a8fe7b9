//! Linearization of a message tree.
//!
//! A conversation is a flat list of messages linked by `parent_message_id`.
//! Only the path ending at the active leaf is sent to a backend.

use crate::types::Message;
use std::collections::{HashMap, HashSet};

/// Indexed, read-only view over a conversation's messages.
pub struct MessageGraph<'a> {
    by_id: HashMap<&'a str, &'a Message>,
    messages: &'a [Message],
}

impl<'a> MessageGraph<'a> {
    pub fn new(messages: &'a [Message]) -> Self {
        // Later duplicates never shadow the first message with an id.
        let mut by_id = HashMap::with_capacity(messages.len());
        for m in messages {
            by_id.entry(m.id.as_str()).or_insert(m);
        }
        Self { by_id, messages }
    }

    pub fn get(&self, id: &str) -> Option<&'a Message> {
        self.by_id.get(id).copied()
    }

    /// Messages from the root down to `leaf_id`, root first.
    ///
    /// Walking stops at a null parent, at an id that is not in the graph, or
    /// at a message already visited; a dangling reference yields the shorter
    /// valid chain rather than an error.
    pub fn linearize(&self, leaf_id: &str) -> Vec<Message> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = Some(leaf_id);

        while let Some(id) = cursor {
            let Some(message) = self.get(id) else {
                break;
            };
            if !seen.insert(message.id.as_str()) {
                tracing::debug!(message_id = %message.id, "cycle in parent chain, stopping");
                break;
            }
            chain.push(message.clone());
            cursor = message.parent_message_id.as_deref();
        }

        chain.reverse();
        chain
    }

    /// Direct replies to `id`, in insertion order.
    pub fn children(&self, id: &str) -> Vec<&'a Message> {
        self.messages
            .iter()
            .filter(|m| m.parent_message_id.as_deref() == Some(id))
            .collect()
    }

    /// Messages nothing else replies to.
    pub fn leaves(&self) -> Vec<&'a Message> {
        let parents: HashSet<&str> = self
            .messages
            .iter()
            .filter_map(|m| m.parent_message_id.as_deref())
            .collect();
        self.messages
            .iter()
            .filter(|m| !parents.contains(m.id.as_str()))
            .collect()
    }
}

/// Convenience wrapper around [`MessageGraph::linearize`].
pub fn linearize(messages: &[Message], leaf_id: &str) -> Vec<Message> {
    MessageGraph::new(messages).linearize(leaf_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn msg(id: &str, parent: Option<&str>) -> Message {
        Message::new(id, parent.map(str::to_string), Role::User, id)
    }

    fn ids(chain: &[Message]) -> Vec<&str> {
        chain.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn root_first_order() {
        // Insertion order deliberately differs from parent order.
        let messages = vec![
            msg("c", Some("b")),
            msg("a", None),
            msg("b", Some("a")),
        ];
        assert_eq!(ids(&linearize(&messages, "c")), vec!["a", "b", "c"]);
    }

    #[test]
    fn broken_link_yields_prefix_of_exact_depth() {
        // d -> c -> b -> (missing x)
        let messages = vec![
            msg("b", Some("x")),
            msg("c", Some("b")),
            msg("d", Some("c")),
        ];
        let chain = linearize(&messages, "d");
        assert_eq!(chain.len(), 3);
        assert_eq!(ids(&chain), vec!["b", "c", "d"]);
    }

    #[test]
    fn unknown_leaf_is_empty() {
        let messages = vec![msg("a", None)];
        assert!(linearize(&messages, "nope").is_empty());
    }

    #[test]
    fn only_the_active_branch_is_linearized() {
        let messages = vec![
            msg("a", None),
            msg("b1", Some("a")),
            msg("b2", Some("a")),
            msg("c2", Some("b2")),
        ];
        let graph = MessageGraph::new(&messages);
        assert_eq!(ids(&graph.linearize("c2")), vec!["a", "b2", "c2"]);
        assert_eq!(graph.children("a").len(), 2);
        let leaves: Vec<&str> = graph.leaves().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(leaves, vec!["b1", "c2"]);
    }

    #[test]
    fn cycles_terminate() {
        let messages = vec![msg("a", Some("b")), msg("b", Some("a"))];
        assert_eq!(ids(&linearize(&messages, "a")), vec!["b", "a"]);
    }
}
