//! Causal chain reconstruction over the flat parent-pointer graph.

use std::collections::{HashMap, HashSet};

use crate::conversation::Message;

/// Ancestry of `target`, ordered root first and ending at `target`.
///
/// A parent id that does not resolve inside `messages` makes the current
/// message the root. The walk is bounded by the size of `messages`; a
/// malformed cycle is logged and the chain gathered so far is returned.
pub fn resolve_chain<'a>(messages: &'a [Message], target: &'a Message) -> Vec<&'a Message> {
    let by_id: HashMap<&str, &Message> = messages.iter().map(|m| (m.id.as_str(), m)).collect();

    let mut chain = vec![target];
    let mut seen: HashSet<&str> = HashSet::from([target.id.as_str()]);
    let mut current = target;

    while chain.len() <= messages.len() {
        let Some(parent_id) = current.parent_message_id.as_deref() else {
            break;
        };
        let Some(parent) = by_id.get(parent_id).copied() else {
            tracing::debug!(
                "Parent {} of message {} not found, treating as root",
                parent_id,
                current.id
            );
            break;
        };
        if !seen.insert(parent.id.as_str()) {
            tracing::warn!(
                "Cycle in message chain at {} (conversation {}), truncating",
                parent.id,
                parent.conversation_id
            );
            break;
        }
        chain.push(parent);
        current = parent;
    }

    chain.reverse();
    chain
}
