//! Fitting a request into a model's context window.

use geppeto_ai::{ChatMessage, TokenCounter};
use thiserror::Error;

/// The messages cannot be made to fit the budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("message too long: {tokens} tokens exceeds the {budget}-token budget")]
pub struct Overflow {
    pub tokens: usize,
    pub budget: usize,
}

/// Token cost of a request: the contents joined by a blank line
pub fn count_messages(messages: &[ChatMessage], counter: &dyn TokenCounter) -> usize {
    let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
    counter.count_all(&contents)
}

/// Drop the oldest turns until `messages` fits within `budget` tokens.
///
/// `messages[0]` is the system message and is never dropped; older turns go
/// first. Returns [`Overflow`] when the system message alone is over budget
/// or there is nothing to send.
pub fn fit_to_window(
    mut messages: Vec<ChatMessage>,
    budget: usize,
    counter: &dyn TokenCounter,
) -> Result<Vec<ChatMessage>, Overflow> {
    if messages.is_empty() {
        return Err(Overflow { tokens: 0, budget });
    }

    let mut tokens = count_messages(&messages, counter);
    while tokens > budget && messages.len() > 1 {
        messages.remove(1);
        tokens = count_messages(&messages, counter);
    }

    if tokens > budget {
        tracing::debug!("System message alone needs {} of {} tokens", tokens, budget);
        return Err(Overflow { tokens, budget });
    }
    Ok(messages)
}
