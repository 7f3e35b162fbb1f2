//! Conversation title generation.

use geppeto_ai::{ChatMessage, CompletionEndpoint, CompletionRequest};

use crate::conversation::Conversation;
use crate::error::Result;

/// Instructions for the title completion
pub const TITLE_PROMPT: &str = "You are a very clever machine that can determine a very short \
title for a conversation. The user sends you the content of a conversation and you only output \
a very short title for it, really concise. Title:";

/// How many trailing messages the title is generated from
pub const TITLE_CONTEXT_MESSAGES: usize = 3;

const TITLE_MAX_TOKENS: u32 = 256;

/// The user turn of a title request: the last few message texts, one per line
pub fn title_input(conversation: &Conversation) -> String {
    let start = conversation
        .messages
        .len()
        .saturating_sub(TITLE_CONTEXT_MESSAGES);
    conversation.messages[start..]
        .iter()
        .map(|m| m.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Strip `Title:` labels and quotes the model tends to wrap titles in
pub fn clean_title(raw: &str) -> String {
    raw.replace("Title:", "").replace('"', "").trim().to_string()
}

/// Ask the endpoint for a short title summarizing `conversation`
pub async fn generate_title(
    endpoint: &dyn CompletionEndpoint,
    model: &str,
    conversation: &Conversation,
) -> Result<String> {
    let request = CompletionRequest::new(
        model,
        vec![
            ChatMessage::system(TITLE_PROMPT),
            ChatMessage::user(title_input(conversation)),
        ],
    )
    .with_stream(false)
    .with_temperature(Some(0.0))
    .with_max_tokens(Some(TITLE_MAX_TOKENS));

    let response = endpoint.complete(&request).await?;
    Ok(clean_title(&response.text))
}
