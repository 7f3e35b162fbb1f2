//! /new, /list, /switch, /delete, /clear and /title

use geppeto_chat::{Conversation, ConversationPatch, UNTITLED_TITLE};

use super::active_id;
use crate::app::App;

pub async fn new(app: &App, title: Option<String>) -> anyhow::Result<String> {
    let store = app.store();
    let title = title.unwrap_or_else(|| UNTITLED_TITLE.to_string());
    let conversation = store.create(title, ConversationPatch::default()).await?;
    store.switch_to(&conversation.id).await?;
    Ok(format!("Started \"{}\"", conversation.title))
}

pub async fn list(app: &App) -> anyhow::Result<String> {
    let conversations = app.store().list().await?;
    if conversations.is_empty() {
        return Ok("No conversations".to_string());
    }
    let current = app.store().current_id();
    Ok(format_list(&conversations, current.as_deref()))
}

fn format_list(conversations: &[Conversation], current: Option<&str>) -> String {
    let mut output = String::from("Conversations:\n");
    for (i, conversation) in conversations.iter().enumerate() {
        let marker = if Some(conversation.id.as_str()) == current {
            " *"
        } else {
            ""
        };
        output.push_str(&format!(
            "  {:>2}. {} ({} messages, {}){}\n",
            i + 1,
            conversation.title,
            conversation.messages.len(),
            conversation.updated_at.format("%Y-%m-%d %H:%M"),
            marker
        ));
    }
    output.push_str("\nSwitch with: /switch <number>");
    output
}

/// Resolve a list number (1-based, as shown by /list) or an id
async fn resolve_target(app: &App, target: &str) -> anyhow::Result<String> {
    if let Ok(n) = target.parse::<usize>() {
        let conversations = app.store().list().await?;
        return match n.checked_sub(1).and_then(|i| conversations.get(i)) {
            Some(conversation) => Ok(conversation.id.clone()),
            None => anyhow::bail!("No conversation number {}; see /list", n),
        };
    }
    Ok(target.to_string())
}

pub async fn switch(app: &App, target: &str) -> anyhow::Result<String> {
    let id = resolve_target(app, target).await?;
    let conversation = app.store().switch_to(&id).await?;
    Ok(format!(
        "Switched to \"{}\" ({} messages)",
        conversation.title,
        conversation.messages.len()
    ))
}

pub async fn delete(app: &App, target: Option<&str>) -> anyhow::Result<String> {
    let id = match target {
        Some(target) => resolve_target(app, target).await?,
        None => active_id(app).await?,
    };
    let store = app.store();
    let conversation = store.require(&id).await?;
    store.delete(&id).await?;
    if let Err(e) = app.sync.delete_remote(&id).await {
        tracing::warn!("Failed to delete remote copy of {}: {}", id, e);
    }
    // deleting the active conversation falls back to the most recent one
    let active = store.ensure_active().await?;
    Ok(format!(
        "Deleted \"{}\". Active: \"{}\"",
        conversation.title, active.title
    ))
}

pub async fn clear(app: &App) -> anyhow::Result<String> {
    let count = app.store().list().await?.len();
    app.store().clear_all().await?;
    Ok(format!("Deleted {} conversations", count))
}

pub async fn title(app: &App) -> anyhow::Result<String> {
    let id = active_id(app).await?;
    let title = app.chat.regenerate_title(&id).await?;
    Ok(format!("Title: {}", title))
}
