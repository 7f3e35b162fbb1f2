//! /model command - list and switch models

use geppeto_ai::Model;
use geppeto_ai::models::{get_all_models, resolve_model};
use geppeto_chat::ConversationSettings;

use super::active_id;
use crate::app::App;

/// List models without a query, otherwise set the active conversation's model
pub async fn execute(app: &App, query: Option<&str>) -> anyhow::Result<String> {
    let id = active_id(app).await?;
    let conversation = app.store().require(&id).await?;
    let current = conversation
        .settings
        .model
        .unwrap_or_else(|| app.chat.config().model);
    let available = get_all_models();

    let Some(query) = query else {
        return Ok(list_models(&current, &available));
    };

    // unknown ids are allowed for OpenAI-compatible servers
    let model = find_model(query, &available).unwrap_or_else(|| resolve_model(query));
    app.store()
        .update_settings(
            &id,
            ConversationSettings {
                model: Some(model.id.clone()),
                ..Default::default()
            },
        )
        .await?;
    Ok(format!(
        "Switched to: {} ({}k context)",
        model.id,
        model.context_window / 1000
    ))
}

fn list_models(current: &str, models: &[Model]) -> String {
    if models.is_empty() {
        return "No models available".to_string();
    }

    let mut output = String::from("Available models:\n");
    for model in models {
        let marker = if model.id == current { " *" } else { "" };
        output.push_str(&format!("  {:<20} {}{}\n", model.id, model.name, marker));
    }
    if !models.iter().any(|m| m.id == current) {
        output.push_str(&format!("  {:<20} (custom) *\n", current));
    }

    output.push_str("\nSwitch with: /model <name>");
    output
}

fn find_model(query: &str, models: &[Model]) -> Option<Model> {
    let query_lower = query.to_lowercase();

    // Exact match first
    if let Some(model) = models.iter().find(|m| m.id.to_lowercase() == query_lower) {
        return Some(model.clone());
    }

    // Partial match
    if let Some(model) = models
        .iter()
        .find(|m| m.id.to_lowercase().contains(&query_lower))
    {
        return Some(model.clone());
    }

    // Match by name
    models
        .iter()
        .find(|m| m.name.to_lowercase().contains(&query_lower))
        .cloned()
}
