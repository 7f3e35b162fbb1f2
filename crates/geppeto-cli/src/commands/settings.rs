//! /settings, /system, /persona, /attach and /sync

use std::path::Path;

use anyhow::Context;
use geppeto_ai::MIN_MAX_TOKENS;
use geppeto_ai::models::max_tokens_for_model;
use geppeto_chat::{ConversationPatch, ConversationSettings};

use super::active_id;
use crate::app::App;

pub async fn settings(app: &App, change: Option<(String, String)>) -> anyhow::Result<String> {
    let id = active_id(app).await?;
    if let Some((key, value)) = change {
        apply_setting(app, &id, &key, &value).await?;
    }

    let conversation = app.store().require(&id).await?;
    let config = app.chat.config();
    let settings = &conversation.settings;
    let model = settings.model.clone().unwrap_or(config.model);
    let describe = |own: Option<String>, default: Option<String>| match (own, default) {
        (Some(own), _) => own,
        (None, Some(default)) => format!("{} (default)", default),
        (None, None) => "model default".to_string(),
    };

    let mut output = format!("Settings for \"{}\"\n", conversation.title);
    output.push_str(&"-".repeat(40));
    output.push('\n');
    output.push_str(&format!(
        "Model:          {} ({} token budget)\n",
        model,
        max_tokens_for_model(&model)
    ));
    output.push_str(&format!(
        "Max tokens:     {}\n",
        describe(
            settings.max_tokens.map(|t| t.to_string()),
            config.max_tokens.map(|t| t.to_string())
        )
    ));
    output.push_str(&format!(
        "Creativity:     {}\n",
        describe(
            settings.creativity.map(|t| t.to_string()),
            config.temperature.map(|t| t.to_string())
        )
    ));
    let system = conversation
        .system_message
        .as_deref()
        .or(config.system_message.as_deref())
        .unwrap_or("(default)");
    output.push_str(&format!("System message: {}\n", system));
    output.push_str(&format!("Knowledge:      {} attached\n", conversation.knowledge.len()));
    output.push_str(&format!(
        "Sync:           {}",
        if app.sync.is_enabled() { "on" } else { "off" }
    ));
    Ok(output)
}

async fn apply_setting(app: &App, id: &str, key: &str, value: &str) -> anyhow::Result<()> {
    let reset = value.eq_ignore_ascii_case("default");
    let mut conversation = app.store().require(id).await?;
    match key {
        "max_tokens" | "max-tokens" => {
            conversation.settings.max_tokens = if reset {
                None
            } else {
                let tokens: u32 = value.parse().context("max_tokens must be a number")?;
                anyhow::ensure!(
                    tokens >= MIN_MAX_TOKENS,
                    "max_tokens must be at least {}",
                    MIN_MAX_TOKENS
                );
                Some(tokens)
            };
        }
        "creativity" | "temperature" => {
            conversation.settings.creativity = if reset {
                None
            } else {
                let creativity: f32 = value.parse().context("creativity must be a number")?;
                anyhow::ensure!(
                    (0.0..=2.0).contains(&creativity),
                    "creativity must be between 0 and 2"
                );
                Some(creativity)
            };
        }
        other => anyhow::bail!("Unknown setting '{}'; use max_tokens or creativity", other),
    }

    // replace the whole settings table so `default` can clear a field
    app.store()
        .update(
            id,
            ConversationPatch {
                settings: Some(conversation.settings),
                ..Default::default()
            },
        )
        .await?;
    Ok(())
}

pub async fn system(app: &App, text: Option<String>) -> anyhow::Result<String> {
    let id = active_id(app).await?;
    let message = match &text {
        Some(_) => "System message set".to_string(),
        None => "System message reset to the default".to_string(),
    };
    app.store()
        .update(&id, ConversationPatch::system_message(text))
        .await?;
    Ok(message)
}

pub async fn persona(app: &App, title: Option<&str>) -> anyhow::Result<String> {
    let Some(title) = title else {
        let personas = app.personas.list().await?;
        let mut output = String::from("Personas:\n");
        for persona in personas {
            output.push_str(&format!("  {:<16} {}\n", persona.title, persona.instructions));
        }
        output.push_str("\nApply with: /persona <title>");
        return Ok(output);
    };

    let Some(persona) = app.personas.find_by_title(title).await? else {
        anyhow::bail!("No persona named '{}'; see /persona", title);
    };
    let id = active_id(app).await?;
    app.personas.apply(&persona, app.store(), &id).await?;
    Ok(format!("Applied persona {}", persona.title))
}

pub async fn attach(app: &App, path: &Path) -> anyhow::Result<String> {
    let item = app
        .knowledge
        .add_file(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let id = active_id(app).await?;
    app.knowledge.attach(app.store(), &id, &item.id).await?;
    Ok(format!(
        "Attached {} ({} characters)",
        item.title,
        item.content.chars().count()
    ))
}

pub async fn sync(app: &App) -> anyhow::Result<String> {
    if !app.sync.is_enabled() {
        return Ok("Sync is disabled; configure [sync] in the config file".to_string());
    }
    let pulled = app.sync.pull_all().await?;
    let id = active_id(app).await?;
    app.sync.push(&id).await?;
    Ok(format!("Pulled {} conversations and pushed this one", pulled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::tests::open_app;

    #[tokio::test]
    async fn test_settings_change_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let app = open_app(dir.path()).await;

        let output = settings(&app, Some(("creativity".into(), "0.7".into())))
            .await
            .unwrap();
        assert!(output.contains("Creativity:     0.7"));
        assert_eq!(
            app.store().current().unwrap().settings,
            ConversationSettings {
                creativity: Some(0.7),
                ..Default::default()
            }
        );

        settings(&app, Some(("creativity".into(), "default".into())))
            .await
            .unwrap();
        assert_eq!(app.store().current().unwrap().settings.creativity, None);
    }

    #[tokio::test]
    async fn test_settings_rejects_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        let app = open_app(dir.path()).await;
        for (key, value) in [("max_tokens", "5"), ("max_tokens", "many"), ("creativity", "3"), ("color", "red")] {
            assert!(
                settings(&app, Some((key.into(), value.into()))).await.is_err(),
                "{} {}",
                key,
                value
            );
        }
    }

    #[tokio::test]
    async fn test_system_and_persona() {
        let dir = tempfile::tempdir().unwrap();
        let app = open_app(dir.path()).await;

        system(&app, Some("Be brief".into())).await.unwrap();
        assert_eq!(
            app.store().current().unwrap().system_message.as_deref(),
            Some("Be brief")
        );

        let listing = persona(&app, None).await.unwrap();
        assert!(listing.contains("Golem"));
        persona(&app, Some("golem")).await.unwrap();
        assert!(
            app.store()
                .current()
                .unwrap()
                .system_message
                .unwrap()
                .starts_with("You are Golem")
        );
        assert!(persona(&app, Some("nobody")).await.is_err());

        system(&app, None).await.unwrap();
        assert!(app.store().current().unwrap().system_message.is_none());
    }

    #[tokio::test]
    async fn test_attach_file() {
        let dir = tempfile::tempdir().unwrap();
        let app = open_app(&dir.path().join("data")).await;
        let path = dir.path().join("facts.txt");
        std::fs::write(&path, "Paris is the capital of France.").unwrap();

        let message = attach(&app, &path).await.unwrap();
        assert!(message.contains("facts.txt"));
        assert_eq!(app.store().current().unwrap().knowledge.len(), 1);
        assert!(attach(&app, &dir.path().join("missing.txt")).await.is_err());
    }

    #[tokio::test]
    async fn test_sync_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let app = open_app(dir.path()).await;
        assert!(sync(&app).await.unwrap().contains("disabled"));
    }
}
