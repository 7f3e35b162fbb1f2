//! Wiring of the stores, the endpoint and the sync bridge

use std::sync::Arc;

use geppeto_ai::providers::openai::OpenAIProvider;
use geppeto_chat::{
    Chat, ChatConfig, Conversation, ConversationStore, HttpRemoteStore, JsonTable, KnowledgeItem,
    KnowledgeStore, Persona, PersonaStore, SyncBridge,
};

use crate::config::Settings;

/// Everything an interactive session works with
#[derive(Clone)]
pub struct App {
    pub chat: Chat,
    pub personas: PersonaStore,
    pub knowledge: KnowledgeStore,
    pub sync: SyncBridge,
}

impl App {
    /// Open the file-backed stores under the data directory
    pub async fn open(settings: &Settings) -> anyhow::Result<Self> {
        let data_dir = &settings.data_dir;
        let conversations = JsonTable::<Conversation>::open(data_dir.join("conversations")).await?;
        let personas = JsonTable::<Persona>::open(data_dir.join("personas")).await?;
        let knowledge = JsonTable::<KnowledgeItem>::open(data_dir.join("knowledge")).await?;
        tracing::debug!("Data directory: {}", data_dir.display());

        let store = ConversationStore::new(Arc::new(conversations));
        let personas = PersonaStore::new(Arc::new(personas));
        personas.init().await?;
        let knowledge = KnowledgeStore::new(Arc::new(knowledge));

        let provider = OpenAIProvider::new(settings.api_key.clone().unwrap_or_default())
            .with_base_url(settings.base_url.clone());
        let config = ChatConfig {
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            system_message: settings.system_message.clone(),
        };
        let chat = Chat::new(store.clone(), Arc::new(provider), config)
            .with_knowledge(knowledge.clone());

        let sync = &settings.sync;
        let enabled = sync.enabled && sync.url.is_some();
        if sync.enabled && !enabled {
            tracing::warn!("Sync is enabled but no url is configured");
        }
        let remote = HttpRemoteStore::new(sync.url.clone().unwrap_or_default(), sync.token.clone());
        let sync = SyncBridge::new(Arc::new(remote), store, enabled);

        Ok(Self {
            chat,
            personas,
            knowledge,
            sync,
        })
    }

    pub fn store(&self) -> &ConversationStore {
        self.chat.store()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{Config, SyncSettings};

    pub(crate) async fn open_app(dir: &std::path::Path) -> App {
        let settings = Settings {
            data_dir: dir.to_path_buf(),
            api_key: Some("test-key".into()),
            sync: SyncSettings::default(),
            ..Config::default().resolve_with(None, |_| None)
        };
        App::open(&settings).await.unwrap()
    }

    #[tokio::test]
    async fn test_open_seeds_personas_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let app = open_app(dir.path()).await;
        let personas = app.personas.list().await.unwrap();
        assert_eq!(personas.len(), 1);
        assert!(!app.sync.is_enabled());

        let conversation = app.store().ensure_active().await.unwrap();
        drop(app);

        let reopened = open_app(dir.path()).await;
        let active = reopened.store().ensure_active().await.unwrap();
        assert_eq!(active.id, conversation.id);
        assert_eq!(reopened.personas.list().await.unwrap().len(), 1);
    }
}
