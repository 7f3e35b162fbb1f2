//! Knowledge items attached to conversations.
//!
//! Attached items are sent to the model as extra user turns just before the
//! new message. They are part of the request only, never of the stored
//! conversation.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use geppeto_ai::ChatMessage;
use serde::{Deserialize, Serialize};

use crate::conversation::{Conversation, ConversationPatch, new_id};
use crate::conversations::ConversationStore;
use crate::error::{Error, Result};
use crate::store::{Record, Table};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeItem {
    pub id: String,
    pub title: String,
    pub content: String,
    /// Where the content came from (a file path, for instance)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeItem {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            title: title.into(),
            content: content.into(),
            source: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The synthetic user turn that hands this item to the model
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage::user(format!(
            "Use this as knowledge for the rest of our conversation:\n{}\n---",
            self.content
        ))
    }
}

impl Record for KnowledgeItem {
    const ENTITY: &'static str = "knowledge";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Clone)]
pub struct KnowledgeStore {
    table: Arc<dyn Table<KnowledgeItem>>,
}

impl KnowledgeStore {
    pub fn new(table: Arc<dyn Table<KnowledgeItem>>) -> Self {
        Self { table }
    }

    pub async fn add(&self, item: KnowledgeItem) -> Result<KnowledgeItem> {
        self.table.add(item.clone()).await?;
        tracing::info!("Added knowledge item {} ({})", item.id, item.title);
        Ok(item)
    }

    /// Read a text file into a new knowledge item
    pub async fn add_file(&self, path: &Path) -> Result<KnowledgeItem> {
        let content = tokio::fs::read_to_string(path).await?;
        let title = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mut item = KnowledgeItem::new(title, content);
        item.source = Some(path.display().to_string());
        self.add(item).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<KnowledgeItem>> {
        self.table.get(id).await
    }

    /// All items, most recently updated first
    pub async fn list(&self) -> Result<Vec<KnowledgeItem>> {
        let mut items = self.table.to_array().await?;
        items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(items)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.table.delete(id).await
    }

    /// Reference an item from a conversation
    pub async fn attach(
        &self,
        conversations: &ConversationStore,
        conversation_id: &str,
        item_id: &str,
    ) -> Result<Conversation> {
        if self.table.get(item_id).await?.is_none() {
            return Err(Error::not_found("knowledge", item_id));
        }
        let conversation = conversations.require(conversation_id).await?;
        if conversation.knowledge.iter().any(|id| id == item_id) {
            return Ok(conversation);
        }
        let mut knowledge = conversation.knowledge;
        knowledge.push(item_id.to_string());
        conversations
            .update(
                conversation_id,
                ConversationPatch {
                    knowledge: Some(knowledge),
                    ..Default::default()
                },
            )
            .await
    }

    pub async fn detach(
        &self,
        conversations: &ConversationStore,
        conversation_id: &str,
        item_id: &str,
    ) -> Result<Conversation> {
        let conversation = conversations.require(conversation_id).await?;
        let knowledge = conversation
            .knowledge
            .into_iter()
            .filter(|id| id != item_id)
            .collect();
        conversations
            .update(
                conversation_id,
                ConversationPatch {
                    knowledge: Some(knowledge),
                    ..Default::default()
                },
            )
            .await
    }

    /// Request turns for the items a conversation references.
    ///
    /// References to deleted items are skipped.
    pub async fn messages_for(&self, conversation: &Conversation) -> Result<Vec<ChatMessage>> {
        let mut messages = Vec::with_capacity(conversation.knowledge.len());
        for id in &conversation.knowledge {
            match self.table.get(id).await? {
                Some(item) => messages.push(item.to_chat_message()),
                None => tracing::warn!(
                    "Conversation {} references missing knowledge item {}",
                    conversation.id,
                    id
                ),
            }
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTable;

    fn store() -> KnowledgeStore {
        KnowledgeStore::new(Arc::new(MemoryTable::<KnowledgeItem>::new()))
    }

    #[test]
    fn test_injection_text() {
        let item = KnowledgeItem::new("facts", "The sky is blue.");
        let message = item.to_chat_message();
        assert_eq!(
            message.content,
            "Use this as knowledge for the rest of our conversation:\nThe sky is blue.\n---"
        );
    }

    #[tokio::test]
    async fn test_attach_and_messages_for() {
        let knowledge = store();
        let conversations = ConversationStore::in_memory();
        let conversation = conversations.ensure_active().await.unwrap();
        let item = knowledge.add(KnowledgeItem::new("facts", "water is wet")).await.unwrap();

        knowledge.attach(&conversations, &conversation.id, &item.id).await.unwrap();
        // attaching twice keeps one reference
        let conversation = knowledge
            .attach(&conversations, &conversation.id, &item.id)
            .await
            .unwrap();
        assert_eq!(conversation.knowledge, vec![item.id.clone()]);

        let messages = knowledge.messages_for(&conversation).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.contains("water is wet"));

        knowledge.delete(&item.id).await.unwrap();
        assert!(knowledge.messages_for(&conversation).await.unwrap().is_empty());

        let conversation = knowledge
            .detach(&conversations, &conversation.id, &item.id)
            .await
            .unwrap();
        assert!(conversation.knowledge.is_empty());
    }

    #[tokio::test]
    async fn test_attach_missing_item() {
        let knowledge = store();
        let conversations = ConversationStore::in_memory();
        let conversation = conversations.ensure_active().await.unwrap();
        let err = knowledge
            .attach(&conversations, &conversation.id, "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { entity: "knowledge", .. }));
    }

    #[tokio::test]
    async fn test_add_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "# Notes\nremember this").unwrap();
        let item = store().add_file(&path).await.unwrap();
        assert_eq!(item.title, "notes.md");
        assert!(item.content.contains("remember this"));
        assert_eq!(item.source.as_deref(), Some(path.display().to_string().as_str()));
    }
}
