//! The conversation store: the single owner of conversation records.
//!
//! Mutations are written through to the backing [`Table`] as whole records,
//! mirrored into the session's active view and list cache, and announced as
//! [`ChatEvent`]s.

use std::sync::Arc;

use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use tokio::sync::broadcast;

use crate::conversation::{
    Conversation, ConversationPatch, ConversationSettings, Message, MessagePatch, UNTITLED_TITLE,
};
use crate::error::{Error, Result};
use crate::events::ChatEvent;
use crate::handle::{GenerationGuard, Session};
use crate::store::{MemoryTable, Table};

/// Concurrent deletions during [`ConversationStore::clear_all`]
pub const DELETE_FAN_OUT: usize = 10;

/// Conversation CRUD plus the session it mediates
#[derive(Clone)]
pub struct ConversationStore {
    table: Arc<dyn Table<Conversation>>,
    session: Session,
    event_tx: broadcast::Sender<ChatEvent>,
}

impl ConversationStore {
    pub fn new(table: Arc<dyn Table<Conversation>>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            table,
            session: Session::new(),
            event_tx,
        }
    }

    /// A store backed by an in-memory table
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryTable::<Conversation>::new()))
    }

    /// Subscribe to store events
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.event_tx.subscribe()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub(crate) fn emit(&self, event: ChatEvent) {
        let _ = self.event_tx.send(event);
    }

    /// The active conversation, as last written
    pub fn current(&self) -> Option<Conversation> {
        self.session.current()
    }

    pub fn current_id(&self) -> Option<String> {
        self.session.current_id()
    }

    pub async fn get(&self, id: &str) -> Result<Option<Conversation>> {
        self.table.get(id).await
    }

    /// Like [`get`](Self::get), but a missing id is an error
    pub async fn require(&self, id: &str) -> Result<Conversation> {
        self.table
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found("conversation", id))
    }

    /// Create and persist a new conversation
    pub async fn create(
        &self,
        title: impl Into<String>,
        overrides: ConversationPatch,
    ) -> Result<Conversation> {
        let mut conversation = Conversation::new(title);
        overrides.apply(&mut conversation);
        conversation.created_at = conversation.updated_at;

        self.table.add(conversation.clone()).await?;
        self.session.upsert_list_entry(&conversation);
        tracing::info!("Created conversation {} ({})", conversation.id, conversation.title);
        self.emit(ChatEvent::ConversationCreated {
            conversation: conversation.clone(),
        });
        Ok(conversation)
    }

    /// All conversations, most recently updated first. Refreshes the list cache.
    pub async fn list(&self) -> Result<Vec<Conversation>> {
        let mut conversations = self.table.to_array().await?;
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        self.session.set_list(conversations.clone());
        self.emit(ChatEvent::ListUpdated {
            conversation_ids: conversations.iter().map(|c| c.id.clone()).collect(),
        });
        Ok(conversations)
    }

    /// Make `id` the active conversation
    pub async fn switch_to(&self, id: &str) -> Result<Conversation> {
        let conversation = self.require(id).await?;
        self.session.set_current(Some(conversation.clone()));
        self.emit(ChatEvent::ConversationSwitched {
            conversation_id: conversation.id.clone(),
        });
        Ok(conversation)
    }

    /// Activate the most recent conversation, creating one when none exist
    pub async fn ensure_active(&self) -> Result<Conversation> {
        if let Some(current) = self.current() {
            return Ok(current);
        }
        let conversations = self.list().await?;
        match conversations.first() {
            Some(latest) => self.switch_to(&latest.id).await,
            None => {
                let conversation = self
                    .create(UNTITLED_TITLE, ConversationPatch::default())
                    .await?;
                self.switch_to(&conversation.id).await
            }
        }
    }

    /// Persist a whole conversation and mirror it into the session
    async fn save(&self, conversation: &Conversation) -> Result<()> {
        self.table.put(conversation.clone()).await?;
        self.session.refresh_current(conversation);
        self.session.upsert_list_entry(conversation);
        Ok(())
    }

    /// Store a conversation received from elsewhere as-is, replacing any
    /// local copy with the same id
    pub async fn import(&self, conversation: Conversation) -> Result<Conversation> {
        let existed = self.table.get(&conversation.id).await?.is_some();
        self.save(&conversation).await?;
        if existed {
            self.emit(ChatEvent::ConversationUpdated {
                conversation: conversation.clone(),
            });
        } else {
            self.emit(ChatEvent::ConversationCreated {
                conversation: conversation.clone(),
            });
        }
        Ok(conversation)
    }

    /// Append a message. An existing `created_at` is kept.
    pub async fn add_message(&self, conversation_id: &str, mut message: Message) -> Result<()> {
        let mut conversation = self.require(conversation_id).await?;
        message.conversation_id = conversation.id.clone();
        message.updated_at = Utc::now();
        conversation.messages.push(message.clone());
        conversation.touch();
        self.save(&conversation).await?;

        tracing::debug!("Added {} message {} to {}", message.role, message.id, conversation_id);
        self.emit(ChatEvent::MessageAdded { message });
        Ok(())
    }

    /// Merge `patch` into the most recent assistant message.
    ///
    /// Returns the updated message, or `None` (without error) when the
    /// conversation has no assistant message yet.
    pub async fn update_last_assistant_message(
        &self,
        conversation_id: &str,
        patch: MessagePatch,
    ) -> Result<Option<Message>> {
        let mut conversation = self.require(conversation_id).await?;
        let Some(message) = conversation.last_assistant_message_mut() else {
            return Ok(None);
        };

        let previous = message.text.clone();
        patch.apply(message);
        let message = message.clone();
        let delta = message
            .text
            .strip_prefix(previous.as_str())
            .filter(|d| !d.is_empty())
            .map(String::from);

        conversation.touch();
        self.save(&conversation).await?;
        self.emit(ChatEvent::MessageUpdated {
            message: message.clone(),
            delta,
        });
        Ok(Some(message))
    }

    /// Shallow-merge fields into a conversation
    pub async fn update(&self, conversation_id: &str, patch: ConversationPatch) -> Result<Conversation> {
        let mut conversation = self.require(conversation_id).await?;
        patch.apply(&mut conversation);
        self.save(&conversation).await?;
        self.emit(ChatEvent::ConversationUpdated {
            conversation: conversation.clone(),
        });
        Ok(conversation)
    }

    /// Merge into the nested settings of a conversation
    pub async fn update_settings(
        &self,
        conversation_id: &str,
        settings: ConversationSettings,
    ) -> Result<Conversation> {
        let mut conversation = self.require(conversation_id).await?;
        conversation.settings.merge(settings);
        conversation.touch();
        self.save(&conversation).await?;
        self.emit(ChatEvent::ConversationUpdated {
            conversation: conversation.clone(),
        });
        Ok(conversation)
    }

    /// Delete a conversation and release any in-flight send for it
    pub async fn delete(&self, conversation_id: &str) -> Result<()> {
        self.require(conversation_id).await?;
        self.table.delete(conversation_id).await?;
        self.session.forget(conversation_id);
        tracing::info!("Deleted conversation {}", conversation_id);
        self.emit(ChatEvent::ConversationDeleted {
            conversation_id: conversation_id.to_string(),
        });
        Ok(())
    }

    /// Remove one message. Its children become roots.
    pub async fn remove_message(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        let mut conversation = self.require(conversation_id).await?;
        let before = conversation.messages.len();
        conversation.messages.retain(|m| m.id != message_id);
        if conversation.messages.len() == before {
            return Err(Error::not_found("message", message_id));
        }
        conversation.touch();
        self.save(&conversation).await?;
        self.emit(ChatEvent::MessageRemoved {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
        });
        Ok(())
    }

    pub async fn get_message(&self, conversation_id: &str, message_id: &str) -> Result<Option<Message>> {
        let conversation = self.require(conversation_id).await?;
        Ok(conversation.message(message_id).cloned())
    }

    /// Delete every conversation, then create and activate a fresh one
    pub async fn clear_all(&self) -> Result<Conversation> {
        let conversations = self.table.to_array().await?;
        let count = conversations.len();

        futures::stream::iter(conversations)
            .map(|conversation| async move { self.delete(&conversation.id).await })
            .buffer_unordered(DELETE_FAN_OUT)
            .try_collect::<Vec<_>>()
            .await?;
        tracing::info!("Cleared {} conversations", count);

        let fresh = self
            .create(UNTITLED_TITLE, ConversationPatch::default())
            .await?;
        self.switch_to(&fresh.id).await
    }

    pub fn is_typing(&self, conversation_id: &str) -> bool {
        self.session.is_typing(conversation_id)
    }

    /// Mark a conversation typing and register its cancellation token
    pub fn begin_generation(&self, conversation_id: &str) -> GenerationGuard {
        let guard = self
            .session
            .begin(conversation_id)
            .notify(self.event_tx.clone());
        self.emit(ChatEvent::TypingChanged {
            conversation_id: conversation_id.to_string(),
            typing: true,
        });
        guard
    }

    /// Release a send registered with [`begin_generation`](Self::begin_generation).
    /// Dropping the guard has the same effect.
    pub fn finish_generation(&self, guard: GenerationGuard) {
        guard.release();
    }

    /// Cancel the in-flight send of a conversation. Returns whether one existed.
    pub fn stop_generation(&self, conversation_id: &str) -> bool {
        let stopped = self.session.stop(conversation_id);
        if stopped {
            tracing::info!("Stopped generation for {}", conversation_id);
            self.emit(ChatEvent::TypingChanged {
                conversation_id: conversation_id.to_string(),
                typing: false,
            });
        }
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geppeto_ai::Role;

    async fn store_with_conversation() -> (ConversationStore, Conversation) {
        let store = ConversationStore::in_memory();
        let conversation = store
            .create(UNTITLED_TITLE, ConversationPatch::default())
            .await
            .unwrap();
        (store, conversation)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (store, conversation) = store_with_conversation().await;
        let loaded = store.get(&conversation.id).await.unwrap().unwrap();
        assert_eq!(loaded, conversation);
        assert_eq!(store.session().list().len(), 1);
    }

    #[tokio::test]
    async fn test_create_with_overrides() {
        let store = ConversationStore::in_memory();
        let conversation = store
            .create(
                "Pirates",
                ConversationPatch {
                    system_message: Some(Some("Talk like a pirate".into())),
                    settings: Some(ConversationSettings {
                        model: Some("gpt-4".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(conversation.system_message.as_deref(), Some("Talk like a pirate"));
        assert_eq!(conversation.settings.model.as_deref(), Some("gpt-4"));
    }

    #[tokio::test]
    async fn test_missing_ids_are_not_found() {
        let store = ConversationStore::in_memory();
        let err = store
            .add_message("nope", Message::user("nope", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { entity: "conversation", .. }));
        assert!(store.delete("nope").await.is_err());
        assert!(store.switch_to("nope").await.is_err());
        assert!(store.update("nope", ConversationPatch::title("x")).await.is_err());
    }

    #[tokio::test]
    async fn test_add_message_preserves_created_at() {
        let (store, conversation) = store_with_conversation().await;
        let mut message = Message::user(&conversation.id, "hi");
        let created = Utc::now() - chrono::Duration::hours(1);
        message.created_at = created;
        store.add_message(&conversation.id, message.clone()).await.unwrap();

        let stored = store
            .get_message(&conversation.id, &message.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.created_at, created);
        assert!(stored.updated_at > created);
    }

    #[tokio::test]
    async fn test_upsert_never_duplicates() {
        let (store, conversation) = store_with_conversation().await;
        store
            .add_message(&conversation.id, Message::user(&conversation.id, "Hi"))
            .await
            .unwrap();
        let reply = Message::assistant(&conversation.id, "H");
        store.add_message(&conversation.id, reply.clone()).await.unwrap();
        let len = store.require(&conversation.id).await.unwrap().messages.len();

        for text in ["He", "Hel", "Hell", "Hello"] {
            let updated = store
                .update_last_assistant_message(&conversation.id, MessagePatch::text(text))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(updated.id, reply.id);
        }

        let conversation = store.require(&conversation.id).await.unwrap();
        assert_eq!(conversation.messages.len(), len);
        assert_eq!(conversation.messages[1].text, "Hello");
    }

    #[tokio::test]
    async fn test_update_last_assistant_without_assistant_is_noop() {
        let (store, conversation) = store_with_conversation().await;
        store
            .add_message(&conversation.id, Message::user(&conversation.id, "Hi"))
            .await
            .unwrap();
        let result = store
            .update_last_assistant_message(&conversation.id, MessagePatch::text("x"))
            .await
            .unwrap();
        assert!(result.is_none());
        let conversation = store.require(&conversation.id).await.unwrap();
        assert_eq!(conversation.messages[0].role, Role::User);
        assert_eq!(conversation.messages[0].text, "Hi");
    }

    #[tokio::test]
    async fn test_update_events_carry_delta() {
        let (store, conversation) = store_with_conversation().await;
        store
            .add_message(&conversation.id, Message::assistant(&conversation.id, "He"))
            .await
            .unwrap();
        let mut events = store.subscribe();
        store
            .update_last_assistant_message(&conversation.id, MessagePatch::text("Hello"))
            .await
            .unwrap();
        match events.recv().await.unwrap() {
            ChatEvent::MessageUpdated { message, delta } => {
                assert_eq!(message.text, "Hello");
                assert_eq!(delta.as_deref(), Some("llo"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_active_view_follows_writes() {
        let (store, conversation) = store_with_conversation().await;
        store.switch_to(&conversation.id).await.unwrap();
        store
            .add_message(&conversation.id, Message::user(&conversation.id, "Hi"))
            .await
            .unwrap();
        store
            .update(&conversation.id, ConversationPatch::title("Greetings"))
            .await
            .unwrap();
        let current = store.current().unwrap();
        assert_eq!(current.messages.len(), 1);
        assert_eq!(current.title, "Greetings");
    }

    #[tokio::test]
    async fn test_update_settings_merges_nested() {
        let (store, conversation) = store_with_conversation().await;
        store
            .update_settings(
                &conversation.id,
                ConversationSettings {
                    model: Some("gpt-4".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let updated = store
            .update_settings(
                &conversation.id,
                ConversationSettings {
                    creativity: Some(0.2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.settings.model.as_deref(), Some("gpt-4"));
        assert_eq!(updated.settings.creativity, Some(0.2));
    }

    #[tokio::test]
    async fn test_remove_message_orphans_children() {
        let (store, conversation) = store_with_conversation().await;
        let parent = Message::user(&conversation.id, "a");
        let child = Message::assistant(&conversation.id, "b").with_parent(Some(parent.id.clone()));
        store.add_message(&conversation.id, parent.clone()).await.unwrap();
        store.add_message(&conversation.id, child.clone()).await.unwrap();

        store.remove_message(&conversation.id, &parent.id).await.unwrap();
        let conversation = store.require(&conversation.id).await.unwrap();
        assert_eq!(conversation.messages.len(), 1);
        let chain = crate::chain::resolve_chain(&conversation.messages, &conversation.messages[0]);
        assert_eq!(chain.len(), 1);

        assert!(matches!(
            store.remove_message(&conversation.id, &parent.id).await,
            Err(Error::NotFound { entity: "message", .. })
        ));
    }

    #[tokio::test]
    async fn test_list_sorted_by_recency() {
        let store = ConversationStore::in_memory();
        let first = store.create("first", ConversationPatch::default()).await.unwrap();
        let second = store.create("second", ConversationPatch::default()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store
            .add_message(&first.id, Message::user(&first.id, "bump"))
            .await
            .unwrap();

        let ids: Vec<_> = store.list().await.unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![first.id.clone(), second.id.clone()]);
        assert_eq!(store.session().list()[0].id, first.id);
    }

    #[tokio::test]
    async fn test_ensure_active_creates_untitled() {
        let store = ConversationStore::in_memory();
        let active = store.ensure_active().await.unwrap();
        assert_eq!(active.title, UNTITLED_TITLE);
        assert_eq!(store.current_id(), Some(active.id.clone()));
        // idempotent
        assert_eq!(store.ensure_active().await.unwrap().id, active.id);
    }

    #[tokio::test]
    async fn test_ensure_active_picks_latest() {
        let (store, conversation) = store_with_conversation().await;
        let active = store.ensure_active().await.unwrap();
        assert_eq!(active.id, conversation.id);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_releases_in_flight_handle() {
        let (store, conversation) = store_with_conversation().await;
        store.switch_to(&conversation.id).await.unwrap();
        let guard = store.begin_generation(&conversation.id);
        assert!(store.is_typing(&conversation.id));

        store.delete(&conversation.id).await.unwrap();
        assert!(guard.token().is_cancelled());
        assert!(!store.is_typing(&conversation.id));
        assert!(store.current().is_none());
        assert!(store.get(&conversation.id).await.unwrap().is_none());
        store.finish_generation(guard);
    }

    #[tokio::test]
    async fn test_clear_all_leaves_one_fresh_conversation() {
        let store = ConversationStore::in_memory();
        for i in 0..25 {
            store
                .create(format!("c{}", i), ConversationPatch::default())
                .await
                .unwrap();
        }
        let fresh = store.clear_all().await.unwrap();
        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, fresh.id);
        assert_eq!(store.current_id(), Some(fresh.id));
    }

    #[tokio::test]
    async fn test_import_is_idempotent() {
        let store = ConversationStore::in_memory();
        let mut conversation = Conversation::new("remote");
        conversation
            .messages
            .push(Message::user(&conversation.id, "hello"));

        store.import(conversation.clone()).await.unwrap();
        store.import(conversation.clone()).await.unwrap();
        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], conversation);
    }

    #[tokio::test]
    async fn test_typing_events() {
        let (store, conversation) = store_with_conversation().await;
        let mut events = store.subscribe();
        let guard = store.begin_generation(&conversation.id);
        store.finish_generation(guard);

        let mut typing = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ChatEvent::TypingChanged { typing: t, .. } = event {
                typing.push(t);
            }
        }
        assert_eq!(typing, vec![true, false]);
    }
}
