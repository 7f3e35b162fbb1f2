//! Optional mirroring of conversations to a remote JSON store.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};

use crate::conversation::{Conversation, ConversationSettings, Message};
use crate::conversations::ConversationStore;
use crate::error::{Error, Result};

/// Concurrent remote calls during bulk pulls and deletes
pub const SYNC_FAN_OUT: usize = 10;

/// A conversation as the remote store keeps it: messages live in their own
/// collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConversation {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    #[serde(default)]
    pub settings: ConversationSettings,
    #[serde(default)]
    pub knowledge: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Conversation> for RemoteConversation {
    fn from(conversation: &Conversation) -> Self {
        Self {
            id: conversation.id.clone(),
            title: conversation.title.clone(),
            system_message: conversation.system_message.clone(),
            settings: conversation.settings.clone(),
            knowledge: conversation.knowledge.clone(),
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        }
    }
}

impl RemoteConversation {
    /// Reassemble a local conversation; messages are ordered by creation
    pub fn into_conversation(self, mut messages: Vec<Message>) -> Conversation {
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Conversation {
            id: self.id,
            title: self.title,
            messages,
            system_message: self.system_message,
            settings: self.settings,
            created_at: self.created_at,
            updated_at: self.updated_at,
            knowledge: self.knowledge,
        }
    }
}

/// Remote conversation and message collections
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<RemoteConversation>>;

    async fn get_conversation(&self, id: &str) -> Result<Option<RemoteConversation>>;

    async fn create_conversation(&self, conversation: &RemoteConversation) -> Result<()>;

    async fn update_conversation(&self, conversation: &RemoteConversation) -> Result<()>;

    async fn delete_conversation(&self, id: &str) -> Result<()>;

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    async fn create_message(&self, message: &Message) -> Result<()>;

    async fn update_message(&self, message: &Message) -> Result<()>;

    async fn delete_message(&self, id: &str) -> Result<()>;
}

/// [`RemoteStore`] over a JSON REST API
#[derive(Clone)]
pub struct HttpRemoteStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemoteStore {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send and fail on any non-2xx status
    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = builder.send().await.map_err(geppeto_ai::Error::from)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Sync(format!("{} failed with {}: {}", what, status, body)));
        }
        Ok(response)
    }

    async fn json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let body = response.text().await.map_err(geppeto_ai::Error::from)?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn list_conversations(&self) -> Result<Vec<RemoteConversation>> {
        let response = self
            .send(self.request(Method::GET, "/conversations"), "list conversations")
            .await?;
        Self::json(response).await
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<RemoteConversation>> {
        let response = self
            .request(Method::GET, &format!("/conversations/{}", id))
            .send()
            .await
            .map_err(geppeto_ai::Error::from)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::Sync(format!(
                "get conversation {} failed with {}",
                id,
                response.status()
            )));
        }
        Self::json(response).await.map(Some)
    }

    async fn create_conversation(&self, conversation: &RemoteConversation) -> Result<()> {
        self.send(
            self.request(Method::POST, "/conversations").json(conversation),
            "create conversation",
        )
        .await?;
        Ok(())
    }

    async fn update_conversation(&self, conversation: &RemoteConversation) -> Result<()> {
        self.send(
            self.request(Method::PATCH, &format!("/conversations/{}", conversation.id))
                .json(conversation),
            "update conversation",
        )
        .await?;
        Ok(())
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        self.send(
            self.request(Method::DELETE, &format!("/conversations/{}", id)),
            "delete conversation",
        )
        .await?;
        Ok(())
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let response = self
            .send(
                self.request(Method::GET, "/messages")
                    .query(&[("conversationId", conversation_id)]),
                "list messages",
            )
            .await?;
        Self::json(response).await
    }

    async fn create_message(&self, message: &Message) -> Result<()> {
        self.send(
            self.request(Method::POST, "/messages").json(message),
            "create message",
        )
        .await?;
        Ok(())
    }

    async fn update_message(&self, message: &Message) -> Result<()> {
        self.send(
            self.request(Method::PATCH, &format!("/messages/{}", message.id))
                .json(message),
            "update message",
        )
        .await?;
        Ok(())
    }

    async fn delete_message(&self, id: &str) -> Result<()> {
        self.send(
            self.request(Method::DELETE, &format!("/messages/{}", id)),
            "delete message",
        )
        .await?;
        Ok(())
    }
}

/// Moves conversations between the local store and a [`RemoteStore`].
///
/// A disabled bridge logs and does nothing.
#[derive(Clone)]
pub struct SyncBridge {
    remote: Arc<dyn RemoteStore>,
    store: ConversationStore,
    enabled: bool,
}

impl SyncBridge {
    pub fn new(remote: Arc<dyn RemoteStore>, store: ConversationStore, enabled: bool) -> Self {
        Self {
            remote,
            store,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn skip(&self, operation: &str) -> bool {
        if !self.enabled {
            tracing::debug!("Sync disabled, skipping {}", operation);
        }
        !self.enabled
    }

    /// Copy one remote conversation into the local store, replacing the
    /// local copy. Returns `None` when the remote does not have it.
    pub async fn pull(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        if self.skip("pull") {
            return Ok(None);
        }
        let Some(remote) = self.remote.get_conversation(conversation_id).await? else {
            tracing::warn!("Remote has no conversation {}", conversation_id);
            return Ok(None);
        };
        let messages = self.remote.list_messages(conversation_id).await?;
        let conversation = self.store.import(remote.into_conversation(messages)).await?;
        tracing::info!("Pulled conversation {}", conversation_id);
        Ok(Some(conversation))
    }

    /// Pull every remote conversation. Returns how many were pulled.
    pub async fn pull_all(&self) -> Result<usize> {
        if self.skip("pull_all") {
            return Ok(0);
        }
        let remote = self.remote.list_conversations().await?;
        let pulled: Vec<_> = futures::stream::iter(remote)
            .map(|conversation| async move { self.pull(&conversation.id).await })
            .buffer_unordered(SYNC_FAN_OUT)
            .try_collect()
            .await?;
        let count = pulled.into_iter().flatten().count();
        self.store.list().await?;
        Ok(count)
    }

    /// Create or update the remote copy of a local conversation and each of
    /// its messages
    pub async fn push(&self, conversation_id: &str) -> Result<()> {
        if self.skip("push") {
            return Ok(());
        }
        let conversation = self.store.require(conversation_id).await?;
        let remote = RemoteConversation::from(&conversation);
        match self.remote.get_conversation(conversation_id).await? {
            Some(_) => self.remote.update_conversation(&remote).await?,
            None => self.remote.create_conversation(&remote).await?,
        }

        let existing: HashSet<String> = self
            .remote
            .list_messages(conversation_id)
            .await?
            .into_iter()
            .map(|m| m.id)
            .collect();
        for message in &conversation.messages {
            if existing.contains(&message.id) {
                self.remote.update_message(message).await?;
            } else {
                self.remote.create_message(message).await?;
            }
        }
        tracing::info!(
            "Pushed conversation {} with {} messages",
            conversation_id,
            conversation.messages.len()
        );
        Ok(())
    }

    /// Delete a conversation and its messages from the remote
    pub async fn delete_remote(&self, conversation_id: &str) -> Result<()> {
        if self.skip("delete_remote") {
            return Ok(());
        }
        let messages = self.remote.list_messages(conversation_id).await?;
        self.remote.delete_conversation(conversation_id).await?;
        futures::stream::iter(messages)
            .map(|message| async move { self.remote.delete_message(&message.id).await })
            .buffer_unordered(SYNC_FAN_OUT)
            .try_collect::<Vec<_>>()
            .await?;
        tracing::info!("Deleted remote conversation {}", conversation_id);
        Ok(())
    }
}
