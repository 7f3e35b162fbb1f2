//! Conversation and message records.
//!
//! Messages are stored flat inside their conversation in insertion order.
//! The reply tree is carried by `parent_message_id` back-references only;
//! see [`crate::chain`] for reconstructing causal order.

use chrono::{DateTime, Utc};
use geppeto_ai::{ChatMessage, Role};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::Record;

/// Title every new conversation starts with, until one is generated
pub const UNTITLED_TITLE: &str = "Untitled Conversation";

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// A single message within a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub text: String,
    /// Causal predecessor. A weak relation: the parent may have been removed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Locally synthesized error notice, never sent back to the model
    #[serde(default)]
    pub is_error: bool,
    pub conversation_id: String,
}

impl Message {
    pub fn new(conversation_id: impl Into<String>, role: Role, text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            role,
            text: text.into(),
            parent_message_id: None,
            created_at: now,
            updated_at: now,
            is_error: false,
            conversation_id: conversation_id.into(),
        }
    }

    pub fn user(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(conversation_id, Role::User, text)
    }

    pub fn assistant(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(conversation_id, Role::Assistant, text)
    }

    /// A user-visible error notice
    pub fn error(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::new(conversation_id, Role::Assistant, text)
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_parent(mut self, parent_message_id: Option<String>) -> Self {
        self.parent_message_id = parent_message_id;
        self
    }

    /// The `{role, content}` pair sent to the completion endpoint
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage::new(self.role, self.text.clone())
    }
}

/// Partial update for an existing message; `None` fields are left alone
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    pub id: Option<String>,
    pub text: Option<String>,
    pub parent_message_id: Option<Option<String>>,
    pub is_error: Option<bool>,
}

impl MessagePatch {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn apply(self, message: &mut Message) {
        if let Some(id) = self.id {
            message.id = id;
        }
        if let Some(text) = self.text {
            message.text = text;
        }
        if let Some(parent) = self.parent_message_id {
            message.parent_message_id = parent;
        }
        if let Some(is_error) = self.is_error {
            message.is_error = is_error;
        }
        message.updated_at = Utc::now();
    }
}

/// Per-conversation overrides of the chat defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creativity: Option<f32>,
}

impl ConversationSettings {
    /// Overlay the fields set in `other`
    pub fn merge(&mut self, other: ConversationSettings) {
        if other.model.is_some() {
            self.model = other.model;
        }
        if other.max_tokens.is_some() {
            self.max_tokens = other.max_tokens;
        }
        if other.creativity.is_some() {
            self.creativity = other.creativity;
        }
    }
}

/// A conversation and the messages it owns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    #[serde(default)]
    pub settings: ConversationSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Ids of attached knowledge items
    #[serde(default)]
    pub knowledge: Vec<String>,
}

impl Conversation {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            title: title.into(),
            messages: Vec::new(),
            system_message: None,
            settings: ConversationSettings::default(),
            created_at: now,
            updated_at: now,
            knowledge: Vec::new(),
        }
    }

    pub fn is_untitled(&self) -> bool {
        self.title == UNTITLED_TITLE
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Most recent assistant message, error notices included
    pub fn last_assistant_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    pub(crate) fn last_assistant_message_mut(&mut self) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .rev()
            .find(|m| m.role == Role::Assistant)
    }

    /// Most recent real model reply, the parent for the next user message
    pub fn last_reply(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && !m.is_error)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Shallow partial update of a conversation; `None` fields are left alone
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationPatch {
    pub title: Option<String>,
    pub system_message: Option<Option<String>>,
    pub settings: Option<ConversationSettings>,
    pub knowledge: Option<Vec<String>>,
}

impl ConversationPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn system_message(system_message: Option<String>) -> Self {
        Self {
            system_message: Some(system_message),
            ..Default::default()
        }
    }

    pub fn apply(self, conversation: &mut Conversation) {
        if let Some(title) = self.title {
            conversation.title = title;
        }
        if let Some(system_message) = self.system_message {
            conversation.system_message = system_message;
        }
        if let Some(settings) = self.settings {
            conversation.settings = settings;
        }
        if let Some(knowledge) = self.knowledge {
            conversation.knowledge = knowledge;
        }
        conversation.touch();
    }
}

impl Record for Conversation {
    const ENTITY: &'static str = "conversation";

    fn id(&self) -> &str {
        &self.id
    }
}
