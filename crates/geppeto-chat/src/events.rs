//! Chat event types

use serde::{Deserialize, Serialize};

use crate::conversation::{Conversation, Message};

/// Events broadcast by the conversation store and the orchestrator.
///
/// This is the reactive view a front end renders from; every state change
/// the store makes is announced here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A conversation was created
    ConversationCreated { conversation: Conversation },

    /// Conversation fields (title, settings, system message) changed
    ConversationUpdated { conversation: Conversation },

    /// A conversation was removed
    ConversationDeleted { conversation_id: String },

    /// The active conversation changed
    ConversationSwitched { conversation_id: String },

    /// A message was appended
    MessageAdded { message: Message },

    /// A message changed, typically a streaming assistant reply growing.
    /// `delta` is the newly appended text, when known.
    MessageUpdated {
        message: Message,
        delta: Option<String>,
    },

    /// A message was removed
    MessageRemoved {
        conversation_id: String,
        message_id: String,
    },

    /// Typing status of a conversation changed
    TypingChanged { conversation_id: String, typing: bool },

    /// The recency-ordered conversation list was refreshed
    ListUpdated { conversation_ids: Vec<String> },

    /// A title was generated for a conversation
    TitleGenerated { conversation_id: String, title: String },

    /// A send failed and an error notice was appended
    GenerationFailed {
        conversation_id: String,
        message: String,
    },
}

impl ChatEvent {
    /// The conversation this event concerns, if any
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            ChatEvent::ConversationCreated { conversation }
            | ChatEvent::ConversationUpdated { conversation } => Some(&conversation.id),
            ChatEvent::MessageAdded { message } | ChatEvent::MessageUpdated { message, .. } => {
                Some(&message.conversation_id)
            }
            ChatEvent::ConversationDeleted { conversation_id }
            | ChatEvent::ConversationSwitched { conversation_id }
            | ChatEvent::MessageRemoved {
                conversation_id, ..
            }
            | ChatEvent::TypingChanged {
                conversation_id, ..
            }
            | ChatEvent::TitleGenerated {
                conversation_id, ..
            }
            | ChatEvent::GenerationFailed {
                conversation_id, ..
            } => Some(conversation_id),
            ChatEvent::ListUpdated { .. } => None,
        }
    }
}
