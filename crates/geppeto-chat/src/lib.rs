//! geppeto-chat: conversation core
//!
//! This crate owns conversations and their threaded messages, persists them
//! through pluggable tables, and orchestrates sending a message: rebuilding
//! the causal chain, fitting it into the model's context window, streaming
//! the reply into the store and naming the conversation afterwards.

pub mod chain;
pub mod chat;
pub mod conversation;
pub mod conversations;
pub mod error;
pub mod events;
pub mod handle;
pub mod knowledge;
pub mod persona;
pub mod store;
pub mod sync;
pub mod title;
pub mod window;

pub use chain::resolve_chain;
pub use chat::{Chat, ChatConfig, FailureKind, SendOutcome, default_system_message};
pub use conversation::{
    Conversation, ConversationPatch, ConversationSettings, Message, MessagePatch, UNTITLED_TITLE,
};
pub use conversations::ConversationStore;
pub use error::{Error, Result};
pub use events::ChatEvent;
pub use handle::{GenerationGuard, Session};
pub use knowledge::{KnowledgeItem, KnowledgeStore};
pub use persona::{Persona, PersonaPatch, PersonaStore};
pub use store::{JsonTable, MemoryTable, Record, Table};
pub use sync::{HttpRemoteStore, RemoteConversation, RemoteStore, SyncBridge};
pub use title::generate_title;
pub use window::{Overflow, fit_to_window};
