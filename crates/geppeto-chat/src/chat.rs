//! Send-message orchestration.
//!
//! [`Chat::send_message`] runs one turn end to end: it appends the user
//! message, rebuilds the causal chain, trims it to the model's budget,
//! streams the reply into the store and finally kicks off title generation.
//! Failures are turned into visible error notices here and nowhere else.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use geppeto_ai::models::{DEFAULT_MODEL_ID, max_tokens_for_model};
use geppeto_ai::{
    ApiErrorCode, ChatMessage, CompletionEndpoint, CompletionRequest, TokenCounter, assemble,
    counter_for_model,
};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::chain::resolve_chain;
use crate::conversation::{Conversation, ConversationPatch, Message, MessagePatch, new_id};
use crate::conversations::ConversationStore;
use crate::error::{Error, Result};
use crate::events::ChatEvent;
use crate::knowledge::KnowledgeStore;
use crate::title::generate_title;
use crate::window::fit_to_window;

/// Chat defaults; each conversation's settings override them
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    pub model: String,
    /// Maximum tokens of a reply
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Replaces the built-in default system message
    pub system_message: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL_ID.to_string(),
            max_tokens: None,
            temperature: None,
            system_message: None,
        }
    }
}

/// The system message used when neither the conversation nor the config
/// provides one
pub fn default_system_message(today: NaiveDate) -> String {
    format!(
        "You are Geppeto, a large language model based assistant. \
         Answer as concisely as possible.\nCurrent date: {}",
        today.format("%Y-%m-%d")
    )
}

/// Why a send did not produce a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The prompt cannot fit the model's budget even after trimming
    MessageTooLong,
    ModelNotFound,
    ContextLengthExceeded,
    InvalidApiKey,
    InsufficientQuota,
    /// Transport failures and codes without a dedicated message
    Unknown,
}

impl FailureKind {
    pub fn classify(error: &geppeto_ai::Error) -> Self {
        use geppeto_ai::Error as AiError;

        match error {
            AiError::ContextOverflow(_) => FailureKind::MessageTooLong,
            AiError::InvalidApiKey => FailureKind::InvalidApiKey,
            AiError::Api { code, .. } => match code {
                ApiErrorCode::ModelNotFound => FailureKind::ModelNotFound,
                ApiErrorCode::ContextLengthExceeded => FailureKind::ContextLengthExceeded,
                ApiErrorCode::InvalidApiKey => FailureKind::InvalidApiKey,
                ApiErrorCode::InsufficientQuota => FailureKind::InsufficientQuota,
                ApiErrorCode::Other(_) if error.is_context_overflow() => {
                    FailureKind::ContextLengthExceeded
                }
                ApiErrorCode::Other(_) => FailureKind::Unknown,
            },
            AiError::Status { .. } if error.is_context_overflow() => {
                FailureKind::ContextLengthExceeded
            }
            _ => FailureKind::Unknown,
        }
    }

    /// Text of the error notice shown in the conversation
    pub fn user_message(&self) -> &'static str {
        match self {
            FailureKind::MessageTooLong => {
                "Your message is too long for the model's context window. \
                 Try a shorter message or start a new conversation."
            }
            FailureKind::ModelNotFound => {
                "The selected model is not available. Pick another model in the settings."
            }
            FailureKind::ContextLengthExceeded => {
                "This conversation is too long for the model. \
                 Start a new conversation or remove some messages."
            }
            FailureKind::InvalidApiKey => {
                "The API key is missing or invalid. Check your configuration."
            }
            FailureKind::InsufficientQuota => {
                "Your API quota is exhausted. Check your plan and billing details."
            }
            FailureKind::Unknown => {
                "Something went wrong while generating a response. Please try again."
            }
        }
    }
}

/// Result of [`Chat::send_message`]
#[derive(Debug)]
pub enum SendOutcome {
    /// The reply was stored. `title_task` is set when a title is being
    /// generated in the background.
    Completed {
        message_id: String,
        title_task: Option<JoinHandle<()>>,
    },
    /// The send failed and an error notice was appended
    Rejected(FailureKind),
    /// The send was stopped; whatever streamed so far is kept
    Cancelled,
    /// There is no active conversation to send to
    NoActiveConversation,
}

/// Model parameters after applying conversation overrides
#[derive(Debug, Clone, PartialEq)]
struct Effective {
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

/// The send-message orchestrator.
///
/// Cheap to clone; clones share the store, endpoint and config.
#[derive(Clone)]
pub struct Chat {
    store: ConversationStore,
    endpoint: Arc<dyn CompletionEndpoint>,
    config: Arc<Mutex<ChatConfig>>,
    knowledge: Option<KnowledgeStore>,
    counter: Option<Arc<dyn TokenCounter>>,
}

impl Chat {
    pub fn new(
        store: ConversationStore,
        endpoint: Arc<dyn CompletionEndpoint>,
        config: ChatConfig,
    ) -> Self {
        Self {
            store,
            endpoint,
            config: Arc::new(Mutex::new(config)),
            knowledge: None,
            counter: None,
        }
    }

    /// Inject attached knowledge items into requests
    pub fn with_knowledge(mut self, knowledge: KnowledgeStore) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    /// Count tokens with `counter` instead of the model's own tokenizer
    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = Some(counter);
        self
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Subscribe to chat events
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.store.subscribe()
    }

    pub fn config(&self) -> ChatConfig {
        self.config.lock().clone()
    }

    /// Set the default model
    pub fn set_model(&self, model: impl Into<String>) {
        self.config.lock().model = model.into();
    }

    pub fn set_system_message(&self, system_message: Option<String>) {
        self.config.lock().system_message = system_message;
    }

    /// Stop the active conversation's generation
    pub fn stop_generation(&self) -> bool {
        match self.store.current_id() {
            Some(id) => self.store.stop_generation(&id),
            None => false,
        }
    }

    fn effective(&self, conversation: &Conversation) -> Effective {
        let config = self.config.lock();
        let settings = &conversation.settings;
        Effective {
            model: settings.model.clone().unwrap_or_else(|| config.model.clone()),
            max_tokens: settings.max_tokens.or(config.max_tokens),
            temperature: settings.creativity.or(config.temperature),
        }
    }

    fn system_message(&self, conversation: &Conversation) -> String {
        conversation
            .system_message
            .clone()
            .or_else(|| self.config.lock().system_message.clone())
            .unwrap_or_else(|| default_system_message(Utc::now().date_naive()))
    }

    /// Send `text` to the active conversation
    pub async fn send_message(&self, text: &str) -> Result<SendOutcome> {
        let Some(conversation_id) = self.store.current_id() else {
            tracing::debug!("No active conversation, ignoring message");
            return Ok(SendOutcome::NoActiveConversation);
        };
        self.send_to(&conversation_id, text).await
    }

    /// Send `text` to a specific conversation.
    ///
    /// Callers must not start a second send on a conversation while
    /// [`ConversationStore::is_typing`] is true for it.
    pub async fn send_to(&self, conversation_id: &str, text: &str) -> Result<SendOutcome> {
        let conversation = self.store.require(conversation_id).await?;
        let parent = conversation.last_reply().map(|m| m.id.clone());
        let user_message = Message::user(conversation_id, text).with_parent(parent);
        self.store
            .add_message(conversation_id, user_message.clone())
            .await?;

        let guard = self.store.begin_generation(conversation_id);
        let cancel = guard.token().clone();
        let result = self.generate(conversation_id, &user_message, &cancel).await;
        self.store.finish_generation(guard);

        match result {
            Ok(message_id) => {
                self.store.list().await?;
                let untitled = self
                    .store
                    .get(conversation_id)
                    .await?
                    .is_some_and(|c| c.is_untitled());
                let title_task = untitled.then(|| self.spawn_title(conversation_id));
                Ok(SendOutcome::Completed {
                    message_id,
                    title_task,
                })
            }
            Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
                tracing::info!("Generation for {} cancelled", conversation_id);
                Ok(SendOutcome::Cancelled)
            }
            Err(Error::Ai(e)) => {
                let kind = FailureKind::classify(&e);
                if kind == FailureKind::Unknown {
                    tracing::warn!("Unmapped completion failure for {}: {}", conversation_id, e);
                } else {
                    tracing::info!("Completion for {} rejected: {}", conversation_id, e);
                }
                self.report_failure(conversation_id, &user_message, kind)
                    .await?;
                Ok(SendOutcome::Rejected(kind))
            }
            Err(e) => Err(e),
        }
    }

    /// Build the completion request answering `message_id`.
    ///
    /// Fails with [`geppeto_ai::Error::ContextOverflow`] when the message
    /// cannot fit the model's budget.
    pub async fn prepare_request(
        &self,
        conversation: &Conversation,
        message_id: &str,
    ) -> Result<CompletionRequest> {
        let target = conversation
            .message(message_id)
            .ok_or_else(|| Error::not_found("message", message_id))?;
        let effective = self.effective(conversation);

        let mut history: Vec<ChatMessage> = resolve_chain(&conversation.messages, target)
            .into_iter()
            .filter(|m| !m.is_error)
            .map(Message::to_chat_message)
            .collect();
        if let Some(knowledge) = &self.knowledge {
            let items = knowledge.messages_for(conversation).await?;
            let at = history.len().saturating_sub(1);
            history.splice(at..at, items);
        }

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(self.system_message(conversation)));
        messages.extend(history);

        let counter = match &self.counter {
            Some(counter) => Arc::clone(counter),
            None => counter_for_model(&effective.model),
        };
        let budget = max_tokens_for_model(&effective.model) as usize;
        let fitted = fit_to_window(messages, budget, counter.as_ref())
            .map_err(|overflow| geppeto_ai::Error::ContextOverflow(overflow.to_string()))?;
        // trimming only reaches the new message once every other turn is gone
        if fitted.len() < 2 {
            return Err(geppeto_ai::Error::ContextOverflow(format!(
                "message does not fit the {}-token budget",
                budget
            ))
            .into());
        }

        Ok(CompletionRequest::new(effective.model, fitted)
            .with_max_tokens(effective.max_tokens)
            .with_temperature(effective.temperature))
    }

    /// Stream a reply to `user_message`, upserting it as it grows.
    /// Returns the stored reply id.
    async fn generate(
        &self,
        conversation_id: &str,
        user_message: &Message,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let conversation = self.store.require(conversation_id).await?;
        let request = self.prepare_request(&conversation, &user_message.id).await?;
        tracing::debug!(
            "Sending {} messages to {} for {}",
            request.messages.len(),
            request.model,
            conversation_id
        );
        let chunks = self.endpoint.stream(&request, cancel.clone()).await?;

        let fallback_id = new_id();
        // the storage key is fixed by the first snapshot and never recomputed
        let mut pinned_id: Option<String> = None;
        let reply = assemble(chunks, cancel, |snapshot| {
            let store = self.store.clone();
            let conversation_id = conversation_id.to_string();
            let reply_id = pinned_id
                .get_or_insert_with(|| non_empty_or(snapshot.id, &fallback_id))
                .clone();
            let parent_id = user_message.id.clone();
            async move {
                upsert_reply(&store, &conversation_id, reply_id, snapshot.text, parent_id).await
            }
        })
        .await?;

        let reply_id = pinned_id.unwrap_or_else(|| non_empty_or(reply.id, &fallback_id));
        upsert_reply(
            &self.store,
            conversation_id,
            reply_id.clone(),
            reply.text,
            user_message.id.clone(),
        )
        .await?;
        Ok(reply_id)
    }

    async fn report_failure(
        &self,
        conversation_id: &str,
        user_message: &Message,
        kind: FailureKind,
    ) -> Result<()> {
        let notice = Message::error(conversation_id, kind.user_message())
            .with_parent(Some(user_message.id.clone()));
        self.store.add_message(conversation_id, notice).await?;
        self.store.emit(ChatEvent::GenerationFailed {
            conversation_id: conversation_id.to_string(),
            message: kind.user_message().to_string(),
        });
        Ok(())
    }

    fn spawn_title(&self, conversation_id: &str) -> JoinHandle<()> {
        let chat = self.clone();
        let conversation_id = conversation_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = chat.regenerate_title(&conversation_id).await {
                tracing::warn!("Title generation for {} failed: {}", conversation_id, e);
            }
        })
    }

    /// Generate and store a fresh title for a conversation
    pub async fn regenerate_title(&self, conversation_id: &str) -> Result<String> {
        let conversation = self.store.require(conversation_id).await?;
        let model = self.effective(&conversation).model;
        let title = generate_title(self.endpoint.as_ref(), &model, &conversation).await?;
        if title.is_empty() {
            return Err(Error::Other("model returned an empty title".into()));
        }

        self.store
            .update(conversation_id, ConversationPatch::title(title.clone()))
            .await?;
        self.store.emit(ChatEvent::TitleGenerated {
            conversation_id: conversation_id.to_string(),
            title: title.clone(),
        });
        Ok(title)
    }
}

fn non_empty_or(id: String, fallback: &str) -> String {
    if id.is_empty() { fallback.to_string() } else { id }
}

/// Create the reply on first sight, update it afterwards
async fn upsert_reply(
    store: &ConversationStore,
    conversation_id: &str,
    reply_id: String,
    text: String,
    parent_id: String,
) -> Result<()> {
    if store.get_message(conversation_id, &reply_id).await?.is_some() {
        let patch = MessagePatch {
            text: Some(text),
            parent_message_id: Some(Some(parent_id)),
            ..Default::default()
        };
        store
            .update_last_assistant_message(conversation_id, patch)
            .await?;
    } else {
        let reply = Message::assistant(conversation_id, text)
            .with_id(reply_id)
            .with_parent(Some(parent_id));
        store.add_message(conversation_id, reply).await?;
    }
    Ok(())
}
