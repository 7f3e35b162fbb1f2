//! Per-session mutable state: the active conversation, the list cache,
//! typing status and in-flight generation handles.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::conversation::Conversation;
use crate::events::ChatEvent;

/// Registration of one outstanding send for a conversation.
///
/// The send is released when the guard is dropped, including when the
/// future holding it is abandoned mid-stream. Release is tied to the
/// registration sequence, so an older send finishing never releases a
/// newer one on the same conversation.
#[derive(Debug)]
pub struct GenerationGuard {
    session: Session,
    conversation_id: String,
    seq: u64,
    token: CancellationToken,
    events: Option<broadcast::Sender<ChatEvent>>,
    released: bool,
}

impl GenerationGuard {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Token signalled by [`Session::stop`]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Announce the typing change on `events` when released
    pub(crate) fn notify(mut self, events: broadcast::Sender<ChatEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Release the send now. Returns whether typing status changed.
    pub fn release(mut self) -> bool {
        self.release_once()
    }

    fn release_once(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        let changed = self.session.release(&self.conversation_id, self.seq);
        if changed {
            if let Some(events) = &self.events {
                let _ = events.send(ChatEvent::TypingChanged {
                    conversation_id: self.conversation_id.clone(),
                    typing: false,
                });
            }
        }
        changed
    }
}

impl Drop for GenerationGuard {
    fn drop(&mut self) {
        if !self.released {
            tracing::debug!(
                "Send for {} abandoned before finishing",
                self.conversation_id
            );
            self.release_once();
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    current: Option<Conversation>,
    list: Vec<Conversation>,
    typing: HashSet<String>,
    in_flight: HashMap<String, (u64, CancellationToken)>,
    next_seq: u64,
}

/// A cloneable handle on session state.
///
/// All fields are `Arc`-wrapped, so cloning is cheap and every clone sees
/// the same state.
#[derive(Debug, Clone, Default)]
pub struct Session {
    state: Arc<Mutex<SessionState>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Conversation> {
        self.state.lock().current.clone()
    }

    pub fn current_id(&self) -> Option<String> {
        self.state.lock().current.as_ref().map(|c| c.id.clone())
    }

    pub(crate) fn set_current(&self, conversation: Option<Conversation>) {
        self.state.lock().current = conversation;
    }

    /// Replace the active view if `conversation` is the active one
    pub(crate) fn refresh_current(&self, conversation: &Conversation) {
        let mut state = self.state.lock();
        if state.current.as_ref().is_some_and(|c| c.id == conversation.id) {
            state.current = Some(conversation.clone());
        }
    }

    /// Cached conversation list, most recently updated first
    pub fn list(&self) -> Vec<Conversation> {
        self.state.lock().list.clone()
    }

    pub(crate) fn set_list(&self, list: Vec<Conversation>) {
        self.state.lock().list = list;
    }

    pub(crate) fn upsert_list_entry(&self, conversation: &Conversation) {
        let mut state = self.state.lock();
        match state.list.iter_mut().find(|c| c.id == conversation.id) {
            Some(entry) => *entry = conversation.clone(),
            None => state.list.insert(0, conversation.clone()),
        }
    }

    /// Drop every trace of a conversation, cancelling its in-flight send
    pub(crate) fn forget(&self, conversation_id: &str) {
        let mut state = self.state.lock();
        state.list.retain(|c| c.id != conversation_id);
        if state.current.as_ref().is_some_and(|c| c.id == conversation_id) {
            state.current = None;
        }
        state.typing.remove(conversation_id);
        if let Some((_, token)) = state.in_flight.remove(conversation_id) {
            token.cancel();
        }
    }

    pub fn is_typing(&self, conversation_id: &str) -> bool {
        self.state.lock().typing.contains(conversation_id)
    }

    /// Register a send: mark the conversation typing and hand out a fresh
    /// cancellation token for it.
    pub fn begin(&self, conversation_id: &str) -> GenerationGuard {
        let mut state = self.state.lock();
        state.next_seq += 1;
        let seq = state.next_seq;
        let token = CancellationToken::new();
        if state
            .in_flight
            .insert(conversation_id.to_string(), (seq, token.clone()))
            .is_some()
        {
            tracing::warn!(
                "Conversation {} already has a send in flight",
                conversation_id
            );
        }
        state.typing.insert(conversation_id.to_string());
        GenerationGuard {
            session: self.clone(),
            conversation_id: conversation_id.to_string(),
            seq,
            token,
            events: None,
            released: false,
        }
    }

    /// Release registration `seq`. Returns whether typing status changed.
    fn release(&self, conversation_id: &str, seq: u64) -> bool {
        let mut state = self.state.lock();
        let owns = state
            .in_flight
            .get(conversation_id)
            .is_some_and(|(current, _)| *current == seq);
        if owns {
            state.in_flight.remove(conversation_id);
        }
        if owns || !state.in_flight.contains_key(conversation_id) {
            return state.typing.remove(conversation_id);
        }
        false
    }

    /// Cancel the outstanding send of a conversation, if there is one
    pub fn stop(&self, conversation_id: &str) -> bool {
        let mut state = self.state.lock();
        match state.in_flight.remove(conversation_id) {
            Some((_, token)) => {
                token.cancel();
                state.typing.remove(conversation_id);
                true
            }
            None => false,
        }
    }
}
