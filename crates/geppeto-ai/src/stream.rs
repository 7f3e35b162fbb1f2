//! Assembly of streamed completions into a growing message

use std::future::Future;
use std::pin::Pin;

use eventsource_stream::{EventStreamError, Eventsource};
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::types::{AssembledMessage, Role};

/// Payload that terminates a streamed completion
pub const DONE_SENTINEL: &str = "[DONE]";

/// A stream of raw transport chunks carrying server-sent events
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Lifecycle of one streamed completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    Idle,
    Accumulating,
    Complete,
    Failed,
}

/// Builds an [`AssembledMessage`] out of SSE event payloads.
///
/// Every JSON delta that carries a choice yields one cumulative snapshot.
/// Once the `[DONE]` sentinel has been seen, further input is ignored.
#[derive(Debug)]
pub struct StreamAssembler {
    message: AssembledMessage,
    state: AssemblerState,
}

impl Default for StreamAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self {
            message: AssembledMessage::default(),
            state: AssemblerState::Idle,
        }
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        matches!(
            self.state,
            AssemblerState::Complete | AssemblerState::Failed
        )
    }

    /// The result accumulated so far
    pub fn message(&self) -> &AssembledMessage {
        &self.message
    }

    /// Apply the `data` of one event, returning a snapshot if it advanced
    /// the message
    pub fn push_event(&mut self, data: &str) -> Option<AssembledMessage> {
        if self.is_done() {
            return None;
        }
        let payload = data.trim();
        if payload == DONE_SENTINEL {
            self.state = AssemblerState::Complete;
            return None;
        }
        if payload.is_empty() {
            return None;
        }
        match serde_json::from_str::<StreamChunk>(payload) {
            Ok(chunk) => self.apply_chunk(chunk).then(|| self.message.clone()),
            Err(e) => {
                tracing::warn!("Skipping malformed stream event: {} ({})", e, payload);
                None
            }
        }
    }

    /// Signal end of stream. A stream that ended without the sentinel
    /// counts as complete.
    pub fn finish(&mut self) {
        if !self.is_done() {
            self.state = AssemblerState::Complete;
        }
    }

    /// Mark the stream as failed by a transport error
    pub fn fail(&mut self) {
        self.state = AssemblerState::Failed;
    }

    /// Final message with surrounding whitespace trimmed from the text
    pub fn into_message(self) -> AssembledMessage {
        let mut message = self.message;
        message.text = message.text.trim().to_string();
        message
    }

    /// Returns false for chunks without a choice (filter results, keep-alives)
    fn apply_chunk(&mut self, chunk: StreamChunk) -> bool {
        if let Some(id) = chunk.id.filter(|id| !id.is_empty()) {
            if self.message.id.is_empty() {
                self.message.id = id;
            }
        }
        let Some(choice) = chunk.choices.into_iter().next() else {
            return false;
        };
        self.state = AssemblerState::Accumulating;
        self.message.delta = None;
        if let Some(role) = choice.delta.role {
            self.message.role = role;
        }
        if let Some(content) = choice.delta.content {
            self.message.text.push_str(&content);
            self.message.delta = Some(content);
        }
        true
    }
}

impl From<EventStreamError<Error>> for Error {
    fn from(error: EventStreamError<Error>) -> Self {
        match error {
            EventStreamError::Transport(e) => e,
            other => Error::Sse(other.to_string()),
        }
    }
}

/// Drive a chunk stream to completion.
///
/// Chunks are framed into events by `eventsource-stream`, which buffers
/// lines and UTF-8 sequences split across chunks. `on_progress` receives
/// each cumulative snapshot and is awaited before the next event is read,
/// so callbacks see strictly growing text. Cancelling `cancel` abandons the
/// stream with [`Error::Aborted`].
pub async fn assemble<S, B, F, Fut, E>(
    chunks: S,
    cancel: &CancellationToken,
    mut on_progress: F,
) -> std::result::Result<AssembledMessage, E>
where
    S: Stream<Item = Result<B>>,
    B: AsRef<[u8]>,
    F: FnMut(AssembledMessage) -> Fut,
    Fut: Future<Output = std::result::Result<(), E>>,
    E: From<Error>,
{
    let mut assembler = StreamAssembler::new();
    let events = chunks.eventsource();
    tokio::pin!(events);

    while !assembler.is_done() {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Aborted.into()),
            next = events.next() => next,
        };

        let snapshot = match next {
            Some(Ok(event)) => assembler.push_event(&event.data),
            Some(Err(e)) => {
                assembler.fail();
                return Err(Error::from(e).into());
            }
            None => {
                assembler.finish();
                None
            }
        };

        if let Some(snapshot) = snapshot {
            if cancel.is_cancelled() {
                return Err(Error::Aborted.into());
            }
            on_progress(snapshot).await?;
        }
    }

    Ok(assembler.into_message())
}

/// Parse a complete non-streaming response body
pub fn parse_completion(body: &str) -> Result<AssembledMessage> {
    let response: CompletionResponse = serde_json::from_str(body)?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::UnexpectedResponse("response has no choices".into()))?;
    Ok(AssembledMessage {
        id: response.id,
        role: choice.message.role.unwrap_or_default(),
        text: choice.message.content.unwrap_or_default().trim().to_string(),
        delta: None,
    })
}

// Wire types

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    id: String,
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    content: Option<String>,
}


#[cfg(test)]
mod tests {
    use super::*;

    fn delta_json(id: &str, content: &str) -> String {
        serde_json::json!({"id": id, "choices": [{"delta": {"content": content}}]}).to_string()
    }

    fn delta_event(id: &str, content: &str) -> String {
        format!("data: {}\n\n", delta_json(id, content))
    }

    fn chunk_stream(chunks: Vec<Vec<u8>>) -> impl Stream<Item = Result<Vec<u8>>> {
        futures::stream::iter(chunks.into_iter().map(Ok))
    }

    fn text_chunks(chunks: &[String]) -> Vec<Vec<u8>> {
        chunks.iter().map(|c| c.as_bytes().to_vec()).collect()
    }

    async fn assemble_all(chunks: Vec<Vec<u8>>) -> (Result<AssembledMessage>, Vec<String>) {
        let cancel = CancellationToken::new();
        let mut seen = Vec::new();
        let result = assemble(chunk_stream(chunks), &cancel, |snapshot| {
            seen.push(snapshot.text);
            async { Ok(()) }
        })
        .await;
        (result, seen)
    }

    #[test]
    fn test_push_event_accumulates() {
        let mut assembler = StreamAssembler::new();
        assert_eq!(assembler.state(), AssemblerState::Idle);

        let snap = assembler
            .push_event(r#"{"id":"c1","choices":[{"delta":{"role":"assistant"}}]}"#)
            .unwrap();
        assert_eq!(snap.role, Role::Assistant);
        assert_eq!(snap.delta, None);
        assert_eq!(assembler.state(), AssemblerState::Accumulating);

        let snap = assembler.push_event(&delta_json("c1", "Hi")).unwrap();
        assert_eq!(snap.text, "Hi");
        assert_eq!(snap.delta.as_deref(), Some("Hi"));
        assert_eq!(snap.id, "c1");

        assert!(assembler.push_event("[DONE]").is_none());
        assert_eq!(assembler.state(), AssemblerState::Complete);
        // input after the sentinel is ignored
        assert!(assembler.push_event(&delta_json("c1", "!")).is_none());
        assert_eq!(assembler.into_message().text, "Hi");
    }

    #[test]
    fn test_first_id_is_kept() {
        let mut assembler = StreamAssembler::new();
        assembler.push_event(&delta_json("first", "a"));
        assembler.push_event(&delta_json("second", "b"));
        assert_eq!(assembler.message().id, "first");
    }

    #[test]
    fn test_chunk_without_choices_is_not_a_snapshot() {
        let mut assembler = StreamAssembler::new();
        assert!(assembler.push_event(r#"{"id":"","choices":[]}"#).is_none());
        assert!(
            assembler
                .push_event(r#"{"id":"","prompt_filter_results":[{"prompt_index":0}]}"#)
                .is_none()
        );
        assert_eq!(assembler.state(), AssemblerState::Idle);

        let snap = assembler.push_event(&delta_json("chatcmpl-1", "Hel")).unwrap();
        assert_eq!(snap.id, "chatcmpl-1");
        assert_eq!(snap.text, "Hel");
    }

    #[test]
    fn test_malformed_event_is_skipped() {
        let mut assembler = StreamAssembler::new();
        assert!(assembler.push_event("{not json").is_none());
        assert_eq!(assembler.push_event(&delta_json("c1", "ok")).unwrap().text, "ok");
    }

    #[tokio::test]
    async fn test_event_split_across_chunks() {
        let event = delta_event("c1", "Hello");
        let (a, b) = event.split_at(event.len() / 2);
        let (result, seen) = assemble_all(text_chunks(&[a.to_string(), b.to_string()])).await;
        assert_eq!(result.unwrap().text, "Hello");
        assert_eq!(seen, vec!["Hello".to_string()]);
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_chunks() {
        let event = delta_event("c1", "héllo");
        let bytes = event.as_bytes();
        let at = event.find('é').unwrap() + 1;
        let (result, _) = assemble_all(vec![bytes[..at].to_vec(), bytes[at..].to_vec()]).await;
        assert_eq!(result.unwrap().text, "héllo");
    }

    #[tokio::test]
    async fn test_crlf_framing_and_comments() {
        let body = format!(
            ": keep-alive\r\n\r\ndata: {}\r\n\r\ndata: [DONE]\r\n\r\n",
            delta_json("c1", "ok")
        );
        let (result, seen) = assemble_all(text_chunks(&[body])).await;
        assert_eq!(result.unwrap().text, "ok");
        assert_eq!(seen.len(), 1);
    }

    #[tokio::test]
    async fn test_stream_without_sentinel_completes() {
        let (result, _) = assemble_all(text_chunks(&[delta_event("c1", "tail")])).await;
        assert_eq!(result.unwrap().text, "tail");
    }

    #[tokio::test]
    async fn test_assemble_reports_cumulative_progress() {
        let chunks = text_chunks(&[
            delta_event("c1", "He"),
            delta_event("c1", "llo"),
            "data: [DONE]\n\n".to_string(),
        ]);
        let (result, seen) = assemble_all(chunks).await;
        assert_eq!(result.unwrap().text, "Hello");
        assert_eq!(seen, vec!["He".to_string(), "Hello".to_string()]);
    }

    #[tokio::test]
    async fn test_assemble_trims_final_text() {
        let chunks = text_chunks(&[delta_event("c1", "\n\nAnswer "), delta_event("c1", "here\n")]);
        let (result, _) = assemble_all(chunks).await;
        assert_eq!(result.unwrap().text, "Answer here");
    }

    #[tokio::test]
    async fn test_assemble_transport_error_fails() {
        let chunks: Vec<Result<Vec<u8>>> = vec![
            Ok(delta_event("c1", "He").into_bytes()),
            Err(Error::Status {
                status: 500,
                body: "boom".into(),
            }),
        ];
        let cancel = CancellationToken::new();
        let result: Result<AssembledMessage> =
            assemble(futures::stream::iter(chunks), &cancel, |_| async { Ok(()) }).await;
        assert!(matches!(result, Err(Error::Status { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_assemble_cancelled() {
        let cancel = CancellationToken::new();
        let never = futures::stream::pending::<Result<Vec<u8>>>();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let result: Result<AssembledMessage> = assemble(never, &cancel, |_| async { Ok(()) }).await;
        assert!(matches!(result, Err(Error::Aborted)));
    }

    #[tokio::test]
    async fn test_assemble_callback_error_propagates() {
        let chunks = text_chunks(&[delta_event("c1", "x")]);
        let cancel = CancellationToken::new();
        let result: Result<AssembledMessage> = assemble(chunk_stream(chunks), &cancel, |_| async {
            Err(Error::UnexpectedResponse("store failed".into()))
        })
        .await;
        assert!(matches!(result, Err(Error::UnexpectedResponse(_))));
    }

    #[test]
    fn test_framing_errors_become_sse_errors() {
        let invalid = String::from_utf8(vec![b'a', 0xFF]).unwrap_err();
        let error = Error::from(EventStreamError::<Error>::Utf8(invalid));
        assert!(matches!(error, Error::Sse(_)));

        let error = Error::from(EventStreamError::Transport(Error::Aborted));
        assert!(matches!(error, Error::Aborted));
    }

    #[test]
    fn test_parse_completion() {
        let body = r#"{"id":"cmpl-1","choices":[{"message":{"role":"assistant","content":" Title: Greetings \n"}}]}"#;
        let message = parse_completion(body).unwrap();
        assert_eq!(message.id, "cmpl-1");
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.text, "Title: Greetings");
    }

    #[test]
    fn test_parse_completion_without_choices() {
        let err = parse_completion(r#"{"id":"x","choices":[]}"#).unwrap_err();
        assert!(matches!(err, Error::UnexpectedResponse(_)));
    }
}
