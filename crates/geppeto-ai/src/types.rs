//! Core types for chat completion requests

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Message roles understood by the completion endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    #[default]
    Assistant,
}

impl Role {
    /// Get the role as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `{role, content}` entry of a completion request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Model definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Model identifier sent to the endpoint (e.g., "gpt-3.5-turbo")
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Prompt budget in tokens; requests are trimmed to fit this
    pub context_window: u32,
    /// Maximum output tokens
    pub max_tokens: u32,
}

/// Minimum `max_tokens` the endpoint accepts for a completion
pub const MIN_MAX_TOKENS: u32 = 20;

/// A completion request.
///
/// The cancellation token and the progress callback are not part of the
/// request; they travel as typed arguments to
/// [`CompletionEndpoint::stream`](crate::providers::CompletionEndpoint::stream)
/// and [`assemble`](crate::stream::assemble).
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub stream: bool,
}

impl CompletionRequest {
    /// Create a streaming request with no sampling overrides
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: None,
            temperature: None,
            stream: true,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Reject requests the endpoint would refuse anyway
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(Error::InvalidRequest("model must not be empty".into()));
        }
        if self.messages.is_empty() {
            return Err(Error::InvalidRequest("messages must not be empty".into()));
        }
        if let Some(max_tokens) = self.max_tokens {
            if max_tokens < MIN_MAX_TOKENS {
                return Err(Error::InvalidRequest(format!(
                    "max_tokens must be at least {}, got {}",
                    MIN_MAX_TOKENS, max_tokens
                )));
            }
        }
        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(Error::InvalidRequest(format!(
                    "temperature must be within 0.0..=2.0, got {}",
                    temperature
                )));
            }
        }
        Ok(())
    }
}

/// Cumulative result of a completion, streamed or not
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledMessage {
    /// Response id reported by the endpoint
    pub id: String,
    pub role: Role,
    /// Text accumulated so far
    pub text: String,
    /// The most recent content fragment
    pub delta: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest::new("gpt-3.5-turbo", vec![ChatMessage::user("hi")])
    }

    #[test]
    fn test_validate_ok() {
        assert!(request().validate().is_ok());
        assert!(
            request()
                .with_max_tokens(Some(20))
                .with_temperature(Some(0.0))
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_validate_rejects_empty_messages() {
        let req = CompletionRequest::new("gpt-3.5-turbo", vec![]);
        assert!(matches!(req.validate(), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_validate_rejects_small_max_tokens() {
        let req = request().with_max_tokens(Some(5));
        assert!(matches!(req.validate(), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_validate_rejects_temperature_out_of_range() {
        let req = request().with_temperature(Some(2.5));
        assert!(matches!(req.validate(), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_request_serialization_skips_unset_fields() {
        let json = serde_json::to_value(request().with_stream(false)).unwrap();
        assert_eq!(json["model"], "gpt-3.5-turbo");
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("temperature").is_none());
    }
}
